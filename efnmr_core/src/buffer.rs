//! Sample storage shared between the transfer engine and the response stream.

use core::iter::Enumerate;

/// Pre-allocated sample pool with an active length.
///
/// The pool is allocated once (the firmware uses [`cortex_m::singleton!`]) and lent to the DMA
/// channel by value for each capture, so the processor cannot touch it while the transfer engine
/// owns it.
///
/// [`cortex_m::singleton!`]: https://docs.rs/cortex-m/latest/cortex_m/macro.singleton.html
#[derive(Debug)]
pub struct SampleBuffer {
    /// Whole pool
    data: &'static mut [u16],
    /// Samples in the active capture
    len: usize,
}

impl SampleBuffer {
    /// Wrap `pool` with an empty active region
    pub fn new(pool: &'static mut [u16]) -> Self {
        Self { data: pool, len: 0 }
    }

    /// Largest capture this pool can hold
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Resize the active region for the next capture, up to [`capacity`](Self::capacity).
    /// Returns the length actually set.
    pub fn set_len(&mut self, len: usize) -> usize {
        self.len = len.min(self.data.len());
        self.len
    }

    /// Samples in the active region
    pub fn len(&self) -> usize {
        self.len
    }

    /// Active region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes in the active region, two per sample
    pub fn byte_len(&self) -> usize {
        self.len * core::mem::size_of::<u16>()
    }

    /// Raw samples in the active region
    pub fn samples(&self) -> &[u16] {
        &self.data[..self.len]
    }

    /// Samples paired with their reconstructed timestamp `index × interval_us`
    pub fn records(&self, interval_us: u32) -> Records<'_> {
        Records {
            inner: self.samples().iter().enumerate(),
            interval_us,
        }
    }

    /// Overwrite the active region, for hosts with no transfer engine
    #[cfg(test)]
    pub(crate) fn fill(&mut self, mut f: impl FnMut(usize) -> u16) {
        for (i, sample) in self.data[..self.len].iter_mut().enumerate() {
            *sample = f(i);
        }
    }
}

// SAFETY: the pointer and length describe the active region of a `'static` slice that this value
// owns exclusively. Moving `SampleBuffer` does not move the pool.
unsafe impl embedded_dma::WriteBuffer for SampleBuffer {
    type Word = u16;

    unsafe fn write_buffer(&mut self) -> (*mut Self::Word, usize) {
        (self.data.as_mut_ptr(), self.len)
    }
}

/// One line of the response stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleRecord {
    /// Reconstructed from the sample index, not measured
    pub time_us: u64,
    /// Raw converter value
    pub value: u16,
}

/// Iterator returned by [`SampleBuffer::records`]
#[derive(Debug, Clone)]
pub struct Records<'a> {
    /// Index and sample
    inner: Enumerate<core::slice::Iter<'a, u16>>,
    /// Timestamp step
    interval_us: u32,
}

impl Iterator for Records<'_> {
    type Item = SampleRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(index, &value)| SampleRecord {
            time_us: index as u64 * u64::from(self.interval_us),
            value,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Records<'_> {}

/// Summary statistics of a capture, for trace logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureSummary {
    /// Smallest sample
    pub min: u16,
    /// Largest sample
    pub max: u16,
    /// Integer mean
    pub mean: u16,
}

impl CaptureSummary {
    /// `None` for an empty capture
    pub fn of(samples: &[u16]) -> Option<Self> {
        let (&first, _) = samples.split_first()?;
        let (min, max, sum) = samples.iter().fold(
            (first, first, 0u64),
            |(min, max, sum), &sample| (min.min(sample), max.max(sample), sum + u64::from(sample)),
        );
        Some(Self {
            min,
            max,
            mean: (sum / samples.len() as u64) as u16,
        })
    }
}
