//! Acquisition requests as received, and the clamped values actually used.

use core::fmt;

/// Pulse sequence family selected by the first field of a command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceType {
    /// Free induction decay: one 90° excitation
    Fid,
    /// Carr-Purcell-Meiboom-Gill echo train
    Cpmg,
}

impl SequenceType {
    /// Keyword used on the wire
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Fid => "FID",
            Self::Cpmg => "CPMG",
        }
    }

    /// Match a wire keyword exactly (case sensitive)
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "FID" => Some(Self::Fid),
            "CPMG" => Some(Self::Cpmg),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A validated command record, before any range clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionRequest {
    /// Sequence family
    pub sequence_type: SequenceType,
    /// Interval between samples (`sleep_us` on the wire)
    pub sample_interval_us: u32,
    /// Samples requested (`data_size` on the wire)
    pub sample_count: u32,
    /// Half echo spacing
    pub tau_us: u32,
    /// Refocusing pulses requested
    pub echo_count: u32,
}

/// Supported ranges. Values outside are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Limits {
    /// Largest sample count the pool can hold
    pub buffer_cap: usize,
    /// Conversion-time floor of the ADC
    pub min_interval_us: u32,
    /// Largest interval the 16-bit integer divider can express
    pub max_interval_us: u32,
}

impl Limits {
    /// Default sample pool size (40 kB of RAM)
    pub const BUFFER_CAP: usize = 20_000;

    /// Clamp `request` into range. `max_tau_us` comes from the pulse engine counter width, see
    /// [`TimingConfig::max_tau_us`](crate::timing::TimingConfig::max_tau_us).
    pub fn apply(&self, request: &AcquisitionRequest, max_tau_us: u32) -> EffectiveRequest {
        let sample_interval_us = request
            .sample_interval_us
            .clamp(self.min_interval_us, self.max_interval_us);
        let cap = u32::try_from(self.buffer_cap).unwrap_or(u32::MAX);
        let sample_count = request.sample_count.min(cap);
        let tau_us = request.tau_us.min(max_tau_us);

        EffectiveRequest {
            sequence_type: request.sequence_type,
            sample_interval_us,
            sample_count: sample_count as usize,
            tau_us,
            echo_count: request.echo_count,
            clamped: sample_interval_us != request.sample_interval_us
                || sample_count != request.sample_count
                || tau_us != request.tau_us,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            buffer_cap: Self::BUFFER_CAP,
            min_interval_us: 2,
            max_interval_us: 1365,
        }
    }
}

/// Parameters after clamping. Only [`Limits::apply`] creates these, so every instance is in range
/// for the limits that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EffectiveRequest {
    /// FID or CPMG
    sequence_type: SequenceType,
    /// Within the converter's range
    sample_interval_us: u32,
    /// At most the pool size
    sample_count: usize,
    /// Fits the 32-bit delay counter
    tau_us: u32,
    /// Passed through unchanged
    echo_count: u32,
    /// Some field differed from the request
    clamped: bool,
}

impl EffectiveRequest {
    /// Sequence family
    pub fn sequence_type(&self) -> SequenceType {
        self.sequence_type
    }

    /// Interval between samples, after clamping
    pub fn sample_interval_us(&self) -> u32 {
        self.sample_interval_us
    }

    /// Samples that will be captured and streamed
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Half echo spacing, after clamping
    pub fn tau_us(&self) -> u32 {
        self.tau_us
    }

    /// Echoes as requested. Whether they are all executed depends on the sequence shape.
    pub fn echo_count(&self) -> u32 {
        self.echo_count
    }

    /// At least one field differs from the request
    pub fn was_clamped(&self) -> bool {
        self.clamped
    }

    /// Nominal capture duration, used to size the stall deadline
    pub fn capture_duration_us(&self) -> u64 {
        self.sample_count as u64 * u64::from(self.sample_interval_us)
    }
}
