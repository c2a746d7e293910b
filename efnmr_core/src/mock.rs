//! Recording board for host tests.

use embedded_hal::delay::DelayNs;
use std::{boxed::Box, vec, vec::Vec};

use crate::{
    acquisition::{CaptureEngine, Monotonic, OutputSwitches, PulseEngine},
    buffer::SampleBuffer,
    error::SequencerFault,
    sequencer::SequencerWords,
    timing::FrontEnd,
};

/// Hardware call, in the order the orchestrator made it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Status indicator switched
    Status(bool),
    /// Polarization driver switched
    Polarization(bool),
    /// Isolation switch moved
    Isolation(bool),
    /// Blocking delay
    Delay { us: u64 },
    /// Transfer programmed for `len` samples
    Configure { len: usize },
    /// Converter clock and input set
    ArmFrontEnd(FrontEnd),
    /// Sequencer restarted with these words
    Restart(SequencerWords),
    /// Conversion started
    StartConversion,
    /// Sequencer stopped
    StopSequencer,
    /// Conversion stopped
    StopConversion,
    /// Finished transfer handed its buffer back
    Disable,
    /// Unfinished transfer cut short
    Abort,
}

/// Board double that records every call and tracks which outputs are live
#[derive(Debug, Default)]
pub struct MockBoard {
    /// Calls so far
    pub events: Vec<Event>,
    /// Capture finishes this long after conversion starts. `None` never finishes.
    pub complete_after_us: Option<u64>,
    /// Pulse engine refuses its words
    pub reject_words: bool,
    /// Simulated clock
    now_ns: u64,
    /// Status indicator
    status: bool,
    /// Polarization driver
    polarization: bool,
    /// Isolation switch
    isolation: bool,
    /// Sequencer enabled
    sequencer_running: bool,
    /// Clock reading when conversion started
    converting_since: Option<u64>,
    /// Buffer lent to the transfer engine
    transfer: Option<SampleBuffer>,
    /// Current transfer has reached its count
    transfer_done: bool,
}

impl MockBoard {
    /// Board whose capture finishes `us` after conversion starts
    pub fn completing_after(us: u64) -> Self {
        Self {
            complete_after_us: Some(us),
            ..Self::default()
        }
    }

    /// Board whose capture never finishes
    pub fn stalling() -> Self {
        Self::default()
    }

    /// Leaked sample pool of `capacity` zeros
    pub fn pool(capacity: usize) -> SampleBuffer {
        SampleBuffer::new(Box::leak(vec![0u16; capacity].into_boxed_slice()))
    }

    /// Every output off and nothing owned by the capture path
    pub fn is_safe(&self) -> bool {
        !self.status
            && !self.polarization
            && !self.isolation
            && !self.sequencer_running
            && self.converting_since.is_none()
            && self.transfer.is_none()
    }

    /// Move the clock forward and record the delay
    fn advance(&mut self, ns: u64) {
        self.now_ns += ns;
        self.events.push(Event::Delay { us: ns / 1_000 });
    }
}

impl OutputSwitches for MockBoard {
    fn set_status(&mut self, on: bool) {
        self.status = on;
        self.events.push(Event::Status(on));
    }

    fn set_polarization(&mut self, on: bool) {
        self.polarization = on;
        self.events.push(Event::Polarization(on));
    }

    fn set_isolation(&mut self, on: bool) {
        self.isolation = on;
        self.events.push(Event::Isolation(on));
    }
}

impl PulseEngine for MockBoard {
    fn restart(&mut self, words: SequencerWords) -> Result<(), SequencerFault> {
        if self.reject_words {
            return Err(SequencerFault::FifoFull);
        }
        self.sequencer_running = true;
        self.events.push(Event::Restart(words));
        Ok(())
    }

    fn stop(&mut self) {
        self.sequencer_running = false;
        self.events.push(Event::StopSequencer);
    }
}

impl CaptureEngine for MockBoard {
    fn configure(&mut self, buffer: SampleBuffer) {
        self.events.push(Event::Configure { len: buffer.len() });
        self.transfer = Some(buffer);
        self.transfer_done = false;
    }

    fn arm_front_end(&mut self, front_end: FrontEnd) {
        self.events.push(Event::ArmFrontEnd(front_end));
    }

    fn start_conversion(&mut self) {
        self.converting_since = Some(self.now_us());
        self.events.push(Event::StartConversion);
    }

    fn is_complete(&mut self) -> bool {
        let now = self.now_us();
        let Some(transfer) = self.transfer.as_mut() else {
            return false;
        };
        let done = transfer.is_empty()
            || matches!(
                (self.converting_since, self.complete_after_us),
                (Some(start), Some(after)) if now - start >= after
            );
        if done {
            // 12-bit ramp
            transfer.fill(|i| (i % 4096) as u16);
            self.transfer_done = true;
        }
        done
    }

    fn stop_conversion(&mut self) {
        self.converting_since = None;
        self.events.push(Event::StopConversion);
    }

    fn disable(&mut self) -> Option<SampleBuffer> {
        let transfer = self.transfer.take();
        if transfer.is_some() && !core::mem::take(&mut self.transfer_done) {
            self.events.push(Event::Abort);
        } else {
            self.events.push(Event::Disable);
        }
        transfer
    }
}

impl Monotonic for MockBoard {
    fn now_us(&mut self) -> u64 {
        self.now_ns / 1_000
    }
}

impl DelayNs for MockBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.advance(u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance(u64::from(us) * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(u64::from(ms) * 1_000_000);
    }
}
