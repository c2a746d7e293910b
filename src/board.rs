//! Explicit hardware context handed to the orchestrator
use efnmr_core::{
    acquisition::{CaptureEngine, Monotonic, OutputSwitches, PulseEngine},
    buffer::SampleBuffer,
    error::SequencerFault,
    sequencer::SequencerWords,
    timing::FrontEnd,
};
use embedded_hal::delay::DelayNs;
use rp2040_hal::Timer;

use crate::{capture::Capture, components::Switches, sequencer::PulseSequencer};

/// Every peripheral an acquisition touches. Built once in `main` and lent to the orchestrator.
pub struct Board {
    /// Status LED, polarization and isolation outputs
    pub switches: Switches,
    /// PIO pulse program
    pub sequencer: PulseSequencer,
    /// ADC and DMA
    pub capture: Capture,
    /// 1 MHz system timer
    pub timer: Timer,
}

impl OutputSwitches for Board {
    fn set_status(&mut self, on: bool) {
        self.switches.set_status(on);
    }

    fn set_polarization(&mut self, on: bool) {
        self.switches.set_polarization(on);
    }

    fn set_isolation(&mut self, on: bool) {
        self.switches.set_isolation(on);
    }
}

impl PulseEngine for Board {
    fn restart(&mut self, words: SequencerWords) -> Result<(), SequencerFault> {
        self.sequencer.restart(words)
    }

    fn stop(&mut self) {
        self.sequencer.stop();
    }
}

impl CaptureEngine for Board {
    fn configure(&mut self, buffer: SampleBuffer) {
        self.capture.configure(buffer);
    }

    fn arm_front_end(&mut self, front_end: FrontEnd) {
        self.capture.arm_front_end(front_end);
    }

    fn start_conversion(&mut self) {
        self.capture.start_conversion();
    }

    fn is_complete(&mut self) -> bool {
        self.capture.is_complete()
    }

    fn stop_conversion(&mut self) {
        self.capture.stop_conversion();
    }

    fn disable(&mut self) -> Option<SampleBuffer> {
        self.capture.disable()
    }
}

impl Monotonic for Board {
    fn now_us(&mut self) -> u64 {
        self.timer.get_counter().ticks()
    }
}

impl DelayNs for Board {
    fn delay_ns(&mut self, ns: u32) {
        self.timer.delay_ns(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.timer.delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.timer.delay_ms(ms);
    }
}
