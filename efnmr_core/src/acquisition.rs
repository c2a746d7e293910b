//! Acquisition orchestration: polarize, arm the pulse and capture engines together, wait for the
//! capture with a deadline, then put every output back to its safe state.
//!
//! The orchestrator only talks to hardware through the traits in this module. The firmware
//! implements them on its board context, and the tests implement them on a recording mock.

use embedded_hal::delay::DelayNs;
#[cfg(feature = "defmt")]
use defmt::{debug, error, info, warn};
#[cfg(not(feature = "defmt"))]
use log::{debug, error, info, warn};

use crate::{
    buffer::{CaptureSummary, Records, SampleBuffer},
    config::Config,
    error::{AcquisitionError, SequencerFault},
    request::{AcquisitionRequest, EffectiveRequest},
    sequencer::{executed_echoes, SequencerWords},
    timing::{FrontEnd, TimingPlan},
};

/// Plain on/off outputs around the coil.
pub trait OutputSwitches {
    /// Status indicator, lit for the whole acquisition
    fn set_status(&mut self, on: bool);
    /// Pre-polarization field driver
    fn set_polarization(&mut self, on: bool);
    /// Receive-path isolation switch. `true` connects the amplifier to the converter.
    fn set_isolation(&mut self, on: bool);
}

/// The autonomous pulse sequencer.
pub trait PulseEngine {
    /// Disable the state machine, flush its FIFOs and trigger flag, restart it at the program
    /// entry with the pulse pin low, push `words` and enable it.
    fn restart(&mut self, words: SequencerWords) -> Result<(), SequencerFault>;
    /// Disable the state machine and force the pulse pin low. Safe when already stopped.
    fn stop(&mut self);
}

/// Free-running converter plus the transfer engine that drains it.
pub trait CaptureEngine {
    /// Take ownership of `buffer` as the transfer destination for `buffer.len()` samples.
    /// Any transfer still in flight is disabled first.
    fn configure(&mut self, buffer: SampleBuffer);
    /// Set the sample clock and input, leaving conversion paused.
    fn arm_front_end(&mut self, front_end: FrontEnd);
    /// Start free-running conversion
    fn start_conversion(&mut self);
    /// Transfer count has reached zero
    fn is_complete(&mut self) -> bool;
    /// Stop conversion and drain the converter FIFO. Safe when already stopped.
    fn stop_conversion(&mut self);
    /// Halt the transfer engine and hand the buffer back. `None` when nothing was configured.
    ///
    /// A transfer that has not finished is aborted, never waited on, so teardown after a stall
    /// returns promptly.
    fn disable(&mut self) -> Option<SampleBuffer>;
}

/// Free-running microsecond clock.
pub trait Monotonic {
    /// Microseconds since an arbitrary epoch
    fn now_us(&mut self) -> u64;
}

/// Everything the orchestrator needs from a board.
pub trait Hardware: OutputSwitches + PulseEngine + CaptureEngine + Monotonic + DelayNs {}

impl<T> Hardware for T where T: OutputSwitches + PulseEngine + CaptureEngine + Monotonic + DelayNs {}

/// Orchestrator state. Advances strictly forward during a request and always returns to `Idle`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Ready for a request
    #[default]
    Idle,
    /// Pre-polarization field on
    Polarizing,
    /// Compiling timing and programming the capture path
    Configuring,
    /// Isolation closed, sequencer and converter starting
    Armed,
    /// Polling for transfer completion
    Waiting,
    /// Caller holds the captured [`Waveform`]
    Transmitting,
}

/// Sequencing authority over one board.
#[derive(Debug)]
pub struct Orchestrator {
    /// Tunables
    config: Config,
    /// Sample pool, lent to the capture engine during a run
    buffer: Option<SampleBuffer>,
    /// Current step
    phase: Phase,
}

impl Orchestrator {
    /// Take ownership of the sample pool. The sample count cap shrinks to the pool if the pool is
    /// smaller than the configured limit.
    pub fn new(mut config: Config, buffer: SampleBuffer) -> Self {
        config.limits.buffer_cap = config.limits.buffer_cap.min(buffer.capacity());
        Self {
            config,
            buffer: Some(buffer),
            phase: Phase::Idle,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current step
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Statistics over the most recent capture. `None` before the first one, or if it was empty.
    pub fn last_summary(&self) -> Option<CaptureSummary> {
        self.buffer
            .as_ref()
            .and_then(|buffer| CaptureSummary::of(buffer.samples()))
    }

    /// Clamp `request` into the ranges this orchestrator supports
    pub fn effective(&self, request: &AcquisitionRequest) -> EffectiveRequest {
        self.config
            .limits
            .apply(request, self.config.max_tau_us())
    }

    /// Run one acquisition to completion.
    ///
    /// Teardown has run by the time this returns, whether or not the capture finished. On success
    /// the orchestrator stays in [`Phase::Transmitting`] until the returned [`Waveform`] is dropped.
    pub fn run<H: Hardware>(
        &mut self,
        hw: &mut H,
        request: &AcquisitionRequest,
    ) -> Result<Waveform<'_>, AcquisitionError> {
        let effective = self.effective(request);
        if effective.was_clamped() {
            info!("Request clamped to {:?}", effective);
        }

        let outcome = self.acquire(hw, &effective);
        self.teardown(hw);

        if let Err(err) = outcome {
            match err {
                AcquisitionError::Stalled { .. } => error!("Acquisition stalled: {}", err),
                _ => warn!("Acquisition failed: {}", err),
            }
            self.enter(Phase::Idle);
            return Err(err);
        }

        let Self { buffer, phase, .. } = self;
        match buffer.as_ref() {
            Some(samples) => {
                debug!("Phase {:?} -> {:?}", phase, Phase::Transmitting);
                *phase = Phase::Transmitting;
                Ok(Waveform {
                    samples,
                    effective,
                    phase,
                })
            }
            None => {
                *phase = Phase::Idle;
                Err(AcquisitionError::BufferUnavailable)
            }
        }
    }

    /// Steps from polarization to completion. Stops at the first failure and leaves the hardware
    /// for [`teardown`](Self::teardown).
    fn acquire<H: Hardware>(
        &mut self,
        hw: &mut H,
        effective: &EffectiveRequest,
    ) -> Result<(), AcquisitionError> {
        self.enter(Phase::Polarizing);
        hw.set_status(true);
        hw.set_polarization(true);
        hw.delay_ms(self.config.polarization_ms);
        hw.set_polarization(false);

        self.enter(Phase::Configuring);
        let plan = TimingPlan::compile(&self.config.timing, &self.config.front_end, effective)?;
        let echoes = executed_echoes(effective, self.config.fid_echo_train);
        let words = SequencerWords::encode(&plan, echoes);
        debug!("Compiled {:?} into {:?}", plan, words);

        let mut buffer = self
            .buffer
            .take()
            .ok_or(AcquisitionError::BufferUnavailable)?;
        buffer.set_len(effective.sample_count());
        hw.configure(buffer);
        hw.arm_front_end(FrontEnd {
            divider: plan.adc_divider,
            channel: self.config.front_end.channel,
        });

        self.enter(Phase::Armed);
        hw.set_isolation(true);
        hw.delay_us(self.config.settle_us);
        hw.restart(words)?;
        let armed_at = hw.now_us();
        hw.start_conversion();

        self.enter(Phase::Waiting);
        let deadline_us = effective.capture_duration_us() + self.config.stall_margin_us;
        loop {
            if hw.is_complete() {
                return Ok(());
            }
            let waited_us = hw.now_us().saturating_sub(armed_at);
            if waited_us >= deadline_us {
                return Err(AcquisitionError::Stalled { waited_us });
            }
            hw.delay_us(self.config.poll_interval_us);
        }
    }

    /// Stop pulsing and sampling before releasing isolation. Every step tolerates hardware that
    /// was never started.
    fn teardown<H: Hardware>(&mut self, hw: &mut H) {
        hw.stop();
        hw.stop_conversion();
        if let Some(buffer) = hw.disable() {
            self.buffer = Some(buffer);
        }
        hw.set_isolation(false);
        hw.set_status(false);
        debug!("Teardown complete");
    }

    /// Advance to `phase`
    fn enter(&mut self, phase: Phase) {
        debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// A completed capture, borrowed from the orchestrator until it has been transmitted.
#[derive(Debug)]
pub struct Waveform<'a> {
    /// Filled pool
    samples: &'a SampleBuffer,
    /// Parameters actually used
    effective: EffectiveRequest,
    /// Reset to idle on drop
    phase: &'a mut Phase,
}

impl Waveform<'_> {
    /// Parameters actually used for the capture
    pub fn effective(&self) -> &EffectiveRequest {
        &self.effective
    }

    /// Raw samples
    pub fn samples(&self) -> &[u16] {
        self.samples.samples()
    }

    /// Samples with reconstructed timestamps
    pub fn records(&self) -> Records<'_> {
        self.samples.records(self.effective.sample_interval_us())
    }
}

impl Drop for Waveform<'_> {
    fn drop(&mut self) {
        *self.phase = Phase::Idle;
    }
}
