//! Every tunable of the controller in one place.

use crate::{
    request::Limits,
    timing::{FrontEndConfig, TimingConfig},
};

/// Controller configuration. [`Default`] reproduces the bench instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Larmor frequency and pulse engine clock
    pub timing: TimingConfig,
    /// Converter clock and input
    pub front_end: FrontEndConfig,
    /// Clamping ranges
    pub limits: Limits,
    /// Pre-polarization hold time
    pub polarization_ms: u32,
    /// Delay between closing the isolation switch and starting the pulse train
    pub settle_us: u32,
    /// Slack added to the nominal capture duration before a stall is declared
    pub stall_margin_us: u64,
    /// Period of the completion poll
    pub poll_interval_us: u32,
    /// Prefix responses with the effective (post-clamp) parameters
    pub report_effective: bool,
    /// Run the echo train for `FID` requests as well
    pub fid_echo_train: bool,
}

impl Config {
    /// Same configuration with the pulse engine clock taken from the running system clock
    pub fn with_system_clock_hz(mut self, hz: u32) -> Self {
        self.timing.cycles_per_us = (hz / 1_000_000).max(1);
        self
    }

    /// Longest tau the pulse engine counter can hold at the configured clock
    pub fn max_tau_us(&self) -> u32 {
        self.timing.max_tau_us()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            front_end: FrontEndConfig::default(),
            limits: Limits::default(),
            polarization_ms: 3000,
            settle_us: 20,
            stall_margin_us: 250_000,
            poll_interval_us: 10,
            report_effective: false,
            fid_echo_train: false,
        }
    }
}
