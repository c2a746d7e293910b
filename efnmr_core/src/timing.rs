//! Timing compiler: user-level microseconds to pulse engine cycles and ADC clock dividers.
//!
//! Everything here is pure integer arithmetic. Rounding is to the nearest cycle, never a bare
//! truncation, so a 90° pulse at 2210 Hz and 125 cycles/µs is 14 140 cycles (113.12 µs), not the
//! 14 125 cycles a truncate-to-microseconds-first conversion would give.

use crate::{error::TimingError, request::EffectiveRequest};

/// Divide rounding half away from zero
const fn div_round(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator / 2) / denominator
}

/// Pulse engine clock and spin physics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingConfig {
    /// Larmor frequency in millihertz (2 210 000 = 2210 Hz)
    pub larmor_freq_mhz: u32,
    /// Pulse engine cycles per microsecond
    pub cycles_per_us: u32,
}

impl TimingConfig {
    /// Larmor frequency of protons in the Earth's field at the original site
    pub const LARMOR_FREQ_MHZ: u32 = 2_210_000;
    /// Pulse engine running undivided from a 125 MHz system clock
    pub const CYCLES_PER_US: u32 = 125;

    /// Quarter of a Larmor period in pulse engine cycles: the 90° pulse width.
    ///
    /// Capped at half the counter range so that the 180° pulse (exactly twice as long) is always
    /// representable.
    pub fn pulse90_cycles(&self) -> u32 {
        // period_us / 4 * cycles_per_us == cycles_per_us * 1e9 / (4 * larmor_mhz)
        let cycles = div_round(
            u64::from(self.cycles_per_us) * 1_000_000_000,
            4 * u64::from(self.larmor_freq_mhz.max(1)),
        );
        cycles.min(u64::from(u32::MAX / 2)) as u32
    }

    /// Longest tau whose cycle count fits the 32-bit counter
    pub fn max_tau_us(&self) -> u32 {
        u32::MAX / self.cycles_per_us.max(1)
    }

    /// `tau_us` in pulse engine cycles, saturating at the counter width
    pub fn tau_cycles(&self, tau_us: u32) -> u32 {
        tau_us.saturating_mul(self.cycles_per_us)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            larmor_freq_mhz: Self::LARMOR_FREQ_MHZ,
            cycles_per_us: Self::CYCLES_PER_US,
        }
    }
}

/// ADC input mux selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcChannel(u8);

impl AdcChannel {
    /// On-die temperature sensor
    pub const TEMPERATURE: Self = Self(4);

    /// Channel `mux`. Only 0..=4 exist.
    pub const fn new(mux: u8) -> Option<Self> {
        if mux <= 4 {
            Some(Self(mux))
        } else {
            None
        }
    }

    /// Channel wired to `gpio`. GPIO26..=29 are the only analog-capable pins.
    pub const fn from_gpio(gpio: u8) -> Option<Self> {
        match gpio {
            26..=29 => Some(Self(gpio - 26)),
            _ => None,
        }
    }

    /// Value for the `AINSEL` field
    pub const fn mux(self) -> u8 {
        self.0
    }
}

/// Free-running sample clock divider, in the 16.8 fixed-point layout of the ADC `DIV` register.
///
/// The ADC starts a conversion every `int + 1 + frac / 256` ADC clocks. A conversion takes 96
/// clocks, so anything faster is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcClockDivider {
    /// Whole part
    int: u16,
    /// Fraction in 1/256ths
    frac: u8,
}

impl AdcClockDivider {
    /// ADC clocks per conversion
    pub const MIN_PERIOD_CYCLES: u32 = 96;

    /// Divider giving one sample every `interval_us` with an `adc_clock_mhz` converter clock.
    ///
    /// `divider = interval_us × adc_clock_mhz − 1`; integer intervals need no fractional part.
    pub fn for_interval(interval_us: u32, adc_clock_mhz: u32) -> Result<Self, TimingError> {
        let period = u64::from(interval_us) * u64::from(adc_clock_mhz);
        if period < u64::from(Self::MIN_PERIOD_CYCLES) || period - 1 > u64::from(u16::MAX) {
            return Err(TimingError::DividerOutOfRange { interval_us });
        }
        Ok(Self {
            int: (period - 1) as u16,
            frac: 0,
        })
    }

    /// Integer part, as taken by `rp2040_hal::adc::AdcFifoBuilder::clock_divider`
    pub fn int(&self) -> u16 {
        self.int
    }

    /// Fractional part in 1/256ths
    pub fn frac(&self) -> u8 {
        self.frac
    }

    /// Raw `DIV` register value (`INT` at bits 23:8, `FRAC` at bits 7:0)
    pub fn register_value(&self) -> u32 {
        (u32::from(self.int) << 8) | u32::from(self.frac)
    }

    /// Actual sample period in 1/256ths of an ADC clock
    pub fn period_frac_cycles(&self) -> u32 {
        ((u32::from(self.int) + 1) << 8) + u32::from(self.frac)
    }
}

/// Converter settings handed to [`CaptureEngine::arm_front_end`](crate::acquisition::CaptureEngine::arm_front_end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrontEnd {
    /// Sample clock divider
    pub divider: AdcClockDivider,
    /// Input selection
    pub channel: AdcChannel,
}

/// ADC clocking and input wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrontEndConfig {
    /// Converter clock (fixed 48 MHz on the RP2040)
    pub adc_clock_mhz: u32,
    /// Input carrying the coil amplifier output
    pub channel: AdcChannel,
}

impl FrontEndConfig {
    /// Longest interval the integer divider can express
    pub fn max_interval_us(&self) -> u32 {
        (u32::from(u16::MAX) + 1) / self.adc_clock_mhz.max(1)
    }

    /// Shortest interval allowed by the conversion time
    pub fn min_interval_us(&self) -> u32 {
        AdcClockDivider::MIN_PERIOD_CYCLES.div_ceil(self.adc_clock_mhz.max(1))
    }
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            adc_clock_mhz: 48,
            // GPIO28
            channel: AdcChannel(2),
        }
    }
}

/// Per-request cycle counts. Immutable once compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingPlan {
    /// 90° excitation width
    pub pulse90_cycles: u32,
    /// 180° refocusing width, always `2 × pulse90_cycles`
    pub pulse180_cycles: u32,
    /// Gap on each side of an echo
    pub tau_cycles: u32,
    /// Converter divider matching the effective sample interval
    pub adc_divider: AdcClockDivider,
}

impl TimingPlan {
    /// Compile an already clamped request.
    ///
    /// `tau_us = 0` is accepted and yields a zero-length delay. The resulting echo train is
    /// degenerate but well defined.
    pub fn compile(
        timing: &TimingConfig,
        front_end: &FrontEndConfig,
        request: &EffectiveRequest,
    ) -> Result<Self, TimingError> {
        let pulse90_cycles = timing.pulse90_cycles();
        Ok(Self {
            pulse90_cycles,
            pulse180_cycles: 2 * pulse90_cycles,
            tau_cycles: timing.tau_cycles(request.tau_us()),
            adc_divider: AdcClockDivider::for_interval(
                request.sample_interval_us(),
                front_end.adc_clock_mhz,
            )?,
        })
    }
}
