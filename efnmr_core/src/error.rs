//! Error taxonomy for the request path.
//!
//! Nothing here allocates. Every variant renders without commas so the wire diagnostic can never
//! be mistaken for a `<time_us>,<adc_value>` record by the host.

use core::fmt;

/// A command line that could not be turned into a request. The line is discarded and no hardware
/// state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterError {
    /// First field was not exactly `FID` or `CPMG`
    UnknownCommand,
    /// Wrong number of comma-separated fields
    FieldCount {
        /// Fields actually present
        found: usize,
    },
    /// A numeric field did not parse as a non-negative integer
    InvalidNumber {
        /// Field name as it appears in the command record
        field: &'static str,
    },
    /// Line exceeded the accumulator before a newline arrived
    LineTooLong,
    /// Line was not valid UTF-8
    Encoding,
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => f.write_str("command must be FID or CPMG"),
            Self::FieldCount { found } => write!(f, "expected 5 fields but found {found}"),
            Self::InvalidNumber { field } => write!(f, "{field} is not a non-negative integer"),
            Self::LineTooLong => f.write_str("line too long"),
            Self::Encoding => f.write_str("line is not valid UTF-8"),
        }
    }
}

/// The divider needed for a sample interval does not fit the converter's clock divider register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimingError {
    /// `interval_us` is below the conversion floor or above the 16-bit integer divider
    DividerOutOfRange {
        /// Requested interval
        interval_us: u32,
    },
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DividerOutOfRange { interval_us } => {
                write!(f, "no ADC divider for a {interval_us} us interval")
            }
        }
    }
}

/// The pulse sequencer refused its parameter words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerFault {
    /// TX FIFO had no room for all four words after a reset
    FifoFull,
    /// State machine handle was not returned by an earlier transition
    Unavailable,
}

/// An acquisition that was started but could not deliver a waveform. Teardown has always run by
/// the time one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquisitionError {
    /// Transfer engine did not reach its count before the deadline
    Stalled {
        /// Time spent waiting, from arming to giving up
        waited_us: u64,
    },
    /// See [`SequencerFault`]
    Sequencer(SequencerFault),
    /// Sample pool is not available (lost by a previous failed teardown)
    BufferUnavailable,
    /// See [`TimingError`]
    Timing(TimingError),
}

impl From<SequencerFault> for AcquisitionError {
    fn from(fault: SequencerFault) -> Self {
        Self::Sequencer(fault)
    }
}

impl From<TimingError> for AcquisitionError {
    fn from(err: TimingError) -> Self {
        Self::Timing(err)
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stalled { waited_us } => {
                write!(f, "transfer incomplete after {waited_us} us")
            }
            Self::Sequencer(SequencerFault::FifoFull) => {
                f.write_str("pulse sequencer FIFO rejected parameters")
            }
            Self::Sequencer(SequencerFault::Unavailable) => {
                f.write_str("pulse sequencer unavailable")
            }
            Self::BufferUnavailable => f.write_str("sample buffer unavailable"),
            Self::Timing(err) => err.fmt(f),
        }
    }
}
