//! Line-oriented command protocol on the control channel.
//!
//! Requests are one text record per line:
//!
//! ```text
//! <TYPE>,<sleep_us>,<data_size>,<tau_us>,<n_echoes>\n
//! ```
//!
//! and a successful acquisition answers with exactly `data_size` (after clamping) lines of
//! `<time_us>,<adc_value>\n`. Diagnostics start with `Error:` and never contain a comma.

use core::fmt::{self, Write as _};

use embedded_io::{Read, ReadReady, Write};
use heapless::{String, Vec};
#[cfg(feature = "defmt")]
use defmt::{debug, info, warn};
#[cfg(not(feature = "defmt"))]
use log::{debug, info, warn};

use crate::{
    acquisition::{Hardware, Orchestrator},
    error::{AcquisitionError, ParameterError},
    request::{AcquisitionRequest, EffectiveRequest, SequenceType},
};

/// Longest accepted command line, excluding the newline
pub const LINE_CAPACITY: usize = 64;

/// Names of the numeric fields, in wire order
const NUMERIC_FIELDS: [&str; 4] = ["sleep_us", "data_size", "tau_us", "n_echoes"];

/// Parse one command record (without its newline).
///
/// Surrounding whitespace is ignored on the line and on each field. Numbers are unsigned decimal
/// integers; explicit signs are rejected. Values past `u32::MAX` saturate there, so an oversized
/// field is clamped like any other out-of-range value rather than refused.
pub fn parse_command(line: &str) -> Result<AcquisitionRequest, ParameterError> {
    let mut fields = line.trim().split(',').map(str::trim);
    let sequence_type = fields
        .next()
        .and_then(SequenceType::from_keyword)
        .ok_or(ParameterError::UnknownCommand)?;

    let numbers: Vec<&str, 4> = fields.by_ref().take(NUMERIC_FIELDS.len()).collect();
    let extra = fields.count();
    if numbers.len() != NUMERIC_FIELDS.len() || extra != 0 {
        return Err(ParameterError::FieldCount {
            found: 1 + numbers.len() + extra,
        });
    }

    let mut values = [0u32; 4];
    for ((value, field), name) in values.iter_mut().zip(&numbers).zip(NUMERIC_FIELDS) {
        *value = parse_number(field, name)?;
    }
    let [sample_interval_us, sample_count, tau_us, echo_count] = values;

    Ok(AcquisitionRequest {
        sequence_type,
        sample_interval_us,
        sample_count,
        tau_us,
        echo_count,
    })
}

/// One run of ASCII digits, saturating at `u32::MAX`. `name` labels the diagnostic.
fn parse_number(field: &str, name: &'static str) -> Result<u32, ParameterError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParameterError::InvalidNumber { field: name });
    }
    Ok(field.bytes().fold(0u32, |value, digit| {
        value
            .saturating_mul(10)
            .saturating_add(u32::from(digit - b'0'))
    }))
}

/// Accumulates bytes into lines of at most `N` bytes.
///
/// A line that outgrows the buffer is dropped up to its newline and reported once.
#[derive(Debug, Default)]
pub struct LineBuffer<const N: usize> {
    /// Bytes since the last newline
    line: Vec<u8, N>,
    /// Current line has already overflowed
    overflowed: bool,
}

impl<const N: usize> LineBuffer<N> {
    /// Empty accumulator
    pub const fn new() -> Self {
        Self {
            line: Vec::new(),
            overflowed: false,
        }
    }

    /// Feed one byte. Returns the finished line when `byte` is a newline.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8, N>, ParameterError>> {
        if byte == b'\n' {
            let line = core::mem::take(&mut self.line);
            if core::mem::take(&mut self.overflowed) {
                return Some(Err(ParameterError::LineTooLong));
            }
            return Some(Ok(line));
        }
        if !self.overflowed && self.line.push(byte).is_err() {
            self.overflowed = true;
            self.line.clear();
        }
        None
    }
}

/// Result of handling one command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Line was malformed. A diagnostic was sent and the hardware was not touched.
    Rejected(ParameterError),
    /// The waveform was streamed in full
    Streamed(EffectiveRequest),
    /// Acquisition ran but produced no waveform. A diagnostic was sent.
    Failed(AcquisitionError),
}

/// Non-blocking reader and dispatcher for the control channel.
#[derive(Debug)]
pub struct CommandHandler {
    /// Partial command line
    line: LineBuffer<LINE_CAPACITY>,
    /// Last chunk read from the channel
    rx: [u8; LINE_CAPACITY],
    /// Valid bytes in `rx`
    rx_len: usize,
    /// Next unconsumed byte in `rx`
    rx_pos: usize,
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHandler {
    /// Idle handler with nothing buffered
    pub const fn new() -> Self {
        Self {
            line: LineBuffer::new(),
            rx: [0; LINE_CAPACITY],
            rx_len: 0,
            rx_pos: 0,
        }
    }

    /// Handle at most one complete command line.
    ///
    /// Only reads from `channel` when it reports data ready, so this never blocks on input. A valid
    /// request runs to completion (including streaming the response) before this returns. Bytes
    /// after the handled line stay buffered for the next call.
    pub fn poll<C, H>(
        &mut self,
        channel: &mut C,
        orchestrator: &mut Orchestrator,
        hw: &mut H,
    ) -> Result<Option<Outcome>, C::Error>
    where
        C: Read + ReadReady + Write,
        H: Hardware,
    {
        loop {
            if self.rx_pos == self.rx_len {
                if !channel.read_ready()? {
                    return Ok(None);
                }
                self.rx_len = channel.read(&mut self.rx)?;
                self.rx_pos = 0;
                if self.rx_len == 0 {
                    return Ok(None);
                }
            }

            let byte = self.rx[self.rx_pos];
            self.rx_pos += 1;
            let outcome = match self.line.push(byte) {
                None => continue,
                Some(Ok(line)) => match core::str::from_utf8(&line) {
                    Ok(text) if text.trim().is_empty() => continue,
                    Ok(text) => dispatch(text, channel, orchestrator, hw)?,
                    Err(_) => reject(channel, ParameterError::Encoding)?,
                },
                Some(Err(err)) => reject(channel, err)?,
            };
            return Ok(Some(outcome));
        }
    }
}

/// Parse, acquire and stream one line
fn dispatch<C, H>(
    text: &str,
    channel: &mut C,
    orchestrator: &mut Orchestrator,
    hw: &mut H,
) -> Result<Outcome, C::Error>
where
    C: Write,
    H: Hardware,
{
    let request = match parse_command(text) {
        Ok(request) => request,
        Err(err) => return reject(channel, err),
    };
    info!("Accepted {:?}", request);
    let report_effective = orchestrator.config().report_effective;

    let waveform = match orchestrator.run(hw, &request) {
        Ok(waveform) => waveform,
        Err(err) => {
            match err {
                AcquisitionError::Stalled { .. } => {
                    write_line(channel, format_args!("Error: Hardware Stall - {err}\n"))?
                }
                _ => write_line(channel, format_args!("Error: Hardware Fault - {err}\n"))?,
            }
            channel.flush()?;
            return Ok(Outcome::Failed(err));
        }
    };

    let effective = *waveform.effective();
    if report_effective {
        write_line(
            channel,
            format_args!(
                "# {} {} {} {} {}\n",
                effective.sequence_type(),
                effective.sample_interval_us(),
                effective.sample_count(),
                effective.tau_us(),
                effective.echo_count(),
            ),
        )?;
    }
    for record in waveform.records() {
        write_line(channel, format_args!("{},{}\n", record.time_us, record.value))?;
    }
    channel.flush()?;
    debug!("Streamed {} samples", effective.sample_count());
    Ok(Outcome::Streamed(effective))
}

/// Report `err` on the channel and move on to the next line
fn reject<C: Write>(channel: &mut C, err: ParameterError) -> Result<Outcome, C::Error> {
    warn!("Rejected command: {}", err);
    write_line(channel, format_args!("Error: Invalid Arguments - {err}\n"))?;
    channel.flush()?;
    Ok(Outcome::Rejected(err))
}

/// Format into a stack buffer and write it in one call
fn write_line<C: Write>(channel: &mut C, args: fmt::Arguments<'_>) -> Result<(), C::Error> {
    let mut line: String<128> = String::new();
    if line.write_fmt(args).is_err() {
        warn!("Dropped an oversized response line");
        return Ok(());
    }
    channel.write_all(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, mock::MockBoard};
    use core::convert::Infallible;
    use std::{string::String as StdString, vec::Vec as StdVec};

    /// Control channel with scripted input, delivered in chunks of `chunk` bytes
    struct Channel {
        input: StdVec<u8>,
        pos: usize,
        chunk: usize,
        output: StdVec<u8>,
    }

    impl Channel {
        fn new(input: &str) -> Self {
            Self {
                input: input.as_bytes().to_vec(),
                pos: 0,
                chunk: 7,
                output: StdVec::new(),
            }
        }

        fn lines(&self) -> StdVec<StdString> {
            StdString::from_utf8(self.output.clone())
                .unwrap()
                .lines()
                .map(StdString::from)
                .collect()
        }
    }

    impl embedded_io::ErrorType for Channel {
        type Error = Infallible;
    }

    impl Read for Channel {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let n = buf.len().min(self.chunk).min(self.input.len() - self.pos);
            buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl ReadReady for Channel {
        fn read_ready(&mut self) -> Result<bool, Infallible> {
            Ok(self.pos < self.input.len())
        }
    }

    impl Write for Channel {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct Bench {
        handler: CommandHandler,
        orchestrator: Orchestrator,
        board: MockBoard,
    }

    impl Bench {
        fn new(config: Config, pool: usize) -> Self {
            Self {
                handler: CommandHandler::new(),
                orchestrator: Orchestrator::new(config, MockBoard::pool(pool)),
                board: MockBoard::completing_after(0),
            }
        }

        /// Poll until the channel is drained
        fn drive(&mut self, channel: &mut Channel) -> StdVec<Outcome> {
            let mut outcomes = StdVec::new();
            loop {
                match self
                    .handler
                    .poll(channel, &mut self.orchestrator, &mut self.board)
                {
                    Ok(Some(outcome)) => outcomes.push(outcome),
                    Ok(None) => return outcomes,
                    Err(never) => match never {},
                }
            }
        }
    }

    #[test]
    fn parses_full_record() {
        assert_eq!(
            parse_command("CPMG,20,3000,226,133"),
            Ok(AcquisitionRequest {
                sequence_type: SequenceType::Cpmg,
                sample_interval_us: 20,
                sample_count: 3000,
                tau_us: 226,
                echo_count: 133,
            })
        );
        assert_eq!(
            parse_command(" FID , 5,0 ,0,0\r").map(|r| r.sequence_type),
            Ok(SequenceType::Fid)
        );
    }

    #[test]
    fn rejects_malformed_records() {
        assert_eq!(
            parse_command("CPMG,abc,3000"),
            Err(ParameterError::FieldCount { found: 3 })
        );
        assert_eq!(
            parse_command("CPMG,abc,3000,226,133"),
            Err(ParameterError::InvalidNumber { field: "sleep_us" })
        );
        assert_eq!(
            parse_command("FID,20,-5,226,133"),
            Err(ParameterError::InvalidNumber { field: "data_size" })
        );
        assert_eq!(
            parse_command("FID,20,+5,226,133"),
            Err(ParameterError::InvalidNumber { field: "data_size" })
        );
        assert_eq!(
            parse_command("CPMG,20,5,226,133,1"),
            Err(ParameterError::FieldCount { found: 6 })
        );
        assert_eq!(
            parse_command("SE,20,5,226,133"),
            Err(ParameterError::UnknownCommand)
        );
        assert_eq!(
            parse_command("cpmg,20,5,226,133"),
            Err(ParameterError::UnknownCommand)
        );
        assert_eq!(
            parse_command("CPMG,20,,226,133"),
            Err(ParameterError::InvalidNumber { field: "data_size" })
        );
    }

    #[test]
    fn oversized_fields_saturate_then_clamp() {
        let limits = Config::default().limits;
        let max_tau_us = Config::default().max_tau_us();

        let request = parse_command("CPMG,20,99999999999,226,133").unwrap();
        assert_eq!(request.sample_count, u32::MAX);
        assert_eq!(limits.apply(&request, max_tau_us).sample_count(), 20_000);

        let request = parse_command("FID,5000000000,3000,226,133").unwrap();
        assert_eq!(request.sample_interval_us, u32::MAX);
        assert_eq!(limits.apply(&request, max_tau_us).sample_interval_us(), 1365);

        let request = parse_command("CPMG,20,3000,4294967296,133").unwrap();
        assert_eq!(request.tau_us, u32::MAX);
        assert_eq!(limits.apply(&request, max_tau_us).tau_us(), max_tau_us);

        // Past every hardware limit, so the engine runs until teardown stops it
        let request = parse_command("FID,20,5,226,99999999999").unwrap();
        assert_eq!(request.echo_count, u32::MAX);

        assert_eq!(
            parse_command("CPMG,20,0000000000000000000003,226,133").map(|r| r.sample_count),
            Ok(3)
        );
    }

    #[test]
    fn overlong_line_reported_once() {
        let mut buffer = LineBuffer::<8>::new();
        let results: StdVec<_> = b"0123456789abc\nFID\n"
            .iter()
            .filter_map(|&b| buffer.push(b))
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(ParameterError::LineTooLong));
        assert_eq!(results[1].as_ref().map(|l| l.as_slice()), Ok(&b"FID"[..]));
    }

    #[test]
    fn cpmg_scenario_streams_every_sample() {
        let mut bench = Bench::new(Config::default(), 20_000);
        let mut channel = Channel::new("CPMG,20,3000,226,133\n");

        let outcomes = bench.drive(&mut channel);
        assert!(matches!(outcomes[..], [Outcome::Streamed(_)]));

        let lines = channel.lines();
        assert_eq!(lines.len(), 3000);
        for (i, line) in lines.iter().enumerate() {
            let (time, value) = line.split_once(',').unwrap();
            assert_eq!(time.parse::<u64>().unwrap(), 20 * i as u64);
            assert!(value.parse::<u16>().unwrap() < 4096);
        }
        assert_eq!(lines.last().unwrap(), "59980,2999");
        assert!(bench.board.is_safe());
    }

    #[test]
    fn fid_scenario_streams_every_sample() {
        let mut bench = Bench::new(Config::default(), 20_000);
        let mut channel = Channel::new("FID,20,3000,226,133\n");
        bench.drive(&mut channel);
        assert_eq!(channel.lines().len(), 3000);
    }

    #[test]
    fn malformed_line_leaves_device_ready() {
        let mut bench = Bench::new(Config::default(), 20_000);
        let mut channel = Channel::new("CPMG,abc,3000\n");
        let outcomes = bench.drive(&mut channel);

        assert_eq!(
            outcomes,
            [Outcome::Rejected(ParameterError::FieldCount { found: 3 })]
        );
        let lines = channel.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error: Invalid Arguments - "));
        assert!(!lines[0].contains(','));
        assert!(bench.board.events.is_empty());

        let mut channel = Channel::new("CPMG,20,3000,226,133\n");
        bench.drive(&mut channel);
        assert_eq!(channel.lines().len(), 3000);
    }

    #[test]
    fn repeated_requests_give_equal_responses() {
        let mut bench = Bench::new(Config::default(), 20_000);
        let mut channel = Channel::new("CPMG,20,3000,226,133\nCPMG,20,3000,226,133\n");
        let outcomes = bench.drive(&mut channel);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0], outcomes[1]);

        let lines = channel.lines();
        assert_eq!(lines.len(), 6000);
        assert_eq!(lines[..3000], lines[3000..]);
        assert!(bench.board.is_safe());
    }

    #[test]
    fn lines_in_one_read_are_handled_in_order() {
        let mut bench = Bench::new(Config::default(), 20_000);
        let mut channel = Channel::new("FID,20,10,0,0\r\n\nCPMG,25,5,226,3\n");
        channel.chunk = 64;

        let outcomes = bench.drive(&mut channel);
        assert_eq!(outcomes.len(), 2);
        let lines = channel.lines();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[9], "180,9");
        assert_eq!(lines[10], "0,0");
        assert_eq!(lines[14], "100,4");
    }

    #[test]
    fn overlong_line_is_one_diagnostic() {
        let mut bench = Bench::new(Config::default(), 20_000);
        let mut input = "9".repeat(200);
        input.push_str("\nFID,20,3,0,0\n");
        let mut channel = Channel::new(&input);

        let outcomes = bench.drive(&mut channel);
        assert_eq!(outcomes[0], Outcome::Rejected(ParameterError::LineTooLong));
        let lines = channel.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Error: Invalid Arguments - line too long");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut bench = Bench::new(Config::default(), 100);
        let mut channel = Channel::new("");
        channel.input = b"FID,\xff\n".to_vec();
        let outcomes = bench.drive(&mut channel);
        assert_eq!(outcomes, [Outcome::Rejected(ParameterError::Encoding)]);
    }

    #[test]
    fn stall_reports_diagnostic_instead_of_stream() {
        let mut bench = Bench::new(Config::default(), 100);
        bench.board = MockBoard::stalling();
        let mut channel = Channel::new("CPMG,20,10,226,3\n");

        let outcomes = bench.drive(&mut channel);
        assert!(matches!(
            outcomes[..],
            [Outcome::Failed(AcquisitionError::Stalled { .. })]
        ));
        let lines = channel.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error: Hardware Stall - "));
        assert!(bench.board.is_safe());
    }

    #[test]
    fn effective_header_shows_clamped_values() {
        let config = Config {
            report_effective: true,
            ..Config::default()
        };
        let mut bench = Bench::new(config, 100);
        let mut channel = Channel::new("CPMG,1,50000,226,133\n");
        bench.drive(&mut channel);

        let lines = channel.lines();
        assert_eq!(lines[0], "# CPMG 2 100 226 133");
        assert_eq!(lines.len(), 101);
        assert_eq!(lines[100], "198,99");
    }

    #[test]
    fn oversized_sample_count_streams_the_cap() {
        let config = Config {
            report_effective: true,
            ..Config::default()
        };
        let mut bench = Bench::new(config, 100);
        let mut channel = Channel::new("CPMG,20,99999999999,226,133\n");
        let outcomes = bench.drive(&mut channel);
        assert!(matches!(outcomes[..], [Outcome::Streamed(_)]));

        let lines = channel.lines();
        assert_eq!(lines[0], "# CPMG 20 100 226 133");
        assert_eq!(lines.len(), 101);
    }

    #[test]
    fn empty_request_streams_nothing() {
        let mut bench = Bench::new(Config::default(), 100);
        let mut channel = Channel::new("CPMG,20,0,226,3\n");
        let outcomes = bench.drive(&mut channel);
        assert!(matches!(outcomes[..], [Outcome::Streamed(_)]));
        assert!(channel.output.is_empty());
    }
}
