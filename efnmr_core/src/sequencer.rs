//! The autonomous pulse program and the four parameter words that drive it.
//!
//! The program runs on one PIO state machine with a single optional side-set pin (the RF pulse
//! output). Once its parameters are in the TX FIFO it needs nothing from the processor:
//!
//! ```text
//! 90° on ─ tau ─┬─ 180° on ─ tau ─ irq 0 ─ tau ─┐ × echo_count ─ wrap ─ pull (stall = idle)
//!               └───────────────────────────────┘
//! ```
//!
//! Registers: X holds the 90° width, then the remaining echo count. ISR holds tau, OSR holds the
//! 180° width and Y is the working delay counter. `jmp y--` loops run `y + 1` times, and the
//! setup instructions around them add fixed cycles. [`SequencerWords::encode`] subtracts
//! [`PULSE_OVERHEAD`] and [`TAU_OVERHEAD`] so the pin timeline equals the [`TimingPlan`] to the
//! cycle.

use crate::{
    request::{EffectiveRequest, SequenceType},
    timing::TimingPlan,
};

/// Extra cycles on every pulse: the side-set instruction that raises the pin, plus the final
/// pass of the decrement loop.
pub const PULSE_OVERHEAD: u32 = 2;
/// Extra cycles on every tau gap. Delay slots make all three gaps carry the same overhead.
pub const TAU_OVERHEAD: u32 = 5;
/// PIO IRQ flag raised at each echo centre
pub const TRIGGER_IRQ: u8 = 0;

/// Assemble the pulse program.
pub fn program() -> pio::Program<{ pio::RP2040_MAX_PROGRAM_SIZE }> {
    pio_proc::pio_asm!(
        ".side_set 1 opt",
        ".wrap_target",
        "    pull block",               // 90° width
        "    mov x, osr",
        "    pull block",               // tau
        "    mov isr, osr",
        "    pull block",               // echo count
        "    mov y, osr",
        "    pull block",               // 180° width, stays in OSR
        "    nop side 1",
        "pulse90:",
        "    jmp x-- pulse90",
        "    mov x, y side 0",
        "    mov y, isr",
        "tau_first:",
        "    jmp y-- tau_first",
        "    jmp echo_next",
        "echo:",
        "    mov y, osr side 1",
        "pulse180:",
        "    jmp y-- pulse180",
        "    mov y, isr side 0 [3]",
        "tau_pre:",
        "    jmp y-- tau_pre",
        "    irq 0 [1]",
        "    mov y, isr",
        "tau_post:",
        "    jmp y-- tau_post",
        "echo_next:",
        "    jmp x-- echo",
        ".wrap",
    )
    .program
}

/// Echoes the sequencer actually executes.
///
/// `CPMG` runs the requested train. `FID` is a single excitation unless `fid_echo_train` asks for
/// the legacy behaviour where the train runs regardless of the declared type.
pub fn executed_echoes(request: &EffectiveRequest, fid_echo_train: bool) -> u32 {
    match request.sequence_type() {
        SequenceType::Cpmg => request.echo_count(),
        SequenceType::Fid if fid_echo_train => request.echo_count(),
        SequenceType::Fid => 0,
    }
}

/// The four FIFO words for one run, overhead already removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequencerWords {
    /// 90° pulse high time
    pulse90: u32,
    /// Gap between pulses and triggers
    tau: u32,
    /// Refocusing pulses to play
    echo_count: u32,
    /// 180° pulse high time
    pulse180: u32,
}

impl SequencerWords {
    /// Encode `plan` for `echo_count` refocusing pulses.
    ///
    /// Durations shorter than the fixed overhead cannot be produced; they floor at the overhead.
    pub fn encode(plan: &TimingPlan, echo_count: u32) -> Self {
        Self {
            pulse90: plan.pulse90_cycles.saturating_sub(PULSE_OVERHEAD),
            tau: plan.tau_cycles.saturating_sub(TAU_OVERHEAD),
            echo_count,
            pulse180: plan.pulse180_cycles.saturating_sub(PULSE_OVERHEAD),
        }
    }

    /// Words in the order the program pulls them
    pub fn fifo_order(&self) -> [u32; 4] {
        [self.pulse90, self.tau, self.echo_count, self.pulse180]
    }

    /// Echo loop count
    pub fn echo_count(&self) -> u32 {
        self.echo_count
    }

    /// Cycles from the rising edge of the 90° pulse to the falling edge of the last 180° pulse
    /// (or of the 90° pulse when there are no echoes), plus the trailing tau.
    pub fn sequence_cycles(&self) -> u64 {
        let pulse90 = u64::from(self.pulse90) + u64::from(PULSE_OVERHEAD);
        let pulse180 = u64::from(self.pulse180) + u64::from(PULSE_OVERHEAD);
        let tau = u64::from(self.tau) + u64::from(TAU_OVERHEAD);
        pulse90 + tau + u64::from(self.echo_count) * (pulse180 + 2 * tau)
    }
}
