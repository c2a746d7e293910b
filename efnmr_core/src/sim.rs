//! Cycle-accurate interpreter for the PIO instruction subset the pulse program uses.
//!
//! Decodes the assembled words directly, so the tests exercise the same bits the state machine
//! executes. Supports `jmp` (all register conditions), blocking `pull`, `mov` between X/Y/ISR/OSR,
//! `irq` set, delay slots, and a single optional side-set pin.

use std::{collections::VecDeque, vec::Vec};

/// One high period on the side-set pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    /// Cycle the pin went high
    pub rise: u64,
    /// Cycle the pin went low
    pub fall: u64,
}

impl Pulse {
    /// High time in cycles
    pub fn width(&self) -> u64 {
        self.fall - self.rise
    }
}

/// Everything observable after [`Machine::run`] returns.
#[derive(Debug)]
pub struct Run {
    /// Pin transitions as `(cycle, level)`
    pub edges: Vec<(u64, bool)>,
    /// Cycles at which `irq` issued
    pub triggers: Vec<u64>,
    /// Final pin level
    pub pin: bool,
    /// Program counter at exit
    pub pc: u8,
    /// Machine is blocked on `pull` with an empty FIFO
    pub stalled_on_pull: bool,
    /// Words left unconsumed in the TX FIFO
    pub fifo_remaining: usize,
    /// Cycle at which the machine stopped
    pub cycles: u64,
}

impl Run {
    /// Pair up rising and falling edges
    pub fn pulses(&self) -> Vec<Pulse> {
        let mut pulses = Vec::new();
        let mut rise = None;
        for &(cycle, level) in &self.edges {
            match (level, rise) {
                (true, None) => rise = Some(cycle),
                (false, Some(start)) => {
                    pulses.push(Pulse {
                        rise: start,
                        fall: cycle,
                    });
                    rise = None;
                }
                _ => {}
            }
        }
        pulses
    }
}

/// One state machine running an assembled program
pub struct Machine<'p> {
    /// Instruction memory
    code: &'p [u16],
    /// Last instruction before wrapping
    wrap_source: u8,
    /// Where execution resumes after `wrap_source`
    wrap_target: u8,
    /// Program counter
    pc: u8,
    /// Scratch register X
    x: u32,
    /// Scratch register Y
    y: u32,
    /// Input shift register
    isr: u32,
    /// Output shift register
    osr: u32,
    /// TX FIFO, unbounded here
    fifo: VecDeque<u32>,
    /// Side-set pin level
    pin: bool,
    /// Cycles executed
    cycle: u64,
    /// Pin transitions so far
    edges: Vec<(u64, bool)>,
    /// `irq` issue cycles so far
    triggers: Vec<u64>,
}

impl<'p> Machine<'p> {
    /// Load `program` at offset 0 with the pin low, as after a state machine restart.
    pub fn new(program: &'p pio::Program<{ pio::RP2040_MAX_PROGRAM_SIZE }>) -> Self {
        Self {
            code: &program.code,
            wrap_source: program.wrap.source,
            wrap_target: program.wrap.target,
            pc: program.wrap.target,
            x: 0,
            y: 0,
            isr: 0,
            osr: 0,
            fifo: VecDeque::new(),
            pin: false,
            cycle: 0,
            edges: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Queue `word` in the TX FIFO
    pub fn push(&mut self, word: u32) {
        self.fifo.push_back(word);
    }

    /// Drive the side-set pin, recording an edge on change
    fn set_pin(&mut self, level: bool) {
        if level != self.pin {
            self.pin = level;
            self.edges.push((self.cycle, level));
        }
    }

    /// `mov` source operand
    fn read(&self, source: u16) -> u32 {
        match source {
            0b001 => self.x,
            0b010 => self.y,
            0b011 => 0,
            0b110 => self.isr,
            0b111 => self.osr,
            other => panic!("unsupported mov source {other:#05b}"),
        }
    }

    /// `mov` destination operand
    fn write(&mut self, destination: u16, value: u32) {
        match destination {
            0b001 => self.x = value,
            0b010 => self.y = value,
            0b110 => self.isr = value,
            0b111 => self.osr = value,
            other => panic!("unsupported mov destination {other:#05b}"),
        }
    }

    /// Execute until the machine stalls on an empty FIFO or `max_cycles` elapse.
    pub fn run(mut self, max_cycles: u64) -> Run {
        let mut stalled_on_pull = false;
        while self.cycle < max_cycles {
            let word = self.code[usize::from(self.pc)];
            // `.side_set 1 opt`: bit 12 enables, bit 11 is the level, bits 10:8 are delay
            if word & 0x1000 != 0 {
                self.set_pin(word & 0x0800 != 0);
            }
            let delay = u64::from((word >> 8) & 0x7);

            let mut jump = None;
            match word >> 13 {
                // JMP
                0b000 => {
                    let taken = match (word >> 5) & 0x7 {
                        0b000 => true,
                        0b001 => self.x == 0,
                        0b010 => {
                            let taken = self.x != 0;
                            self.x = self.x.wrapping_sub(1);
                            taken
                        }
                        0b011 => self.y == 0,
                        0b100 => {
                            let taken = self.y != 0;
                            self.y = self.y.wrapping_sub(1);
                            taken
                        }
                        0b101 => self.x != self.y,
                        other => panic!("unsupported jmp condition {other:#05b}"),
                    };
                    if taken {
                        jump = Some((word & 0x1f) as u8);
                    }
                }
                // PUSH / PULL
                0b100 => {
                    assert!(word & 0x0080 != 0, "push is not used by the pulse program");
                    let block = word & 0x0020 != 0;
                    match self.fifo.pop_front() {
                        Some(value) => self.osr = value,
                        None if block => {
                            stalled_on_pull = true;
                            break;
                        }
                        None => self.osr = self.x,
                    }
                }
                // MOV
                0b101 => {
                    let value = self.read(word & 0x7);
                    let value = match (word >> 3) & 0x3 {
                        0b00 => value,
                        0b01 => !value,
                        0b10 => value.reverse_bits(),
                        _ => panic!("reserved mov operation"),
                    };
                    self.write((word >> 5) & 0x7, value);
                }
                // IRQ
                0b110 => {
                    assert!(word & 0x0060 == 0, "only `irq set` is modelled");
                    self.triggers.push(self.cycle);
                }
                other => panic!("unsupported opcode {other:#05b} in word {word:#06x}"),
            }

            self.cycle += 1 + delay;
            self.pc = match jump {
                Some(target) => target,
                None if self.pc == self.wrap_source => self.wrap_target,
                None => self.pc + 1,
            };
        }

        Run {
            edges: self.edges,
            triggers: self.triggers,
            pin: self.pin,
            pc: self.pc,
            stalled_on_pull,
            fifo_remaining: self.fifo.len(),
            cycles: self.cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_delay_loop_iterations() {
        let program = pio_proc::pio_asm!(
            ".side_set 1 opt",
            "    pull block",
            "    mov y, osr side 1",
            "spin:",
            "    jmp y-- spin",
            "    nop side 0",
            "idle:",
            "    jmp idle",
        )
        .program;
        let mut machine = Machine::new(&program);
        machine.push(9);
        let run = machine.run(100);
        // mov, then 10 passes of the loop
        assert_eq!(run.pulses()[0].width(), 11);
        assert!(!run.stalled_on_pull);
    }

    #[test]
    fn blocking_pull_on_empty_fifo_stalls() {
        let program = pio_proc::pio_asm!("pull block", "irq 0").program;
        let run = Machine::new(&program).run(100);
        assert!(run.stalled_on_pull);
        assert_eq!(run.cycles, 0);
        assert!(run.triggers.is_empty());
    }
}
