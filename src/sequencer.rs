//! PIO0 state machine 0 running the pulse program
use defmt::{debug, warn};
use efnmr_core::{
    acquisition::PulseEngine,
    error::SequencerFault,
    sequencer::{self, SequencerWords, TRIGGER_IRQ},
};
use rp2040_hal::{
    gpio::{bank0::Gpio16, FunctionPio0, Pin, PullDown},
    pac::PIO0,
    pio::{
        Buffers, InstalledProgram, PIOBuilder, PinDir, PinState, Running, Rx, StateMachine,
        Stopped, Tx, UninitStateMachine, PIO, SM0,
    },
};

/// State machine used for the pulse train
type Sm = (PIO0, SM0);

/// Ownership of the state machine across start/stop
enum Engine {
    /// Parked with the pulse pin low
    Stopped {
        /// Configured state machine
        sm: StateMachine<Sm, Stopped>,
        /// Unused, kept to rebuild the state machine
        rx: Rx<Sm>,
        /// Parameter FIFO
        tx: Tx<Sm>,
    },
    /// Executing, or stalled on its first `pull` once a sequence has finished
    Running {
        /// Running state machine
        sm: StateMachine<Sm, Running>,
        /// Unused, kept to rebuild the state machine
        rx: Rx<Sm>,
        /// Parameter FIFO
        tx: Tx<Sm>,
    },
}

/// Pulse sequencer driver
pub struct PulseSequencer {
    /// PIO block, needed to clear the trigger flag
    pio: PIO<PIO0>,
    /// Always `Some` outside of a transition
    engine: Option<Engine>,
    /// Side-set pin driving the RF gate
    pulse_pin: Pin<Gpio16, FunctionPio0, PullDown>,
}

impl PulseSequencer {
    /// Install the pulse program and park the state machine.
    ///
    /// Panics if the program does not fit, which can only happen if something else was installed
    /// on PIO0 first.
    pub fn init(
        mut pio: PIO<PIO0>,
        sm0: UninitStateMachine<Sm>,
        pulse_pin: Pin<Gpio16, FunctionPio0, PullDown>,
    ) -> Self {
        let program = sequencer::program();
        let installed = pio
            .install(&program)
            .expect("Pulse program must fit in an empty PIO block");
        let (sm, rx, tx) = Self::build(installed, sm0, pulse_pin.id().num);
        debug!("Pulse program installed ({=usize} instructions)", program.code.len());

        Self {
            pio,
            engine: Some(Engine::Stopped { sm, rx, tx }),
            pulse_pin,
        }
    }

    /// Configure a state machine for the pulse program: full speed, TX-only FIFO, pin low
    fn build(
        program: InstalledProgram<PIO0>,
        sm: UninitStateMachine<Sm>,
        pin: u8,
    ) -> (StateMachine<Sm, Stopped>, Rx<Sm>, Tx<Sm>) {
        let (mut sm, rx, tx) = PIOBuilder::from_installed_program(program)
            .side_set_pin_base(pin)
            .clock_divisor_fixed_point(1, 0)
            .buffers(Buffers::OnlyTx)
            .build(sm);
        sm.set_pindirs([(pin, PinDir::Output)]);
        sm.set_pins([(pin, PinState::Low)]);
        (sm, rx, tx)
    }

    /// Stop the state machine if running and return its parts
    fn park(&mut self) -> Option<(StateMachine<Sm, Stopped>, Rx<Sm>, Tx<Sm>)> {
        match self.engine.take()? {
            Engine::Stopped { sm, rx, tx } => Some((sm, rx, tx)),
            Engine::Running { sm, rx, tx } => Some((sm.stop(), rx, tx)),
        }
    }
}

impl PulseEngine for PulseSequencer {
    fn restart(&mut self, words: SequencerWords) -> Result<(), SequencerFault> {
        let pin = self.pulse_pin.id().num;
        let Some((sm, rx, tx)) = self.park() else {
            warn!("Pulse sequencer lost during a previous transition");
            return Err(SequencerFault::Unavailable);
        };

        // Rebuilding resets the program counter, shift counters and clock divider
        let (uninit, program) = sm.uninit(rx, tx);
        let (mut sm, rx, mut tx) = Self::build(program, uninit, pin);
        sm.clear_fifos();
        self.pio.clear_irq(1 << TRIGGER_IRQ);

        // All four words fit in the joined FIFO, so the program never waits on the processor
        for word in words.fifo_order() {
            if !tx.write(word) {
                self.engine = Some(Engine::Stopped { sm, rx, tx });
                return Err(SequencerFault::FifoFull);
            }
        }

        self.engine = Some(Engine::Running {
            sm: sm.start(),
            rx,
            tx,
        });
        debug!("Pulse sequencer started with {}", words);
        Ok(())
    }

    fn stop(&mut self) {
        let pin = self.pulse_pin.id().num;
        if let Some((mut sm, rx, tx)) = self.park() {
            sm.set_pins([(pin, PinState::Low)]);
            self.engine = Some(Engine::Stopped { sm, rx, tx });
        }
    }
}
