//! Free-running ADC drained by DMA channel 0 into the sample pool
use cortex_m::singleton;
use defmt::{debug, warn};
use efnmr_core::{acquisition::CaptureEngine, buffer::SampleBuffer, timing::FrontEnd};
use rp2040_hal::{
    adc::{AdcFifo, AdcPin, DmaReadTarget},
    dma::{single_buffer, Channel, ChannelIndex, CH0},
    gpio::{bank0::Gpio28, FunctionSioInput, Pin, PullNone},
    pac, Adc,
};

/// Samples the pool can hold: 40 kB of RAM
pub const POOL_SIZE: usize = 20_000;

/// GPIO the coil amplifier is wired to
pub const ANALOG_GPIO: u8 = 28;

/// Allocate the sample pool. Only the first call returns `Some`.
pub fn create_sample_pool() -> Option<SampleBuffer> {
    singleton!(: [u16; POOL_SIZE] = [0u16; POOL_SIZE]).map(|pool| SampleBuffer::new(pool))
}

/// Running DMA transfer into the pool
type Transfer = single_buffer::Transfer<Channel<CH0>, DmaReadTarget<u16>, SampleBuffer>;

/// Where the DMA channel and the pool currently are
enum Dma {
    /// Channel free, pool returned to the orchestrator
    Idle(Channel<CH0>),
    /// Pool handed over by `configure`, waiting for the front end to exist
    Configured(Channel<CH0>, SampleBuffer),
    /// Transfer running or finished
    Started(Transfer),
    /// Empty capture: nothing for the DMA to do
    Empty(Channel<CH0>, SampleBuffer),
}

/// Converter, input pin and DMA channel
pub struct Capture {
    /// Returned by [`AdcFifo::stop`] while no FIFO is built
    adc: Option<&'static mut Adc>,
    /// Paused or running FIFO
    fifo: Option<AdcFifo<'static, u16>>,
    /// Analog input
    pin: AdcPin<Pin<Gpio28, FunctionSioInput, PullNone>>,
    /// Always `Some` outside of a transition
    dma: Option<Dma>,
}

impl Capture {
    /// Take the converter and DMA channel 0
    pub fn init(
        adc: &'static mut Adc,
        pin: AdcPin<Pin<Gpio28, FunctionSioInput, PullNone>>,
        channel: Channel<CH0>,
    ) -> Self {
        Self {
            adc: Some(adc),
            fifo: None,
            pin,
            dma: Some(Dma::Idle(channel)),
        }
    }

    /// Abort any transfer and return the channel, plus the pool if one was held
    fn release(&mut self) -> Option<(Channel<CH0>, Option<SampleBuffer>)> {
        Some(match self.dma.take()? {
            Dma::Idle(channel) => (channel, None),
            Dma::Configured(channel, buffer) | Dma::Empty(channel, buffer) => (channel, Some(buffer)),
            Dma::Started(transfer) => {
                if !transfer.is_done() {
                    warn!("Aborting unfinished ADC transfer");
                    abort_channel();
                }
                // Not busy any more, so this returns at once
                let (channel, _, buffer) = transfer.wait();
                (channel, Some(buffer))
            }
        })
    }
}

/// Cancel the transfer on channel 0 and spin until the DMA confirms it.
///
/// `Transfer::abort` only exists from rp2040-hal 0.11, so this goes through the `CHAN_ABORT`
/// register directly. Conversion is already stopped, so no new requests reach the channel.
fn abort_channel() {
    let mask = 1 << CH0::id();
    // SAFETY: `Capture` owns channel 0 and this only touches its bit
    unsafe {
        let dma = &*pac::DMA::ptr();
        dma.chan_abort().write(|w| w.chan_abort().bits(mask));
        while dma.chan_abort().read().chan_abort().bits() & mask != 0 {}
    }
}

impl CaptureEngine for Capture {
    fn configure(&mut self, buffer: SampleBuffer) {
        let Some((channel, stale)) = self.release() else {
            warn!("DMA channel lost during a previous transition");
            return;
        };
        if stale.is_some() {
            warn!("Dropping a sample pool that was never disabled");
        }
        debug!("Capture configured for {=usize} samples", buffer.len());
        self.dma = Some(Dma::Configured(channel, buffer));
    }

    fn arm_front_end(&mut self, front_end: FrontEnd) {
        if front_end.channel.mux() != ANALOG_GPIO - 26 {
            warn!(
                "ADC channel {=u8} requested but only GPIO{=u8} is wired",
                front_end.channel.mux(),
                ANALOG_GPIO
            );
        }
        self.stop_conversion();
        let Some(adc) = self.adc.take() else {
            warn!("ADC lost during a previous transition");
            return;
        };

        // Paused until `start_conversion`, so the DMA can be started first
        let fifo = Adc::build_fifo(adc)
            .clock_divider(front_end.divider.int(), front_end.divider.frac())
            .set_channel(&mut self.pin)
            .enable_dma()
            .start_paused();

        self.dma = match self.dma.take() {
            Some(Dma::Configured(channel, buffer)) if buffer.is_empty() => {
                Some(Dma::Empty(channel, buffer))
            }
            Some(Dma::Configured(channel, buffer)) => Some(Dma::Started(
                single_buffer::Config::new(channel, fifo.dma_read_target(), buffer).start(),
            )),
            other => {
                warn!("Front end armed without a configured transfer");
                other
            }
        };
        self.fifo = Some(fifo);
    }

    fn start_conversion(&mut self) {
        if let Some(fifo) = self.fifo.as_mut() {
            fifo.resume();
        }
    }

    fn is_complete(&mut self) -> bool {
        match &self.dma {
            Some(Dma::Started(transfer)) => transfer.is_done(),
            Some(Dma::Empty(..)) => true,
            _ => false,
        }
    }

    fn stop_conversion(&mut self) {
        if let Some(fifo) = self.fifo.take() {
            self.adc = Some(fifo.stop());
        }
    }

    fn disable(&mut self) -> Option<SampleBuffer> {
        let (channel, buffer) = self.release()?;
        self.dma = Some(Dma::Idle(channel));
        buffer
    }
}
