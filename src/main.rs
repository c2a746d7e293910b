//! Earth's-field NMR pulse controller: accepts acquisition requests over USB serial and streams
//! the captured FID or echo train back.
#![no_std]
#![no_main]
#![warn(missing_docs)]

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
#[allow(unused_imports)]
use defmt_rtt as _;
use efnmr_core::{protocol::Outcome, CommandHandler, Orchestrator};
use efnmr_pico::{
    board::Board,
    capture::{create_sample_pool, Capture},
    components::Switches,
    sequencer::PulseSequencer,
    serial::{ControlChannel, SerialInterface},
};
#[allow(unused_imports)]
use panic_probe as _;
use rp2040_hal::{
    adc::AdcPin,
    clocks::init_clocks_and_plls,
    dma::DMAExt,
    entry,
    gpio::{FunctionPio0, Pins},
    pac,
    pio::PIOExt,
    prelude::*,
    usb::UsbBus,
    Adc, Sio, Timer, Watchdog,
};
use usb_device::bus::UsbBusAllocator;

/// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
/// External high-speed crystal on the pico board is 12Mhz
pub const XOSC_FREQ_HZ: u32 = 12_000_000;

/// Bring up the board, then serve requests forever
#[entry]
fn main() -> ! {
    info!("EFNMR controller startup");
    let mut pac = pac::Peripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let sio = Sio::new(pac.SIO);

    // Pulse timing is derived from the system clock, so keep the full 125 MHz
    let clocks = init_clocks_and_plls(
        XOSC_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    let sysclk_hz = clocks.system_clock.freq().to_Hz();
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    // Outputs first, so the coil is never energized by a floating pin
    let switches = Switches::init(pins.gpio25, pins.gpio26, pins.gpio22);

    let (pio0, sm0, _, _, _) = pac.PIO0.split(&mut pac.RESETS);
    let sequencer = PulseSequencer::init(pio0, sm0, pins.gpio16.into_function::<FunctionPio0>());

    let adc = cortex_m::singleton!(: Adc = Adc::new(pac.ADC, &mut pac.RESETS)).unwrap();
    let adc_pin = AdcPin::new(pins.gpio28.into_floating_input()).unwrap();
    let dma = pac.DMA.split(&mut pac.RESETS);
    let capture = Capture::init(adc, adc_pin, dma.ch0);

    let config = efnmr_pico::config(sysclk_hz);
    info!("Running at {=u32} Hz with {}", sysclk_hz, config);
    let mut orchestrator = Orchestrator::new(config, create_sample_pool().unwrap());
    let mut board = Board {
        switches,
        sequencer,
        capture,
        timer,
    };

    let usb_bus = cortex_m::singleton!(: UsbBusAllocator<UsbBus> = UsbBusAllocator::new(UsbBus::new(
        pac.USBCTRL_REGS,
        pac.USBCTRL_DPRAM,
        clocks.usb_clock,
        true,
        &mut pac.RESETS,
    )))
    .unwrap();
    let mut channel = ControlChannel::install(SerialInterface::new(usb_bus), timer);
    unsafe { pac::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ) };

    let mut handler = CommandHandler::new();
    info!("Waiting for requests");
    loop {
        match handler.poll(&mut channel, &mut orchestrator, &mut board) {
            Ok(None) => cortex_m::asm::wfi(),
            Ok(Some(Outcome::Streamed(effective))) => {
                info!("Streamed {}", effective);
                #[cfg(feature = "trace_samples")]
                if let Some(summary) = orchestrator.last_summary() {
                    trace!("Capture summary: {}", summary);
                }
            }
            Ok(Some(Outcome::Rejected(err))) => warn!("Rejected request: {}", err),
            Ok(Some(Outcome::Failed(err))) => error!("Acquisition failed: {}", err),
            Err(err) => warn!("Control channel error: {}", err),
        }
    }
}
