//! Interrupt handlers, plus static [`Mutex`].
use core::cell::RefCell;

use critical_section::Mutex;
use rp2040_hal::pac::interrupt;

use crate::serial::SerialInterface;

/// USB serial interface, polled from [`USBCTRL_IRQ`] and reached by the main loop through
/// [`ControlChannel`](crate::serial::ControlChannel)
pub static SERIAL: Mutex<RefCell<Option<SerialInterface>>> = Mutex::new(RefCell::new(None));

/// Keep the USB device responsive even while an acquisition blocks the main loop
#[interrupt]
fn USBCTRL_IRQ() {
    critical_section::with(|cs| {
        if let Some(serial) = SERIAL.borrow_ref_mut(cs).as_mut() {
            serial.process();
        }
    });
}
