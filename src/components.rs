//! On/off outputs around the coil
use core::convert::Infallible;

use defmt::debug;
use embedded_hal::digital::{OutputPin, PinState};
use rp2040_hal::gpio::{
    bank0::{Gpio22, Gpio25, Gpio26},
    FunctionNull, FunctionSio, Pin, PullDown, SioOutput,
};

/// Drive an infallible push-pull pin
fn drive(pin: &mut impl OutputPin<Error = Infallible>, on: bool) {
    let Ok(()) = pin.set_state(PinState::from(on));
}

/// Status LED, pre-polarization driver and isolation switch
pub struct Switches {
    /// Onboard LED, lit during an acquisition
    status_led: Pin<Gpio25, FunctionSio<SioOutput>, PullDown>,
    /// Gate of the pre-polarization coil driver
    polarization: Pin<Gpio26, FunctionSio<SioOutput>, PullDown>,
    /// Rx/Tx isolation relay. High connects the amplifier to the ADC.
    isolation: Pin<Gpio22, FunctionSio<SioOutput>, PullDown>,
}

impl Switches {
    /// Claim the pins with every output off
    pub fn init(
        status_led: Pin<Gpio25, FunctionNull, PullDown>,
        polarization: Pin<Gpio26, FunctionNull, PullDown>,
        isolation: Pin<Gpio22, FunctionNull, PullDown>,
    ) -> Self {
        Self {
            status_led: status_led.into_push_pull_output_in_state(PinState::Low),
            polarization: polarization.into_push_pull_output_in_state(PinState::Low),
            isolation: isolation.into_push_pull_output_in_state(PinState::Low),
        }
    }

    /// Status LED on/off
    pub fn set_status(&mut self, on: bool) {
        drive(&mut self.status_led, on);
    }

    /// Pre-polarization field on/off
    pub fn set_polarization(&mut self, on: bool) {
        debug!("Polarization {=bool}", on);
        drive(&mut self.polarization, on);
    }

    /// Close (`true`) or open the receive path
    pub fn set_isolation(&mut self, on: bool) {
        debug!("Isolation {=bool}", on);
        drive(&mut self.isolation, on);
    }
}
