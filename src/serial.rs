//! USB CDC-ACM control channel exposed through [`embedded_io`].
//!
//! The USB device is serviced from `USBCTRL_IRQ` (see [`crate::interrupt`]) so the host keeps
//! seeing a live device while an acquisition blocks the main loop. [`ControlChannel`] reaches the
//! shared [`SerialInterface`] one critical section at a time.
use defmt::{debug, warn, Format};
use rp2040_hal::{usb::UsbBus, Timer};
use usb_device::{
    bus::UsbBusAllocator,
    device::{StringDescriptors, UsbDevice, UsbDeviceBuilder, UsbDeviceState, UsbVidPid},
    UsbError,
};
use usbd_serial::SerialPort;

use crate::interrupt::SERIAL;

/// Give up on a write the host is not draining after this long
const WRITE_TIMEOUT_US: u64 = 500_000;

/// Control channel failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Error {
    /// USB stack error other than `WouldBlock`
    Usb,
    /// Host stopped reading
    TimedOut,
    /// Interface was never installed in [`SERIAL`]
    Unavailable,
}

impl From<UsbError> for Error {
    fn from(_: UsbError) -> Self {
        Self::Usb
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::Usb | Self::Unavailable => embedded_io::ErrorKind::Other,
            Self::TimedOut => embedded_io::ErrorKind::TimedOut,
        }
    }
}

/// USB device plus its serial class
pub struct SerialInterface {
    /// Device state machine
    usb_device: UsbDevice<'static, UsbBus>,
    /// CDC-ACM class
    usb_serial: SerialPort<'static, UsbBus>,
    /// Bytes received while polling but not yet read
    pending: [u8; 256],
    /// Valid bytes in `pending`
    pending_len: usize,
}

impl SerialInterface {
    /// Enumerate as a CDC-ACM device on `usb_bus`
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let usb_serial = SerialPort::new(usb_bus);
        let usb_device = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x16c0, 0x27dd))
            .strings(&[StringDescriptors::default()
                .manufacturer("efnmr")
                .product("EFNMR pulse controller")
                .serial_number("EFNMR-PICO")])
            .unwrap()
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        Self {
            usb_device,
            usb_serial,
            pending: [0; 256],
            pending_len: 0,
        }
    }

    /// Service the USB stack and collect any received bytes. The endpoint is always drained, so
    /// bytes that arrive while `pending` is full are dropped.
    pub fn process(&mut self) {
        let was_configured = self.is_configured();
        if self.usb_device.poll(&mut [&mut self.usb_serial]) {
            let mut scratch = [0u8; 64];
            let overflow = self.pending_len == self.pending.len();
            let target = if overflow {
                &mut scratch[..]
            } else {
                &mut self.pending[self.pending_len..]
            };
            match self.usb_serial.read(target) {
                Ok(len) if overflow => {
                    warn!("Dropped {=usize} bytes received during an acquisition", len)
                }
                Ok(len) => self.pending_len += len,
                Err(UsbError::WouldBlock) => {}
                Err(_) => debug!("USB read failed"),
            }
        }
        if self.is_configured() != was_configured {
            debug!("USB configured: {=bool}", self.is_configured());
        }
    }

    /// Host has configured the device
    pub fn is_configured(&self) -> bool {
        self.usb_device.state() == UsbDeviceState::Configured
    }

    /// Received bytes are waiting
    fn has_pending(&self) -> bool {
        self.pending_len > 0
    }

    /// Move received bytes into `buf`
    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.pending_len);
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.copy_within(len..self.pending_len, 0);
        self.pending_len -= len;
        len
    }
}

/// Handle on the interrupt-serviced [`SerialInterface`]
pub struct ControlChannel {
    /// Deadlines for blocking writes
    timer: Timer,
}

impl ControlChannel {
    /// Install `interface` for the USB interrupt and return a handle to it
    pub fn install(interface: SerialInterface, timer: Timer) -> Self {
        critical_section::with(|cs| SERIAL.replace(cs, Some(interface)));
        Self { timer }
    }

    /// Run `f` on the shared interface inside a critical section
    fn with_interface<T>(&mut self, f: impl FnOnce(&mut SerialInterface) -> T) -> Result<T, Error> {
        critical_section::with(|cs| SERIAL.borrow_ref_mut(cs).as_mut().map(f))
            .ok_or(Error::Unavailable)
    }

    /// Retry `op` until it stops returning `WouldBlock` or the deadline passes. Interrupts run
    /// between attempts, which is what drains the USB buffers.
    fn with_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut SerialPort<'static, UsbBus>) -> Result<T, UsbError>,
    ) -> Result<T, Error> {
        let deadline = self.timer.get_counter().ticks() + WRITE_TIMEOUT_US;
        loop {
            match self.with_interface(|interface| {
                interface.process();
                op(&mut interface.usb_serial)
            })? {
                Err(UsbError::WouldBlock) => {}
                other => return other.map_err(Error::from),
            }
            if self.timer.get_counter().ticks() >= deadline {
                return Err(Error::TimedOut);
            }
        }
    }
}

impl embedded_io::ErrorType for ControlChannel {
    type Error = Error;
}

impl embedded_io::ReadReady for ControlChannel {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.with_interface(|interface| interface.has_pending())
    }
}

impl embedded_io::Read for ControlChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Blocks until at least one byte arrives, as `Read` requires
        loop {
            let len = self.with_interface(|interface| interface.take_pending(buf))?;
            if len > 0 {
                return Ok(len);
            }
            cortex_m::asm::wfi();
        }
    }
}

impl embedded_io::Write for ControlChannel {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.with_retry(|serial| serial.write(buf))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.with_retry(|serial| serial.flush())
    }
}
