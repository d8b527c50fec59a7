/// Backend abstraction module - hardware-specific implementations
///
/// The protocol engine consumes two capabilities: a GPIO pin write (used for
/// chip-select) and a blocking full-duplex SPI transfer. This module defines
/// the traits for both and provides implementations for embedded-hal, FTDI
/// and an in-memory chip model.

use crate::error::Error;

pub mod eh1;
pub mod sim;

#[cfg(feature = "ftdi")]
pub mod ftdi;

/// Logic level for a GPIO output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// GPIO capability
pub trait GpioControl {
    /// Drive `pin` to `level`
    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), Error>;
}

/// SPI capability
///
/// Transfers are full-duplex and length-symmetric: one byte is received for
/// every byte sent.
pub trait SpiBackend {
    /// Clock out `tx`, storing the received bytes in `rx` if given
    ///
    /// # Arguments
    /// * `tx` - Bytes to send
    /// * `rx` - Receive buffer, must be exactly `tx.len()` long; `None` for
    ///   write-only transfers
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error>;
}

impl<T: GpioControl + ?Sized> GpioControl for &mut T {
    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), Error> {
        (**self).write_pin(pin, level)
    }
}

impl<T: SpiBackend + ?Sized> SpiBackend for &mut T {
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error> {
        (**self).transfer(tx, rx)
    }
}

/// Check the length contract of [`SpiBackend::transfer`]
pub fn check_lengths(tx: &[u8], rx: Option<&[u8]>) -> Result<(), Error> {
    match rx {
        Some(rx) if rx.len() != tx.len() => Err(Error::LengthMismatch {
            tx: tx.len(),
            rx: rx.len(),
        }),
        _ => Ok(()),
    }
}

/// Blocking delay backed by the OS scheduler
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

#[cfg(feature = "std")]
impl embedded_hal::delay::DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
    }
}
