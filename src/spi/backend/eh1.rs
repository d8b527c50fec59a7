//! embedded-hal 1.0 capability adapters
//!
//! The engine drives chip-select itself, so the bus side wraps a raw
//! `embedded_hal::spi::SpiBus` rather than an `SpiDevice`, and chip-select is
//! a plain `OutputPin`.

use embedded_hal::{
    digital::OutputPin,
    spi::SpiBus,
};

use crate::error::Error;
use super::{check_lengths, GpioControl, PinLevel, SpiBackend};

/// Chip-select line backed by an embedded-hal output pin
///
/// * `P` – Output pin, answering to the pin id given at construction
pub struct EhChipSelect<P> {
    pin_id: u8,
    pin: P,
}

impl<P: OutputPin> EhChipSelect<P> {
    /// Bind `pin` to the id the engine will address it by
    pub fn new(pin_id: u8, pin: P) -> Self {
        Self { pin_id, pin }
    }

    pub fn pin_id(&self) -> u8 {
        self.pin_id
    }

    /// Give back the wrapped pin
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> GpioControl for EhChipSelect<P> {
    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), Error> {
        if pin != self.pin_id {
            return Err(Error::InvalidPin(pin));
        }

        match level {
            PinLevel::Low => self.pin.set_low(),
            PinLevel::High => self.pin.set_high(),
        }
        .map_err(|_| Error::Gpio { pin })
    }
}

/// SPI capability backed by an embedded-hal bus
///
/// * `B` – SPI bus (chip-select is *not* handled by the bus)
pub struct EhSpiBus<B> {
    bus: B,
}

impl<B: SpiBus> EhSpiBus<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Give back the wrapped bus
    pub fn release(self) -> B {
        self.bus
    }
}

impl<B: SpiBus> SpiBackend for EhSpiBus<B> {
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error> {
        match rx {
            Some(rx) => {
                check_lengths(tx, Some(&*rx))?;
                self.bus.transfer(rx, tx)
            }
            None => self.bus.write(tx),
        }
        .map_err(|_| Error::Spi)?;

        // Transfers must be complete before chip-select is released
        self.bus.flush().map_err(|_| Error::Spi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{self, ErrorType as PinErrorType};
    use embedded_hal::spi::{self, ErrorType as BusErrorType};

    #[derive(Default)]
    struct RecordingPin {
        levels: Vec<bool>,
        broken: bool,
    }

    impl PinErrorType for RecordingPin {
        type Error = digital::ErrorKind;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err(digital::ErrorKind::Other);
            }
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err(digital::ErrorKind::Other);
            }
            self.levels.push(true);
            Ok(())
        }
    }

    /// Echoes every byte back incremented by one
    #[derive(Default)]
    struct EchoBus {
        written: Vec<u8>,
        flushes: usize,
    }

    impl BusErrorType for EchoBus {
        type Error = spi::ErrorKind;
    }

    impl SpiBus for EchoBus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            words.fill(0);
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            self.written.extend_from_slice(words);
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
            self.written.extend_from_slice(write);
            for (r, w) in read.iter_mut().zip(write) {
                *r = w.wrapping_add(1);
            }
            Ok(())
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            for word in words.iter_mut() {
                *word = word.wrapping_add(1);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_chip_select_levels() {
        let mut cs = EhChipSelect::new(3, RecordingPin::default());
        cs.write_pin(3, PinLevel::Low).unwrap();
        cs.write_pin(3, PinLevel::High).unwrap();
        assert_eq!(cs.release().levels, [false, true]);
    }

    #[test]
    fn test_chip_select_wrong_pin() {
        let mut cs = EhChipSelect::new(3, RecordingPin::default());
        assert!(matches!(cs.write_pin(4, PinLevel::Low), Err(Error::InvalidPin(4))));
        assert!(cs.release().levels.is_empty());
    }

    #[test]
    fn test_chip_select_failure() {
        let pin = RecordingPin { broken: true, ..Default::default() };
        let mut cs = EhChipSelect::new(5, pin);
        assert!(matches!(cs.write_pin(5, PinLevel::High), Err(Error::Gpio { pin: 5 })));
    }

    #[test]
    fn test_bus_full_duplex() {
        let mut spi = EhSpiBus::new(EchoBus::default());
        let mut rx = [0u8; 3];
        spi.transfer(&[0x05, 0xFF, 0x10], Some(&mut rx[..])).unwrap();
        assert_eq!(rx, [0x06, 0x00, 0x11]);

        let bus = spi.release();
        assert_eq!(bus.written, [0x05, 0xFF, 0x10]);
        assert_eq!(bus.flushes, 1);
    }

    #[test]
    fn test_bus_write_only() {
        let mut spi = EhSpiBus::new(EchoBus::default());
        spi.transfer(&[0x06], None).unwrap();
        let bus = spi.release();
        assert_eq!(bus.written, [0x06]);
        assert_eq!(bus.flushes, 1);
    }

    #[test]
    fn test_bus_length_mismatch() {
        let mut spi = EhSpiBus::new(EchoBus::default());
        let mut rx = [0u8; 1];
        assert!(matches!(
            spi.transfer(&[1, 2], Some(&mut rx[..])),
            Err(Error::LengthMismatch { tx: 2, rx: 1 })
        ));
        assert!(spi.release().written.is_empty());
    }
}
