/// FTDI backend implementation using libftd2xx
///
/// Drives the MRAM from the MPSSE engine of an FT4232H channel. The SPI
/// lines are fixed by the MPSSE, chip-select can be any of the remaining
/// lower GPIO lines.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use libftd2xx::{
    ClockData, ClockDataOut, Ft4232h, FtdiCommon, FtdiMpsse, MpsseCmdBuilder, MpsseCmdExecutor,
};
use bitflags::bitflags;

use crate::error::Error;
use super::{check_lengths, GpioControl, PinLevel, SpiBackend};

/*
Pin assignments on FTDI FT4232H (channel A):
SPI_CLK:   AD0
SPI_MOSI:  AD1
SPI_MISO:  AD2
SPI_CS_N:  AD3 (default, any of AD3..AD7)
*/

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub struct SpiPin: u8 {
        const CLK =  1;          // Mask 0x01, AD0
        const MOSI = 1 << 1;     // Mask 0x02, AD1
        const MISO = 1 << 2;     // Mask 0x04, AD2
        const AD3 =  1 << 3;     // Mask 0x08, AD3
        const AD4 =  1 << 4;     // Mask 0x10, AD4
        const AD5 =  1 << 5;     // Mask 0x20, AD5
        const AD6 =  1 << 6;     // Mask 0x40, AD6
        const AD7 =  1 << 7;     // Mask 0x80, AD7
    }
}

/// Default SPI clock
pub const DEFAULT_CLOCK_HZ: u32 = 1_000_000;

struct FtdiPort {
    dev: Ft4232h,
    /// Lower GPIO byte as last written
    state: SpiPin,
    direction: SpiPin,
}

impl FtdiPort {
    fn write_gpio(&mut self) -> Result<(), Error> {
        self.dev.set_gpio_lower(self.state.bits(), self.direction.bits())?;
        Ok(())
    }
}

/// FTDI MPSSE backend
///
/// Owns the device; [`FtdiBackend::split`] hands out the GPIO and SPI
/// capabilities, which share it.
pub struct FtdiBackend {
    port: Rc<RefCell<FtdiPort>>,
}

impl FtdiBackend {
    /// Create a new FTDI backend with the specified device
    pub fn new(dev: Ft4232h) -> Self {
        Self {
            port: Rc::new(RefCell::new(FtdiPort {
                dev,
                state: SpiPin::empty(),
                direction: SpiPin::CLK | SpiPin::MOSI,
            })),
        }
    }

    /// Open FTDI device by description
    pub fn open(description: &str) -> Result<Self, Error> {
        let dev = Ft4232h::with_description(description)?;
        Ok(Self::new(dev))
    }

    /// Map a pin id to its GPIO bit, rejecting the SPI lines
    fn pin_mask(pin: u8) -> Result<SpiPin, Error> {
        if !(3..8).contains(&pin) {
            return Err(Error::InvalidPin(pin));
        }
        Ok(SpiPin::from_bits_retain(1 << pin))
    }

    /// Helper to set/clear specific bits
    fn set_data_bits_single(current_bits: SpiPin, target_bits: SpiPin, high: bool) -> Result<SpiPin, Error> {
        if target_bits.bits().count_ones() != 1 {
            return Err(Error::InvalidPin(target_bits.bits()));
        }

        let bits_set = if high {
            current_bits | target_bits
        } else {
            current_bits & !target_bits
        };

        Ok(bits_set)
    }

    /// Put the channel in MPSSE mode and park `cs_pin` high
    pub fn initialize(&mut self, cs_pin: u8, clock_hz: u32) -> Result<(), Error> {
        let cs = Self::pin_mask(cs_pin)?;
        let mut port = self.port.borrow_mut();

        // Set MPSSE mode
        port.dev.set_bit_mode(0x0, libftd2xx::BitMode::Mpsse)?;

        // Set latency timer
        port.dev.set_latency_timer(Duration::from_millis(2))?;

        // SPI mode 0: CLK idles low, CS deselected
        port.direction |= cs;
        port.state = cs;
        port.write_gpio()?;

        port.dev.set_clock(clock_hz)?;

        Ok(())
    }

    /// Split into the chip-select and SPI capabilities
    pub fn split(self) -> (FtdiGpio, FtdiSpi) {
        (
            FtdiGpio { port: Rc::clone(&self.port) },
            FtdiSpi { port: self.port },
        )
    }
}

/// GPIO capability of an [`FtdiBackend`]
pub struct FtdiGpio {
    port: Rc<RefCell<FtdiPort>>,
}

impl GpioControl for FtdiGpio {
    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), Error> {
        let mask = FtdiBackend::pin_mask(pin)?;
        let mut port = self.port.borrow_mut();

        port.state = FtdiBackend::set_data_bits_single(port.state, mask, level == PinLevel::High)?;
        port.direction |= mask;
        port.write_gpio()
    }
}

/// SPI capability of an [`FtdiBackend`]
pub struct FtdiSpi {
    port: Rc<RefCell<FtdiPort>>,
}

impl SpiBackend for FtdiSpi {
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error> {
        check_lengths(tx, rx.as_deref())?;
        let mut port = self.port.borrow_mut();

        match rx {
            Some(rx) => {
                // MSB first, out on falling edge, in on rising edge
                let builder = MpsseCmdBuilder::new()
                    .clock_data(ClockData::MsbPosIn, tx)
                    .send_immediate();
                port.dev.send(builder.as_slice())?;
                port.dev.recv(rx)?;
            }
            None => {
                let builder = MpsseCmdBuilder::new()
                    .clock_data_out(ClockDataOut::MsbNeg, tx)
                    .send_immediate();
                port.dev.send(builder.as_slice())?;
            }
        }

        Ok(())
    }
}
