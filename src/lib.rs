#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod spi;
pub mod error;

pub use embedded_hal::digital as eh_digital;
pub use embedded_hal::spi as eh_spi;
pub use embedded_storage;
pub use error::{Error, ErrorKind};
pub use spi::backend::{GpioControl, PinLevel, SpiBackend};
#[cfg(feature = "std")]
pub use spi::backend::StdDelay;
pub use spi::mram::{Config, Mram};
pub use spi::protocol::commands::{BlockProtection, Protection, StatusRegister, WriteLatch, MRAM_SIZE};
#[cfg(feature = "ftdi")]
pub use libftd2xx::{Ft4232h, FtdiCommon};
