use thiserror::Error as DeriveError;
#[cfg(feature = "ftdi")]
use libftd2xx::{TimeoutError as FtdiTimeout, FtStatus, DeviceTypeError};

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected before touching the bus
    InvalidArgument,
    /// The GPIO or SPI capability reported a failure mid-operation
    CapabilityFailure,
}

#[derive(DeriveError, Debug)]
pub enum Error {
    #[error("Zero-length transfer")]
    EmptyTransfer,

    #[error("Range {addr:#07X} + {len} bytes exceeds the 512 KiB address space")]
    AddressOutOfRange { addr: u32, len: usize },

    #[error("Transfer of {len} bytes exceeds the configured maximum of {max}")]
    TransferTooLarge { len: usize, max: usize },

    #[error("Invalid protection block {0} (must be 0 or 1)")]
    InvalidBlock(u8),

    #[error("Receive length {rx} does not match transmit length {tx}")]
    LengthMismatch { tx: usize, rx: usize },

    #[error("GPIO write failed on pin {pin}")]
    Gpio { pin: u8 },

    #[error("SPI transfer failed")]
    Spi,

    #[error("Pin {0} cannot be driven by this backend")]
    InvalidPin(u8),

    #[cfg(feature = "ftdi")]
    #[error("FTDI Timeout")]
    DeviceTimeout(#[from] FtdiTimeout),

    #[cfg(feature = "ftdi")]
    #[error("FTDI Status: {0}")]
    FtStatus(#[from] FtStatus),

    #[cfg(feature = "ftdi")]
    #[error("FTDI Device Type Error: {0}")]
    DeviceTypeError(#[from] DeviceTypeError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyTransfer
            | Self::AddressOutOfRange { .. }
            | Self::TransferTooLarge { .. }
            | Self::InvalidBlock(_)
            | Self::LengthMismatch { .. } => ErrorKind::InvalidArgument,
            _ => ErrorKind::CapabilityFailure,
        }
    }
}
