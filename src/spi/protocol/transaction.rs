/// Frame descriptions for the MRAM SPI protocol

use alloc::vec::Vec;

use super::commands::{self, Opcode, StatusRegister};
use crate::error::Error;

/// Byte clocked out while the chip is the one talking
pub const DUMMY_BYTE: u8 = 0xFF;

/// One chip-select framed exchange (hardware-independent representation)
///
/// Addressed variants only exist with a validated, masked address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction<'a> {
    /// Bare opcode, no address and no data
    Command(Opcode),
    /// RDSR followed by one dummy byte
    ReadStatus,
    /// WRSR followed by the new status byte
    WriteStatus(StatusRegister),
    /// READ + 3 address bytes + `len` dummy bytes
    Read { address: u32, len: usize },
    /// WRITE + 3 address bytes + payload
    Write { address: u32, data: &'a [u8] },
}

impl<'a> Transaction<'a> {
    /// Create a bare command transaction
    pub fn command(opcode: Opcode) -> Self {
        Self::Command(opcode)
    }

    /// Create a status register read
    pub fn read_status() -> Self {
        Self::ReadStatus
    }

    /// Create a status register write
    pub fn write_status(status: StatusRegister) -> Self {
        Self::WriteStatus(status)
    }

    /// Create a data read, validating the range first
    pub fn read(address: u32, len: usize) -> Result<Self, Error> {
        let address = commands::check_range(address, len)?;
        Ok(Self::Read { address, len })
    }

    /// Create a data write, validating the range first
    pub fn write(address: u32, data: &'a [u8]) -> Result<Self, Error> {
        let address = commands::check_range(address, data.len())?;
        Ok(Self::Write { address, data })
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Command(opcode) => *opcode,
            Self::ReadStatus => Opcode::ReadStatus,
            Self::WriteStatus(_) => Opcode::WriteStatus,
            Self::Read { .. } => Opcode::Read,
            Self::Write { .. } => Opcode::Write,
        }
    }

    /// Masked address (None for unaddressed commands)
    pub fn address(&self) -> Option<u32> {
        match self {
            Self::Read { address, .. } | Self::Write { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Opcode plus address bytes
    pub fn header_len(&self) -> usize {
        1 + self.opcode().address_len()
    }

    /// Bytes following the header
    pub fn data_len(&self) -> usize {
        match self {
            Self::Command(_) => 0,
            Self::ReadStatus | Self::WriteStatus(_) => 1,
            Self::Read { len, .. } => *len,
            Self::Write { data, .. } => data.len(),
        }
    }

    /// Total number of bytes clocked while selected
    pub fn frame_len(&self) -> usize {
        self.header_len() + self.data_len()
    }

    /// Whether the data phase carries bytes from the chip
    pub fn expects_response(&self) -> bool {
        matches!(self, Self::ReadStatus | Self::Read { .. })
    }

    /// Append the full MOSI byte stream of this frame to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode().into());
        if let Some(address) = self.address() {
            buf.extend_from_slice(&commands::address_bytes(address));
        }

        match self {
            Self::Command(_) => {}
            Self::ReadStatus => buf.push(DUMMY_BYTE),
            Self::WriteStatus(status) => buf.push(status.to_write_byte()),
            Self::Read { len, .. } => buf.resize(buf.len() + len, DUMMY_BYTE),
            Self::Write { data, .. } => buf.extend_from_slice(data),
        }
    }
}
