/// Command set, address space and register definitions for the SPI MRAM

use core::ops::RangeInclusive;

use crate::error::Error;

/// Total size of the device in bytes (4 Mbit)
pub const MRAM_SIZE: usize = 512 * 1024;
/// Highest valid byte address
pub const MAX_ADDRESS: u32 = (MRAM_SIZE - 1) as u32;
/// 19-bit address mask
pub const ADDRESS_MASK: u32 = 0x7FFFF;
/// Number of address bytes sent after an addressed opcode
pub const ADDRESS_BYTES: usize = 3;

/// SPI opcodes understood by the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Set the write enable latch (WREN)
    WriteEnable = 0x06,
    /// Reset the write enable latch (WRDI)
    WriteDisable = 0x04,
    /// Read Status Register (RDSR)
    ReadStatus = 0x05,
    /// Write Status Register (WRSR)
    WriteStatus = 0x01,
    /// Read data bytes
    Read = 0x03,
    /// Write data bytes
    Write = 0x02,
    /// Enter sleep mode
    Sleep = 0xB9,
    /// Exit sleep mode
    Wake = 0xAB,
}

impl Opcode {
    /// Get the 8-bit opcode value
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Create from raw opcode value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x06 => Some(Self::WriteEnable),
            0x04 => Some(Self::WriteDisable),
            0x05 => Some(Self::ReadStatus),
            0x01 => Some(Self::WriteStatus),
            0x03 => Some(Self::Read),
            0x02 => Some(Self::Write),
            0xB9 => Some(Self::Sleep),
            0xAB => Some(Self::Wake),
            _ => None,
        }
    }

    /// Number of address bytes following the opcode
    pub fn address_len(self) -> usize {
        match self {
            Self::Read | Self::Write => ADDRESS_BYTES,
            _ => 0,
        }
    }

    /// Whether the chip only accepts this command with WEL set
    pub fn needs_write_enable(self) -> bool {
        matches!(self, Self::Write | Self::WriteStatus)
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> u8 {
        opcode.code()
    }
}

/// Status register contents
///
/// Reserved bits read as zero and are dropped when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRegister(u8);

bitflags::bitflags! {
    impl StatusRegister: u8 {
        /// Write Enable Latch (read-only)
        const WEL  = 1 << 1;
        /// Block Protect 0
        const BP0  = 1 << 2;
        /// Block Protect 1
        const BP1  = 1 << 3;
        /// Status Register Write Protect Enable
        const WPEN = 1 << 7;
    }
}

impl StatusRegister {
    /// Bits that a WRSR command is allowed to change
    pub const WRITABLE: Self = Self::BP0.union(Self::BP1).union(Self::WPEN);

    /// Decode a raw status byte, ignoring reserved bits
    pub fn from_raw(raw: u8) -> Self {
        Self::from_bits_truncate(raw)
    }

    /// The byte to send with WRSR
    pub fn to_write_byte(self) -> u8 {
        self.intersection(Self::WRITABLE).bits()
    }

    pub fn write_latch(self) -> WriteLatch {
        if self.contains(Self::WEL) {
            WriteLatch::Enabled
        } else {
            WriteLatch::Disabled
        }
    }

    pub fn write_protect(self) -> Protection {
        Protection::from_bit(self.contains(Self::WPEN))
    }

    /// Test `BP0 << block` for block 0 or 1
    pub fn block(self, block: u8) -> Result<Protection, Error> {
        let flag = match block {
            0 => Self::BP0,
            1 => Self::BP1,
            _ => return Err(Error::InvalidBlock(block)),
        };
        Ok(Protection::from_bit(self.contains(flag)))
    }

    pub fn block_protection(self) -> BlockProtection {
        BlockProtection::from_status(self)
    }

    /// Replace the BP1:BP0 field
    pub fn with_block_protection(self, protection: BlockProtection) -> Self {
        self.difference(Self::BP0 | Self::BP1)
            .union(protection.status_bits())
    }
}

/// State of the write enable latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLatch {
    Enabled,
    Disabled,
}

/// Result of a protection query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Protected,
    Unprotected,
}

impl Protection {
    fn from_bit(set: bool) -> Self {
        if set {
            Self::Protected
        } else {
            Self::Unprotected
        }
    }

    pub fn is_protected(self) -> bool {
        self == Self::Protected
    }
}

/// Memory region selected by BP1:BP0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockProtection {
    /// 00: nothing protected
    None,
    /// 01: 0x60000..=0x7FFFF
    UpperQuarter,
    /// 10: 0x40000..=0x7FFFF
    UpperHalf,
    /// 11: whole array
    All,
}

impl BlockProtection {
    pub fn from_status(status: StatusRegister) -> Self {
        match (
            status.contains(StatusRegister::BP1),
            status.contains(StatusRegister::BP0),
        ) {
            (false, false) => Self::None,
            (false, true) => Self::UpperQuarter,
            (true, false) => Self::UpperHalf,
            (true, true) => Self::All,
        }
    }

    pub fn status_bits(self) -> StatusRegister {
        match self {
            Self::None => StatusRegister::empty(),
            Self::UpperQuarter => StatusRegister::BP0,
            Self::UpperHalf => StatusRegister::BP1,
            Self::All => StatusRegister::BP0 | StatusRegister::BP1,
        }
    }

    /// Addresses rejecting writes, if any
    pub fn protected_range(self) -> Option<RangeInclusive<u32>> {
        match self {
            Self::None => None,
            Self::UpperQuarter => Some(0x60000..=MAX_ADDRESS),
            Self::UpperHalf => Some(0x40000..=MAX_ADDRESS),
            Self::All => Some(0..=MAX_ADDRESS),
        }
    }

    pub fn covers(self, address: u32) -> bool {
        self.protected_range()
            .is_some_and(|range| range.contains(&(address & ADDRESS_MASK)))
    }
}

/// Validate `len` bytes starting at `address` and return the masked address
///
/// The range is checked on the caller's unmasked address; masking only
/// normalizes an address that is already known to be in range.
pub fn check_range(address: u32, len: usize) -> Result<u32, Error> {
    if len == 0 {
        return Err(Error::EmptyTransfer);
    }

    let last = u64::from(address).saturating_add(len as u64 - 1);
    if address > MAX_ADDRESS || last > u64::from(MAX_ADDRESS) {
        return Err(Error::AddressOutOfRange { addr: address, len });
    }

    Ok(address & ADDRESS_MASK)
}

/// Big-endian address bytes for a masked 19-bit address
pub fn address_bytes(address: u32) -> [u8; ADDRESS_BYTES] {
    let [_, hi, mid, lo] = (address & ADDRESS_MASK).to_be_bytes();
    [hi, mid, lo]
}

/// Device timing parameters
pub mod timing {
    /// Time to enter sleep mode (tDP), microseconds
    pub const T_DP_US: u32 = 100;

    /// Recovery time from sleep mode (tRDP), microseconds
    /// Conservative value; CS must stay high for the whole period
    pub const T_RDP_US: u32 = 400;

    /// Write cycle time (tWC), nanoseconds
    /// Not waited on, the bus transaction itself is longer
    pub const T_WC_NS: u32 = 250;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcodes() {
        assert_eq!(Opcode::WriteEnable.code(), 0x06);
        assert_eq!(Opcode::WriteDisable.code(), 0x04);
        assert_eq!(Opcode::ReadStatus.code(), 0x05);
        assert_eq!(Opcode::WriteStatus.code(), 0x01);
        assert_eq!(Opcode::Read.code(), 0x03);
        assert_eq!(Opcode::Write.code(), 0x02);
        assert_eq!(Opcode::Sleep.code(), 0xB9);
        assert_eq!(Opcode::Wake.code(), 0xAB);
        assert_eq!(u8::from(Opcode::ReadStatus), 0x05);
    }

    #[test]
    fn test_opcode_from_code() {
        assert_eq!(Opcode::from_code(0xB9), Some(Opcode::Sleep));
        assert_eq!(Opcode::from_code(0x02), Some(Opcode::Write));
        assert_eq!(Opcode::from_code(0x9F), None);
    }

    #[test]
    fn test_address_lengths() {
        assert_eq!(Opcode::Read.address_len(), 3);
        assert_eq!(Opcode::Write.address_len(), 3);
        assert_eq!(Opcode::ReadStatus.address_len(), 0);
        assert_eq!(Opcode::Wake.address_len(), 0);
    }

    #[test]
    fn test_status_decode() {
        let status = StatusRegister::from_raw(0x84);
        assert_eq!(status.write_protect(), Protection::Protected);
        assert_eq!(status.block(0).unwrap(), Protection::Protected);
        assert_eq!(status.block(1).unwrap(), Protection::Unprotected);
        assert_eq!(status.write_latch(), WriteLatch::Disabled);

        let status = StatusRegister::from_raw(0x88);
        assert_eq!(status.block(0).unwrap(), Protection::Unprotected);
        assert_eq!(status.block(1).unwrap(), Protection::Protected);

        assert_eq!(StatusRegister::from_raw(0x02).write_latch(), WriteLatch::Enabled);
    }

    #[test]
    fn test_status_reserved_bits() {
        let status = StatusRegister::from_raw(0xFF);
        assert_eq!(status.bits(), 0x8E);
        assert_eq!(status.to_write_byte(), 0x8C);
    }

    #[test]
    fn test_block_bits_independent() {
        for raw in [0x00u8, 0x04, 0x08, 0x0C] {
            let status = StatusRegister::from_raw(raw);
            assert_eq!(status.block(0).unwrap().is_protected(), raw & 0x04 != 0);
            assert_eq!(status.block(1).unwrap().is_protected(), raw & 0x08 != 0);
        }
        assert!(matches!(StatusRegister::empty().block(2), Err(Error::InvalidBlock(2))));
    }

    #[test]
    fn test_block_protection() {
        assert_eq!(StatusRegister::from_raw(0x04).block_protection(), BlockProtection::UpperQuarter);
        assert_eq!(StatusRegister::from_raw(0x0C).block_protection(), BlockProtection::All);
        assert!(BlockProtection::UpperQuarter.covers(0x60000));
        assert!(!BlockProtection::UpperQuarter.covers(0x5FFFF));
        assert!(BlockProtection::UpperHalf.covers(0x40000));
        assert!(!BlockProtection::None.covers(0x7FFFF));

        let status = StatusRegister::WPEN | StatusRegister::BP0;
        assert_eq!(
            status.with_block_protection(BlockProtection::UpperHalf),
            StatusRegister::WPEN | StatusRegister::BP1
        );
    }

    #[test]
    fn test_check_range() {
        assert_eq!(check_range(0x7FFFC, 4).unwrap(), 0x7FFFC);
        assert_eq!(check_range(0, MRAM_SIZE).unwrap(), 0);
        assert!(matches!(check_range(0x7FFFD, 4), Err(Error::AddressOutOfRange { .. })));
        assert!(matches!(check_range(0, 0), Err(Error::EmptyTransfer)));
        // only fits after masking, still rejected
        assert!(matches!(check_range(0x80000, 1), Err(Error::AddressOutOfRange { .. })));
        assert!(matches!(check_range(u32::MAX, usize::MAX), Err(Error::AddressOutOfRange { .. })));
    }

    #[test]
    fn test_address_bytes() {
        assert_eq!(address_bytes(0x7FFFF), [0x07, 0xFF, 0xFF]);
        assert_eq!(address_bytes(0x12345), [0x01, 0x23, 0x45]);
        assert_eq!(address_bytes(0xFFF_FFFF), [0x07, 0xFF, 0xFF]);
    }
}
