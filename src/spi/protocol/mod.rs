/// Protocol module - hardware-independent MRAM SPI protocol implementation
///
/// This module defines the command set and frame layout without
/// depending on any specific hardware backend (FTDI, embedded-hal, etc.)

pub mod commands;
pub mod transaction;
