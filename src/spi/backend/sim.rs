//! In-memory MRAM chip model
//!
//! `SimulatedMram` behaves like the real part on the wire: it watches the
//! chip-select line, decodes opcodes as they are clocked in, answers READ and
//! RDSR on MISO and applies WREN/WRDI/WRITE/WRSR/SLEEP/WAKE when chip-select
//! is released. It also keeps a log of every frame and delay, and can fail the
//! n-th GPIO write or SPI transfer to exercise error paths.
//!
//! The GPIO, SPI and delay handles share one model, so all three can be handed
//! to the engine while the test keeps the `SimulatedMram` for inspection.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use embedded_hal::delay::DelayNs;

use crate::error::Error;
use crate::spi::protocol::commands::{ADDRESS_MASK, MRAM_SIZE, Opcode, StatusRegister};
use super::{check_lengths, GpioControl, PinLevel, SpiBackend};

/// MISO level when the chip is not driving the line
const IDLE_MISO: u8 = 0xFF;

/// One blocking delay as seen by the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRecord {
    pub ns: u64,
    /// Chip-select level for the whole delay
    pub cs_high: bool,
}

fn frame_address(frame: &[u8]) -> u32 {
    u32::from_be_bytes([0, frame[1], frame[2], frame[3]]) & ADDRESS_MASK
}

struct ChipState {
    cs_pin: u8,
    cs_high: bool,
    memory: Vec<u8>,
    status: StatusRegister,
    asleep: bool,
    // Last completed frame was a READ, the next RDSR answers garbage
    after_read: bool,
    frame: Vec<u8>,
    frames: Vec<Vec<u8>>,
    delays: Vec<DelayRecord>,
    gpio_writes: usize,
    transfers: usize,
    fail_gpio_at: Option<usize>,
    fail_transfer_at: Option<usize>,
}

impl ChipState {
    fn new(cs_pin: u8) -> Self {
        Self {
            cs_pin,
            // Pull-up on chip-select
            cs_high: true,
            memory: vec![0u8; MRAM_SIZE],
            status: StatusRegister::empty(),
            asleep: false,
            after_read: false,
            frame: Vec::new(),
            frames: Vec::new(),
            delays: Vec::new(),
            gpio_writes: 0,
            transfers: 0,
            fail_gpio_at: None,
            fail_transfer_at: None,
        }
    }

    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), Error> {
        let index = self.gpio_writes;
        self.gpio_writes += 1;
        if self.fail_gpio_at == Some(index) {
            return Err(Error::Gpio { pin });
        }

        if pin != self.cs_pin {
            return Ok(());
        }

        match level {
            PinLevel::Low if self.cs_high => {
                self.cs_high = false;
                self.frame.clear();
            }
            PinLevel::High if !self.cs_high => {
                self.cs_high = true;
                self.end_frame();
            }
            _ => {}
        }
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error> {
        let index = self.transfers;
        self.transfers += 1;
        if self.fail_transfer_at == Some(index) {
            return Err(Error::Spi);
        }
        check_lengths(tx, rx.as_deref())?;

        match rx {
            Some(rx) => {
                for (mosi, miso) in tx.iter().zip(rx.iter_mut()) {
                    *miso = self.clock_byte(*mosi);
                }
            }
            None => {
                for mosi in tx {
                    self.clock_byte(*mosi);
                }
            }
        }
        Ok(())
    }

    /// Shift one byte in, return the byte shifted out
    fn clock_byte(&mut self, mosi: u8) -> u8 {
        if self.cs_high {
            return IDLE_MISO;
        }

        let position = self.frame.len();
        self.frame.push(mosi);
        if position == 0 {
            return IDLE_MISO;
        }

        let opcode = Opcode::from_code(self.frame[0]);
        if self.asleep {
            return IDLE_MISO;
        }

        match opcode {
            Some(Opcode::ReadStatus) if self.after_read => IDLE_MISO,
            Some(Opcode::ReadStatus) => self.status.bits(),
            Some(Opcode::Read) if position >= 4 => {
                let address = frame_address(&self.frame) + (position - 4) as u32;
                self.memory[(address & ADDRESS_MASK) as usize]
            }
            _ => IDLE_MISO,
        }
    }

    fn end_frame(&mut self) {
        let frame = core::mem::take(&mut self.frame);
        let Some(&code) = frame.first() else {
            return;
        };
        let opcode = Opcode::from_code(code);

        if self.asleep {
            if opcode == Some(Opcode::Wake) {
                self.asleep = false;
            }
            self.frames.push(frame);
            return;
        }

        let latched = self.status.contains(StatusRegister::WEL);
        let rejected = opcode.is_some_and(|op| op.needs_write_enable()) && !latched;

        match opcode {
            _ if rejected => {}
            Some(Opcode::WriteEnable) => self.status.insert(StatusRegister::WEL),
            Some(Opcode::WriteDisable) => self.status.remove(StatusRegister::WEL),
            Some(Opcode::WriteStatus) if frame.len() >= 2 => {
                let written = StatusRegister::from_raw(frame[1]) & StatusRegister::WRITABLE;
                self.status = written | (self.status & StatusRegister::WEL);
            }
            // The latch survives WRITE on this part, only WRDI clears it
            Some(Opcode::Write) if frame.len() > 4 => {
                let base = frame_address(&frame);
                let protection = self.status.block_protection();
                for (offset, byte) in frame[4..].iter().enumerate() {
                    let address = (base + offset as u32) & ADDRESS_MASK;
                    if !protection.covers(address) {
                        self.memory[address as usize] = *byte;
                    }
                }
            }
            Some(Opcode::Sleep) => self.asleep = true,
            _ => {}
        }

        self.after_read = opcode == Some(Opcode::Read);
        self.frames.push(frame);
    }

    fn delay(&mut self, ns: u64) {
        self.delays.push(DelayRecord {
            ns,
            cs_high: self.cs_high,
        });
    }
}

/// Simulated MRAM chip
#[derive(Clone)]
pub struct SimulatedMram {
    state: Rc<RefCell<ChipState>>,
}

impl SimulatedMram {
    /// Create a blank (all zero) chip selected through `cs_pin`
    pub fn new(cs_pin: u8) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChipState::new(cs_pin))),
        }
    }

    /// Handle implementing [`GpioControl`]
    pub fn gpio(&self) -> SimGpio {
        SimGpio { state: Rc::clone(&self.state) }
    }

    /// Handle implementing [`SpiBackend`]
    pub fn spi(&self) -> SimSpi {
        SimSpi { state: Rc::clone(&self.state) }
    }

    /// Handle implementing `DelayNs`
    pub fn delay(&self) -> SimDelay {
        SimDelay { state: Rc::clone(&self.state) }
    }

    /// Copy of the memory array
    pub fn memory(&self) -> Vec<u8> {
        self.state.borrow().memory.clone()
    }

    /// Preload memory starting at `address`
    pub fn load(&self, address: u32, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let start = address as usize;
        state.memory[start..start + data.len()].copy_from_slice(data);
    }

    pub fn status(&self) -> StatusRegister {
        self.state.borrow().status
    }

    /// Force the status register, bypassing WEL
    pub fn set_status(&self, status: StatusRegister) {
        self.state.borrow_mut().status = status;
    }

    pub fn cs_high(&self) -> bool {
        self.state.borrow().cs_high
    }

    pub fn is_asleep(&self) -> bool {
        self.state.borrow().asleep
    }

    /// MOSI bytes of every completed chip-select frame
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.borrow().frames.clone()
    }

    /// Opcodes of every completed frame
    pub fn opcodes(&self) -> Vec<u8> {
        self.state.borrow().frames.iter().filter_map(|f| f.first().copied()).collect()
    }

    pub fn clear_frames(&self) {
        self.state.borrow_mut().frames.clear();
    }

    pub fn delays(&self) -> Vec<DelayRecord> {
        self.state.borrow().delays.clone()
    }

    /// Number of GPIO writes and SPI transfers seen so far
    pub fn bus_activity(&self) -> (usize, usize) {
        let state = self.state.borrow();
        (state.gpio_writes, state.transfers)
    }

    /// Fail the `n`-th GPIO write from now (0 = the next one)
    pub fn fail_gpio_write(&self, n: usize) {
        let mut state = self.state.borrow_mut();
        state.fail_gpio_at = Some(state.gpio_writes + n);
    }

    /// Fail the `n`-th SPI transfer from now (0 = the next one)
    pub fn fail_transfer(&self, n: usize) {
        let mut state = self.state.borrow_mut();
        state.fail_transfer_at = Some(state.transfers + n);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.borrow_mut();
        state.fail_gpio_at = None;
        state.fail_transfer_at = None;
    }
}

pub struct SimGpio {
    state: Rc<RefCell<ChipState>>,
}

impl GpioControl for SimGpio {
    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), Error> {
        self.state.borrow_mut().write_pin(pin, level)
    }
}

pub struct SimSpi {
    state: Rc<RefCell<ChipState>>,
}

impl SpiBackend for SimSpi {
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error> {
        self.state.borrow_mut().transfer(tx, rx)
    }
}

pub struct SimDelay {
    state: Rc<RefCell<ChipState>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.state.borrow_mut().delay(u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.state.borrow_mut().delay(u64::from(us) * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.state.borrow_mut().delay(u64::from(ms) * 1_000_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sim: &SimulatedMram, tx: &[u8]) -> Vec<u8> {
        let mut gpio = sim.gpio();
        let mut spi = sim.spi();
        let mut rx = vec![0u8; tx.len()];
        gpio.write_pin(0, PinLevel::Low).unwrap();
        spi.transfer(tx, Some(&mut rx[..])).unwrap();
        gpio.write_pin(0, PinLevel::High).unwrap();
        rx
    }

    #[test]
    fn test_ignores_bytes_while_deselected() {
        let sim = SimulatedMram::new(0);
        let mut spi = sim.spi();
        spi.transfer(&[0x06], None).unwrap();
        assert!(sim.frames().is_empty());
        assert_eq!(sim.status(), StatusRegister::empty());
    }

    #[test]
    fn test_write_needs_latch() {
        let sim = SimulatedMram::new(0);
        frame(&sim, &[0x02, 0x00, 0x00, 0x10, 0xAA]);
        assert_eq!(sim.memory()[0x10], 0x00);

        frame(&sim, &[0x06]);
        frame(&sim, &[0x02, 0x00, 0x00, 0x10, 0xAA]);
        assert_eq!(sim.memory()[0x10], 0xAA);
        assert!(sim.status().contains(StatusRegister::WEL));

        frame(&sim, &[0x04]);
        assert!(!sim.status().contains(StatusRegister::WEL));
    }

    #[test]
    fn test_read_echo_and_data() {
        let sim = SimulatedMram::new(0);
        sim.load(0x7FFFE, &[0x11, 0x22]);
        let rx = frame(&sim, &[0x03, 0x07, 0xFF, 0xFE, 0xFF, 0xFF]);
        assert_eq!(&rx[4..], [0x11, 0x22]);
    }

    #[test]
    fn test_status_after_read_is_stale() {
        let sim = SimulatedMram::new(0);
        sim.set_status(StatusRegister::BP0);
        frame(&sim, &[0x03, 0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(frame(&sim, &[0x05, 0xFF])[1], IDLE_MISO);
        assert_eq!(frame(&sim, &[0x05, 0xFF])[1], 0x04);
    }

    #[test]
    fn test_block_protection_rejects_writes() {
        let sim = SimulatedMram::new(0);
        sim.set_status(StatusRegister::WEL | StatusRegister::BP0);
        frame(&sim, &[0x02, 0x05, 0xFF, 0xFF, 0x01, 0x02]);
        let memory = sim.memory();
        assert_eq!(memory[0x5FFFF], 0x01);
        assert_eq!(memory[0x60000], 0x00);
    }

    #[test]
    fn test_sleep_ignores_commands() {
        let sim = SimulatedMram::new(0);
        frame(&sim, &[0xB9]);
        assert!(sim.is_asleep());
        frame(&sim, &[0x06]);
        assert!(!sim.status().contains(StatusRegister::WEL));
        frame(&sim, &[0xAB]);
        assert!(!sim.is_asleep());
    }

    #[test]
    fn test_fault_injection() {
        let sim = SimulatedMram::new(0);
        let mut gpio = sim.gpio();
        sim.fail_gpio_write(1);
        assert!(gpio.write_pin(0, PinLevel::Low).is_ok());
        assert!(matches!(gpio.write_pin(0, PinLevel::High), Err(Error::Gpio { pin: 0 })));
        assert!(!sim.cs_high());

        let mut spi = sim.spi();
        sim.fail_transfer(0);
        assert!(matches!(spi.transfer(&[0x06], None), Err(Error::Spi)));
        assert!(spi.transfer(&[0x06], None).is_ok());

        sim.fail_transfer(0);
        sim.fail_gpio_write(0);
        sim.clear_faults();
        assert!(spi.transfer(&[0x06], None).is_ok());
        assert!(gpio.write_pin(0, PinLevel::High).is_ok());
    }
}
