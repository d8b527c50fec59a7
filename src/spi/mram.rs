/// MRAM command protocol engine
///
/// Turns each device operation into chip-select framed SPI transactions,
/// using the backend abstraction to work with any GPIO/SPI implementation.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};

use crate::error::Error;
use super::backend::{GpioControl, PinLevel, SpiBackend};
use super::protocol::commands::{
    timing, BlockProtection, Opcode, Protection, StatusRegister, WriteLatch, ADDRESS_BYTES,
};
use super::protocol::transaction::Transaction;

/// Default upper bound for the data phase of a single READ/WRITE
pub const DEFAULT_MAX_TRANSFER_LEN: usize = 4096;

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Largest data phase accepted by `read`/`write`, in bytes
    ///
    /// The frame buffer is allocated once with this bound; longer requests
    /// are rejected with [`Error::TransferTooLarge`].
    pub max_transfer_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_transfer_len: DEFAULT_MAX_TRANSFER_LEN,
        }
    }
}

/// Transmit and receive halves of the current frame
struct FrameBuffer {
    tx: Vec<u8>,
    rx: Vec<u8>,
}

impl FrameBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            tx: Vec::with_capacity(capacity),
            rx: Vec::with_capacity(capacity),
        }
    }

    fn load(&mut self, txn: &Transaction<'_>) {
        self.tx.clear();
        txn.encode(&mut self.tx);
        self.rx.clear();
        self.rx.resize(self.tx.len(), 0);
    }
}

/// SPI MRAM device handle
///
/// * `G` – GPIO capability, drives chip-select
/// * `S` – SPI capability
/// * `D` – Delay provider for the sleep/wake timings
///
/// All methods take `&mut self`: one transaction is in flight at a time.
/// Sharing a bus or chip-select line with other users must be serialized
/// by the caller.
pub struct Mram<G, S, D> {
    gpio: G,
    spi: S,
    delay: D,
    cs_pin: u8,
    config: Config,
    frame: FrameBuffer,
    last_opcode: Option<Opcode>,
}

impl<G, S, D> Mram<G, S, D>
where
    G: GpioControl,
    S: SpiBackend,
    D: DelayNs,
{
    /// Initialize the device with the default [`Config`]
    ///
    /// Drives chip-select high and issues WRDI so the chip starts
    /// write-protected. The handle is only returned if every step succeeds.
    pub fn init(gpio: G, spi: S, delay: D, cs_pin: u8) -> Result<Self, Error> {
        Self::init_with_config(gpio, spi, delay, cs_pin, Config::default())
    }

    /// Initialize the device with an explicit [`Config`]
    pub fn init_with_config(
        gpio: G,
        spi: S,
        delay: D,
        cs_pin: u8,
        config: Config,
    ) -> Result<Self, Error> {
        Self::start(gpio, spi, delay, cs_pin, config, false)
    }

    /// Initialize a device that was left in sleep mode
    ///
    /// Like [`Mram::init`], but WAKE is the first command on the bus and the
    /// tRDP wait completes before WRDI is sent.
    pub fn init_after_sleep(gpio: G, spi: S, delay: D, cs_pin: u8) -> Result<Self, Error> {
        Self::start(gpio, spi, delay, cs_pin, Config::default(), true)
    }

    fn start(
        gpio: G,
        spi: S,
        delay: D,
        cs_pin: u8,
        config: Config,
        wake: bool,
    ) -> Result<Self, Error> {
        if config.max_transfer_len == 0 {
            return Err(Error::EmptyTransfer);
        }

        let mut mram = Self {
            gpio,
            spi,
            delay,
            cs_pin,
            config,
            frame: FrameBuffer::with_capacity(1 + ADDRESS_BYTES + config.max_transfer_len),
            last_opcode: None,
        };

        debug!("Initializing MRAM, chip-select on pin {cs_pin}");
        mram.gpio.write_pin(cs_pin, PinLevel::High)?;
        if wake {
            mram.wake()?;
        }
        mram.write_disable()?;

        Ok(mram)
    }

    /// Give back the capabilities
    pub fn release(self) -> (G, S, D) {
        (self.gpio, self.spi, self.delay)
    }

    pub fn cs_pin(&self) -> u8 {
        self.cs_pin
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `body` with chip-select asserted
    ///
    /// Chip-select is driven high again on every path, including when
    /// asserting it failed. If both the body and the release fail, the body's
    /// error is returned.
    fn framed<T, F>(&mut self, opcode: Opcode, body: F) -> Result<T, Error>
    where
        F: FnOnce(&mut S, &mut FrameBuffer) -> Result<T, Error>,
    {
        self.last_opcode = None;

        let result = match self.gpio.write_pin(self.cs_pin, PinLevel::Low) {
            Ok(()) => body(&mut self.spi, &mut self.frame),
            Err(err) => Err(err),
        };
        let released = self.gpio.write_pin(self.cs_pin, PinLevel::High);

        match (result, released) {
            (Ok(value), Ok(())) => {
                self.last_opcode = Some(opcode);
                Ok(value)
            }
            (Err(err), Err(release_err)) => {
                warn!("{opcode:?} failed ({err}), releasing chip-select failed too: {release_err}");
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
        }
    }

    /// Encode and run one transaction
    fn execute(&mut self, txn: &Transaction<'_>) -> Result<(), Error> {
        self.frame.load(txn);
        trace!(
            "{:?} frame ({} bytes): {}",
            txn.opcode(),
            self.frame.tx.len(),
            hex::encode(&self.frame.tx[..txn.header_len()])
        );

        let split = matches!(txn, Transaction::ReadStatus | Transaction::WriteStatus(_));
        let response = txn.expects_response();

        self.framed(txn.opcode(), |spi, frame| {
            if split {
                // Opcode and status byte are two transfers under one selection
                spi.transfer(&frame.tx[..1], None)?;
                let rx = if response { Some(&mut frame.rx[1..]) } else { None };
                return spi.transfer(&frame.tx[1..], rx);
            }

            let rx = if response { Some(&mut frame.rx[..]) } else { None };
            spi.transfer(&frame.tx, rx)
        })
    }

    fn command(&mut self, opcode: Opcode) -> Result<(), Error> {
        self.execute(&Transaction::command(opcode))
    }

    fn check_transfer_len(&self, len: usize) -> Result<(), Error> {
        if len > self.config.max_transfer_len {
            return Err(Error::TransferTooLarge {
                len,
                max: self.config.max_transfer_len,
            });
        }
        Ok(())
    }

    /// Bracket `op` with WREN / WRDI
    ///
    /// If `op` fails, WRDI is still attempted and `op`'s error is returned.
    /// If only the final WRDI fails, WEL may be left set.
    fn with_write_enabled<F>(&mut self, op: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Self) -> Result<(), Error>,
    {
        self.write_enable()?;

        if let Err(err) = op(self) {
            if let Err(cleanup) = self.write_disable() {
                warn!("WRDI after failed write also failed: {cleanup}");
            }
            return Err(err);
        }

        self.write_disable()
    }

    /// Set the write enable latch (WREN)
    pub fn write_enable(&mut self) -> Result<(), Error> {
        self.command(Opcode::WriteEnable)
    }

    /// Reset the write enable latch (WRDI)
    pub fn write_disable(&mut self) -> Result<(), Error> {
        self.command(Opcode::WriteDisable)
    }

    /// Read `buffer.len()` bytes starting at `address`
    ///
    /// The whole range must lie inside the 512 KiB array; it is checked on
    /// the address as given, before masking to 19 bits. Never changes WEL.
    pub fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Error> {
        let txn = Transaction::read(address, buffer.len())?;
        self.check_transfer_len(buffer.len())?;

        self.execute(&txn)?;

        // First bytes received are the opcode/address echo
        buffer.copy_from_slice(&self.frame.rx[txn.header_len()..]);
        Ok(())
    }

    /// Write `data` starting at `address`
    ///
    /// Sent as one WRITE transaction between WREN and WRDI, without
    /// read-back verification.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        let txn = Transaction::write(address, data)?;
        self.check_transfer_len(data.len())?;

        debug!("Writing {} bytes at {:#07X}", data.len(), address);
        self.with_write_enabled(|mram| mram.execute(&txn))
    }

    /// Enter sleep mode
    ///
    /// Returns once tDP has elapsed. The next command sent to the chip must
    /// be [`Mram::wake`]; this is not checked.
    pub fn sleep(&mut self) -> Result<(), Error> {
        self.command(Opcode::Sleep)?;
        self.delay.delay_us(timing::T_DP_US);
        debug!("MRAM entered sleep mode");
        Ok(())
    }

    /// Exit sleep mode
    ///
    /// Chip-select is already released when the tRDP wait starts and stays
    /// high until it ends.
    pub fn wake(&mut self) -> Result<(), Error> {
        self.command(Opcode::Wake)?;
        self.delay.delay_us(timing::T_RDP_US);
        debug!("MRAM woke up");
        Ok(())
    }

    /// Read the status register (RDSR)
    ///
    /// An RDSR right after a READ returns stale data on this part; in that
    /// case a throwaway RDSR is sent first.
    pub fn read_status_register(&mut self) -> Result<StatusRegister, Error> {
        if self.last_opcode == Some(Opcode::Read) {
            debug!("Sending throwaway RDSR after READ");
            self.execute(&Transaction::read_status())?;
        }

        self.execute(&Transaction::read_status())?;
        Ok(StatusRegister::from_raw(self.frame.rx[1]))
    }

    /// Write the status register (WRSR)
    ///
    /// WEL and the reserved bits are masked off. Bracketed by WREN/WRDI like
    /// [`Mram::write`], so a WRSR never directly follows a READ.
    pub fn write_status_register(&mut self, status: StatusRegister) -> Result<(), Error> {
        debug!("Writing status register {:#04X}", status.to_write_byte());
        self.with_write_enabled(|mram| mram.execute(&Transaction::write_status(status)))
    }

    pub fn is_write_enabled(&mut self) -> Result<WriteLatch, Error> {
        Ok(self.read_status_register()?.write_latch())
    }

    /// State of WPEN
    pub fn is_write_protected(&mut self) -> Result<Protection, Error> {
        Ok(self.read_status_register()?.write_protect())
    }

    /// State of BP0 (`block` 0) or BP1 (`block` 1)
    pub fn is_block_protected(&mut self, block: u8) -> Result<Protection, Error> {
        if block > 1 {
            return Err(Error::InvalidBlock(block));
        }
        self.read_status_register()?.block(block)
    }

    /// Region currently selected by BP1:BP0
    pub fn block_protection(&mut self) -> Result<BlockProtection, Error> {
        Ok(self.read_status_register()?.block_protection())
    }

    /// Change BP1:BP0, keeping WPEN
    pub fn set_block_protection(&mut self, protection: BlockProtection) -> Result<(), Error> {
        let status = self.read_status_register()?;
        self.write_status_register(status.with_block_protection(protection))
    }

    /// Change WPEN, keeping BP1:BP0
    pub fn set_write_protect_enable(&mut self, enabled: bool) -> Result<(), Error> {
        let mut status = self.read_status_register()?;
        status.set(StatusRegister::WPEN, enabled);
        self.write_status_register(status)
    }
}
