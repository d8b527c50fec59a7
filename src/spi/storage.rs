//! Implementations of the `embedded_storage` traits for [`Mram`].
//!
//! MRAM needs no erase and has no page boundaries, so the plain
//! `ReadStorage`/`Storage` pair fits. Requests are split into chunks of
//! `Config::max_transfer_len` bytes; each chunk is one READ, or one
//! WREN/WRITE/WRDI sequence.

use embedded_hal::delay::DelayNs;
use embedded_storage::{ReadStorage, Storage};

use crate::error::Error;
use super::backend::{GpioControl, SpiBackend};
use super::mram::Mram;
use super::protocol::commands::{self, MRAM_SIZE};

impl<G, S, D> ReadStorage for Mram<G, S, D>
where
    G: GpioControl,
    S: SpiBackend,
    D: DelayNs,
{
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        commands::check_range(offset, bytes.len())?;

        let chunk_len = self.config().max_transfer_len;
        for (index, chunk) in bytes.chunks_mut(chunk_len).enumerate() {
            let address = offset + (index * chunk_len) as u32;
            Mram::read(self, address, chunk)?;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        MRAM_SIZE
    }
}

impl<G, S, D> Storage for Mram<G, S, D>
where
    G: GpioControl,
    S: SpiBackend,
    D: DelayNs,
{
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        commands::check_range(offset, bytes.len())?;

        let chunk_len = self.config().max_transfer_len;
        for (index, chunk) in bytes.chunks(chunk_len).enumerate() {
            let address = offset + (index * chunk_len) as u32;
            Mram::write(self, address, chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::backend::sim::SimulatedMram;
    use crate::spi::mram::Config;

    #[test]
    fn test_chunked_write_and_read() {
        let sim = SimulatedMram::new(0);
        let config = Config { max_transfer_len: 8 };
        let mut mram = Mram::init_with_config(sim.gpio(), sim.spi(), sim.delay(), 0, config)
            .unwrap();
        sim.clear_frames();

        let data: Vec<u8> = (0..20).collect();
        Storage::write(&mut mram, 0x100, &data).unwrap();
        assert_eq!(&sim.memory()[0x100..0x114], &data[..]);
        // WREN, WRITE, WRDI per chunk
        assert_eq!(sim.opcodes(), [0x06, 0x02, 0x04, 0x06, 0x02, 0x04, 0x06, 0x02, 0x04]);
        assert_eq!(sim.frames()[4][..4], [0x02, 0x00, 0x01, 0x08]);

        sim.clear_frames();
        let mut buf = [0u8; 20];
        ReadStorage::read(&mut mram, 0x100, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[..]);
        assert_eq!(sim.opcodes(), [0x03, 0x03, 0x03]);
    }

    #[test]
    fn test_capacity_and_bounds() {
        let sim = SimulatedMram::new(0);
        let mut mram = Mram::init(sim.gpio(), sim.spi(), sim.delay(), 0).unwrap();
        assert_eq!(mram.capacity(), 512 * 1024);

        let before = sim.bus_activity();
        let mut buf = [0u8; 2];
        assert!(matches!(
            ReadStorage::read(&mut mram, 0x7FFFF, &mut buf),
            Err(Error::AddressOutOfRange { .. })
        ));
        assert!(ReadStorage::read(&mut mram, 0, &mut []).is_ok());
        assert!(Storage::write(&mut mram, 0, &[]).is_ok());
        assert_eq!(sim.bus_activity(), before);
    }

    #[test]
    fn test_whole_array_through_storage() {
        let sim = SimulatedMram::new(0);
        let mut mram = Mram::init(sim.gpio(), sim.spi(), sim.delay(), 0).unwrap();

        let data: Vec<u8> = (0..MRAM_SIZE).map(|i| (i % 251) as u8).collect();
        Storage::write(&mut mram, 0, &data).unwrap();

        let mut buf = vec![0u8; MRAM_SIZE];
        ReadStorage::read(&mut mram, 0, &mut buf).unwrap();
        assert!(buf == data);
    }
}
