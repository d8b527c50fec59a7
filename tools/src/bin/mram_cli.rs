use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use libmram::spi::backend::ftdi::{FtdiBackend, FtdiGpio, FtdiSpi, DEFAULT_CLOCK_HZ};
use libmram::spi::protocol::commands::MAX_ADDRESS;
use libmram::{BlockProtection, Mram, StdDelay, MRAM_SIZE};

type Device = Mram<FtdiGpio, FtdiSpi, StdDelay>;

const CHUNK_SZ: usize = 4096;

#[derive(Parser)]
#[command(name = "mram_cli", version = "1.0")]
struct Args {
    /// FTDI channel description
    #[arg(short, long, default_value = "Quad RS232-HS A")]
    device: String,

    /// Chip-select line (AD3..AD7)
    #[arg(long, default_value_t = 3)]
    cs_pin: u8,

    /// SPI clock in Hz
    #[arg(long, default_value_t = DEFAULT_CLOCK_HZ)]
    clock_hz: u32,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read memory into a file
    Dump {
        output: PathBuf,
        /// Start address
        #[arg(long, default_value = "0", value_parser = parse_address)]
        offset: u32,
        /// Number of bytes, defaults to the rest of the array
        #[arg(long)]
        length: Option<usize>,
    },
    /// Write a file into memory
    Program {
        input: PathBuf,
        /// Start address
        #[arg(long, default_value = "0", value_parser = parse_address)]
        offset: u32,
        /// Read back and compare afterwards
        #[arg(long)]
        verify: bool,
    },
    /// Show the status register
    Status,
    /// Change block protection and optionally WPEN
    Protect {
        #[arg(value_enum)]
        blocks: Blocks,
        #[arg(long)]
        wpen: Option<bool>,
    },
    /// Put the chip to sleep
    Sleep,
    /// Wake the chip up
    Wake,
}

#[derive(Clone, Copy, ValueEnum)]
enum Blocks {
    None,
    UpperQuarter,
    UpperHalf,
    All,
}

impl From<Blocks> for BlockProtection {
    fn from(blocks: Blocks) -> Self {
        match blocks {
            Blocks::None => BlockProtection::None,
            Blocks::UpperQuarter => BlockProtection::UpperQuarter,
            Blocks::UpperHalf => BlockProtection::UpperHalf,
            Blocks::All => BlockProtection::All,
        }
    }
}

fn parse_address(arg: &str) -> Result<u32, std::num::ParseIntError> {
    match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => arg.parse(),
    }
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}, eta:{eta}] {bar:40.cyan/blue} {bytes} / {total_bytes} ({binary_bytes_per_sec})")?
    );
    Ok(bar)
}

/// Set up the FTDI channel and the engine
///
/// A sleeping chip must see WAKE before anything else, so `wake` skips the
/// plain init sequence.
fn open(args: &Args, wake: bool) -> Result<Device> {
    let mut backend = FtdiBackend::open(&args.device)
        .with_context(|| format!("Opening FTDI device {:?}", args.device))?;
    backend.initialize(args.cs_pin, args.clock_hz)?;

    let (gpio, spi) = backend.split();
    if wake {
        Ok(Mram::init_after_sleep(gpio, spi, StdDelay, args.cs_pin)?)
    } else {
        Ok(Mram::init(gpio, spi, StdDelay, args.cs_pin)?)
    }
}

/// Number of bytes to dump, defaulting to the rest of the array
fn dump_length(offset: u32, length: Option<usize>) -> Result<usize> {
    if offset > MAX_ADDRESS {
        bail!("Offset {offset:#07X} is past the end of the array ({MAX_ADDRESS:#07X})");
    }
    let remaining = MRAM_SIZE - offset as usize;
    let length = length.unwrap_or(remaining);
    if length == 0 || length > remaining {
        bail!("Cannot read {length} bytes at {offset:#07X} from a {MRAM_SIZE} byte array");
    }
    Ok(length)
}

fn dump(mram: &mut Device, output: &PathBuf, offset: u32, length: Option<usize>) -> Result<()> {
    let length = dump_length(offset, length)?;
    let mut file = File::create(output)?;
    let mut buf = vec![0u8; CHUNK_SZ];

    let bar = progress_bar(length)?;
    let mut done = 0;
    while done < length {
        let n = CHUNK_SZ.min(length - done);
        mram.read(offset + done as u32, &mut buf[..n])?;
        file.write_all(&buf[..n])?;
        done += n;
        bar.inc(n as u64);
    }
    bar.finish();

    println!("Read {length} bytes from {offset:#07X} into {}", output.display());
    Ok(())
}

fn program(mram: &mut Device, input: &PathBuf, offset: u32, verify: bool) -> Result<()> {
    let mut data = Vec::new();
    File::open(input)?.read_to_end(&mut data)?;
    if offset as usize + data.len() > MRAM_SIZE {
        bail!("{} bytes at {offset:#07X} do not fit in the {MRAM_SIZE} byte array", data.len());
    }

    let bar = progress_bar(data.len())?;
    for (index, chunk) in data.chunks(CHUNK_SZ).enumerate() {
        mram.write(offset + (index * CHUNK_SZ) as u32, chunk)?;
        bar.inc(chunk.len() as u64);
    }
    bar.finish();

    if verify {
        println!("Verifying...");
        let mut buf = vec![0u8; CHUNK_SZ];
        for (index, chunk) in data.chunks(CHUNK_SZ).enumerate() {
            let address = offset + (index * CHUNK_SZ) as u32;
            let readback = &mut buf[..chunk.len()];
            mram.read(address, readback)?;
            if let Some(pos) = readback.iter().zip(chunk).position(|(a, b)| a != b) {
                bail!("Verify failed at {:#07X}: expected {:#04X}, got {:#04X}",
                    address + pos as u32, chunk[pos], readback[pos]);
            }
        }
    }

    println!("Wrote {} bytes at {offset:#07X}", data.len());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level)?;

    let mut mram = open(&args, matches!(args.command, Command::Wake))?;

    match &args.command {
        Command::Dump { output, offset, length } => {
            dump(&mut mram, output, *offset, *length)?;
        }
        Command::Program { input, offset, verify } => {
            program(&mut mram, input, *offset, *verify)?;
        }
        Command::Status => {
            let status = mram.read_status_register()?;
            println!("Status register: {:#04X}", status.bits());
            println!("  WEL:  {:?}", status.write_latch());
            println!("  WPEN: {:?}", status.write_protect());
            println!("  BP:   {:?}", status.block_protection());
            if let Some(range) = status.block_protection().protected_range() {
                println!("  Protected: {:#07X}..={:#07X}", range.start(), range.end());
            }
        }
        Command::Protect { blocks, wpen } => {
            mram.set_block_protection((*blocks).into())?;
            if let Some(enabled) = wpen {
                mram.set_write_protect_enable(*enabled)?;
            }
            let status = mram.read_status_register()?;
            println!("Status register now {:#04X} ({:?})", status.bits(), status.block_protection());
        }
        Command::Sleep => {
            mram.sleep()?;
            println!("MRAM is asleep, run `wake` before anything else");
        }
        Command::Wake => {
            // WAKE already went out during setup
            println!("MRAM is awake");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_length() {
        assert_eq!(dump_length(0, None).unwrap(), MRAM_SIZE);
        assert_eq!(dump_length(0x7FFFF, None).unwrap(), 1);
        assert_eq!(dump_length(0x40000, Some(16)).unwrap(), 16);

        assert!(dump_length(0x80000, None).is_err());
        assert!(dump_length(0x90000, None).is_err());
        assert!(dump_length(0x7FFFF, Some(2)).is_err());
        assert!(dump_length(0, Some(0)).is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x7FFFF").unwrap(), 0x7FFFF);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xZZ").is_err());
    }
}
