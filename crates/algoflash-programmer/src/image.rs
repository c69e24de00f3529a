//! Streaming images into flash
//!
//! Both image kinds are streamed through a `FlashManager` in file order, so
//! only one record or chunk is held in memory at a time. Progress is the
//! share of the image file consumed so far.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use algoflash_core::flash::{FlashInterface, FlashManager, PAGE_BUFFER_SIZE};
use algoflash_core::image::HexDecoder;
use algoflash_core::Error as FlashError;

use crate::error::ProgrammerError;
use crate::progress::ProgressCounter;

/// Summary of a programmed image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStats {
    /// Image bytes handed to the flash manager
    pub bytes_written: u64,
    /// Time from backend init to backend uninit
    pub elapsed: Duration,
}

/// Programs Intel HEX and binary images through a `FlashManager`
#[derive(Debug, Clone, Copy)]
pub struct ImageProgrammer<'a> {
    progress: &'a ProgressCounter,
}

impl<'a> ImageProgrammer<'a> {
    /// Create an image programmer reporting into `progress`
    pub fn new(progress: &'a ProgressCounter) -> Self {
        Self { progress }
    }

    /// Program an Intel HEX image; addresses come from the file
    pub fn program_hex<F: FlashInterface>(
        &self,
        intf: F,
        path: &Path,
    ) -> Result<ProgramStats, ProgrammerError> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        self.run(intf, |manager| {
            let mut decoder = HexDecoder::new();
            let mut line = Vec::new();
            let mut consumed = 0u64;
            let mut written = 0u64;

            loop {
                line.clear();
                let n = reader.read_until(b'\n', &mut line)?;
                if n == 0 {
                    break;
                }
                consumed += n as u64;

                if let Some(chunk) = decoder.feed_line(&line)? {
                    log::trace!("record at 0x{:08X}, {} bytes", chunk.address, chunk.data.len());
                    manager.write(chunk.address, &chunk.data)?;
                    written += chunk.data.len() as u64;
                }
                self.report(consumed, total);

                if decoder.is_finished() {
                    break;
                }
            }

            if !decoder.is_finished() {
                log::warn!("{}: no end-of-file record", path.display());
            }
            Ok(written)
        })
    }

    /// Program a binary image starting at `flash_addr`
    pub fn program_bin<F: FlashInterface>(
        &self,
        intf: F,
        flash_addr: u32,
        path: &Path,
    ) -> Result<ProgramStats, ProgrammerError> {
        let mut file = File::open(path)?;
        let total = file.metadata()?.len();

        self.run(intf, |manager| {
            let mut chunk = vec![0u8; PAGE_BUFFER_SIZE];
            let mut written = 0u64;

            loop {
                let n = file.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                let addr = u32::try_from(written)
                    .ok()
                    .and_then(|offset| flash_addr.checked_add(offset))
                    .ok_or(FlashError::AddressOutOfBounds)?;
                manager.write(addr, &chunk[..n])?;
                written += n as u64;
                self.report(written, total);
            }
            Ok(written)
        })
    }

    /// Open a manager on `intf`, run `stream`, then always close it
    fn run<F, S>(&self, intf: F, stream: S) -> Result<ProgramStats, ProgrammerError>
    where
        F: FlashInterface,
        S: FnOnce(&mut FlashManager<F>) -> Result<u64, ProgrammerError>,
    {
        let start = Instant::now();
        let mut manager = FlashManager::new();
        manager.init(intf)?;

        let streamed = stream(&mut manager);
        let closed = manager.uninit();

        let bytes_written = match (streamed, closed) {
            (Ok(bytes), Ok(())) => bytes,
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(uninit)) => {
                log::error!("failed to close flash after error: {}", uninit);
                return Err(e);
            }
        };

        self.progress.report(100);
        Ok(ProgramStats {
            bytes_written,
            elapsed: start.elapsed(),
        })
    }

    fn report(&self, consumed: u64, total: u64) {
        if total > 0 {
            self.progress.report((consumed * 100 / total).min(100) as u8);
        }
    }
}
