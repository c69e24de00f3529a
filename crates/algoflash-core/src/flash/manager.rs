//! Write-combining flash manager
//!
//! `FlashManager` accepts writes at arbitrary addresses and in arbitrary
//! order and turns them into erase and program calls on a `FlashInterface`:
//!
//! - every sector is erased before anything is programmed into it
//! - bytes are collected in a page buffer and programmed one block at a
//!   time, where a block is `min(erase_unit_size, N)` bytes
//! - unwritten positions in a programmed block hold the erased value
//!   (0xFF), so programming them leaves the flash untouched
//!
//! A backend failure moves the manager to `ManagerState::Error`, releases
//! the backend and rejects further writes until `uninit` and a fresh `init`.

use crate::error::{Error, Result};
use crate::flash::FlashInterface;

/// Default capacity of the page buffer in bytes
pub const PAGE_BUFFER_SIZE: usize = 1024;

/// The erased value for flash memory (all bits set)
pub const ERASED_VALUE: u8 = 0xFF;

/// Lifecycle state of a `FlashManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No backend is open
    Closed,
    /// Backend initialized, writes accepted
    Open,
    /// A backend operation failed; only `uninit` is accepted
    Error,
}

#[inline]
fn round_down(value: u32, boundary: u32) -> u32 {
    value - value % boundary
}

/// Buffered, sector-aware flash writer
///
/// `N` is the page buffer capacity. The manager owns its backend between
/// `init` and the next `init`; use `&mut F` as the backend type to keep
/// ownership with the caller.
pub struct FlashManager<F, const N: usize = PAGE_BUFFER_SIZE> {
    intf: Option<F>,
    state: ManagerState,
    page_buffer: [u8; N],
    buffer_empty: bool,
    block_addr: u32,
    block_size: u32,
    sector_addr: u32,
    sector_size: u32,
    sector_valid: bool,
    last_write_addr: u32,
}

impl<F: FlashInterface, const N: usize> Default for FlashManager<F, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FlashInterface, const N: usize> FlashManager<F, N> {
    /// Create a closed manager with an erased page buffer
    pub const fn new() -> Self {
        Self {
            intf: None,
            state: ManagerState::Closed,
            page_buffer: [ERASED_VALUE; N],
            buffer_empty: true,
            block_addr: 0,
            block_size: 0,
            sector_addr: 0,
            sector_size: 0,
            sector_valid: false,
            last_write_addr: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// The bound backend, if any
    pub fn interface(&self) -> Option<&F> {
        self.intf.as_ref()
    }

    /// Take the backend back out of a closed manager
    pub fn take_interface(&mut self) -> Option<F> {
        match self.state {
            ManagerState::Closed => self.intf.take(),
            _ => None,
        }
    }

    /// Block window currently buffered as `(address, size)`
    pub fn block_window(&self) -> Option<(u32, u32)> {
        self.sector_valid
            .then_some((self.block_addr, self.block_size))
    }

    /// Sector window currently erased and accepting writes as `(address, size)`
    pub fn sector_window(&self) -> Option<(u32, u32)> {
        self.sector_valid
            .then_some((self.sector_addr, self.sector_size))
    }

    /// Address following the last byte accepted by `write`
    pub fn last_write_addr(&self) -> u32 {
        self.last_write_addr
    }

    /// Whether the page buffer holds no pending data
    pub fn is_buffer_empty(&self) -> bool {
        self.buffer_empty
    }

    /// Contents of the page buffer for the current block window
    pub fn buffered(&self) -> &[u8] {
        &self.page_buffer[..self.block_size as usize]
    }

    /// Bind and initialize a backend
    ///
    /// Fails with `Error::Internal` unless the manager is closed. If the
    /// backend fails to initialize the manager stays closed.
    pub fn init(&mut self, intf: F) -> Result<()> {
        if self.state != ManagerState::Closed {
            return Err(Error::Internal);
        }

        self.reset();
        let intf = self.intf.insert(intf);
        intf.init()?;

        log::debug!("flash manager open ({} byte page buffer)", N);
        self.state = ManagerState::Open;
        Ok(())
    }

    /// Buffer `data` for programming at `addr`
    ///
    /// Addresses may arrive in any order. Blocks that are left behind are
    /// programmed before this returns; the block containing the last byte
    /// stays buffered until a later write moves away from it or `uninit`.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if self.state != ManagerState::Open {
            return Err(Error::Internal);
        }

        if addr as u64 + data.len() as u64 > u32::MAX as u64 + 1 {
            return Err(Error::AddressOutOfBounds);
        }

        if let Err(e) = self.write_inner(addr, data) {
            self.fail(e);
            return Err(e);
        }

        Ok(())
    }

    /// Flush pending data and release the backend
    ///
    /// The backend is released even if the flush fails. A backend uninit
    /// error takes priority over a flush error.
    pub fn uninit(&mut self) -> Result<()> {
        if self.state == ManagerState::Closed {
            return Err(Error::Internal);
        }

        let flush_result = if self.state == ManagerState::Open {
            self.flush_block(None)
        } else {
            Ok(())
        };

        let uninit_result = match self.intf.as_mut() {
            Some(intf) => intf.uninit(),
            None => Ok(()),
        };

        self.reset();
        self.state = ManagerState::Closed;
        log::debug!("flash manager closed");

        uninit_result?;
        flush_result
    }

    fn write_inner(&mut self, mut addr: u32, mut data: &[u8]) -> Result<()> {
        if !self.sector_valid {
            self.setup_sector(addr)?;
            self.sector_valid = true;
            self.last_write_addr = addr;
        }

        if addr != self.last_write_addr {
            log::debug!(
                "non-sequential write at 0x{:08X} (previous write ended at 0x{:08X})",
                addr,
                self.last_write_addr
            );
        }

        if round_down(addr, self.block_size) != self.block_addr {
            self.flush_block(Some(addr))?;
        }

        if round_down(addr, self.sector_size) != self.sector_addr {
            self.setup_sector(addr)?;
        }

        while !data.is_empty() {
            if addr as u64 >= self.block_addr as u64 + self.block_size as u64 {
                self.flush_block(Some(addr))?;
            }

            if addr as u64 >= self.sector_addr as u64 + self.sector_size as u64 {
                self.setup_sector(addr)?;
            }

            let offset = (addr - self.block_addr) as usize;
            let room = self.block_size as usize - offset;
            let len = core::cmp::min(room, data.len());

            self.page_buffer[offset..offset + len].copy_from_slice(&data[..len]);
            self.buffer_empty = false;
            log::trace!("buffered {} bytes at 0x{:08X}", len, addr);

            // Wraps to 0 only when the write ends at the top of the address space
            addr = addr.wrapping_add(len as u32);
            data = &data[len..];
        }

        self.last_write_addr = addr;
        Ok(())
    }

    /// Program the buffered block if it holds data, then move the window
    /// to the block containing `next`
    fn flush_block(&mut self, next: Option<u32>) -> Result<()> {
        let mut result = Ok(());

        if !self.buffer_empty {
            let size = self.block_size as usize;
            log::debug!("programming {} bytes at 0x{:08X}", size, self.block_addr);
            if let Some(intf) = self.intf.as_mut() {
                result = intf.program_page(self.block_addr, &self.page_buffer[..size]);
            }
            self.buffer_empty = true;
        }

        self.page_buffer[..self.block_size as usize].fill(ERASED_VALUE);
        if let Some(addr) = next {
            self.block_addr = round_down(addr, self.block_size);
        }

        result
    }

    /// Erase the sector containing `addr` and make it the current sector
    fn setup_sector(&mut self, addr: u32) -> Result<()> {
        let intf = self.intf.as_mut().ok_or(Error::Internal)?;

        let min_program_size = intf.program_page_min_size(addr);
        let sector_size = intf.erase_unit_size(addr);
        if min_program_size == 0 || sector_size == 0 {
            return Err(Error::InvalidGeometry { addr });
        }

        // Blocks must tile the sector exactly
        let block_size = core::cmp::min(sector_size, N as u32);
        if block_size % min_program_size != 0 || sector_size % block_size != 0 {
            return Err(Error::InvalidGeometry { addr });
        }

        self.sector_addr = round_down(addr, sector_size);
        self.sector_size = sector_size;
        self.block_addr = round_down(addr, block_size);
        self.block_size = block_size;

        // Algorithms may differ per region; regions are sector aligned.
        intf.set_algorithm_for_address(self.sector_addr)?;

        log::debug!(
            "erasing sector 0x{:08X} ({} bytes)",
            self.sector_addr,
            sector_size
        );
        intf.erase_unit(self.sector_addr)?;

        self.page_buffer.fill(ERASED_VALUE);
        self.buffer_empty = true;
        Ok(())
    }

    /// Enter the error state and release the backend
    fn fail(&mut self, error: Error) {
        log::error!("flash write failed: {}", error);
        self.state = ManagerState::Error;
        if let Some(intf) = self.intf.as_mut() {
            if let Err(e) = intf.uninit() {
                log::warn!("flash backend uninit after failure: {}", e);
            }
        }
    }

    fn reset(&mut self) {
        self.page_buffer.fill(ERASED_VALUE);
        self.buffer_empty = true;
        self.sector_valid = false;
        self.block_addr = 0;
        self.block_size = 0;
        self.sector_addr = 0;
        self.sector_size = 0;
        self.last_write_addr = 0;
    }
}
