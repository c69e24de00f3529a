//! Flash algorithm model
//!
//! A flash algorithm is a small position-independent routine that runs in
//! target RAM and drives the target's flash controller. This module only
//! describes one (code blob, entry points, flash geometry); running it is
//! the job of a `TargetConnector`, which turns a loaded algorithm into a
//! `FlashInterface`.
//!
//! The sector table uses the CMSIS-Pack convention: each entry starts a
//! run of equally sized sectors that continues until the next entry or the
//! end of flash.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::flash::FlashInterface;

/// Entry point offsets into the algorithm blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPoints {
    /// `Init(addr, clock, function)`
    pub init: Option<u32>,
    /// `UnInit(function)`
    pub uninit: Option<u32>,
    /// `ProgramPage(addr, size, buf)`
    pub program_page: Option<u32>,
    /// `EraseSector(addr)`
    pub erase_sector: Option<u32>,
    /// `EraseChip()`
    pub erase_chip: Option<u32>,
    /// `Verify(addr, size, buf)`, optional
    pub verify: Option<u32>,
}

impl EntryPoints {
    /// Names of mandatory entry points that are not bound
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("init", self.init),
            ("uninit", self.uninit),
            ("program_page", self.program_page),
            ("erase_sector", self.erase_sector),
            ("erase_chip", self.erase_chip),
        ]
        .into_iter()
        .filter(|(_, entry)| entry.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Start of a run of equally sized sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorInfo {
    /// Offset from the start of flash
    pub address: u32,
    /// Size of each sector in the run
    pub size: u32,
}

/// Flash region handled by an algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashGeometry {
    /// First flash address
    pub flash_start: u32,
    /// Flash size in bytes
    pub flash_size: u32,
    /// Programming granularity in bytes
    pub page_size: u32,
    /// Value of an erased byte
    pub erased_value: u8,
    /// Sector runs, ordered by address
    pub sectors: Vec<SectorInfo>,
}

impl FlashGeometry {
    /// Geometry with a single, uniform sector size
    pub fn uniform(flash_start: u32, flash_size: u32, page_size: u32, sector_size: u32) -> Self {
        Self {
            flash_start,
            flash_size,
            page_size,
            erased_value: 0xFF,
            sectors: alloc::vec![SectorInfo {
                address: 0,
                size: sector_size,
            }],
        }
    }

    /// One past the last flash address
    pub fn end(&self) -> u64 {
        self.flash_start as u64 + self.flash_size as u64
    }

    /// Whether `addr` lies in this flash
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.flash_start && (addr as u64) < self.end()
    }

    /// Whether `[addr, addr + len)` lies in this flash
    pub fn contains_range(&self, addr: u32, len: usize) -> bool {
        addr >= self.flash_start && addr as u64 + len as u64 <= self.end()
    }

    /// Size of the sector containing `addr`
    pub fn sector_size_at(&self, addr: u32) -> Option<u32> {
        if !self.contains(addr) {
            return None;
        }
        let offset = addr - self.flash_start;
        self.sectors
            .iter()
            .take_while(|sector| sector.address <= offset)
            .last()
            .map(|sector| sector.size)
    }

    /// Start address of the sector containing `addr`
    pub fn sector_start(&self, addr: u32) -> Option<u32> {
        let offset = addr.checked_sub(self.flash_start)?;
        let run = self
            .sectors
            .iter()
            .take_while(|sector| sector.address <= offset)
            .last()?;
        if !self.contains(addr) {
            return None;
        }
        let within = (offset - run.address) % run.size;
        Some(addr - within)
    }

    /// Check the geometry is usable
    ///
    /// Sizes must be non-zero, the sector table must start at offset 0 and
    /// be strictly increasing, every run must be a whole number of sectors
    /// and every sector a whole number of pages.
    pub fn validate(&self) -> Result<()> {
        if self.flash_size == 0 || self.page_size == 0 || self.sectors.is_empty() {
            return Err(Error::InvalidAlgorithm);
        }
        if self.end() > u32::MAX as u64 + 1 {
            return Err(Error::InvalidAlgorithm);
        }
        if self.sectors[0].address != 0 {
            return Err(Error::InvalidAlgorithm);
        }

        for (i, sector) in self.sectors.iter().enumerate() {
            if sector.size == 0 || sector.size % self.page_size != 0 {
                return Err(Error::InvalidAlgorithm);
            }
            let run_end = match self.sectors.get(i + 1) {
                Some(next) if next.address <= sector.address => {
                    return Err(Error::InvalidAlgorithm);
                }
                Some(next) => next.address,
                None => self.flash_size,
            };
            if run_end > self.flash_size || (run_end - sector.address) % sector.size != 0 {
                return Err(Error::InvalidAlgorithm);
            }
        }

        Ok(())
    }
}

/// A flash algorithm ready to be downloaded to the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashAlgorithm {
    /// Human readable name
    pub name: String,
    /// Position-independent code
    pub blob: Vec<u8>,
    /// RAM address the blob is loaded at
    pub load_address: u32,
    /// Entry point offsets into `blob`
    pub entry: EntryPoints,
    /// Flash handled by this algorithm
    pub geometry: FlashGeometry,
}

impl FlashAlgorithm {
    /// Check that the algorithm can be bound to a flash backend
    ///
    /// Every mandatory entry point must be present and inside the blob
    /// (an empty blob means the routines are resident on the target and
    /// offsets are not checked), and the geometry must be valid.
    pub fn validate(&self) -> Result<()> {
        let missing = self.entry.missing();
        if !missing.is_empty() {
            log::error!(
                "flash algorithm '{}' is missing entry points: {}",
                self.name,
                missing.join(", ")
            );
            return Err(Error::InvalidAlgorithm);
        }

        if !self.blob.is_empty() {
            let entries = [
                self.entry.init,
                self.entry.uninit,
                self.entry.program_page,
                self.entry.erase_sector,
                self.entry.erase_chip,
                self.entry.verify,
            ];
            let outside = entries
                .iter()
                .flatten()
                .any(|offset| *offset as usize >= self.blob.len());
            if outside {
                log::error!(
                    "flash algorithm '{}' has an entry point outside its {} byte blob",
                    self.name,
                    self.blob.len()
                );
                return Err(Error::InvalidAlgorithm);
            }
        }

        self.geometry.validate()
    }

    /// RAM range occupied by the blob
    pub fn ram_range(&self) -> core::ops::Range<u64> {
        let start = self.load_address as u64;
        start..start + self.blob.len() as u64
    }
}

/// Connection to a target that can run flash algorithms
///
/// `attach` downloads the algorithm and hands back a backend that erases
/// and programs through it. The backend borrows the connector, so only one
/// can be alive at a time.
pub trait TargetConnector {
    /// Load `algorithm` onto the target and bind it as a flash backend
    fn attach(&mut self, algorithm: &FlashAlgorithm) -> Result<Box<dyn FlashInterface + '_>>;
}
