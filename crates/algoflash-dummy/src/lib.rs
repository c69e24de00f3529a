//! algoflash-dummy - Simulated target for testing
//!
//! This crate provides a target connector that "downloads" flash
//! algorithms into simulated RAM and executes erase and program requests
//! against in-memory flash. It's useful for testing and development
//! without a debug probe or real hardware.
//!
//! The simulated flash behaves like NOR flash: erase sets a whole sector to
//! the erased value, programming can only clear bits. Programming a sector
//! that was not erased since `init` fails, so callers that skip an erase
//! are caught even though fresh simulated flash reads as erased.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use algoflash_core::algorithm::{FlashAlgorithm, FlashGeometry, TargetConnector};
use algoflash_core::error::{Error, Result};
use algoflash_core::flash::FlashInterface;

/// Configuration for the simulated target
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Start of target RAM
    pub ram_start: u32,
    /// Size of target RAM in bytes
    pub ram_size: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ram_start: 0x2000_0000,
            ram_size: 128 * 1024,
        }
    }
}

/// Operation executed by the simulated flash algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOp {
    /// `Init` entry point
    Init,
    /// `UnInit` entry point
    Uninit,
    /// Algorithm selected for an address
    SelectAlgorithm(u32),
    /// `EraseSector` entry point
    EraseSector(u32),
    /// `EraseChip` entry point
    EraseChip,
    /// `ProgramPage` entry point
    ProgramPage {
        /// Start address
        addr: u32,
        /// Number of bytes
        len: usize,
    },
}

#[derive(Debug, Default)]
struct TargetState {
    flash: Vec<u8>,
    flash_start: u32,
    ram_image: Option<(u32, usize)>,
    ops: Vec<FlashOp>,
    fail_erase_at: Option<u32>,
    fail_program_at: Option<u32>,
}

/// Shared handle to the simulated target's memory
///
/// Cloning gives another handle to the same target, so tests and the CLI
/// can inspect flash after a connector has been moved to another thread.
#[derive(Debug, Clone, Default)]
pub struct SimTarget {
    state: Arc<Mutex<TargetState>>,
}

impl SimTarget {
    /// Create a target with no flash attached yet
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read simulated flash contents
    ///
    /// Returns `None` if the range is outside the flash of the last
    /// attached algorithm.
    pub fn read(&self, addr: u32, len: usize) -> Option<Vec<u8>> {
        let state = self.lock();
        let offset = addr.checked_sub(state.flash_start)? as usize;
        state.flash.get(offset..offset + len).map(<[u8]>::to_vec)
    }

    /// First address and contents of the whole simulated flash
    pub fn flash(&self) -> (u32, Vec<u8>) {
        let state = self.lock();
        (state.flash_start, state.flash.clone())
    }

    /// Operations executed so far
    pub fn ops(&self) -> Vec<FlashOp> {
        self.lock().ops.clone()
    }

    /// Forget recorded operations
    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// RAM address and size of the currently loaded algorithm
    pub fn loaded_algorithm(&self) -> Option<(u32, usize)> {
        self.lock().ram_image
    }

    /// Make the erase of the sector at `addr` fail
    pub fn fail_erase_at(&self, addr: Option<u32>) {
        self.lock().fail_erase_at = addr;
    }

    /// Make programming the page at `addr` fail
    pub fn fail_program_at(&self, addr: Option<u32>) {
        self.lock().fail_program_at = addr;
    }
}

/// Target connector backed by a `SimTarget`
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    config: SimConfig,
    target: SimTarget,
}

impl SimConnector {
    /// Create a connector for a fresh simulated target
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            target: SimTarget::new(),
        }
    }

    /// Handle to the simulated target
    pub fn target(&self) -> SimTarget {
        self.target.clone()
    }
}

impl TargetConnector for SimConnector {
    fn attach(&mut self, algorithm: &FlashAlgorithm) -> Result<Box<dyn FlashInterface + '_>> {
        algorithm.validate()?;

        let ram_start = self.config.ram_start as u64;
        let ram_end = ram_start + self.config.ram_size as u64;
        let range = algorithm.ram_range();
        if range.start < ram_start || range.end > ram_end {
            log::error!(
                "algorithm '{}' ({} bytes) does not fit in RAM at 0x{:08X}",
                algorithm.name,
                algorithm.blob.len(),
                algorithm.load_address
            );
            return Err(Error::InvalidLoadAddress {
                addr: algorithm.load_address,
            });
        }

        let geometry = &algorithm.geometry;
        let mut state = self.target.lock();
        if state.flash_start != geometry.flash_start
            || state.flash.len() != geometry.flash_size as usize
        {
            log::debug!(
                "simulating {} bytes of flash at 0x{:08X}",
                geometry.flash_size,
                geometry.flash_start
            );
            state.flash = vec![geometry.erased_value; geometry.flash_size as usize];
            state.flash_start = geometry.flash_start;
        }
        state.ram_image = Some((algorithm.load_address, algorithm.blob.len()));
        drop(state);

        log::info!(
            "loaded algorithm '{}' at 0x{:08X}",
            algorithm.name,
            algorithm.load_address
        );

        Ok(Box::new(SimFlash {
            target: self.target.clone(),
            geometry: geometry.clone(),
            initialized: false,
            erased: BTreeSet::new(),
            chip_erased: false,
        }))
    }
}

/// Flash backend executing a simulated flash algorithm
#[derive(Debug)]
pub struct SimFlash {
    target: SimTarget,
    geometry: FlashGeometry,
    initialized: bool,
    /// Sector start addresses erased since `init`
    erased: BTreeSet<u32>,
    chip_erased: bool,
}

impl SimFlash {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.geometry.flash_start) as usize
    }

    /// First sector in `addr..addr + len` not erased since `init`
    fn unerased_sector(&self, addr: u32, len: usize) -> Option<u32> {
        if self.chip_erased {
            return None;
        }

        let end = addr as u64 + len as u64;
        let mut cursor = addr;
        while (cursor as u64) < end {
            let start = self.geometry.sector_start(cursor)?;
            if !self.erased.contains(&start) {
                return Some(start);
            }
            let size = self.geometry.sector_size_at(start)?;
            cursor = start.checked_add(size)?;
        }
        None
    }
}

impl FlashInterface for SimFlash {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        self.erased.clear();
        self.chip_erased = false;
        self.target.lock().ops.push(FlashOp::Init);
        Ok(())
    }

    fn uninit(&mut self) -> Result<()> {
        self.initialized = false;
        self.target.lock().ops.push(FlashOp::Uninit);
        Ok(())
    }

    fn program_page_min_size(&self, addr: u32) -> u32 {
        if self.geometry.contains(addr) {
            self.geometry.page_size
        } else {
            0
        }
    }

    fn erase_unit_size(&self, addr: u32) -> u32 {
        self.geometry.sector_size_at(addr).unwrap_or(0)
    }

    fn erase_unit(&mut self, addr: u32) -> Result<()> {
        self.ensure_initialized()?;

        let start = self
            .geometry
            .sector_start(addr)
            .ok_or(Error::AddressOutOfBounds)?;
        if start != addr {
            return Err(Error::InvalidAlignment);
        }
        let size = self.erase_unit_size(addr) as usize;
        let offset = self.offset(addr);

        let mut state = self.target.lock();
        if state.fail_erase_at == Some(addr) {
            return Err(Error::EraseFailed { addr });
        }
        state.flash[offset..offset + size].fill(self.geometry.erased_value);
        state.ops.push(FlashOp::EraseSector(addr));
        drop(state);

        self.erased.insert(addr);
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<()> {
        self.ensure_initialized()?;

        let mut state = self.target.lock();
        state.flash.fill(self.geometry.erased_value);
        state.ops.push(FlashOp::EraseChip);
        drop(state);

        self.chip_erased = true;
        Ok(())
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.ensure_initialized()?;

        if !self.geometry.contains_range(addr, data.len()) {
            return Err(Error::AddressOutOfBounds);
        }
        let page_size = self.geometry.page_size as usize;
        let offset = self.offset(addr);
        if offset % page_size != 0 || data.len() % page_size != 0 {
            return Err(Error::InvalidAlignment);
        }
        if let Some(sector) = self.unerased_sector(addr, data.len()) {
            log::error!(
                "program at 0x{:08X} reaches sector 0x{:08X}, which was not erased",
                addr,
                sector
            );
            return Err(Error::ProgramFailed { addr });
        }

        let mut state = self.target.lock();
        if state.fail_program_at == Some(addr) {
            return Err(Error::ProgramFailed { addr });
        }

        // Flash programming: can only change 1 -> 0
        for (cell, byte) in state.flash[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        state.ops.push(FlashOp::ProgramPage {
            addr,
            len: data.len(),
        });
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn set_algorithm_for_address(&mut self, addr: u32) -> Result<()> {
        self.target.lock().ops.push(FlashOp::SelectAlgorithm(addr));
        if self.geometry.contains(addr) {
            Ok(())
        } else {
            Err(Error::AlgorithmSwitchFailed { addr })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algoflash_core::algorithm::EntryPoints;
    use algoflash_core::flash::FlashManager;

    fn algorithm(load_address: u32) -> FlashAlgorithm {
        FlashAlgorithm {
            name: "sim".into(),
            blob: vec![0; 512],
            load_address,
            entry: EntryPoints {
                init: Some(0x01),
                uninit: Some(0x41),
                program_page: Some(0x81),
                erase_sector: Some(0xC1),
                erase_chip: Some(0x101),
                verify: None,
            },
            geometry: FlashGeometry::uniform(0x0800_0000, 64 * 1024, 256, 4096),
        }
    }

    #[test]
    fn test_attach_places_algorithm_in_ram() {
        let mut connector = SimConnector::default();
        let target = connector.target();

        assert!(connector.attach(&algorithm(0x2000_0000)).is_ok());
        assert_eq!(target.loaded_algorithm(), Some((0x2000_0000, 512)));

        let (start, flash) = target.flash();
        assert_eq!(start, 0x0800_0000);
        assert_eq!(flash.len(), 64 * 1024);
        assert!(flash.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_attach_rejects_bad_load_address() {
        let mut connector = SimConnector::default();
        for addr in [0x1FFF_FF00, 0x2001_FF01, 0x0800_0000] {
            assert!(matches!(
                connector.attach(&algorithm(addr)),
                Err(Error::InvalidLoadAddress { .. })
            ));
        }
    }

    #[test]
    fn test_attach_rejects_incomplete_algorithm() {
        let mut connector = SimConnector::default();
        let mut algo = algorithm(0x2000_0000);
        algo.entry.program_page = None;
        assert!(matches!(
            connector.attach(&algo),
            Err(Error::InvalidAlgorithm)
        ));
        assert_eq!(connector.target().loaded_algorithm(), None);
    }

    #[test]
    fn test_erase_and_program() {
        let mut connector = SimConnector::default();
        let target = connector.target();
        let mut flash = connector.attach(&algorithm(0x2000_0000)).unwrap();

        assert_eq!(flash.erase_unit(0x0800_0000), Err(Error::NotInitialized));
        flash.init().unwrap();
        flash.erase_unit(0x0800_0000).unwrap();

        let page = [0x0Fu8; 256];
        flash.program_page(0x0800_0100, &page).unwrap();
        // Programming again can only clear more bits
        flash.program_page(0x0800_0100, &[0xF3; 256]).unwrap();
        assert_eq!(target.read(0x0800_0100, 4), Some(vec![0x03; 4]));

        flash.erase_unit(0x0800_0000).unwrap();
        assert_eq!(target.read(0x0800_0100, 4), Some(vec![0xFF; 4]));

        flash.uninit().unwrap();
        assert_eq!(
            target.ops(),
            vec![
                FlashOp::Init,
                FlashOp::EraseSector(0x0800_0000),
                FlashOp::ProgramPage {
                    addr: 0x0800_0100,
                    len: 256
                },
                FlashOp::ProgramPage {
                    addr: 0x0800_0100,
                    len: 256
                },
                FlashOp::EraseSector(0x0800_0000),
                FlashOp::Uninit,
            ]
        );
    }

    #[test]
    fn test_rejects_misaligned_and_out_of_range() {
        let mut connector = SimConnector::default();
        let mut flash = connector.attach(&algorithm(0x2000_0000)).unwrap();
        flash.init().unwrap();

        assert_eq!(flash.erase_unit(0x0800_0100), Err(Error::InvalidAlignment));
        assert_eq!(flash.erase_unit(0x0801_0000), Err(Error::AddressOutOfBounds));
        assert_eq!(
            flash.program_page(0x0800_0080, &[0; 256]),
            Err(Error::InvalidAlignment)
        );
        assert_eq!(
            flash.program_page(0x0800_FF00, &[0; 512]),
            Err(Error::AddressOutOfBounds)
        );
        assert_eq!(flash.erase_unit_size(0x0900_0000), 0);
        assert_eq!(flash.program_page_min_size(0x0900_0000), 0);
        assert_eq!(
            flash.set_algorithm_for_address(0x0900_0000),
            Err(Error::AlgorithmSwitchFailed { addr: 0x0900_0000 })
        );
    }

    #[test]
    fn test_erase_chip() {
        let mut connector = SimConnector::default();
        let target = connector.target();
        let mut flash = connector.attach(&algorithm(0x2000_0000)).unwrap();
        flash.init().unwrap();

        flash.erase_chip().unwrap();
        flash.program_page(0x0800_F000, &[0; 256]).unwrap();
        assert_eq!(target.read(0x0800_F000, 1), Some(vec![0]));

        flash.erase_chip().unwrap();
        let (_, contents) = target.flash();
        assert!(contents.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_injected_faults() {
        let mut connector = SimConnector::default();
        let target = connector.target();
        let mut flash = connector.attach(&algorithm(0x2000_0000)).unwrap();
        flash.init().unwrap();
        flash.erase_unit(0x0800_0000).unwrap();

        target.fail_erase_at(Some(0x0800_1000));
        target.fail_program_at(Some(0x0800_0000));
        assert_eq!(
            flash.erase_unit(0x0800_1000),
            Err(Error::EraseFailed { addr: 0x0800_1000 })
        );
        assert_eq!(
            flash.program_page(0x0800_0000, &[0; 256]),
            Err(Error::ProgramFailed { addr: 0x0800_0000 })
        );
    }

    #[test]
    fn test_flash_manager_on_simulated_target() {
        let mut connector = SimConnector::default();
        let target = connector.target();
        let flash = connector.attach(&algorithm(0x2000_0000)).unwrap();

        let image: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();
        let mut manager: FlashManager<_> = FlashManager::new();
        manager.init(flash).unwrap();
        for (i, chunk) in image.chunks(64).enumerate() {
            manager.write(0x0800_0000 + (i * 64) as u32, chunk).unwrap();
        }
        manager.uninit().unwrap();

        assert_eq!(target.read(0x0800_0000, image.len()), Some(image));
        let erases = target
            .ops()
            .iter()
            .filter(|op| matches!(op, FlashOp::EraseSector(_)))
            .count();
        assert_eq!(erases, 3);
    }

    #[test]
    fn test_program_requires_erase_since_init() {
        let mut connector = SimConnector::default();
        let target = connector.target();
        let mut flash = connector.attach(&algorithm(0x2000_0000)).unwrap();
        flash.init().unwrap();

        assert_eq!(
            flash.program_page(0x0800_0000, &[0; 256]),
            Err(Error::ProgramFailed { addr: 0x0800_0000 })
        );

        flash.erase_unit(0x0800_0000).unwrap();
        flash.program_page(0x0800_0F00, &[0; 256]).unwrap();
        // Second page reaches into the next, unerased sector
        assert_eq!(
            flash.program_page(0x0800_0F00, &[0; 512]),
            Err(Error::ProgramFailed { addr: 0x0800_0F00 })
        );
        flash.erase_unit(0x0800_1000).unwrap();
        flash.program_page(0x0800_0F00, &[0; 512]).unwrap();

        // Erases do not carry over to the next session
        flash.uninit().unwrap();
        flash.init().unwrap();
        assert_eq!(
            flash.program_page(0x0800_0000, &[0; 256]),
            Err(Error::ProgramFailed { addr: 0x0800_0000 })
        );
        assert_eq!(target.read(0x0800_0F00, 1), Some(vec![0]));
    }
}
