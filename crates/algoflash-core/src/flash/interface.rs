//! Flash backend contract
//!
//! A `FlashInterface` is whatever actually erases and programs flash: an
//! in-memory simulator, a debug probe running a flash algorithm on the
//! target, or the MCU's own flash controller. The `FlashManager` only ever
//! talks to flash through this trait.

use crate::error::Result;

/// Capability set a flash backend must provide
///
/// All methods except `set_algorithm_for_address` are mandatory, so an
/// incomplete backend is rejected when it is bound, at compile time.
///
/// Sizes are reported per address because targets may have several flash
/// regions with different geometry. A size of zero means the backend does
/// not handle that address.
pub trait FlashInterface {
    /// Prepare the backend for erase and program operations
    fn init(&mut self) -> Result<()>;

    /// Release the backend
    fn uninit(&mut self) -> Result<()>;

    /// Smallest number of bytes that can be programmed at `addr`
    fn program_page_min_size(&self, addr: u32) -> u32;

    /// Size of the erase unit (sector) containing `addr`
    fn erase_unit_size(&self, addr: u32) -> u32;

    /// Erase the unit starting at `addr`
    ///
    /// `addr` is aligned to `erase_unit_size(addr)`.
    fn erase_unit(&mut self, addr: u32) -> Result<()>;

    /// Erase the whole device
    fn erase_chip(&mut self) -> Result<()>;

    /// Program `data` starting at `addr`
    ///
    /// The target range must have been erased first.
    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Whether the backend is still executing an operation
    fn is_busy(&self) -> bool;

    /// Select the flash algorithm responsible for `addr`
    ///
    /// Called before each sector erase. Backends with a single algorithm
    /// keep the default, which accepts every address.
    fn set_algorithm_for_address(&mut self, _addr: u32) -> Result<()> {
        Ok(())
    }
}

impl<F: FlashInterface + ?Sized> FlashInterface for &mut F {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn uninit(&mut self) -> Result<()> {
        (**self).uninit()
    }

    fn program_page_min_size(&self, addr: u32) -> u32 {
        (**self).program_page_min_size(addr)
    }

    fn erase_unit_size(&self, addr: u32) -> u32 {
        (**self).erase_unit_size(addr)
    }

    fn erase_unit(&mut self, addr: u32) -> Result<()> {
        (**self).erase_unit(addr)
    }

    fn erase_chip(&mut self) -> Result<()> {
        (**self).erase_chip()
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).program_page(addr, data)
    }

    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn set_algorithm_for_address(&mut self, addr: u32) -> Result<()> {
        (**self).set_algorithm_for_address(addr)
    }
}

#[cfg(feature = "alloc")]
impl<F: FlashInterface + ?Sized> FlashInterface for alloc::boxed::Box<F> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn uninit(&mut self) -> Result<()> {
        (**self).uninit()
    }

    fn program_page_min_size(&self, addr: u32) -> u32 {
        (**self).program_page_min_size(addr)
    }

    fn erase_unit_size(&self, addr: u32) -> u32 {
        (**self).erase_unit_size(addr)
    }

    fn erase_unit(&mut self, addr: u32) -> Result<()> {
        (**self).erase_unit(addr)
    }

    fn erase_chip(&mut self) -> Result<()> {
        (**self).erase_chip()
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).program_page(addr, data)
    }

    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn set_algorithm_for_address(&mut self, addr: u32) -> Result<()> {
        (**self).set_algorithm_for_address(addr)
    }
}
