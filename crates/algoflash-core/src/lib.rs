//! algoflash-core - Core library for algorithm-driven flash programming
//!
//! This crate holds the parts of the programmer that never touch a file
//! system or a thread: the flash backend contract, the write-combining
//! flash manager that sequences erase and program calls, the flash
//! algorithm model and the Intel HEX record decoder. It is `no_std`
//! compatible so the same logic can run on the programmer MCU itself.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable the flash algorithm model and boxed backends
//!
//! # Example
//!
//! ```ignore
//! use algoflash_core::flash::{FlashInterface, FlashManager};
//!
//! fn program<F: FlashInterface>(intf: F, addr: u32, data: &[u8]) -> algoflash_core::Result<()> {
//!     let mut manager: FlashManager<F> = FlashManager::new();
//!     manager.init(intf)?;
//!     if let Err(e) = manager.write(addr, data) {
//!         let _ = manager.uninit();
//!         return Err(e);
//!     }
//!     manager.uninit()
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod algorithm;
pub mod error;
pub mod flash;
pub mod image;

pub use error::{Error, Result};
