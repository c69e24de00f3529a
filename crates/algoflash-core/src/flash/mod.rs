//! Flash programming
//!
//! This module provides the backend contract (`FlashInterface`) and the
//! buffered writer (`FlashManager`) that turns an address-keyed byte stream
//! into correctly ordered erase and program calls.

mod interface;
mod manager;

pub use interface::FlashInterface;
pub use manager::{FlashManager, ManagerState, ERASED_VALUE, PAGE_BUFFER_SIZE};
