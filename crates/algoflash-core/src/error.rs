//! Error types for algoflash-core
//!
//! This module provides a no_std compatible error type that is shared by
//! the flash manager, flash backends and target connectors.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    /// Manager used out of order (re-init while open, write while closed
    /// or after a backend failure, uninit while closed)
    Internal,
    /// Backend reported a zero program size or erase unit size, or sizes
    /// that do not divide into each other
    InvalidGeometry {
        /// Address that was queried
        addr: u32,
    },

    // Backend errors
    /// Backend initialization failed
    InitFailed,
    /// Backend uninitialization failed
    UninitFailed,
    /// Erase of the unit containing `addr` failed
    EraseFailed {
        /// Start address of the erase unit
        addr: u32,
    },
    /// Programming the page at `addr` failed
    ProgramFailed {
        /// Start address of the page
        addr: u32,
    },
    /// Selecting the flash algorithm for `addr` failed
    AlgorithmSwitchFailed {
        /// Address that was requested
        addr: u32,
    },
    /// Backend was used before `init`
    NotInitialized,

    // Address/size errors
    /// Address is outside the flash handled by the backend
    AddressOutOfBounds,
    /// Operation requires an aligned address or size
    InvalidAlignment,

    // Algorithm errors
    /// Flash algorithm is missing a mandatory entry point or has
    /// inconsistent geometry
    InvalidAlgorithm,
    /// Flash algorithm does not fit in target RAM at the requested address
    InvalidLoadAddress {
        /// Requested load address
        addr: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal error: flash manager used out of order"),
            Self::InvalidGeometry { addr } => {
                write!(f, "backend reported invalid geometry at 0x{:08X}", addr)
            }
            Self::InitFailed => write!(f, "flash backend initialization failed"),
            Self::UninitFailed => write!(f, "flash backend uninitialization failed"),
            Self::EraseFailed { addr } => write!(f, "erase failed at 0x{:08X}", addr),
            Self::ProgramFailed { addr } => write!(f, "program failed at 0x{:08X}", addr),
            Self::AlgorithmSwitchFailed { addr } => {
                write!(f, "no flash algorithm available for 0x{:08X}", addr)
            }
            Self::NotInitialized => write!(f, "flash backend not initialized"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::InvalidAlgorithm => write!(f, "invalid flash algorithm"),
            Self::InvalidLoadAddress { addr } => {
                write!(f, "flash algorithm cannot be loaded at 0x{:08X}", addr)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
