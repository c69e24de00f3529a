//! Error types for the programming layer

use std::path::PathBuf;

use algoflash_core::image::HexError;
use thiserror::Error;

use crate::algorithm::Size;

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Reasons a programming command is rejected before it is accepted
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid {field} name '{name}'")]
    InvalidName { field: &'static str, name: String },

    #[error("{field} file not found: {}", path.display())]
    NotFound { field: &'static str, path: PathBuf },

    #[error("unrecognized algorithm format: {0}")]
    UnknownAlgorithmFormat(String),

    #[error("flash_addr is required for {0}")]
    MissingFlashAddress(&'static str),
}

/// Errors loading a flash algorithm
#[derive(Debug, Error)]
pub enum AlgorithmError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid algorithm descriptor {}: {source}", path.display())]
    Descriptor {
        path: PathBuf,
        source: ron::error::SpannedError,
    },

    #[error("size {size:?} in {} does not fit in 32 bits", path.display())]
    SizeOverflow { path: PathBuf, size: Size },

    #[error("flat binary algorithm needs a flash address")]
    MissingFlashAddress,

    #[error("invalid flash algorithm: {0}")]
    Invalid(#[from] algoflash_core::Error),
}

/// Errors while executing an accepted request
#[derive(Debug, Error)]
pub enum ProgrammerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),

    #[error("flash error: {0}")]
    Flash(#[from] algoflash_core::Error),

    #[error("Intel HEX error: {0}")]
    Hex(#[from] HexError),

    #[error("binary image needs a flash address")]
    MissingFlashAddress,

    #[error("programming aborted by a panic: {0}")]
    Panicked(String),
}
