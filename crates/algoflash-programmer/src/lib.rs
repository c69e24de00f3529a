//! Programming orchestration on top of the flash manager
//!
//! This crate turns JSON programming commands into flash operations. It
//! validates a command, loads the requested flash algorithm, attaches it to
//! the target and streams the image through a `FlashManager`, all on a
//! single worker thread. Callers only see accept/reject, busy and progress.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Transport / CLI                          │
//! │  - submit(json) -> accepted                                  │
//! │  - polls is_busy(), progress(), last_result()                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                algoflash-programmer (this crate)             │
//! │  - Programmer: single-flight worker thread                   │
//! │  - ProgrammingRequest: command decoding and validation       │
//! │  - AlgorithmLoader: .ron descriptors and flat .bin blobs     │
//! │  - ImageProgrammer: Intel HEX and binary images              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │    algoflash-core        │   │  TargetConnector impls   │
//! │  - FlashManager          │   │  - algoflash-dummy       │
//! │  - FlashInterface trait  │   │  - debug probes          │
//! │  - HexDecoder            │   │                          │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use algoflash_programmer::{FileAlgorithmLoader, Programmer, ProgrammerConfig};
//!
//! let config = ProgrammerConfig::from_toml_file("algoflash.toml")?;
//! let loader = FileAlgorithmLoader::new(&config);
//! let programmer = Programmer::spawn(config, loader, connector)?;
//!
//! if programmer.submit(br#"{"algorithm": "stm32f4.ron", "program": "app.hex"}"#) {
//!     while programmer.is_busy() {
//!         println!("{}%", programmer.progress());
//!     }
//! }
//! ```

mod algorithm;
pub mod config;
mod error;
mod image;
mod orchestrator;
mod progress;
mod request;

pub use algorithm::{AlgorithmFormat, AlgorithmLoader, FileAlgorithmLoader, Size};
pub use config::{FlatAlgorithmConfig, FlatEntryConfig, ProgrammerConfig};
pub use error::{AlgorithmError, ConfigError, ProgrammerError, RequestError};
pub use image::{ImageProgrammer, ProgramStats};
pub use orchestrator::{Programmer, Status};
pub use progress::ProgressCounter;
pub use request::ProgrammingRequest;

// Re-export core types that front ends need
pub use algoflash_core::algorithm::{FlashAlgorithm, TargetConnector};
pub use algoflash_core::image::ImageFormat;
