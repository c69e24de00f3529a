//! Flash algorithm loading
//!
//! Two file formats are understood:
//!
//! - `.ron` descriptors naming the flash geometry and entry points, with an
//!   optional code blob next to the descriptor:
//!
//! ```ron
//! (
//!     name: "STM32F4xx 1 MiB",
//!     blob: Some("stm32f4xx.bin"),
//!     flash_start: 0x08000000,
//!     flash_size: MiB(1),
//!     page_size: KiB(1),
//!     sectors: [
//!         (address: 0x0, size: KiB(16)),
//!         (address: 0x10000, size: KiB(64)),
//!         (address: 0x20000, size: KiB(128)),
//!     ],
//!     entry: (
//!         init: Some(0x1),
//!         uninit: Some(0x45),
//!         program_page: Some(0x85),
//!         erase_sector: Some(0xC5),
//!         erase_chip: Some(0x105),
//!     ),
//! )
//! ```
//!
//! - `.bin` flat binaries, whose geometry comes from `[flat_algorithm]` in
//!   the configuration and whose flash starts at the command's `flash_addr`.

use std::fs;
use std::path::{Path, PathBuf};

use algoflash_core::algorithm::{EntryPoints, FlashAlgorithm, FlashGeometry, SectorInfo};
use serde::Deserialize;

use crate::config::{FlatAlgorithmConfig, ProgrammerConfig};
use crate::error::AlgorithmError;
use crate::request::ProgrammingRequest;

/// On-disk format of a flash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFormat {
    /// RON descriptor (`.ron`)
    Descriptor,
    /// Raw code blob (`.bin`)
    FlatBinary,
}

impl AlgorithmFormat {
    /// Detect the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("ron") {
            Some(AlgorithmFormat::Descriptor)
        } else if ext.eq_ignore_ascii_case("bin") {
            Some(AlgorithmFormat::FlatBinary)
        } else {
            None
        }
    }

    /// Whether algorithms of this format need an explicit flash address
    pub fn needs_flash_address(self) -> bool {
        self == AlgorithmFormat::FlatBinary
    }
}

/// Size specification in descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
    /// Size in mebibytes (1024 * 1024 bytes)
    MiB(u32),
}

impl Size {
    /// Convert to bytes, or `None` if the result does not fit in a `u32`
    pub fn to_bytes(self) -> Option<u32> {
        match self {
            Size::B(n) => Some(n),
            Size::KiB(n) => n.checked_mul(1024),
            Size::MiB(n) => n.checked_mul(1024 * 1024),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlgorithmDescriptor {
    name: String,
    #[serde(default)]
    blob: Option<PathBuf>,
    flash_start: u32,
    flash_size: Size,
    page_size: Size,
    #[serde(default = "default_erased_value")]
    erased_value: u8,
    sectors: Vec<SectorDescriptor>,
    entry: EntryDescriptor,
}

#[derive(Debug, Deserialize)]
struct SectorDescriptor {
    address: u32,
    size: Size,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntryDescriptor {
    init: Option<u32>,
    uninit: Option<u32>,
    program_page: Option<u32>,
    erase_sector: Option<u32>,
    erase_chip: Option<u32>,
    verify: Option<u32>,
}

fn default_erased_value() -> u8 {
    0xFF
}

/// Source of flash algorithms for accepted requests
pub trait AlgorithmLoader: Send {
    /// Load the algorithm named by `request`, placed at its RAM address
    fn load(&self, request: &ProgrammingRequest) -> Result<FlashAlgorithm, AlgorithmError>;
}

/// Loads algorithms from the filesystem
#[derive(Debug, Clone)]
pub struct FileAlgorithmLoader {
    flat: FlatAlgorithmConfig,
}

impl FileAlgorithmLoader {
    /// Create a loader using the flat algorithm settings of `config`
    pub fn new(config: &ProgrammerConfig) -> Self {
        Self {
            flat: config.flat_algorithm.clone(),
        }
    }

    fn load_descriptor(&self, path: &Path, ram_address: u32) -> Result<FlashAlgorithm, AlgorithmError> {
        let content = read_to_string(path)?;
        let descriptor: AlgorithmDescriptor =
            ron::from_str(&content).map_err(|source| AlgorithmError::Descriptor {
                path: path.to_path_buf(),
                source,
            })?;

        let blob = match &descriptor.blob {
            Some(blob) => {
                let blob_path = path.parent().unwrap_or(Path::new("")).join(blob);
                read(&blob_path)?
            }
            None => Vec::new(),
        };

        let bytes = |size: Size| {
            size.to_bytes().ok_or_else(|| AlgorithmError::SizeOverflow {
                path: path.to_path_buf(),
                size,
            })
        };
        let sectors = descriptor
            .sectors
            .iter()
            .map(|sector| {
                Ok(SectorInfo {
                    address: sector.address,
                    size: bytes(sector.size)?,
                })
            })
            .collect::<Result<Vec<_>, AlgorithmError>>()?;

        let entry = &descriptor.entry;
        Ok(FlashAlgorithm {
            name: descriptor.name,
            blob,
            load_address: ram_address,
            entry: EntryPoints {
                init: entry.init,
                uninit: entry.uninit,
                program_page: entry.program_page,
                erase_sector: entry.erase_sector,
                erase_chip: entry.erase_chip,
                verify: entry.verify,
            },
            geometry: FlashGeometry {
                flash_start: descriptor.flash_start,
                flash_size: bytes(descriptor.flash_size)?,
                page_size: bytes(descriptor.page_size)?,
                erased_value: descriptor.erased_value,
                sectors,
            },
        })
    }

    fn load_flat(
        &self,
        path: &Path,
        ram_address: u32,
        flash_address: Option<u32>,
    ) -> Result<FlashAlgorithm, AlgorithmError> {
        let flash_start = flash_address.ok_or(AlgorithmError::MissingFlashAddress)?;
        let blob = read(path)?;
        let flat = &self.flat;

        let mut geometry =
            FlashGeometry::uniform(flash_start, flat.flash_size, flat.page_size, flat.sector_size);
        geometry.erased_value = flat.erased_value;

        Ok(FlashAlgorithm {
            name: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            blob,
            load_address: ram_address,
            entry: EntryPoints {
                init: Some(flat.entry.init),
                uninit: Some(flat.entry.uninit),
                program_page: Some(flat.entry.program_page),
                erase_sector: Some(flat.entry.erase_sector),
                erase_chip: Some(flat.entry.erase_chip),
                verify: flat.entry.verify,
            },
            geometry,
        })
    }
}

impl AlgorithmLoader for FileAlgorithmLoader {
    fn load(&self, request: &ProgrammingRequest) -> Result<FlashAlgorithm, AlgorithmError> {
        let path = &request.algorithm_path;
        let algorithm = match request.algorithm_format {
            AlgorithmFormat::Descriptor => self.load_descriptor(path, request.ram_address)?,
            AlgorithmFormat::FlatBinary => {
                self.load_flat(path, request.ram_address, request.flash_address)?
            }
        };

        algorithm.validate()?;
        log::debug!(
            "loaded algorithm '{}': {} byte blob, flash 0x{:08X}..0x{:08X}",
            algorithm.name,
            algorithm.blob.len(),
            algorithm.geometry.flash_start,
            algorithm.geometry.end()
        );
        Ok(algorithm)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, AlgorithmError> {
    fs::read(path).map_err(|source| AlgorithmError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_to_string(path: &Path) -> Result<String, AlgorithmError> {
    fs::read_to_string(path).map_err(|source| AlgorithmError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use algoflash_core::image::ImageFormat;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = r#"(
        name: "test flash",
        blob: Some("test.bin"),
        flash_start: 0x08000000,
        flash_size: KiB(256),
        page_size: B(256),
        sectors: [
            (address: 0x0, size: KiB(16)),
            (address: 0x10000, size: KiB(64)),
        ],
        entry: (
            init: Some(0x1),
            uninit: Some(0x21),
            program_page: Some(0x41),
            erase_sector: Some(0x61),
            erase_chip: Some(0x81),
        ),
    )"#;

    fn request(path: PathBuf, flash_address: Option<u32>) -> ProgrammingRequest {
        ProgrammingRequest {
            algorithm_format: AlgorithmFormat::from_path(&path).unwrap(),
            algorithm_path: path,
            image_path: PathBuf::from("app.hex"),
            image_format: ImageFormat::IntelHex,
            ram_address: 0x2000_0000,
            flash_address,
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            AlgorithmFormat::from_path(Path::new("a/stm32.ron")),
            Some(AlgorithmFormat::Descriptor)
        );
        assert_eq!(
            AlgorithmFormat::from_path(Path::new("flash.BIN")),
            Some(AlgorithmFormat::FlatBinary)
        );
        assert_eq!(AlgorithmFormat::from_path(Path::new("flash.elf")), None);
        assert_eq!(AlgorithmFormat::from_path(Path::new("flash")), None);
        assert!(AlgorithmFormat::FlatBinary.needs_flash_address());
    }

    #[test]
    fn test_load_descriptor() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.ron"), DESCRIPTOR).unwrap();
        fs::write(dir.path().join("test.bin"), [0u8; 0x100]).unwrap();

        let loader = FileAlgorithmLoader::new(&ProgrammerConfig::default());
        let algo = loader
            .load(&request(dir.path().join("test.ron"), None))
            .unwrap();

        assert_eq!(algo.name, "test flash");
        assert_eq!(algo.blob.len(), 0x100);
        assert_eq!(algo.load_address, 0x2000_0000);
        assert_eq!(algo.entry.erase_chip, Some(0x81));
        assert_eq!(algo.entry.verify, None);
        assert_eq!(algo.geometry.flash_start, 0x0800_0000);
        assert_eq!(algo.geometry.flash_size, 256 * 1024);
        assert_eq!(algo.geometry.erased_value, 0xFF);
        assert_eq!(algo.geometry.sector_size_at(0x0801_0000), Some(64 * 1024));
    }

    #[test]
    fn test_descriptor_errors() {
        let dir = TempDir::new().unwrap();
        let loader = FileAlgorithmLoader::new(&ProgrammerConfig::default());

        // Blob named by the descriptor is missing
        fs::write(dir.path().join("test.ron"), DESCRIPTOR).unwrap();
        assert!(matches!(
            loader.load(&request(dir.path().join("test.ron"), None)),
            Err(AlgorithmError::Io { .. })
        ));

        fs::write(dir.path().join("broken.ron"), "(name: \"broken\"").unwrap();
        assert!(matches!(
            loader.load(&request(dir.path().join("broken.ron"), None)),
            Err(AlgorithmError::Descriptor { .. })
        ));

        // Entry point outside the blob
        fs::write(dir.path().join("test.bin"), [0u8; 0x40]).unwrap();
        assert!(matches!(
            loader.load(&request(dir.path().join("test.ron"), None)),
            Err(AlgorithmError::Invalid(_))
        ));
    }

    #[test]
    fn test_size_to_bytes() {
        assert_eq!(Size::B(7).to_bytes(), Some(7));
        assert_eq!(Size::KiB(16).to_bytes(), Some(16 * 1024));
        assert_eq!(Size::MiB(4095).to_bytes(), Some(4095 * 1024 * 1024));
        assert_eq!(Size::MiB(4096).to_bytes(), None);
        assert_eq!(Size::KiB(u32::MAX).to_bytes(), None);
    }

    #[test]
    fn test_descriptor_size_overflow() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.bin"), [0u8; 0x100]).unwrap();
        fs::write(
            dir.path().join("huge.ron"),
            DESCRIPTOR.replace("KiB(256)", "MiB(5000)"),
        )
        .unwrap();
        fs::write(
            dir.path().join("sector.ron"),
            DESCRIPTOR.replace("KiB(64)", "KiB(5000000)"),
        )
        .unwrap();

        let loader = FileAlgorithmLoader::new(&ProgrammerConfig::default());
        assert!(matches!(
            loader.load(&request(dir.path().join("huge.ron"), None)),
            Err(AlgorithmError::SizeOverflow {
                size: Size::MiB(5000),
                ..
            })
        ));
        assert!(matches!(
            loader.load(&request(dir.path().join("sector.ron"), None)),
            Err(AlgorithmError::SizeOverflow {
                size: Size::KiB(5_000_000),
                ..
            })
        ));
    }

    #[test]
    fn test_load_flat_binary() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("flash.bin"), [0u8; 0x40]).unwrap();

        let loader = FileAlgorithmLoader::new(&ProgrammerConfig::default());
        let algo = loader
            .load(&request(dir.path().join("flash.bin"), Some(0x0800_0000)))
            .unwrap();

        assert_eq!(algo.name, "flash");
        assert_eq!(algo.geometry.flash_start, 0x0800_0000);
        assert_eq!(algo.geometry.flash_size, 1024 * 1024);
        assert_eq!(algo.geometry.sector_size_at(0x0800_0000), Some(4096));
        assert_eq!(algo.entry.program_page, Some(0x09));

        assert!(matches!(
            loader.load(&request(dir.path().join("flash.bin"), None)),
            Err(AlgorithmError::MissingFlashAddress)
        ));
    }
}
