//! Programming command decoding and validation
//!
//! Commands are JSON objects:
//!
//! ```json
//! {"algorithm": "stm32f4.ron", "program": "app.hex", "ram_addr": "0x20000000"}
//! {"algorithm": "flash.bin", "program": "app.bin", "flash_addr": 134217728}
//! ```
//!
//! `algorithm` and `program` are names relative to the configured roots.
//! Numbers may be JSON numbers or `"0x..."` strings.

use std::path::{Component, Path, PathBuf};

use algoflash_core::image::ImageFormat;
use serde::Deserialize;

use crate::algorithm::AlgorithmFormat;
use crate::config::{deserialize_opt_hex_u32, ProgrammerConfig};
use crate::error::RequestError;

#[derive(Debug, Deserialize)]
struct Command {
    algorithm: String,
    program: String,
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    ram_addr: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    flash_addr: Option<u32>,
}

/// A validated programming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammingRequest {
    /// Algorithm file, resolved under the algorithm root
    pub algorithm_path: PathBuf,
    /// Image file, resolved under the program root
    pub image_path: PathBuf,
    /// RAM address the algorithm is loaded at
    pub ram_address: u32,
    /// Flash address for binary images and flat algorithms
    pub flash_address: Option<u32>,
    /// Format of the algorithm file
    pub algorithm_format: AlgorithmFormat,
    /// Format of the image file
    pub image_format: ImageFormat,
}

impl ProgrammingRequest {
    /// Decode and validate a JSON command
    ///
    /// Fails if the command is malformed, a named file is missing, the
    /// algorithm format is unknown, or `flash_addr` is absent while the
    /// algorithm or the image is a flat binary.
    pub fn parse(json: &[u8], config: &ProgrammerConfig) -> Result<Self, RequestError> {
        let command: Command = serde_json::from_slice(json)?;

        let algorithm_path = resolve(&config.algorithm_root, "algorithm", &command.algorithm)?;
        let image_path = resolve(&config.program_root, "program", &command.program)?;

        let algorithm_format = AlgorithmFormat::from_path(&algorithm_path)
            .ok_or_else(|| RequestError::UnknownAlgorithmFormat(command.algorithm.clone()))?;
        let image_format = ImageFormat::from_file_name(&command.program);

        if command.flash_addr.is_none() {
            if algorithm_format.needs_flash_address() {
                return Err(RequestError::MissingFlashAddress("a flat binary algorithm"));
            }
            if image_format.needs_flash_address() {
                return Err(RequestError::MissingFlashAddress("a binary image"));
            }
        }

        Ok(Self {
            algorithm_path,
            image_path,
            ram_address: command.ram_addr.unwrap_or(config.default_ram_address),
            flash_address: command.flash_addr,
            algorithm_format,
            image_format,
        })
    }
}

/// Resolve `name` under `root`, refusing names that could escape it
fn resolve(root: &Path, field: &'static str, name: &str) -> Result<PathBuf, RequestError> {
    let relative = Path::new(name);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || !contained {
        return Err(RequestError::InvalidName {
            field,
            name: name.to_string(),
        });
    }

    let path = root.join(relative);
    if !path.is_file() {
        return Err(RequestError::NotFound { field, path });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProgrammerConfig) {
        let dir = TempDir::new().unwrap();
        let config = ProgrammerConfig {
            algorithm_root: dir.path().join("algo"),
            program_root: dir.path().join("program"),
            ..ProgrammerConfig::default()
        };
        fs::create_dir_all(&config.algorithm_root).unwrap();
        fs::create_dir_all(&config.program_root).unwrap();
        for name in ["stm32.ron", "flash.bin", "flash.elf"] {
            fs::write(config.algorithm_root.join(name), b"").unwrap();
        }
        for name in ["app.hex", "app.bin"] {
            fs::write(config.program_root.join(name), b"").unwrap();
        }
        (dir, config)
    }

    #[test]
    fn test_hex_image_with_descriptor() {
        let (_dir, config) = setup();
        let request =
            ProgrammingRequest::parse(br#"{"algorithm": "stm32.ron", "program": "app.hex"}"#, &config)
                .unwrap();

        assert_eq!(request.algorithm_path, config.algorithm_root.join("stm32.ron"));
        assert_eq!(request.image_path, config.program_root.join("app.hex"));
        assert_eq!(request.ram_address, 0x2000_0000);
        assert_eq!(request.flash_address, None);
        assert_eq!(request.algorithm_format, AlgorithmFormat::Descriptor);
        assert_eq!(request.image_format, ImageFormat::IntelHex);
    }

    #[test]
    fn test_addresses_as_numbers_or_hex_strings() {
        let (_dir, config) = setup();
        let request = ProgrammingRequest::parse(
            br#"{"algorithm": "flash.bin", "program": "app.bin",
                 "ram_addr": "0x20004000", "flash_addr": 134217728}"#,
            &config,
        )
        .unwrap();

        assert_eq!(request.ram_address, 0x2000_4000);
        assert_eq!(request.flash_address, Some(0x0800_0000));
        assert_eq!(request.algorithm_format, AlgorithmFormat::FlatBinary);
        assert_eq!(request.image_format, ImageFormat::Binary);
    }

    #[test]
    fn test_flat_algorithm_requires_flash_address() {
        let (_dir, config) = setup();
        assert!(matches!(
            ProgrammingRequest::parse(br#"{"algorithm": "flash.bin", "program": "app.hex"}"#, &config),
            Err(RequestError::MissingFlashAddress(_))
        ));
        assert!(matches!(
            ProgrammingRequest::parse(
                br#"{"algorithm": "flash.bin", "program": "app.hex", "flash_addr": null}"#,
                &config
            ),
            Err(RequestError::MissingFlashAddress(_))
        ));
    }

    #[test]
    fn test_binary_image_requires_flash_address() {
        let (_dir, config) = setup();
        assert!(matches!(
            ProgrammingRequest::parse(br#"{"algorithm": "stm32.ron", "program": "app.bin"}"#, &config),
            Err(RequestError::MissingFlashAddress(_))
        ));
    }

    #[test]
    fn test_malformed_commands() {
        let (_dir, config) = setup();
        let commands: [&[u8]; 5] = [
            b"not json",
            br#"{"program": "app.hex"}"#,
            br#"{"algorithm": 5, "program": "app.hex"}"#,
            br#"{"algorithm": "stm32.ron", "program": "app.hex", "ram_addr": "0xZZ"}"#,
            br#"{"algorithm": "stm32.ron", "program": "app.hex", "ram_addr": -1}"#,
        ];
        for json in commands {
            assert!(matches!(
                ProgrammingRequest::parse(json, &config),
                Err(RequestError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_missing_files_and_bad_names() {
        let (_dir, config) = setup();
        assert!(matches!(
            ProgrammingRequest::parse(br#"{"algorithm": "none.ron", "program": "app.hex"}"#, &config),
            Err(RequestError::NotFound { field: "algorithm", .. })
        ));
        assert!(matches!(
            ProgrammingRequest::parse(br#"{"algorithm": "stm32.ron", "program": "none.hex"}"#, &config),
            Err(RequestError::NotFound { field: "program", .. })
        ));
        assert!(matches!(
            ProgrammingRequest::parse(
                br#"{"algorithm": "../algo/stm32.ron", "program": "app.hex"}"#,
                &config
            ),
            Err(RequestError::InvalidName { .. })
        ));
        assert!(matches!(
            ProgrammingRequest::parse(br#"{"algorithm": "/etc/passwd", "program": "app.hex"}"#, &config),
            Err(RequestError::InvalidName { .. })
        ));
        assert!(matches!(
            ProgrammingRequest::parse(br#"{"algorithm": "flash.elf", "program": "app.hex"}"#, &config),
            Err(RequestError::UnknownAlgorithmFormat(_))
        ));
    }
}
