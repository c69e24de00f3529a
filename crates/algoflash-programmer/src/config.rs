//! Programmer configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! algorithm_root = "/data/algorithms"
//! program_root = "/data/programs"
//! default_ram_address = 0x20000000
//!
//! [flat_algorithm]
//! flash_size = "1 MiB"
//! page_size = 256
//! sector_size = "4 KiB"
//!
//! [flat_algorithm.entry]
//! init = 0x01
//! uninit = 0x05
//! ```
//!
//! Addresses accept integers or `"0x..."` strings; sizes additionally accept
//! `B`, `KiB` and `MiB` suffixes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// RAM base used when a command has no `ram_addr`
pub const DEFAULT_RAM_ADDRESS: u32 = 0x2000_0000;

/// Settings shared by request validation and algorithm loading
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProgrammerConfig {
    /// Directory algorithm names are resolved under
    pub algorithm_root: PathBuf,
    /// Directory image names are resolved under
    pub program_root: PathBuf,
    /// RAM load address when the command has none
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub default_ram_address: u32,
    /// Geometry and entry table for flat binary algorithms
    pub flat_algorithm: FlatAlgorithmConfig,
}

impl Default for ProgrammerConfig {
    fn default() -> Self {
        Self {
            algorithm_root: PathBuf::from("algorithms"),
            program_root: PathBuf::from("programs"),
            default_ram_address: DEFAULT_RAM_ADDRESS,
            flat_algorithm: FlatAlgorithmConfig::default(),
        }
    }
}

impl ProgrammerConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Description of flat binary algorithms
///
/// A flat binary carries only code, so the flash it drives and where its
/// entry points sit must come from configuration. The flash start is the
/// `flash_addr` of the command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlatAlgorithmConfig {
    /// Flash size in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub flash_size: u32,
    /// Programming granularity in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub page_size: u32,
    /// Uniform sector size in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub sector_size: u32,
    /// Value of an erased byte
    pub erased_value: u8,
    /// Entry point offsets into the blob
    pub entry: FlatEntryConfig,
}

impl Default for FlatAlgorithmConfig {
    fn default() -> Self {
        Self {
            flash_size: 1024 * 1024,
            page_size: 256,
            sector_size: 4096,
            erased_value: 0xFF,
            entry: FlatEntryConfig::default(),
        }
    }
}

/// Entry point offsets of a flat binary algorithm
///
/// The defaults describe a blob that starts with a Thumb branch table in
/// the order init, uninit, program_page, erase_sector, erase_chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlatEntryConfig {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub init: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub uninit: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub program_page: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub erase_sector: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub erase_chip: u32,
    #[serde(deserialize_with = "deserialize_opt_hex_u32")]
    pub verify: Option<u32>,
}

impl Default for FlatEntryConfig {
    fn default() -> Self {
        Self {
            init: 0x01,
            uninit: 0x05,
            program_page: 0x09,
            erase_sector: 0x0D,
            erase_chip: 0x11,
            verify: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
pub fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Like `deserialize_hex_u32`, for optional fields
pub fn deserialize_opt_hex_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<HexOrInt>::deserialize(deserializer)? {
        None => Ok(None),
        Some(HexOrInt::Int(n)) => Ok(Some(n)),
        Some(HexOrInt::Str(s)) => parse_number(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a size that can be a number or a string like "16 KiB"
pub fn deserialize_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "16 KiB" or "4096"
pub fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();

    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let s_lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s_lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = s_lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: u32 = num_str.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}
