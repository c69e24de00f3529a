//! CLI configuration file
//!
//! ```toml
//! [programmer]
//! algorithm_root = "algorithms"
//! program_root = "programs"
//!
//! [simulator]
//! ram_start = 0x20000000
//! ram_size = "128 KiB"
//! ```

use std::fs;
use std::path::Path;

use algoflash_dummy::SimConfig;
use algoflash_programmer::config::{deserialize_hex_u32, deserialize_size};
use algoflash_programmer::{ConfigError, ProgrammerConfig};
use serde::Deserialize;

/// Looked up in the working directory when no `--config` is given
const DEFAULT_CONFIG_FILE: &str = "algoflash.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub programmer: ProgrammerConfig,
    pub simulator: SimulatorConfig,
}

/// Simulated target RAM
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub ram_start: u32,
    #[serde(deserialize_with = "deserialize_size")]
    pub ram_size: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let sim = SimConfig::default();
        Self {
            ram_start: sim.ram_start,
            ram_size: sim.ram_size,
        }
    }
}

impl SimulatorConfig {
    pub fn to_sim_config(&self) -> SimConfig {
        SimConfig {
            ram_start: self.ram_start,
            ram_size: self.ram_size,
        }
    }
}

/// Load the configuration from `path`, or the default file if present
pub fn load(path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Path::new(DEFAULT_CONFIG_FILE),
        None => {
            log::debug!("no configuration file, using defaults");
            return Ok(CliConfig::default());
        }
    };

    log::info!("Loading configuration from {}", path.display());
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}
