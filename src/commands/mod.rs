//! Command implementations

pub mod program;
pub mod serve;

use algoflash_dummy::{SimConnector, SimTarget};
use algoflash_programmer::{FileAlgorithmLoader, Programmer, ProgrammerError};

use crate::config::CliConfig;

/// Start a programmer attached to a fresh simulated target
fn spawn_programmer(config: &CliConfig) -> Result<(Programmer, SimTarget), ProgrammerError> {
    let connector = SimConnector::new(config.simulator.to_sim_config());
    let target = connector.target();
    let loader = FileAlgorithmLoader::new(&config.programmer);
    let programmer = Programmer::spawn(config.programmer.clone(), loader, connector)?;
    Ok((programmer, target))
}
