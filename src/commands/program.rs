//! One-shot programming with a progress bar

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};

use crate::config::CliConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments of the `program` command
pub struct ProgramArgs {
    pub algorithm: String,
    pub image: String,
    pub ram_addr: Option<u32>,
    pub flash_addr: Option<u32>,
    pub dump: Option<PathBuf>,
}

impl ProgramArgs {
    /// The JSON command the transport would send for these arguments
    fn to_command(&self) -> Value {
        let mut command = json!({
            "algorithm": self.algorithm,
            "program": self.image,
        });
        if let Some(addr) = self.ram_addr {
            command["ram_addr"] = json!(addr);
        }
        if let Some(addr) = self.flash_addr {
            command["flash_addr"] = json!(addr);
        }
        command
    }
}

/// Create a percentage progress bar
fn create_progress_bar() -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

pub fn run(config: &CliConfig, args: ProgramArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (programmer, target) = super::spawn_programmer(config)?;

    let command = args.to_command();
    log::debug!("submitting {}", command);
    if !programmer.submit(command.to_string().as_bytes()) {
        return Err("Programming command rejected".into());
    }

    let pb = create_progress_bar().unwrap_or_else(|_| ProgressBar::new(100));
    pb.set_message(args.image.clone());
    while programmer.is_busy() {
        pb.set_position(programmer.progress() as u64);
        thread::sleep(POLL_INTERVAL);
    }
    pb.set_position(programmer.progress() as u64);

    if programmer.last_result() != Some(true) {
        pb.abandon_with_message("failed");
        return Err("Programming failed".into());
    }
    pb.finish_with_message("done");

    if let Some(path) = args.dump {
        let (start, contents) = target.flash();
        fs::write(&path, &contents)?;
        println!(
            "Wrote simulated flash (0x{:08X}, {} bytes) to {}",
            start,
            contents.len(),
            path.display()
        );
    }

    Ok(())
}
