//! Line-oriented command server on stdin/stdout

use std::io::{self, BufRead, Write};

use serde_json::json;

use crate::config::CliConfig;

pub fn run(config: &CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (programmer, _target) = super::spawn_programmer(config)?;
    log::info!("Ready for commands");

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            "" => continue,
            "quit" => break,
            "status" => serde_json::to_writer(&mut stdout, &programmer.status())?,
            command => {
                let accepted = programmer.submit(command.as_bytes());
                serde_json::to_writer(&mut stdout, &json!({ "accepted": accepted }))?;
            }
        }
        writeln!(stdout)?;
        stdout.flush()?;
    }

    if programmer.is_busy() {
        log::info!("Waiting for the running request to finish");
    }
    Ok(())
}
