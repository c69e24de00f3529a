//! CLI argument parsing

use algoflash_programmer::config::parse_number;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "algoflash")]
#[command(author, version, about = "Flash programmer driven by target flash algorithms", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML)
    /// Defaults to ./algoflash.toml when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Program an image into the simulated target
    Program {
        /// Algorithm file name, relative to the algorithm root
        #[arg(short, long)]
        algorithm: String,

        /// Image file name, relative to the program root
        #[arg(short, long)]
        image: String,

        /// RAM address to load the algorithm at (hex with 0x prefix, or decimal)
        #[arg(long, value_parser = parse_number)]
        ram_addr: Option<u32>,

        /// Flash address for binary images and flat algorithms
        #[arg(long, value_parser = parse_number)]
        flash_addr: Option<u32>,

        /// Write the simulated flash contents to this file afterwards
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Read JSON commands from stdin, one per line
    ///
    /// Each command is answered with {"accepted": bool}. The line `status`
    /// prints the programmer status, `quit` exits.
    Serve,
}
