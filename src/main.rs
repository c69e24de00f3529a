//! algoflash - A flash programmer driven by target-resident flash algorithms
//!
//! Commands name a flash algorithm and an image. The algorithm is loaded
//! into target RAM, bound as a flash backend, and the image is streamed
//! through a buffered flash manager that erases each sector before
//! programming it.
//!
//! This binary drives a simulated target, so algorithms and images can be
//! exercised without hardware.

mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!(
        "algorithm root {}, program root {}",
        config.programmer.algorithm_root.display(),
        config.programmer.program_root.display()
    );

    match cli.command {
        Commands::Program {
            algorithm,
            image,
            ram_addr,
            flash_addr,
            dump,
        } => commands::program::run(
            &config,
            commands::program::ProgramArgs {
                algorithm,
                image,
                ram_addr,
                flash_addr,
                dump,
            },
        ),
        Commands::Serve => commands::serve::run(&config),
    }
}
