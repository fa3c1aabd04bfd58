//! Rastvec CLI: segment an image and stream its regions into a vector layer.

use anyhow::Result;
use clap::Parser;
use rastvec::engine::arg_parser::Cli;
use rastvec::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
