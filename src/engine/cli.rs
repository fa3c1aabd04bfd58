//! CLI command handler: build options, install Ctrl+C and progress, run the pipeline.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Opts;
use crate::engine::arg_parser::Cli;
use crate::engine::progress::{ProgressBarConfig, create_progress_bar, tile_progress_callback};
use crate::pipeline::PipelineOrchestrator;
use crate::utils::rastvec_toml::{apply_file_to_opts, load_rastvec_toml};
use crate::utils::setup_logging;

/// Overwrite opts field from CLI when the flag was given.
macro_rules! apply_cli_opt {
    ($cli:expr, $opts:expr, $cli_field:ident => Some $opts_field:ident) => {
        if let Some(v) = $cli.$cli_field.clone() {
            $opts.$opts_field = Some(v);
        }
    };
    ($cli:expr, $opts:expr, $cli_field:ident => $opts_field:ident) => {
        if let Some(v) = $cli.$cli_field.clone() {
            $opts.$opts_field = v;
        }
    };
}

/// Defaults, then `.rastvec.toml` from `config_dir`, then CLI flags.
pub fn setup_opts(cli: &Cli, config_dir: &Path) -> Opts {
    let mut opts = Opts::default();
    if let Some(file) = load_rastvec_toml(config_dir) {
        apply_file_to_opts(&file, &mut opts);
    }
    apply_cli_opt!(cli, opts, layer_name => layer_name);
    apply_cli_opt!(cli, opts, label_field => label_field);
    apply_cli_opt!(cli, opts, start_label => start_label);
    if !cli.layer_options.is_empty() {
        opts.layer_options = cli.layer_options.clone();
    }
    apply_cli_opt!(cli, opts, mask => Some mask);
    apply_cli_opt!(cli, opts, srs => Some srs);
    apply_cli_opt!(cli, opts, tile_size => Some tile_size);
    apply_cli_opt!(cli, opts, ram => Some ram_mb);
    apply_cli_opt!(cli, opts, range_radius => range_radius);
    apply_cli_opt!(cli, opts, min_size => min_size);
    apply_cli_opt!(cli, opts, filter => Some filter);
    apply_cli_opt!(cli, opts, cleanup => cleanup);
    apply_cli_opt!(cli, opts, tmp_dir => Some tmp_dir);
    apply_cli_opt!(cli, opts, threads => Some num_threads);
    apply_cli_opt!(cli, opts, simplify => Some simplify);
    apply_cli_opt!(cli, opts, verbose => verbose);
    opts
}

/// Run the full pipeline for the CLI.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli, Path::new("."));
    setup_logging(opts.verbose);
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );

    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_requested_handler = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        cancel_requested_handler.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;

    let mut orchestrator = PipelineOrchestrator::new(&cli.input, &cli.output, opts.clone())
        .with_cancel(Arc::clone(&cancel_requested));
    let bar = opts
        .verbose
        .then(|| create_progress_bar(ProgressBarConfig::tiles()));
    if let Some(cb) = tile_progress_callback(&bar) {
        orchestrator = orchestrator.with_progress(cb);
    }

    let result = orchestrator.execute();
    if bar.is_some() {
        eprintln!();
    }
    if cancel_requested.load(Ordering::Relaxed) {
        warn!("Interrupted. Tiles committed before the interruption are kept in the output.");
    }
    let report = result?;

    for t in &report.timings {
        debug!("{:<20} {:?}", t.stage, t.duration);
    }
    info!(
        "{} features written to {} ({} tiles, {} removed by filter, {} intermediates cleaned)",
        report.features,
        cli.output.display(),
        report.tiles,
        report.filtered_out,
        report.cleaned
    );
    Ok(())
}
