//! Load `.rastvec.toml` from a directory (CLI only). The library takes its configuration
//! through [`Opts`] only.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::Opts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RastvecToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    layer_name: Option<String>,
    label_field: Option<String>,
    start_label: Option<u32>,
    layer_options: Option<Vec<String>>,
    mask: Option<String>,
    srs: Option<String>,
    tile_size: Option<usize>,
    ram: Option<u64>,
    range_radius: Option<f32>,
    min_size: Option<u32>,
    filter: Option<String>,
    cleanup: Option<bool>,
    tmp_dir: Option<String>,
    threads: Option<usize>,
    simplify: Option<f64>,
    verbose: Option<bool>,
}

/// Load the settings file from `dir` if present. Returns None if missing or unreadable
/// (a parse error is logged as a warning).
pub(crate) fn load_rastvec_toml(dir: &Path) -> Option<RastvecToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($file:expr, $opts:expr, $file_field:ident => Some $opts_field:ident) => {
        if let Some(v) = $file.$file_field.clone() {
            $opts.$opts_field = Some(v);
        }
    };
    ($file:expr, $opts:expr, $file_field:ident => $opts_field:ident) => {
        if let Some(v) = $file.$file_field.clone() {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
pub(crate) fn apply_file_to_opts(file: &RastvecToml, opts: &mut Opts) {
    let s = &file.settings;
    apply_file_opt!(s, opts, layer_name => layer_name);
    apply_file_opt!(s, opts, label_field => label_field);
    apply_file_opt!(s, opts, start_label => start_label);
    apply_file_opt!(s, opts, layer_options => layer_options);
    if let Some(ref p) = s.mask {
        opts.mask = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, opts, srs => Some srs);
    apply_file_opt!(s, opts, tile_size => Some tile_size);
    apply_file_opt!(s, opts, ram => Some ram_mb);
    apply_file_opt!(s, opts, range_radius => range_radius);
    apply_file_opt!(s, opts, min_size => min_size);
    apply_file_opt!(s, opts, filter => Some filter);
    apply_file_opt!(s, opts, cleanup => cleanup);
    if let Some(ref p) = s.tmp_dir {
        opts.tmp_dir = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, opts, threads => Some num_threads);
    apply_file_opt!(s, opts, simplify => Some simplify);
    apply_file_opt!(s, opts, verbose => verbose);
}

