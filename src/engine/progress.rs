//! Progress bar utilities for displaying tile processing status

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

use crate::pipeline::TileProgress;

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Configuration for creating a progress bar
pub struct ProgressBarConfig {
    pub total: usize,
    pub desc: &'static str,
    pub animation: Animation,
}

impl ProgressBarConfig {
    pub fn new(total: usize, desc: &'static str, animation: Animation) -> Self {
        Self {
            total,
            desc,
            animation,
        }
    }

    /// Tile bar; the total is set once the schedule is known.
    pub fn tiles() -> Self {
        Self::new(0, "Tiles", Animation::Classic)
    }
}

/// Create a progress bar with the given configuration
pub fn create_progress_bar(config: ProgressBarConfig) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = config.total,
        desc = config.desc,
        animation = config.animation,
        unit = " tiles"
    )))
}

/// Update the bar's total. Refreshes the display.
pub fn set_bar_total(pb: &ProgressBar, total: usize) {
    if let Ok(mut bar) = pb.try_lock() {
        bar.total = total;
        let _ = bar.refresh();
    }
}

/// Update progress bar if available.
/// Uses try_lock to avoid blocking if the mutex is contended.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

/// Tile callback for the orchestrator: sets the total on the first tile, then advances by one.
pub fn tile_progress_callback(bar: &Option<ProgressBar>) -> Option<TileProgress> {
    bar.as_ref().map(|bar| {
        let bar = Arc::clone(bar);
        Box::new(move |done: usize, total: usize| {
            if done == 1 {
                set_bar_total(&bar, total);
            }
            update_progress_bar(&bar, 1);
        }) as TileProgress
    })
}
