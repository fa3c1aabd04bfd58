pub mod config;
pub mod logger;
pub mod memory;
pub(crate) mod rastvec_toml;

pub use config::*;
pub use logger::setup_logging;
pub use memory::{available_memory_mb, resolve_tile_size, tile_size_for_ram};
