//! Engine module for the command-line front end

pub mod arg_parser;
pub mod cli;
pub mod progress;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::{handle_run, setup_opts};
