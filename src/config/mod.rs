//! Command line and persistent settings

mod args;
mod settings;

pub use args::{Args, Command, RunArgs};
pub use settings::{ConfigError, Settings};
