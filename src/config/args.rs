//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// n3dsxl-capture - N3DSXL USB capture pipeline
///
/// Streams the capture board's composite frames and splits them into
/// video frames and audio playback
#[derive(Parser, Debug)]
#[command(name = "n3dsxl-capture")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Options of the `run` command
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Reconnect automatically when the board is lost
    #[arg(long)]
    pub auto: bool,

    /// Ignore the settings file and do not save on exit
    #[arg(long)]
    pub safe: bool,

    /// Use the built-in simulated board instead of USB hardware
    #[arg(long)]
    pub simulate: bool,

    /// Do not open an audio output
    #[arg(long)]
    pub no_audio: bool,

    /// 240x720 PNG shown while there is no signal
    #[arg(long)]
    pub placeholder: Option<PathBuf>,

    /// Save the last frame as PNG on exit
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Capture until interrupted (default)
    Run(RunArgs),

    /// Connect once, report the result and disconnect
    Probe {
        /// Probe the simulated board
        #[arg(long)]
        simulate: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write a commented sample config to the default location
        #[arg(long)]
        write: bool,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.quiet {
            Some(tracing::Level::ERROR)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(tracing::Level::DEBUG),
                _ => Some(tracing::Level::TRACE),
            }
        }
    }
}

impl RunArgs {
    /// Whether settings may be written back on exit. A settings file that
    /// failed to load is left untouched.
    pub fn persist_on_exit(&self, settings_load_failed: bool) -> bool {
        !self.safe && !settings_load_failed
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Run(RunArgs::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let args = Args::parse_from(["n3dsxl-capture"]);
        assert!(args.command.is_none());
        assert_eq!(args.command.unwrap_or_default(), Command::default());
    }

    #[test]
    fn test_run_flags() {
        let args = Args::parse_from([
            "n3dsxl-capture",
            "run",
            "--auto",
            "--simulate",
            "--no-audio",
            "--snapshot",
            "last.png",
        ]);
        match args.command {
            Some(Command::Run(run)) => {
                assert!(run.auto);
                assert!(run.simulate);
                assert!(run.no_audio);
                assert!(!run.safe);
                assert_eq!(run.snapshot, Some(PathBuf::from("last.png")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_persist_on_exit() {
        let run = RunArgs::default();
        assert!(run.persist_on_exit(false));
        assert!(!run.persist_on_exit(true));

        let safe = RunArgs {
            safe: true,
            ..Default::default()
        };
        assert!(!safe.persist_on_exit(false));
    }

    #[test]
    fn test_log_level_flags() {
        assert_eq!(Args::parse_from(["n3dsxl-capture"]).log_level(), None);
        assert_eq!(
            Args::parse_from(["n3dsxl-capture", "-vv"]).log_level(),
            Some(tracing::Level::TRACE)
        );
        assert_eq!(
            Args::parse_from(["n3dsxl-capture", "probe", "-q"]).log_level(),
            Some(tracing::Level::ERROR)
        );
    }
}
