//! CLI argument definitions for the launcher.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use hfl_updater::VersionComparator;

#[derive(Parser)]
#[command(
    name = "hfl-launcher",
    version,
    about = "Hotfix Launcher - update the installed program, then start it",
    long_about = "Check the update server, then update the launcher itself, install a new\n\
                  major release, or patch individual files before starting the target program.\n\n\
                  Settings are read from the user config directory unless --config is given;\n\
                  command-line options override file values."
)]
pub struct Cli {
    /// Settings file (default: launcher.toml in the user config directory).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Update server base URL.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Directory the target program is installed in.
    #[arg(long = "install-dir", value_name = "DIR")]
    pub install_dir: Option<PathBuf>,

    /// Version comparison strategy.
    #[arg(long, value_enum)]
    pub comparator: Option<ComparatorArg>,

    /// Major version of the installed program.
    #[arg(long = "installed-version", value_name = "VERSION")]
    pub installed_version: Option<String>,

    /// Update only; print what would be started instead of starting it.
    #[arg(long = "no-launch")]
    pub no_launch: bool,

    /// Print the effective settings as TOML and exit.
    #[arg(long = "print-config")]
    pub print_config: bool,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(long = "log-format", value_enum, default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// CLI comparator choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ComparatorArg {
    /// Dotted numeric versions such as 2.0.1.
    Dotted,
    /// Integer timestamps.
    Timestamp,
}

impl From<ComparatorArg> for VersionComparator {
    fn from(arg: ComparatorArg) -> Self {
        match arg {
            ComparatorArg::Dotted => Self::DottedNumeric,
            ComparatorArg::Timestamp => Self::Timestamp,
        }
    }
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
