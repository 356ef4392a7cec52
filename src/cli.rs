//! CLI argument definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Live detection-stream client for remote perception devices
#[derive(Parser, Debug)]
#[command(name = "edgesight")]
#[command(about = "Watch and steer the detection stream of a remote perception device")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "EDGESIGHT_SETTINGS", value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the device and print what it detects
    #[command(visible_alias = "w")]
    Watch(WatchArgs),

    /// Manage persisted settings
    Settings(SettingsArgs),
}

/// Output format for `watch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// One line per detection batch
    #[default]
    Text,
    /// One JSON object per detection batch
    Json,
}

/// Arguments for the watch command
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Server URL for this run only (not saved)
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Ask the device to track this object id once it shows up
    #[arg(long, value_name = "ID")]
    pub track: Option<String>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Output format
    #[arg(short, long, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

/// Arguments for the settings command
#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Settings operation: show, get, set, reset
    #[command(subcommand)]
    pub operation: SettingsOperation,
}

/// Settings subcommand operations
#[derive(Subcommand, Debug)]
pub enum SettingsOperation {
    /// Show current settings
    Show,

    /// Print one setting
    Get {
        /// Setting key (e.g. server_url, confidence_threshold)
        key: String,
    },

    /// Change one setting
    Set {
        /// Setting key (e.g. server_url, confidence_threshold)
        key: String,
        /// Value to set
        value: String,
    },

    /// Reset settings to defaults
    Reset,
}
