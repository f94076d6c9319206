//! Command-line arguments
//!
//! Global flags apply to every subcommand and override the configuration
//! file. Queue tuning beyond name, shard count and consumer identity lives in
//! the file only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "disruptor")]
#[command(about = "Sharded at-least-once message queue over a consumer-group log store")]
#[command(version, long_version = crate::core::version::long_version())]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Log store URL: "memory" or redis://host:port
    #[arg(short = 's', long = "store", value_name = "URL", global = true)]
    pub store: Option<String>,

    /// Queue name
    #[arg(short = 'q', long = "queue", value_name = "NAME", global = true)]
    pub queue: Option<String>,

    /// Number of shard streams
    #[arg(long = "shards", value_name = "COUNT", global = true)]
    pub shards: Option<usize>,

    /// Force colored log output
    #[arg(long = "color", conflicts_with = "no_color", global = true)]
    pub color: bool,

    /// Disable colored log output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Log level
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true,
          value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(short = 'f', long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", global = true,
          value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Push demo players onto the queue
    Produce {
        /// Players to push; 0 keeps going until interrupted
        #[arg(short = 'n', long = "count", default_value_t = 1000)]
        count: u64,

        /// Pause between pushes in milliseconds
        #[arg(long = "interval-ms", default_value_t = 0)]
        interval_ms: u64,
    },

    /// Pop players from the queue and print them until interrupted
    Consume {
        /// Consumer identity within the group
        #[arg(long = "consumer", value_name = "NAME")]
        consumer: Option<String>,

        /// Stop after this many messages
        #[arg(short = 'n', long = "limit")]
        limit: Option<u64>,
    },

    /// Run a producer and a consumer in one process and report throughput
    Demo {
        /// Players to send through the queue
        #[arg(short = 'n', long = "count", default_value_t = 10_000)]
        count: u64,
    },
}

impl Args {
    /// Resolve the log file, honoring the magic values "none" and "-"
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_file.clone().filter(|path| {
            let raw = path.to_string_lossy();
            !(raw.eq_ignore_ascii_case("none") || raw == "-")
        })
    }

    /// Explicit color choice, `None` when left to the terminal
    pub fn color_choice(&self) -> Option<bool> {
        match (self.color, self.no_color) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}
