//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::RunLimits;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to config.toml (default: the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct Pipeline {
    /// Only this tracker (default: every enabled tracker)
    #[arg(short, long)]
    pub tracker: Option<String>,

    /// Process at most this many sources per tracker
    #[arg(long)]
    pub max_sources: Option<usize>,

    /// Keep at most this many records per source
    #[arg(long)]
    pub max_articles: Option<usize>,

    /// Analyze at most this many pending articles per tracker
    #[arg(long)]
    pub max_summaries: Option<usize>,
}

impl Pipeline {
    pub fn limits(&self) -> RunLimits {
        RunLimits {
            max_sources: self.max_sources,
            max_articles: self.max_articles,
            max_summaries: self.max_summaries,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch sources and store new articles
    Scrape(Pipeline),

    /// Extract indicators, classify and summarize pending articles
    Analyze(Pipeline),

    /// Write a digest of recently analyzed articles
    Report {
        #[command(flatten)]
        pipeline: Pipeline,

        /// 0 = 1 day, 1 = 7 days, 2 = 14 days, 3 = 30 days
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
        tier: u8,
    },

    /// Scrape, analyze and optionally report in one go
    Run {
        #[command(flatten)]
        pipeline: Pipeline,

        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
        tier: Option<u8>,
    },

    /// Show configured trackers and article counts
    List,

    /// Check every source definition
    Validate {
        /// Also request each source's address
        #[arg(long)]
        test_connections: bool,
    },

    /// Send a test prompt to the configured model
    TestConnection,

    /// Find stored indicators containing a value
    Search { value: String },
}
