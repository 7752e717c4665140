use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run claimed jobs read from JSON files and report results to the server
    Process {
        /// Job file in the server's `{uuid, jobToken, type, payload}` shape
        #[arg(short, long = "job", required = true)]
        jobs: Vec<PathBuf>,

        /// Base URL of the coordinating server
        #[arg(short, long)]
        server: String,

        /// Token identifying this runner to the server
        #[arg(short, long, env = "VOD_RUNNER_TOKEN")]
        runner_token: String,
    },

    /// Check that the encoding engine and probe are installed
    Check,

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

impl Commands {
    /// Whether the command runs with logging set up. `init-config` only writes
    /// the config file and must not create the log directory.
    pub fn writes_logs(&self) -> bool {
        !matches!(self, Commands::InitConfig { .. })
    }
}
