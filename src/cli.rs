//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(
    name = "live-server",
    author,
    version,
    about = "Serve an HTML file and reload the browser on every change."
)]
pub struct Cli {
    /// HTML file to serve; its directory is served and watched.
    pub entry: Option<PathBuf>,

    /// Port to listen on [default: 8080].
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Interface to bind [default: 0.0.0.0].
    #[arg(long)]
    pub host: Option<String>,

    /// Quiet window in milliseconds used to coalesce bursts of changes.
    #[arg(long, value_name = "MS")]
    pub debounce: Option<u64>,

    /// Config file; defaults to live-server.toml next to the entry file.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log every change, client and request.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            debounce_ms: self.debounce,
        }
    }
}
