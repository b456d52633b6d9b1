use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `Keyloom` - chat, image generation and image analysis over pooled provider keys.
#[derive(Parser, Debug)]
#[command(name = "keyloom")]
#[command(version)]
#[command(about = "Chat and image gateway over a pool of Gemini keys.", long_about = None)]
pub struct Cli {
    /// Path to config.toml (default: ~/.keyloom/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on (use 0 for random available port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Show pool size, store location and fallback reachability
    Status,
}
