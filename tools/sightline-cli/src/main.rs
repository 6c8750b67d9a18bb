//! Sightline CLI: export annotated media from the command line.
//!
//! Usage:
//!   sightline export <INPUT>   Annotate an image or video and export it
//!   sightline codecs           Probe which video codecs this host can encode
//!   sightline config [--init]  Show the effective config, or write it out

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sightline_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "sightline",
    about = "Export annotated images, videos, and frame sequences",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate an image or video and export the result
    Export {
        /// Input image or video
        input: PathBuf,

        /// Output kind: image|video|frames (default: image for images, video for videos)
        #[arg(long)]
        sink: Option<String>,

        /// Output file or directory (default: timestamped name in the configured output dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Codec FourCCs to probe, in order (overrides config)
        #[arg(long = "codec", value_name = "FOURCC")]
        codecs: Vec<String>,

        /// Print the final outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe which video codecs this host can encode
    Codecs {
        /// Probe width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Probe height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Probe frame rate
        #[arg(long, default_value = "30")]
        fps: f64,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    sightline_common::logging::init_logging(&config.logging);
    tracing::debug!(output_dir = %config.output_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Export {
            input,
            sink,
            output,
            codecs,
            json,
        } => commands::export::run(&config, input, sink, output, codecs, json).await,
        Commands::Codecs { width, height, fps } => {
            commands::codecs::run(&config, width, height, fps)
        }
        Commands::Config { init } => commands::config::run(&config, cli.config.as_deref(), init),
    }
}
