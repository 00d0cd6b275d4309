// SPDX-License-Identifier: GPL-3.0-only

use backdrop::QualityTier;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "backdrop")]
#[command(about = "Live background blur and replacement for camera streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected device profile and recommended quality tier
    Profile,

    /// Print the pipeline configuration for a quality tier
    Resolve {
        /// Quality tier (low, medium, high, ultra)
        #[arg(short, long, default_value = "medium")]
        tier: QualityTier,

        /// Custom override set as JSON (replaces every tier default)
        #[arg(short, long)]
        custom: Option<String>,
    },

    /// Apply the background effect to a still image
    Process {
        /// Input image
        #[arg(short, long)]
        input: PathBuf,

        /// Output image
        #[arg(short, long)]
        output: PathBuf,

        /// Quality tier (default: device recommendation)
        #[arg(short, long)]
        tier: Option<QualityTier>,

        /// Replacement background image (default: blur)
        #[arg(short, long)]
        background: Option<PathBuf>,

        /// Number of frames to run so temporal smoothing settles
        #[arg(short, long, default_value = "5")]
        frames: u32,
    },

    /// Run a full session against a simulated camera track
    Simulate {
        /// Image used as every camera frame
        #[arg(short, long)]
        input: PathBuf,

        /// Replacement background image for the image and upload steps
        #[arg(short, long)]
        background: Option<PathBuf>,

        /// Frames to deliver per step
        #[arg(short, long, default_value = "10")]
        frames: u32,

        /// Treat the device as mobile (zero-strength "none" and rotation handling)
        #[arg(short, long)]
        mobile: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=backdrop=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Profile => cli::show_profile(),
        Commands::Resolve { tier, custom } => cli::resolve_tier(tier, custom.as_deref()),
        Commands::Process {
            input,
            output,
            tier,
            background,
            frames,
        } => cli::process_image(&input, &output, tier, background, frames),
        Commands::Simulate {
            input,
            background,
            frames,
            mobile,
        } => cli::simulate_session(&input, background, frames, mobile),
    }
}
