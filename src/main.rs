// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use xr_depth::GridPreset;

mod cli;

#[derive(Parser)]
#[command(name = "xr-depth")]
#[command(about = "Inspect depth frames, displaced surfaces and occlusion masks")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Layout of a raw depth dump
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RawFormat {
    /// Little-endian unsigned 16-bit samples
    U16,
    /// Little-endian 32-bit float samples
    F32,
}

/// Grid density for the `mesh` command
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum GridArg {
    Coarse,
    Medium,
    Dense,
}

impl From<GridArg> for GridPreset {
    fn from(arg: GridArg) -> Self {
        match arg {
            GridArg::Coarse => GridPreset::Coarse,
            GridArg::Medium => GridPreset::Medium,
            GridArg::Dense => GridPreset::Dense,
        }
    }
}

/// Raw depth dump shared by `sample` and `mesh`
#[derive(clap::Args, Debug)]
pub struct DumpArgs {
    /// Raw depth dump (row-major, top row first)
    pub input: PathBuf,

    /// Width in samples
    #[arg(long)]
    pub width: u32,

    /// Height in samples
    #[arg(long)]
    pub height: u32,

    /// Sample layout
    #[arg(long, value_enum, default_value = "u16")]
    pub format: RawFormat,

    /// Raw value to metres
    #[arg(long, default_value = "0.001")]
    pub scale: f32,

    /// Vertical field of view of the render camera in degrees
    #[arg(long, default_value = "60")]
    pub fov: f32,
}

#[derive(Subcommand)]
enum Commands {
    /// Print metric depth at a normalized coordinate
    Sample {
        #[command(flatten)]
        dump: DumpArgs,

        /// Horizontal coordinate in [0, 1]
        #[arg(short, long, default_value = "0.5")]
        u: f32,

        /// Vertical coordinate in [0, 1], pointing up
        #[arg(short, long, default_value = "0.5")]
        v: f32,

        /// Also resolve the coordinate to a world point
        #[arg(long)]
        world: bool,
    },

    /// Build the displaced surface and print its depth range
    Mesh {
        #[command(flatten)]
        dump: DumpArgs,

        /// Grid density (default: from config)
        #[arg(long, value_enum)]
        grid: Option<GridArg>,
    },

    /// Render an occlusion mask headless and save it as PNG
    Occlusion {
        /// Mask width in pixels
        #[arg(long, default_value = "256")]
        width: u32,

        /// Mask height in pixels
        #[arg(long, default_value = "256")]
        height: u32,

        /// Real-world depth of the synthetic wall in metres
        #[arg(long, default_value = "2.0")]
        real_depth: f32,

        /// Distance of the virtual occluder quad in metres
        #[arg(long, default_value = "1.0")]
        occluder_distance: f32,

        /// Output directory (default: current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Write the defaults to the config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=xr_depth=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sample { dump, u, v, world } => cli::sample(&config, &dump, u, v, world),
        Commands::Mesh { dump, grid } => cli::mesh(&config, &dump, grid.map(Into::into)),
        Commands::Occlusion {
            width,
            height,
            real_depth,
            occluder_distance,
            output,
        } => cli::occlusion(&config, (width, height), real_depth, occluder_distance, output),
        Commands::Config { init } => cli::show_config(&config, cli.config.as_deref(), init),
    }
}
