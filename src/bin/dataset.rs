//! dataset - build training corpora from raw match footage

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use icevision::dataset::{export_video_samples, rename_labels};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save N random frames from every video in a directory as PNGs.
    Sample {
        /// Directory of input videos.
        #[arg(long)]
        videos: PathBuf,
        /// Output directory for video{v}_frame{f}.png files.
        #[arg(long)]
        out: PathBuf,
        /// Frames to sample per video.
        #[arg(long, default_value_t = 45)]
        count: usize,
        /// Optional deterministic seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Strip the "<task>-" prefix from exported label files.
    RenameLabels {
        /// Directory holding the .txt label files.
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Sample {
            videos,
            out,
            count,
            seed,
        } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let written = export_video_samples(&videos, &out, count, &mut rng)?;
            log::info!("wrote {} frames to {}", written, out.display());
        }
        Command::RenameLabels { dir } => {
            let renamed = rename_labels(&dir)?;
            log::info!("renamed {} label files", renamed.len());
        }
    }
    Ok(())
}
