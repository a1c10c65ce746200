//! predict - run the detection pipeline over images on disk
//!
//! Prints one JSON object per image to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};

use icevision::dataset::list_files;
use icevision::detect::{decode_image, load_backend, DEFAULT_CONFIDENCE};
use icevision::{DetectionRecord, Detector, LabelTable};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// ONNX model path.
    #[arg(long, env = "ICEVISION_MODEL_PATH", default_value = "best.onnx")]
    model: PathBuf,
    /// Square model input size.
    #[arg(long, env = "ICEVISION_IMG_SIZE", default_value_t = 864)]
    img_size: u32,
    /// Confidence threshold.
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    conf: f32,
    /// Class labels, in class-id order.
    #[arg(long, value_delimiter = ',', default_value = "player")]
    labels: Vec<String>,
    /// Image files or directories of images.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Serialize)]
struct ImageResult<'a> {
    path: &'a Path,
    boxes: Vec<DetectionRecord>,
    img_w: u32,
    img_h: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let backend = load_backend(&args.model, args.img_size)?;
    let detector = Detector::new(backend, LabelTable::new(args.labels.iter().cloned()));

    let mut images = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            images.extend(list_files(input)?);
        } else {
            images.push(input.clone());
        }
    }

    let mut failures = 0usize;
    for path in &images {
        match run_one(&detector, path, args.conf) {
            Ok(line) => println!("{}", line),
            Err(err) => {
                failures += 1;
                log::warn!("skipping {}: {:#}", path.display(), err);
            }
        }
    }
    log::info!(
        "processed {} images ({} skipped)",
        images.len() - failures,
        failures
    );
    Ok(())
}

fn run_one(detector: &Detector, path: &Path, conf: f32) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = decode_image(&bytes)?;
    let inference = detector.infer(&image, conf)?;
    let result = ImageResult {
        path,
        boxes: inference
            .detections
            .iter()
            .map(DetectionRecord::from)
            .collect(),
        img_w: inference.width,
        img_h: inference.height,
    };
    Ok(serde_json::to_string(&result)?)
}
