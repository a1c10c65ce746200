use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{LabelTable, DEFAULT_CONFIDENCE};

const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_MODEL_ID: &str = "icevision-v1";
const DEFAULT_INPUT_SIZE: u32 = 864;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024 * 1024;
const DEFAULT_EVERY_N: usize = 5;
const DEFAULT_MAX_FRAMES: usize = 300;
const DEFAULT_LABELS: &[&str] = &["player"];

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    model_path: Option<PathBuf>,
    model_id: Option<String>,
    input_size: Option<u32>,
    labels: Option<Vec<String>>,
    api: Option<ApiConfigFile>,
    inference: Option<InferenceConfigFile>,
    video: Option<VideoConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    every_n: Option<usize>,
    max_frames: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    /// Identifier echoed in every response.
    pub model_id: String,
    /// Square model input side, in pixels.
    pub input_size: u32,
    pub labels: Vec<String>,
    pub api_addr: String,
    pub max_body_bytes: usize,
    /// Default confidence threshold when a request does not pass `conf`.
    pub confidence: f32,
    pub video: VideoSettings,
}

/// Request-path video defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSettings {
    pub every_n: usize,
    pub max_frames: usize,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            every_n: DEFAULT_EVERY_N,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// Defaults, then the file named by `ICEVISION_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ICEVISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn label_table(&self) -> LabelTable {
        LabelTable::new(self.labels.iter().cloned())
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let video = file.video.unwrap_or_default();
        Self {
            model_path: file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            model_id: file
                .model_id
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            input_size: file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            labels: file
                .labels
                .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()),
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_body_bytes: api.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            confidence: file
                .inference
                .and_then(|inference| inference.confidence)
                .unwrap_or(DEFAULT_CONFIDENCE),
            video: VideoSettings {
                every_n: video.every_n.unwrap_or(DEFAULT_EVERY_N),
                max_frames: video.max_frames.unwrap_or(DEFAULT_MAX_FRAMES),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("ICEVISION_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = PathBuf::from(path);
            }
        }
        if let Ok(size) = std::env::var("ICEVISION_IMG_SIZE") {
            self.input_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("ICEVISION_IMG_SIZE must be a positive integer"))?;
        }
        if let Ok(addr) = std::env::var("ICEVISION_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(limit) = std::env::var("ICEVISION_MAX_BODY_BYTES") {
            self.max_body_bytes = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("ICEVISION_MAX_BODY_BYTES must be an integer byte count"))?;
        }
        if let Ok(conf) = std::env::var("ICEVISION_CONFIDENCE") {
            self.confidence = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("ICEVISION_CONFIDENCE must be a number"))?;
        }
        if let Ok(labels) = std::env::var("ICEVISION_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.labels = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(anyhow!("input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if self.video.every_n == 0 || self.video.max_frames == 0 {
            return Err(anyhow!("video every_n and max_frames must be at least 1"));
        }
        if self.labels.is_empty() {
            return Err(anyhow!("at least one class label is required"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let parsed: ServiceConfigFile = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(parsed)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
