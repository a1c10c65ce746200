//! HTTP surface: image and video detection endpoints plus a liveness probe.
//!
//! Each accepted connection is served on its own thread. The only state shared
//! between workers is the read-only [`Detector`].

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ServiceConfig, VideoSettings};
use crate::detect::{Detector, DetectionRecord, Inference, DEFAULT_CONFIDENCE};
use crate::error::{classify, Fault, PipelineError};
use crate::video::{open_video, scan_every_n, VideoOpener};

pub mod multipart;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_VIDEO_SUFFIX: &str = ".mp4";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub model_id: String,
    pub max_body_bytes: usize,
    pub default_confidence: f32,
    pub video: VideoSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            model_id: "icevision-v1".to_string(),
            max_body_bytes: 256 * 1024 * 1024,
            default_confidence: DEFAULT_CONFIDENCE,
            video: VideoSettings::default(),
        }
    }
}

impl From<&ServiceConfig> for ApiConfig {
    fn from(cfg: &ServiceConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            model_id: cfg.model_id.clone(),
            max_body_bytes: cfg.max_body_bytes,
            default_confidence: cfg.confidence,
            video: cfg.video,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    detector: Detector,
    open_video: VideoOpener,
}

struct ApiContext {
    cfg: ApiConfig,
    detector: Detector,
    open_video: VideoOpener,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, detector: Detector) -> Self {
        Self {
            cfg,
            detector,
            open_video,
        }
    }

    /// Replace how uploaded videos are opened.
    pub fn with_video_opener(mut self, opener: VideoOpener) -> Self {
        self.open_video = opener;
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = Arc::new(ApiContext {
            cfg: self.cfg,
            detector: self.detector,
            open_video: self.open_video,
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: Arc<ApiContext>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("connection from {} dropped: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Request-reading failures that map to their own status codes.
#[derive(Debug, Error)]
enum RequestError {
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed request: {0}")]
    Malformed(&'static str),
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream, ctx.cfg.max_body_bytes) {
        Ok(request) => request,
        Err(err) => {
            let status = match err.downcast_ref::<RequestError>() {
                Some(RequestError::TooLarge(_)) => 413,
                Some(RequestError::Malformed(_)) => 400,
                None => return Err(err),
            };
            write_error(&mut stream, status, &err.to_string())?;
            return Ok(());
        }
    };

    let routed = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => Ok(serde_json::to_vec(&Health {
            ok: true,
            model: &ctx.cfg.model_id,
        })?),
        ("POST", "/predict") => predict(&request, ctx),
        ("POST", "/predict_video") => predict_video(&request, ctx),
        (_, "/" | "/predict" | "/predict_video") => {
            write_error(&mut stream, 405, "method_not_allowed")?;
            return Ok(());
        }
        _ => {
            write_error(&mut stream, 404, "not_found")?;
            return Ok(());
        }
    };

    match routed {
        Ok(payload) => write_response(&mut stream, 200, "application/json", &payload),
        Err(err) => {
            let fault = classify(&err);
            match &fault {
                Fault::Client(_) => log::warn!("{} {} rejected: {:#}", request.method, request.path, err),
                Fault::Server => log::error!("{} {} failed: {:#}", request.method, request.path, err),
            }
            write_error(&mut stream, fault.status(), fault.message())
        }
    }
}

#[derive(Serialize)]
struct Health<'a> {
    ok: bool,
    model: &'a str,
}

#[derive(Serialize)]
struct PredictResponse<'a> {
    boxes: Vec<DetectionRecord>,
    img_w: u32,
    img_h: u32,
    model: &'a str,
}

#[derive(Serialize)]
struct FrameResponse {
    i: u64,
    boxes: Vec<DetectionRecord>,
    img_w: u32,
    img_h: u32,
}

#[derive(Serialize)]
struct PredictVideoResponse<'a> {
    fps: f64,
    total_frames: u64,
    sampled_every_n: usize,
    returned_frames: usize,
    frames: Vec<FrameResponse>,
    model: &'a str,
}

fn records(inference: &Inference) -> Vec<DetectionRecord> {
    inference.detections.iter().map(DetectionRecord::from).collect()
}

fn predict(request: &HttpRequest, ctx: &ApiContext) -> Result<Vec<u8>> {
    let conf = request.confidence(ctx.cfg.default_confidence)?;
    let upload = request.upload()?;
    let inference = ctx.detector.infer_encoded(&upload.data, conf)?;
    log::debug!(
        "predict: {}x{} image, {} boxes",
        inference.width,
        inference.height,
        inference.detections.len()
    );

    Ok(serde_json::to_vec(&PredictResponse {
        boxes: records(&inference),
        img_w: inference.width,
        img_h: inference.height,
        model: &ctx.cfg.model_id,
    })?)
}

fn predict_video(request: &HttpRequest, ctx: &ApiContext) -> Result<Vec<u8>> {
    let conf = request.confidence(ctx.cfg.default_confidence)?;
    let every_n = request.query_usize("every_n")?.unwrap_or(ctx.cfg.video.every_n);
    let max_frames = request
        .query_usize("max_frames")?
        .unwrap_or(ctx.cfg.video.max_frames);
    let upload = request.upload()?;

    let suffix = upload
        .filename
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| DEFAULT_VIDEO_SUFFIX.to_string());
    // Removed on drop, so every early return below cleans up too.
    let mut scratch = tempfile::Builder::new()
        .prefix("icevision-upload-")
        .suffix(&suffix)
        .tempfile()
        .context("create scratch file for video upload")?;
    scratch
        .write_all(&upload.data)
        .context("write video upload to scratch file")?;
    scratch.flush()?;

    let mut frames = Vec::new();
    let (fps, total_frames) = {
        let mut video = (ctx.open_video)(scratch.path())?;
        let metadata = video.metadata().clone();
        scan_every_n(video.as_mut(), every_n, max_frames, |i, frame| {
            let inference = ctx.detector.infer(&frame.image, conf)?;
            frames.push(FrameResponse {
                i,
                boxes: records(&inference),
                img_w: inference.width,
                img_h: inference.height,
            });
            Ok(())
        })?;
        (
            metadata.frame_rate.map(|rate| rate.as_f64()).unwrap_or(0.0),
            metadata.frame_count.unwrap_or(0),
        )
    };

    if let Err(err) = scratch.close() {
        log::warn!("failed to remove video scratch file: {}", err);
    }
    log::debug!("predict_video: {} frames returned", frames.len());

    Ok(serde_json::to_vec(&PredictVideoResponse {
        fps,
        total_frames,
        sampled_every_n: every_n,
        returned_frames: frames.len(),
        frames,
        model: &ctx.cfg.model_id,
    })?)
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn confidence(&self, default: f32) -> Result<f32> {
        let Some(raw) = self.query.get("conf") else {
            return Ok(default);
        };
        match raw.parse::<f32>() {
            Ok(conf) if (0.0..=1.0).contains(&conf) => Ok(conf),
            _ => Err(PipelineError::InvalidInput(format!(
                "conf must be a number in [0, 1], got '{}'",
                raw
            ))
            .into()),
        }
    }

    fn query_usize(&self, key: &str) -> Result<Option<usize>> {
        self.query
            .get(key)
            .map(|raw| {
                raw.parse::<usize>().map_err(|_| {
                    anyhow::Error::from(PipelineError::InvalidInput(format!(
                        "{} must be a non-negative integer, got '{}'",
                        key, raw
                    )))
                })
            })
            .transpose()
    }

    /// The uploaded file: the `file` field of a multipart form, or the raw body.
    fn upload(&self) -> Result<multipart::FilePart> {
        let content_type = self.header("content-type").unwrap_or("");
        let part = match multipart::boundary(content_type) {
            Some(boundary) => multipart::extract_field(&self.body, &boundary, "file")?
                .ok_or_else(|| PipelineError::InvalidInput("missing 'file' form field".into()))?,
            None => multipart::FilePart {
                filename: None,
                data: self.body.clone(),
            },
        };
        if part.data.is_empty() {
            return Err(PipelineError::InvalidInput("empty upload".into()).into());
        }
        Ok(part)
    }
}

fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<HttpRequest> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("headers too large").into());
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before headers ended").into());
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or(RequestError::Malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(RequestError::Malformed("missing method"))?;
    let raw_path = parts.next().ok_or(RequestError::Malformed("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("bad content-length"))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge(max_body_bytes).into());
    }
    if content_length > 0
        && headers
            .get("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream
            .read_exact(&mut body[already..])
            .context("read request body")?;
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (raw_path.to_string(), HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        query,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    write_response(stream, status, "application/json", &body)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
