use anyhow::Result;
use ndarray::{Array3, ArrayD, IxDyn};
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use icevision::api::{ApiConfig, ApiHandle, ApiServer};
use icevision::{Detector, LabelTable, PipelineError, SeekableVideo, StubBackend, SyntheticVideo};

const INPUT_SIZE: u32 = 32;

static OPENED_VIDEO: Mutex<Option<PathBuf>> = Mutex::new(None);
static REJECTED_VIDEO: Mutex<Option<PathBuf>> = Mutex::new(None);

fn open_synthetic(path: &Path) -> Result<Box<dyn SeekableVideo>> {
    assert!(path.exists(), "scratch file should exist while decoding");
    *OPENED_VIDEO.lock().unwrap() = Some(path.to_path_buf());
    Ok(Box::new(SyntheticVideo::new(100, 25, 10).with_size(32, 16)))
}

fn open_corrupt(path: &Path) -> Result<Box<dyn SeekableVideo>> {
    *REJECTED_VIDEO.lock().unwrap() = Some(path.to_path_buf());
    Err(PipelineError::InvalidInput("unable to open video".into()).into())
}

/// One player box centered at (16, 8) on the 32px canvas.
fn one_player() -> ArrayD<f32> {
    Array3::from_shape_vec((1, 5, 1), vec![16.0, 8.0, 8.0, 4.0, 0.9])
        .unwrap()
        .into_dyn()
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(output: ArrayD<f32>, configure: impl FnOnce(ApiServer) -> ApiServer) -> Result<Self> {
        let detector = Detector::new(
            Arc::new(StubBackend::new(INPUT_SIZE, output)),
            LabelTable::default(),
        );
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_body_bytes: 1024 * 1024,
            ..ApiConfig::default()
        };
        let api_handle = configure(ApiServer::new(api_config, detector)).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(&self, head: &str, body: &[u8]) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(head.as_bytes())?;
        stream.write_all(body)?;
        read_response(&mut stream)
    }

    fn post(&self, target: &str, content_type: &str, body: &[u8]) -> Result<(String, String)> {
        let head = format!(
            "POST {target} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        self.send(&head, body)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([40, 80, 120]));
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn multipart(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[test]
fn liveness_probe_reports_model() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    let (headers, body) = api.send("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", b"")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["ok"], true);
    assert_eq!(value["model"], "icevision-v1");
    Ok(())
}

#[test]
fn predict_returns_boxes_in_source_pixels() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    // 64x32 image onto a 32px canvas: scale 0.5
    let body = multipart("frontier", "shot.png", &png(64, 32));
    let (headers, body) = api.post(
        "/predict?conf=0.5",
        "multipart/form-data; boundary=frontier",
        &body,
    )?;
    assert!(headers.contains("200 OK"), "{headers}\n{body}");

    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["img_w"], 64);
    assert_eq!(value["img_h"], 32);
    let boxes = value["boxes"].as_array().unwrap();
    assert_eq!(boxes.len(), 1);
    let xyxy: Vec<f64> = boxes[0]["xyxy"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(xyxy, vec![24.0, 12.0, 40.0, 20.0]);
    assert_eq!(boxes[0]["cls"], 0);
    assert_eq!(boxes[0]["label"], "player");
    Ok(())
}

#[test]
fn predict_accepts_raw_body_and_applies_threshold() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    let (headers, body) = api.post("/predict?conf=0.95", "image/png", &png(32, 32))?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["boxes"].as_array().unwrap().is_empty());
    Ok(())
}

#[test]
fn malformed_image_is_a_client_error() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    let body = multipart("b", "x.jpg", b"this is not an image");
    let (headers, body) = api.post("/predict", "multipart/form-data; boundary=b", &body)?;
    assert!(headers.contains("400 Bad Request"));
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["error"].as_str().unwrap().contains("invalid image"));
    Ok(())
}

#[test]
fn bad_query_values_are_client_errors() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    let (headers, _) = api.post("/predict?conf=lots", "image/png", &png(8, 8))?;
    assert!(headers.contains("400 Bad Request"));
    Ok(())
}

#[test]
fn uninterpretable_model_output_is_an_internal_error() -> Result<()> {
    let api = TestApi::new(ArrayD::zeros(IxDyn(&[5, 3])), |server| server)?;
    let (headers, body) = api.post("/predict", "image/png", &png(8, 8))?;
    assert!(headers.contains("500 Internal Server Error"));
    assert!(body.contains(r#""error":"internal error""#));
    Ok(())
}

#[test]
fn predict_video_samples_every_nth_frame_and_cleans_up() -> Result<()> {
    let api = TestApi::new(one_player(), |server| {
        server.with_video_opener(open_synthetic)
    })?;
    let body = multipart("v", "game.mov", b"\x00\x00\x00\x18ftypqt  ");
    let (headers, body) = api.post(
        "/predict_video?every_n=5&max_frames=3",
        "multipart/form-data; boundary=v",
        &body,
    )?;
    assert!(headers.contains("200 OK"), "{headers}\n{body}");

    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["fps"], 25.0);
    assert_eq!(value["total_frames"], 100);
    assert_eq!(value["sampled_every_n"], 5);
    assert_eq!(value["returned_frames"], 3);
    let indices: Vec<u64> = value["frames"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["i"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 5, 10]);
    assert_eq!(value["frames"][0]["img_w"], 32);
    assert_eq!(value["frames"][0]["boxes"][0]["xyxy"][0], 12.0);

    let scratch = OPENED_VIDEO.lock().unwrap().clone().expect("video opened");
    assert_eq!(scratch.extension().and_then(|e| e.to_str()), Some("mov"));
    assert!(!scratch.exists(), "scratch file should be removed");
    Ok(())
}

#[test]
fn unreadable_video_is_rejected_and_cleaned_up() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server.with_video_opener(open_corrupt))?;
    let (headers, _) = api.post("/predict_video", "video/mp4", b"garbage bytes")?;
    assert!(headers.contains("400 Bad Request"));

    let scratch = REJECTED_VIDEO.lock().unwrap().clone().expect("video opened");
    assert_eq!(scratch.extension().and_then(|e| e.to_str()), Some("mp4"));
    assert!(!scratch.exists(), "scratch file should be removed on failure");
    Ok(())
}

#[test]
fn oversized_bodies_are_refused() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    let head = "POST /predict HTTP/1.1\r\nHost: localhost\r\nContent-Length: 99999999\r\n\r\n";
    let (headers, _) = api.send(head, b"")?;
    assert!(headers.contains("413 Payload Too Large"));
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new(one_player(), |server| server)?;
    let (headers, _) = api.send("GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n", b"")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = api.send("GET /predict HTTP/1.1\r\nHost: localhost\r\n\r\n", b"")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}
