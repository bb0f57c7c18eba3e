//! Test doubles shared by the unit tests of this crate.

use crate::engine::{CaptureInfo, EngineError, FaceEngine};
use facematch_core::{BoundingBox, Descriptor, FaceDescription};
use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Images darker than this contain "no face" for the fake engine.
pub const NO_FACE_BELOW: f32 = 16.0;

/// Fresh empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "facematch-test-{name}-{}-{n}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Uniform gray image; the fake engine maps brightness to identity.
pub fn face_image(brightness: u8) -> GrayImage {
    GrayImage::from_pixel(64, 48, Luma([brightness]))
}

/// Write `<dir>/<label>/<name>` as a PNG of uniform brightness.
pub fn write_sample(dir: &Path, label: &str, name: &str, brightness: u8) -> PathBuf {
    let folder = dir.join(label);
    std::fs::create_dir_all(&folder).unwrap();
    let path = folder.join(name);
    face_image(brightness)
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

fn mean(image: &GrayImage) -> f32 {
    let data = image.as_raw();
    data.iter().map(|&p| p as f32).sum::<f32>() / data.len().max(1) as f32
}

/// Deterministic engine: one face per image unless the image is near black.
/// The descriptor is `[mean_brightness / 50]`. Every request can be slowed
/// down with `set_delay`.
#[derive(Clone)]
pub struct FakeEngine {
    frame: Arc<Mutex<GrayImage>>,
    camera_ok: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    describe_calls: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            frame: Arc::new(Mutex::new(face_image(0))),
            camera_ok: Arc::new(AtomicBool::new(true)),
            started: Arc::new(AtomicBool::new(false)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            describe_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_frame(&self, image: GrayImage) {
        *self.frame.lock().unwrap() = image;
    }

    pub fn fail_camera(&self) {
        self.camera_ok.store(false, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Describe requests received so far, counted when they arrive.
    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn describe(&self, image: &GrayImage) -> Option<FaceDescription> {
        let m = mean(image);
        if m < NO_FACE_BELOW {
            return None;
        }
        let (w, h) = image.dimensions();
        Some(FaceDescription {
            bbox: BoundingBox {
                x: w as f32 / 4.0,
                y: h as f32 / 4.0,
                width: w as f32 / 2.0,
                height: h as f32 / 2.0,
                confidence: 0.99,
                landmarks: None,
            },
            descriptor: Descriptor::new(vec![m / 50.0]),
        })
    }
}

impl FaceEngine for FakeEngine {
    async fn describe_single(&self, image: GrayImage) -> Result<Option<FaceDescription>, EngineError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.describe(&image))
    }

    async fn describe_all(&self, image: GrayImage) -> Result<Vec<FaceDescription>, EngineError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.describe(&image).into_iter().collect())
    }

    async fn start_capture(
        &self,
        device: String,
        _warmup_frames: usize,
    ) -> Result<CaptureInfo, EngineError> {
        if !self.camera_ok.load(Ordering::SeqCst) {
            return Err(EngineError::Camera(facematch_hw::CameraError::DeviceNotFound(device)));
        }
        let already_started = self.started.swap(true, Ordering::SeqCst);
        let (width, height) = self.frame.lock().unwrap().dimensions();
        Ok(CaptureInfo {
            device,
            width,
            height,
            already_started,
        })
    }

    async fn capture_frame(&self) -> Result<GrayImage, EngineError> {
        self.pause().await;
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::CameraNotStarted);
        }
        Ok(self.frame.lock().unwrap().clone())
    }
}
