use crate::models::ModelPaths;
use facematch_core::{FaceDescription, FaceDetector, FaceRecognizer};
use facematch_hw::Camera;
use image::GrayImage;
use std::future::Future;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] facematch_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] facematch_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] facematch_core::recognizer::RecognizerError),
    #[error("camera not started")]
    CameraNotStarted,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// The live camera, as reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// The camera was already attached; nothing was reopened.
    pub already_started: bool,
}

/// Face inference and capture, as seen by the controller and library builder.
pub trait FaceEngine: Clone + Send + Sync + 'static {
    /// Most confident face in `image` with its descriptor, or `None`.
    fn describe_single(
        &self,
        image: GrayImage,
    ) -> impl Future<Output = Result<Option<FaceDescription>, EngineError>> + Send;

    /// Every face in `image` with its descriptor.
    fn describe_all(
        &self,
        image: GrayImage,
    ) -> impl Future<Output = Result<Vec<FaceDescription>, EngineError>> + Send;

    /// Open the camera (once) and discard warmup frames.
    fn start_capture(
        &self,
        device: String,
        warmup_frames: usize,
    ) -> impl Future<Output = Result<CaptureInfo, EngineError>> + Send;

    /// Grab the current frame from the started camera.
    fn capture_frame(&self) -> impl Future<Output = Result<GrayImage, EngineError>> + Send;
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    DescribeSingle {
        image: GrayImage,
        reply: Reply<Option<FaceDescription>>,
    },
    DescribeAll {
        image: GrayImage,
        reply: Reply<Vec<FaceDescription>>,
    },
    StartCapture {
        device: String,
        warmup_frames: usize,
        reply: Reply<CaptureInfo>,
    },
    CaptureFrame {
        reply: Reply<GrayImage>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

impl FaceEngine for EngineHandle {
    async fn describe_single(&self, image: GrayImage) -> Result<Option<FaceDescription>, EngineError> {
        self.call(|reply| EngineRequest::DescribeSingle { image, reply }).await
    }

    async fn describe_all(&self, image: GrayImage) -> Result<Vec<FaceDescription>, EngineError> {
        self.call(|reply| EngineRequest::DescribeAll { image, reply }).await
    }

    async fn start_capture(
        &self,
        device: String,
        warmup_frames: usize,
    ) -> Result<CaptureInfo, EngineError> {
        self.call(|reply| EngineRequest::StartCapture {
            device,
            warmup_frames,
            reply,
        })
        .await
    }

    async fn capture_frame(&self) -> Result<GrayImage, EngineError> {
        self.call(|reply| EngineRequest::CaptureFrame { reply }).await
    }
}

/// State owned by the engine thread.
struct Worker {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    camera: Option<Camera>,
}

impl Worker {
    fn handle(&mut self, req: EngineRequest) {
        // A dropped receiver means the caller was cancelled; nothing to do.
        match req {
            EngineRequest::DescribeSingle { image, reply } => {
                let _ = reply.send(self.describe_single(&image));
            }
            EngineRequest::DescribeAll { image, reply } => {
                let _ = reply.send(self.describe_all(&image));
            }
            EngineRequest::StartCapture {
                device,
                warmup_frames,
                reply,
            } => {
                let _ = reply.send(self.start_capture(&device, warmup_frames));
            }
            EngineRequest::CaptureFrame { reply } => {
                let result = match &self.camera {
                    Some(camera) => camera
                        .capture_frame()
                        .map(|frame| frame.image)
                        .map_err(EngineError::from),
                    None => Err(EngineError::CameraNotStarted),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn describe_single(&mut self, image: &GrayImage) -> Result<Option<FaceDescription>, EngineError> {
        let Some(bbox) = self.detector.detect_single(image)? else {
            return Ok(None);
        };
        let descriptor = self.recognizer.describe(image, &bbox)?;
        tracing::debug!(confidence = bbox.confidence, "described single face");
        Ok(Some(FaceDescription { bbox, descriptor }))
    }

    fn describe_all(&mut self, image: &GrayImage) -> Result<Vec<FaceDescription>, EngineError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(count = faces.len(), "detected faces");

        faces
            .into_iter()
            .map(|bbox| -> Result<FaceDescription, EngineError> {
                let descriptor = self.recognizer.describe(image, &bbox)?;
                Ok(FaceDescription { bbox, descriptor })
            })
            .collect()
    }

    fn start_capture(&mut self, device: &str, warmup_frames: usize) -> Result<CaptureInfo, EngineError> {
        if let Some(camera) = &self.camera {
            return Ok(CaptureInfo {
                device: camera.device_path.clone(),
                width: camera.width,
                height: camera.height,
                already_started: true,
            });
        }

        let camera = Camera::open(device)?;
        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            camera.warm_up(warmup_frames)?;
        }

        let info = CaptureInfo {
            device: camera.device_path.clone(),
            width: camera.width,
            height: camera.height,
            already_started: false,
        };
        self.camera = Some(camera);
        Ok(info)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Both ONNX sessions are loaded before the thread starts, so a broken
/// model fails here rather than on the first request.
pub fn spawn_engine(models: &ModelPaths) -> Result<EngineHandle, EngineError> {
    let detector = FaceDetector::load(&models.detector)?;
    tracing::info!(path = %models.detector.display(), "SCRFD detector loaded");

    let recognizer = FaceRecognizer::load(&models.recognizer)?;
    tracing::info!(path = %models.recognizer.display(), "ArcFace recognizer loaded");

    let mut worker = Worker {
        detector,
        recognizer,
        camera: None,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
