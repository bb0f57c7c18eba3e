use crate::config::Config;
use crate::engine::{CaptureInfo, EngineError, FaceEngine};
use crate::library::{build_library, summarize, LabelSummary, LibraryError, LibraryStore};
use crate::storage::{Storage, StorageError};
use crate::upload::{self, DirectoryPicker, MSG_MISSING_INPUT, MSG_UPLOAD_FAILED, MSG_UPLOAD_OK};
use facematch_core::{BestMatch, BoundingBox, FaceMatcher, Overlay};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("no reference library loaded")]
    NoLibrary,
    #[error("camera not started")]
    CameraNotStarted,
    #[error("detection timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode overlay: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write overlay: {0}")]
    Overlay(#[source] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// One face found by a detection pass, in display coordinates.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub best: BestMatch,
}

#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub faces: Vec<DetectedFace>,
    pub display_size: (u32, u32),
    pub overlay_path: PathBuf,
}

/// What happened to an upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The form was incomplete or the folder name was refused.
    Invalid,
    /// Picking or writing failed; nothing was rebuilt.
    Failed,
    /// The photo was written. `rebuilt` is false when the rebuild failed
    /// and the previous matcher stayed live.
    Saved { path: PathBuf, rebuilt: bool },
}

/// Session state: the live matcher, the overlay surface and the camera.
pub struct Controller<E: FaceEngine> {
    engine: E,
    storage: Storage,
    store: LibraryStore,
    threshold: f32,
    matcher: Option<FaceMatcher>,
    overlay: Overlay,
    capture: Option<CaptureInfo>,
    camera_device: String,
    warmup_frames: usize,
    display_size: Option<(u32, u32)>,
    overlay_path: PathBuf,
    detect_timeout: Duration,
}

impl<E: FaceEngine> Controller<E> {
    pub fn new(engine: E, storage: Storage, config: &Config) -> Self {
        let store = LibraryStore::new(
            config.library.clone(),
            config.labels.clone(),
            config.samples_per_label,
        );
        let (w, h) = config.display_size.unwrap_or((0, 0));
        Self {
            engine,
            storage,
            store,
            threshold: config.distance_threshold,
            matcher: None,
            overlay: Overlay::new(w, h),
            capture: None,
            camera_device: config.camera_device.clone(),
            warmup_frames: config.warmup_frames,
            display_size: config.display_size,
            overlay_path: config.overlay_path.clone(),
            detect_timeout: config.detect_timeout,
        }
    }

    pub fn matcher(&self) -> Option<&FaceMatcher> {
        self.matcher.as_ref()
    }

    /// Replace the live matcher wholesale.
    pub fn set_matcher(&mut self, matcher: FaceMatcher) {
        self.matcher = Some(matcher);
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Build the reference library and swap in a new matcher.
    ///
    /// On failure the current matcher (if any) is left untouched.
    pub async fn rebuild_library(&mut self) -> Result<Vec<LabelSummary>, ControllerError> {
        let sets = build_library(&self.store, &self.storage, &self.engine).await?;
        let summary = summarize(&sets);
        self.set_matcher(FaceMatcher::new(sets, self.threshold));
        Ok(summary)
    }

    /// Attach the configured camera. Failures are logged and leave the
    /// camera unattached; a later call may try again.
    pub async fn start_capture(&mut self) -> Result<CaptureInfo, ControllerError> {
        match self
            .engine
            .start_capture(self.camera_device.clone(), self.warmup_frames)
            .await
        {
            Ok(info) => {
                if info.already_started {
                    tracing::info!(device = %info.device, "camera already started");
                } else {
                    tracing::info!(
                        device = %info.device,
                        width = info.width,
                        height = info.height,
                        "camera started"
                    );
                }
                self.capture = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                tracing::error!(device = %self.camera_device, error = %e, "failed to start camera");
                Err(e.into())
            }
        }
    }

    /// One detection pass over the current camera frame.
    pub async fn detect(&mut self) -> Result<DetectionReport, ControllerError> {
        let timeout = self.detect_timeout;
        tokio::time::timeout(timeout, self.detect_pass())
            .await
            .map_err(|_| ControllerError::Timeout(timeout))?
    }

    async fn detect_pass(&mut self) -> Result<DetectionReport, ControllerError> {
        let matcher = self.matcher.as_ref().ok_or(ControllerError::NoLibrary)?;
        if self.capture.is_none() {
            return Err(ControllerError::CameraNotStarted);
        }

        let frame = self.engine.capture_frame().await?;
        let frame_size = frame.dimensions();
        let faces = self.engine.describe_all(frame.clone()).await?;

        let display_size = self.display_size.unwrap_or(frame_size);
        self.overlay.prepare(display_size.0, display_size.1);

        let mut detected = Vec::with_capacity(faces.len());
        for face in faces {
            let bbox = face.bbox.resized(frame_size, display_size);
            let best = matcher.find_best_match(&face.descriptor);
            self.overlay.draw_box(&bbox, &best.to_string());
            detected.push(DetectedFace { bbox, best });
        }

        let mut png = Vec::new();
        self.overlay
            .composite(&frame)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
        self.storage
            .write_atomic(&self.overlay_path, &png)
            .await
            .map_err(ControllerError::Overlay)?;

        tracing::info!(
            faces = detected.len(),
            unknown = detected.iter().filter(|f| f.best.is_unknown()).count(),
            path = %self.overlay_path.display(),
            "detection pass complete"
        );

        Ok(DetectionReport {
            faces: detected,
            display_size,
            overlay_path: self.overlay_path.clone(),
        })
    }

    /// Name of the directory under the picked root that receives uploads:
    /// the active local library's own name, so the default root writes into it.
    pub fn library_dir_name(&self) -> String {
        self.store
            .local_root()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| upload::LIBRARY_DIR.to_string())
    }

    /// Directory offered by the picker: the parent of a local library.
    pub fn default_upload_root(&self) -> PathBuf {
        self.store
            .local_root()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Save an uploaded photo into the library and rebuild the matcher.
    pub async fn upload<P: DirectoryPicker>(
        &mut self,
        folder: &str,
        image: Option<&Path>,
        picker: &mut P,
    ) -> UploadOutcome {
        let form = match upload::validate(folder, image) {
            Ok(form) => form,
            Err(e) => {
                tracing::warn!(error = %e, "upload rejected");
                picker.notify(MSG_MISSING_INPUT);
                return UploadOutcome::Invalid;
            }
        };

        let library_dir = self.library_dir_name();
        let saved = match picker.pick_directory(&self.default_upload_root()).await {
            Ok(root) => upload::save_image(&self.storage, &root, &library_dir, &form)
                .await
                .map(|path| (root, path)),
            Err(e) => Err(e),
        };

        let (root, path) = match saved {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!(folder = %form.folder, error = %e, "error saving image");
                picker.notify(MSG_UPLOAD_FAILED);
                return UploadOutcome::Failed;
            }
        };
        picker.notify(MSG_UPLOAD_OK);

        if !self.is_active_library(&root.join(&library_dir)) {
            tracing::warn!(
                path = %path.display(),
                library = %self.store.location(),
                "uploaded photo is outside the active library and will not be matched"
            );
        }

        let rebuilt = match self.rebuild_library().await {
            Ok(summary) => {
                tracing::info!(labels = summary.len(), "matcher rebuilt after upload");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "library rebuild failed; keeping previous matcher");
                false
            }
        };

        UploadOutcome::Saved { path, rebuilt }
    }

    fn is_active_library(&self, dir: &Path) -> bool {
        let Some(root) = self.store.local_root() else {
            return false;
        };
        let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
        canonical(root) == canonical(dir)
    }

    /// Session state as JSON.
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "library": self.store.location().to_string(),
            "labels": self.matcher.as_ref().map(|m| summarize(m.labeled_descriptors())),
            "threshold": (f64::from(self.threshold) * 1000.0).round() / 1000.0,
            "camera": self.capture.as_ref().map(|c| serde_json::json!({
                "device": c.device,
                "width": c.width,
                "height": c.height,
            })),
            "overlay_path": self.overlay_path.display().to_string(),
        })
    }
}
