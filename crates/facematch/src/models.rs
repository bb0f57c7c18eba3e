//! Model loader: fetch every ONNX bundle before anything else runs.

use crate::storage::{Location, Storage, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What a model bundle is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    FaceDetection,
    FaceLandmarks,
    FaceRecognition,
}

/// One file under the model source and the roles it serves.
#[derive(Debug, Clone, Copy)]
pub struct ModelBundle {
    pub file: &'static str,
    pub roles: &'static [ModelRole],
}

/// SCRFD regresses the five landmarks alongside each box, so one bundle
/// covers detection and landmarks.
pub const DETECTOR_BUNDLE: ModelBundle = ModelBundle {
    file: "det_10g.onnx",
    roles: &[ModelRole::FaceDetection, ModelRole::FaceLandmarks],
};

pub const RECOGNIZER_BUNDLE: ModelBundle = ModelBundle {
    file: "w600k_r50.onnx",
    roles: &[ModelRole::FaceRecognition],
};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to fetch model {file}: {source}")]
    Fetch {
        file: &'static str,
        #[source]
        source: StorageError,
    },
    #[error("model {file} not found at {path}")]
    Missing { file: &'static str, path: PathBuf },
}

/// Local paths of the loaded bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

/// Make every bundle available on local disk.
///
/// A local source is used in place. An HTTP source is downloaded into
/// `cache_dir` (both bundles concurrently). No retries: the first failure
/// is returned.
pub async fn fetch_models(
    source: &Location,
    cache_dir: &Path,
    storage: &Storage,
) -> Result<ModelPaths, ModelError> {
    tracing::info!(%source, "loading models");

    let (detector, recognizer) = tokio::try_join!(
        fetch_bundle(DETECTOR_BUNDLE, source, cache_dir, storage),
        fetch_bundle(RECOGNIZER_BUNDLE, source, cache_dir, storage),
    )?;

    Ok(ModelPaths {
        detector,
        recognizer,
    })
}

async fn fetch_bundle(
    bundle: ModelBundle,
    source: &Location,
    cache_dir: &Path,
    storage: &Storage,
) -> Result<PathBuf, ModelError> {
    let fetch_err = |source| ModelError::Fetch {
        file: bundle.file,
        source,
    };

    match source.join(&[bundle.file]).map_err(fetch_err)? {
        Location::Local(path) => {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(ModelError::Missing {
                    file: bundle.file,
                    path,
                });
            }
            tracing::debug!(file = bundle.file, path = %path.display(), "using local model");
            Ok(path)
        }
        remote @ Location::Http(_) => {
            let bytes = storage.read(&remote).await.map_err(fetch_err)?;
            let path = cache_dir.join(bundle.file);
            storage
                .write_atomic(&path, &bytes)
                .await
                .map_err(fetch_err)?;
            tracing::info!(
                file = bundle.file,
                roles = ?bundle.roles,
                bytes = bytes.len(),
                path = %path.display(),
                "model downloaded"
            );
            Ok(path)
        }
    }
}
