//! Upload flow: validate the form, pick a root directory, copy the photo to
//! `<root>/<library dir>/<folder>/<file name>`.

use crate::storage::{Location, Storage, StorageError};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const MSG_MISSING_INPUT: &str = "Please provide a folder name and select an image.";
pub const MSG_UPLOAD_OK: &str = "Image uploaded successfully";
pub const MSG_UPLOAD_FAILED: &str = "Error saving image. Please try again.";

/// Library directory name used when the active library is not local.
pub const LIBRARY_DIR: &str = "library";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("folder name and image are required")]
    MissingInput,
    #[error("invalid folder name {0:?}")]
    InvalidFolderName(String),
    #[error("image {0} has no file name")]
    NoFileName(PathBuf),
    #[error("directory selection cancelled")]
    Cancelled,
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("prompt failed: {0}")]
    Prompt(#[source] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A form that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidUpload {
    pub folder: String,
    pub image: PathBuf,
    pub file_name: String,
}

/// Interactive side of an upload: where to write, and what to tell the user.
#[allow(async_fn_in_trait)]
pub trait DirectoryPicker {
    /// Root directory to write under. `default` is offered to the user.
    async fn pick_directory(&mut self, default: &Path) -> Result<PathBuf, UploadError>;

    /// Show a user-facing message.
    fn notify(&mut self, message: &str);
}

/// Check the form fields. Nothing is touched on disk.
pub fn validate(folder: &str, image: Option<&Path>) -> Result<ValidUpload, UploadError> {
    let folder = folder.trim();
    let image = match image {
        Some(p) if !p.as_os_str().is_empty() && !folder.is_empty() => p,
        _ => return Err(UploadError::MissingInput),
    };

    let mut components = Path::new(folder).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || folder.contains(['/', '\\']) {
        return Err(UploadError::InvalidFolderName(folder.to_string()));
    }

    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| UploadError::NoFileName(image.to_path_buf()))?;

    Ok(ValidUpload {
        folder: folder.to_string(),
        image: image.to_path_buf(),
        file_name,
    })
}

/// Destination of a validated upload under `root`.
pub fn destination(root: &Path, library_dir: &str, upload: &ValidUpload) -> PathBuf {
    root.join(library_dir)
        .join(&upload.folder)
        .join(&upload.file_name)
}

/// Copy the photo into place, replacing a file of the same name.
pub async fn save_image(
    storage: &Storage,
    root: &Path,
    library_dir: &str,
    upload: &ValidUpload,
) -> Result<PathBuf, UploadError> {
    if !tokio::fs::metadata(root)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(UploadError::NotADirectory(root.to_path_buf()));
    }

    let bytes = storage
        .read(&Location::Local(upload.image.clone()))
        .await?;
    let dest = destination(root, library_dir, upload);
    storage.write_atomic(&dest, &bytes).await?;

    tracing::info!(
        folder = %upload.folder,
        file = %upload.file_name,
        bytes = bytes.len(),
        path = %dest.display(),
        "image saved"
    );
    Ok(dest)
}
