//! Where model bundles and reference photos live: an HTTP base or a local
//! directory, read with a timeout, written by temp-file-then-rename.

use reqwest::Url;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid location {0:?}: {1}")]
    InvalidLocation(String, String),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {timeout:?} accessing {target}")]
    Timeout { target: String, timeout: Duration },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A readable location: `http(s)://…` or a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Http(Url),
    Local(PathBuf),
}

impl Location {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| StorageError::InvalidLocation(raw.to_string(), e.to_string()))?;
            Ok(Self::Http(url))
        } else if raw.is_empty() {
            Err(StorageError::InvalidLocation(raw.to_string(), "empty".into()))
        } else {
            Ok(Self::Local(PathBuf::from(raw)))
        }
    }

    /// Append path segments. URL segments are percent-encoded.
    pub fn join(&self, segments: &[&str]) -> Result<Location, StorageError> {
        match self {
            Self::Http(url) => {
                let raw = url.to_string();
                let mut url = url.clone();
                url.path_segments_mut()
                    .map_err(|_| StorageError::InvalidLocation(raw, "cannot be a base".into()))?
                    .pop_if_empty()
                    .extend(segments);
                Ok(Self::Http(url))
            }
            Self::Local(dir) => Ok(Self::Local(
                segments.iter().fold(dir.clone(), |p, s| p.join(s)),
            )),
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Http(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Timed access to locations. Cheap to clone (shares the HTTP client).
#[derive(Clone)]
pub struct Storage {
    client: reqwest::Client,
    fetch_timeout: Duration,
    fs_timeout: Duration,
}

impl Storage {
    pub fn new(fetch_timeout: Duration, fs_timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("facematch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Http {
                url: String::new(),
                source: e,
            })?;
        Ok(Self {
            client,
            fetch_timeout,
            fs_timeout,
        })
    }

    /// Read the full contents of a location.
    pub async fn read(&self, location: &Location) -> Result<Vec<u8>, StorageError> {
        match location {
            Location::Http(url) => {
                with_timeout(self.fetch_timeout, url.as_str(), self.get(url)).await
            }
            Location::Local(path) => {
                let read = async {
                    tokio::fs::read(path)
                        .await
                        .map_err(|e| StorageError::io(path, e))
                };
                with_timeout(self.fs_timeout, &path.display().to_string(), read).await
            }
        }
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, StorageError> {
        let http_err = |source| StorageError::Http {
            url: url.to_string(),
            source,
        };

        tracing::debug!(%url, "GET");
        let response = self.client.get(url.clone()).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response.bytes().await.map_err(http_err)?;
        Ok(body.to_vec())
    }

    /// Write `bytes` to `path` atomically, creating parent directories.
    ///
    /// Data goes to a hidden temp file in the same directory, then is renamed
    /// over the destination, so readers see either the old file or the new one.
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        with_timeout(self.fs_timeout, &path.display().to_string(), write_atomic(path, bytes)).await
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    target: &str,
    fut: impl std::future::Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StorageError::Timeout {
            target: target.to_string(),
            timeout,
        })?
}

/// Temp file that is removed on drop unless the write completed, so a
/// cancelled or failed write leaves nothing behind.
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = TempFile::new(dir.join(format!(".{file_name}.tmp-{}", std::process::id())));

    tokio::fs::write(&tmp.path, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp.path, e))?;
    tokio::fs::rename(&tmp.path, path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    tmp.keep = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;

    fn storage() -> Storage {
        Storage::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_location() {
        assert!(matches!(
            Location::parse("http://127.0.0.1:5500/models").unwrap(),
            Location::Http(_)
        ));
        assert_eq!(
            Location::parse("library").unwrap(),
            Location::Local(PathBuf::from("library"))
        );
        assert!(Location::parse("").is_err());
    }

    #[test]
    fn test_join_http_encodes_segments() {
        let base = Location::parse("http://127.0.0.1:5500/library/").unwrap();
        let joined = base.join(&["Ayşe K", "1.jpg"]).unwrap();
        assert_eq!(
            joined.to_string(),
            "http://127.0.0.1:5500/library/Ay%C5%9Fe%20K/1.jpg"
        );
    }

    #[test]
    fn test_join_local() {
        let base = Location::Local(PathBuf::from("/srv/library"));
        let joined = base.join(&["Cihan", "2.jpg"]).unwrap();
        assert_eq!(joined, Location::Local(PathBuf::from("/srv/library/Cihan/2.jpg")));
    }

    #[tokio::test]
    async fn test_write_atomic_then_read() {
        let dir = scratch_dir("storage-write");
        let path = dir.join("nested/deeper/photo.jpg");
        let storage = storage();

        storage.write_atomic(&path, b"first").await.unwrap();
        storage.write_atomic(&path, b"second").await.unwrap();

        let bytes = storage.read(&Location::Local(path.clone())).await.unwrap();
        assert_eq!(bytes, b"second");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_local_file() {
        let dir = scratch_dir("storage-missing");
        let err = storage()
            .read(&Location::Local(dir.join("absent.jpg")))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = scratch_dir("storage-rename");
        // A non-empty directory cannot be replaced by a file
        std::fs::create_dir_all(dir.join("taken/inner")).unwrap();

        let err = storage()
            .write_atomic(&dir.join("taken"), b"bytes")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["taken"]);
    }

    #[test]
    fn test_unfinished_temp_file_removed_on_drop() {
        let dir = scratch_dir("storage-tempfile");
        let partial = dir.join(".photo.jpg.tmp-1");
        std::fs::write(&partial, b"half").unwrap();
        drop(TempFile::new(partial.clone()));
        assert!(!partial.exists());

        let done = dir.join(".done.jpg.tmp-1");
        std::fs::write(&done, b"whole").unwrap();
        let mut tmp = TempFile::new(done.clone());
        tmp.keep = true;
        drop(tmp);
        assert!(done.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_operation_times_out() {
        let stalled = std::future::pending::<Result<(), StorageError>>();
        let err = with_timeout(Duration::from_secs(10), "library/Ada/1.jpg", stalled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Timeout { ref target, timeout }
                if target == "library/Ada/1.jpg" && timeout == Duration::from_secs(10)
        ));
    }

    #[tokio::test]
    async fn test_unresponsive_server_hits_fetch_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let storage = Storage::new(Duration::from_millis(200), Duration::from_secs(5)).unwrap();
        let location = Location::parse(&format!("http://{addr}/models/det_10g.onnx")).unwrap();
        let err = storage.read(&location).await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout { .. }), "unexpected error: {err}");
    }
}
