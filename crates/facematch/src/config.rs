use crate::storage::{Location, StorageError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5500";
const DEFAULT_LIBRARY: &str = "library";
const DEFAULT_LABELS: [&str; 7] = ["Cihan", "Gokhan", "Guray", "Orhan", "Ferdi", "Yasin", "Yesim"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
    #[error(transparent)]
    Location(#[from] StorageError),
}

/// Optional settings from the TOML config file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub model_source: Option<String>,
    pub model_cache_dir: Option<PathBuf>,
    pub library: Option<String>,
    pub labels: Option<Vec<String>>,
    pub samples_per_label: Option<usize>,
    pub distance_threshold: Option<f32>,
    pub camera_device: Option<String>,
    pub warmup_frames: Option<usize>,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub overlay_path: Option<PathBuf>,
    pub fetch_timeout_secs: Option<u64>,
    pub fs_timeout_secs: Option<u64>,
    pub detect_timeout_secs: Option<u64>,
}

/// Resolved configuration: file values, overridden by `FACEMATCH_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where model bundles are fetched from (`<base_url>/models` by default).
    pub model_source: Location,
    /// Directory that receives downloaded model bundles.
    pub model_cache_dir: PathBuf,
    /// Reference library: read by the builder, written by uploads when local.
    pub library: Location,
    /// Labels expected in the library, in match order.
    pub labels: Vec<String>,
    /// Samples fetched per label from an HTTP library (`1.jpg` … `N.jpg`).
    pub samples_per_label: usize,
    /// Euclidean distance below which a face matches a label.
    pub distance_threshold: f32,
    /// V4L2 device path opened by `start`.
    pub camera_device: String,
    /// Frames discarded after the camera opens.
    pub warmup_frames: usize,
    /// Overlay size; `None` follows the captured frame size.
    pub display_size: Option<(u32, u32)>,
    /// PNG written after every detection pass.
    pub overlay_path: PathBuf,
    pub fetch_timeout: Duration,
    pub fs_timeout: Duration,
    pub detect_timeout: Duration,
}

impl Config {
    /// Load the config file (explicit path, `FACEMATCH_CONFIG`, or the XDG
    /// default) and apply environment overrides.
    ///
    /// A missing file at the default location is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("FACEMATCH_CONFIG").ok().map(PathBuf::from);
        let (path, required) = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => (path, true),
            None => (default_config_path(), false),
        };

        let file = match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "reading config file");
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge file values with overrides from `env` and fill in defaults.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let string = |key: &str, from_file: Option<String>| env(key).or(from_file);

        let base_url = string("FACEMATCH_BASE_URL", file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim_end_matches('/');

        let model_source = match string("FACEMATCH_MODEL_SOURCE", file.model_source) {
            Some(raw) => Location::parse(&raw)?,
            None => Location::parse(&format!("{base_url}/models"))?,
        };

        let model_cache_dir = env("FACEMATCH_MODEL_CACHE_DIR")
            .map(PathBuf::from)
            .or(file.model_cache_dir)
            .unwrap_or_else(|| data_dir().join("models"));

        let library = Location::parse(
            &string("FACEMATCH_LIBRARY", file.library).unwrap_or_else(|| DEFAULT_LIBRARY.into()),
        )?;

        let labels = match env("FACEMATCH_LABELS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            None => file
                .labels
                .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()),
        };

        let display_width = parsed(&env, "FACEMATCH_DISPLAY_WIDTH", file.display_width)?;
        let display_height = parsed(&env, "FACEMATCH_DISPLAY_HEIGHT", file.display_height)?;
        let display_size = match (display_width, display_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            (None, None) => None,
            (w, h) => {
                return Err(ConfigError::Invalid {
                    key: "display_width/display_height".into(),
                    value: format!("{w:?}x{h:?}"),
                })
            }
        };

        let distance_threshold =
            parsed(&env, "FACEMATCH_DISTANCE_THRESHOLD", file.distance_threshold)?
                .unwrap_or(facematch_core::DEFAULT_DISTANCE_THRESHOLD);
        if !(distance_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "distance_threshold".into(),
                value: distance_threshold.to_string(),
            });
        }

        let samples_per_label =
            parsed(&env, "FACEMATCH_SAMPLES_PER_LABEL", file.samples_per_label)?.unwrap_or(3);
        if samples_per_label == 0 {
            return Err(ConfigError::Invalid {
                key: "samples_per_label".into(),
                value: samples_per_label.to_string(),
            });
        }

        let secs = |key: &str, from_file: Option<u64>, default: u64| -> Result<Duration, ConfigError> {
            Ok(Duration::from_secs(parsed(&env, key, from_file)?.unwrap_or(default)))
        };

        Ok(Self {
            model_source,
            model_cache_dir,
            library,
            labels,
            samples_per_label,
            distance_threshold,
            camera_device: string("FACEMATCH_CAMERA_DEVICE", file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            warmup_frames: parsed(&env, "FACEMATCH_WARMUP_FRAMES", file.warmup_frames)?.unwrap_or(4),
            display_size,
            overlay_path: env("FACEMATCH_OVERLAY_PATH")
                .map(PathBuf::from)
                .or(file.overlay_path)
                .unwrap_or_else(|| PathBuf::from("overlay.png")),
            fetch_timeout: secs("FACEMATCH_FETCH_TIMEOUT_SECS", file.fetch_timeout_secs, 30)?,
            fs_timeout: secs("FACEMATCH_FS_TIMEOUT_SECS", file.fs_timeout_secs, 10)?,
            detect_timeout: secs("FACEMATCH_DETECT_TIMEOUT_SECS", file.detect_timeout_secs, 10)?,
        })
    }
}

/// Environment value parsed as `T` if set, else the file value.
fn parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    from_file: Option<T>,
) -> Result<Option<T>, ConfigError> {
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(from_file),
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("facematch")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("facematch/config.toml")
}
