//! Reference library: one labeled descriptor set per person, built from the
//! sample photos in the library location.
//!
//! The build is all-or-nothing. A sample without a detectable face, a
//! missing label folder or an unreadable photo fails the whole build and no
//! partial set is returned.

use crate::engine::{EngineError, FaceEngine};
use crate::storage::{Location, Storage, StorageError};
use facematch_core::LabeledDescriptors;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinSet;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("no sample photos for {label}")]
    NoSamples { label: String },
    #[error("no face detected in {label}/{sample}")]
    NoFace { label: String, sample: String },
    #[error("failed to load {label}/{sample}: {source}")]
    Storage {
        label: String,
        sample: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to decode {label}/{sample}: {source}")]
    Decode {
        label: String,
        sample: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("library task failed: {0}")]
    Task(String),
}

/// One sample photo of one label.
#[derive(Debug, Clone)]
struct Sample {
    name: String,
    location: Location,
}

/// Everything to load for one label.
#[derive(Debug, Clone)]
struct LabelPlan {
    label: String,
    samples: Vec<Sample>,
}

/// Per-label descriptor counts, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelSummary {
    pub label: String,
    pub descriptors: usize,
}

pub fn summarize(sets: &[LabeledDescriptors]) -> Vec<LabelSummary> {
    sets.iter()
        .map(|s| LabelSummary {
            label: s.label.clone(),
            descriptors: s.descriptors.len(),
        })
        .collect()
}

/// The configured library location and the labels expected in it.
#[derive(Debug, Clone)]
pub struct LibraryStore {
    location: Location,
    labels: Vec<String>,
    samples_per_label: usize,
}

impl LibraryStore {
    pub fn new(location: Location, labels: Vec<String>, samples_per_label: usize) -> Self {
        Self {
            location,
            labels,
            samples_per_label,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Directory of a local library, `None` for an HTTP library.
    pub fn local_root(&self) -> Option<&Path> {
        self.location.as_local()
    }

    /// Resolve labels and sample locations.
    ///
    /// HTTP: the configured labels, each with `1.jpg` … `N.jpg`.
    /// Local: configured labels first, then any other folders by name; each
    /// folder's image files by name.
    async fn plan(&self) -> Result<Vec<LabelPlan>, LibraryError> {
        match &self.location {
            Location::Http(_) => self
                .labels
                .iter()
                .map(|label| -> Result<LabelPlan, LibraryError> {
                    let samples = (1..=self.samples_per_label)
                        .map(|i| -> Result<Sample, LibraryError> {
                            let name = format!("{i}.jpg");
                            let location = self
                                .location
                                .join(&[label.as_str(), name.as_str()])
                                .map_err(|source| LibraryError::Storage {
                                    label: label.clone(),
                                    sample: name.clone(),
                                    source,
                                })?;
                            Ok(Sample { name, location })
                        })
                        .collect::<Result<Vec<_>, LibraryError>>()?;
                    Ok(LabelPlan {
                        label: label.clone(),
                        samples,
                    })
                })
                .collect(),
            Location::Local(root) => {
                let mut labels = self.labels.clone();
                for folder in list_entries(root, true).await? {
                    if !labels.contains(&folder) {
                        labels.push(folder);
                    }
                }

                let mut plans = Vec::with_capacity(labels.len());
                for label in labels {
                    let dir = root.join(&label);
                    let names = if dir.is_dir() {
                        list_entries(&dir, false).await?
                    } else {
                        Vec::new()
                    };
                    let samples: Vec<Sample> = names
                        .into_iter()
                        .filter(|n| is_image_name(n))
                        .map(|name| Sample {
                            location: Location::Local(dir.join(&name)),
                            name,
                        })
                        .collect();
                    if samples.is_empty() {
                        return Err(LibraryError::NoSamples { label });
                    }
                    plans.push(LabelPlan { label, samples });
                }
                Ok(plans)
            }
        }
    }
}

/// Sorted names of the visible subfolders (`dirs`) or files in `path`.
async fn list_entries(path: &Path, dirs: bool) -> Result<Vec<String>, LibraryError> {
    let list_err = |source| LibraryError::List {
        path: path.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await.map_err(list_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type().await.map_err(list_err)?.is_dir();
        if is_dir == dirs {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|x| ext.eq_ignore_ascii_case(x)))
}

/// Build one labeled descriptor set per label.
///
/// Labels run concurrently; each label's samples run in order. The first
/// failure aborts the remaining labels, and so does dropping the returned
/// future.
pub async fn build_library<E: FaceEngine>(
    store: &LibraryStore,
    storage: &Storage,
    engine: &E,
) -> Result<Vec<LabeledDescriptors>, LibraryError> {
    let plans = store.plan().await?;
    tracing::info!(
        location = %store.location(),
        labels = plans.len(),
        "building reference library"
    );

    // Dropping the set (on error or when the caller is cancelled) aborts
    // every label task still running.
    let mut tasks = JoinSet::new();
    let label_count = plans.len();
    for (index, plan) in plans.into_iter().enumerate() {
        let storage = storage.clone();
        let engine = engine.clone();
        tasks.spawn(async move { (index, describe_label(plan, &storage, &engine).await) });
    }

    let mut slots: Vec<Option<LabeledDescriptors>> = (0..label_count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined.map_err(|e| LibraryError::Task(e.to_string()))?;
        slots[index] = Some(result?);
    }
    let sets: Vec<LabeledDescriptors> = slots.into_iter().flatten().collect();

    tracing::info!(labels = sets.len(), "reference library ready");
    Ok(sets)
}

async fn describe_label<E: FaceEngine>(
    plan: LabelPlan,
    storage: &Storage,
    engine: &E,
) -> Result<LabeledDescriptors, LibraryError> {
    let mut descriptors = Vec::with_capacity(plan.samples.len());

    for sample in plan.samples {
        let bytes = storage
            .read(&sample.location)
            .await
            .map_err(|source| LibraryError::Storage {
                label: plan.label.clone(),
                sample: sample.name.clone(),
                source,
            })?;
        let image = image::load_from_memory(&bytes)
            .map_err(|source| LibraryError::Decode {
                label: plan.label.clone(),
                sample: sample.name.clone(),
                source,
            })?
            .to_luma8();

        let face = engine
            .describe_single(image)
            .await?
            .ok_or_else(|| LibraryError::NoFace {
                label: plan.label.clone(),
                sample: sample.name.clone(),
            })?;

        tracing::debug!(label = %plan.label, sample = %sample.name, "sample described");
        descriptors.push(face.descriptor);
    }

    Ok(LabeledDescriptors::new(plan.label, descriptors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_dir, write_sample, FakeEngine};
    use std::time::Duration;

    const SEVEN: [&str; 7] = ["Cihan", "Gokhan", "Guray", "Orhan", "Ferdi", "Yasin", "Yesim"];

    fn storage() -> Storage {
        Storage::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn seven_label_library(name: &str) -> PathBuf {
        let dir = scratch_dir(name);
        for (i, label) in SEVEN.iter().enumerate() {
            for n in 1..=3 {
                write_sample(&dir, label, &format!("{n}.jpg"), 40 + 25 * i as u8);
            }
        }
        dir
    }

    #[tokio::test]
    async fn test_builds_one_set_per_label_with_three_descriptors() {
        let dir = seven_label_library("library-seven");
        let store = LibraryStore::new(Location::Local(dir), labels(&SEVEN), 3);
        let engine = FakeEngine::new();

        let sets = build_library(&store, &storage(), &engine).await.unwrap();

        assert_eq!(sets.len(), 7);
        for (set, expected) in sets.iter().zip(SEVEN) {
            assert_eq!(set.label, expected);
            assert_eq!(set.descriptors.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_one_faceless_sample_fails_the_build() {
        let dir = seven_label_library("library-faceless");
        // Overwrite one of the 21 samples with a black image
        write_sample(&dir, "Orhan", "2.jpg", 0);
        let store = LibraryStore::new(Location::Local(dir), labels(&SEVEN), 3);

        let err = build_library(&store, &storage(), &FakeEngine::new())
            .await
            .unwrap_err();

        assert!(
            matches!(&err, LibraryError::NoFace { label, sample } if label == "Orhan" && sample == "2.jpg"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_dropped_build_stops_describing() {
        let dir = seven_label_library("library-dropped");
        let store = LibraryStore::new(Location::Local(dir), labels(&SEVEN), 3);
        let engine = FakeEngine::new();
        engine.set_delay(Duration::from_millis(50));

        let outcome = tokio::time::timeout(
            Duration::from_millis(60),
            build_library(&store, &storage(), &engine),
        )
        .await;
        assert!(outcome.is_err(), "build finished before the deadline");

        let at_cancel = engine.describe_calls();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.describe_calls(), at_cancel);
        assert!(at_cancel < 21);
    }

    #[tokio::test]
    async fn test_failing_label_aborts_the_others() {
        let dir = seven_label_library("library-abort");
        write_sample(&dir, "Cihan", "1.jpg", 0);
        let store = LibraryStore::new(Location::Local(dir), labels(&SEVEN), 3);
        let engine = FakeEngine::new();
        engine.set_delay(Duration::from_millis(20));

        let err = build_library(&store, &storage(), &engine).await.unwrap_err();
        assert!(matches!(err, LibraryError::NoFace { ref label, .. } if label == "Cihan"));

        let at_failure = engine.describe_calls();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.describe_calls(), at_failure);
        assert!(at_failure < 21);
    }

    #[tokio::test]
    async fn test_missing_configured_label_fails() {
        let dir = scratch_dir("library-missing-label");
        write_sample(&dir, "Ada", "1.jpg", 100);
        let store = LibraryStore::new(Location::Local(dir), labels(&["Ada", "Grace"]), 3);

        let err = build_library(&store, &storage(), &FakeEngine::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::NoSamples { label } if label == "Grace"));
    }

    #[tokio::test]
    async fn test_local_discovers_extra_folders_and_skips_non_images() {
        let dir = scratch_dir("library-discover");
        write_sample(&dir, "Ada", "1.jpg", 100);
        write_sample(&dir, "Zed", "b.png", 120);
        write_sample(&dir, "Zed", "a.JPG", 140);
        std::fs::write(dir.join("Zed/notes.txt"), b"not a photo").unwrap();
        std::fs::write(dir.join("Zed/.a.JPG.tmp-1"), b"partial").unwrap();
        write_sample(&dir, "Bob", "1.jpg", 160);

        let store = LibraryStore::new(Location::Local(dir), labels(&["Zed"]), 3);
        let sets = build_library(&store, &storage(), &FakeEngine::new()).await.unwrap();

        let summary = summarize(&sets);
        assert_eq!(
            summary,
            vec![
                LabelSummary { label: "Zed".into(), descriptors: 2 },
                LabelSummary { label: "Ada".into(), descriptors: 1 },
                LabelSummary { label: "Bob".into(), descriptors: 1 },
            ]
        );
        // Samples are read in name order: a.JPG (140) before b.png (120)
        assert!((sets[0].descriptors[0].as_slice()[0] - 140.0 / 50.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_http_plan_uses_numbered_samples() {
        let location = Location::parse("http://127.0.0.1:5500/library").unwrap();
        let store = LibraryStore::new(location, labels(&["Cihan", "Yesim"]), 3);

        let plans = store.plan().await.unwrap();
        assert_eq!(plans.len(), 2);
        let urls: Vec<String> = plans[1].samples.iter().map(|s| s.location.to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "http://127.0.0.1:5500/library/Yesim/1.jpg",
                "http://127.0.0.1:5500/library/Yesim/2.jpg",
                "http://127.0.0.1:5500/library/Yesim/3.jpg",
            ]
        );
    }

    #[test]
    fn test_is_image_name() {
        assert!(is_image_name("1.jpg"));
        assert!(is_image_name("portrait.JPEG"));
        assert!(is_image_name("x.png"));
        assert!(!is_image_name("notes.txt"));
        assert!(!is_image_name("jpg"));
    }
}
