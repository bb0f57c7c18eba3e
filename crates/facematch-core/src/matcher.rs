//! Nearest-label matching over face descriptors.
//!
//! Each label is scored by the mean Euclidean distance between the query and
//! every reference descriptor of that label. The closest label wins if its
//! distance is strictly below the threshold; otherwise the result is unknown.

use crate::types::Descriptor;
use serde::Serialize;
use std::fmt;

/// Default distance threshold for a positive match.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// Label shown for faces that match no reference set.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A person's label paired with the descriptors of their reference photos.
#[derive(Debug, Clone, Serialize)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

impl LabeledDescriptors {
    pub fn new(label: impl Into<String>, descriptors: Vec<Descriptor>) -> Self {
        Self {
            label: label.into(),
            descriptors,
        }
    }
}

/// Outcome of matching one query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// `None` when no label is within the threshold.
    pub label: Option<String>,
    pub distance: f32,
}

impl BestMatch {
    pub fn is_unknown(&self) -> bool {
        self.label.is_none()
    }

    pub fn label_or_unknown(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

impl fmt::Display for BestMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label_or_unknown(), self.distance)
    }
}

/// Matcher over a fixed collection of labeled descriptor sets.
///
/// Built wholesale from a library snapshot; never updated in place.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    sets: Vec<LabeledDescriptors>,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(sets: Vec<LabeledDescriptors>, threshold: f32) -> Self {
        Self { sets, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn labeled_descriptors(&self) -> &[LabeledDescriptors] {
        &self.sets
    }

    /// Find the closest label for `query`.
    ///
    /// Ties keep the label that appears first.
    pub fn find_best_match(&self, query: &Descriptor) -> BestMatch {
        let mut best: Option<(&str, f32)> = None;

        for set in &self.sets {
            let Some(distance) = mean_distance(query, &set.descriptors) else {
                continue;
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((set.label.as_str(), distance));
            }
        }

        match best {
            Some((label, distance)) if distance < self.threshold => BestMatch {
                label: Some(label.to_string()),
                distance,
            },
            Some((_, distance)) => BestMatch {
                label: None,
                distance,
            },
            None => BestMatch {
                label: None,
                distance: f32::INFINITY,
            },
        }
    }
}

fn mean_distance(query: &Descriptor, references: &[Descriptor]) -> Option<f32> {
    if references.is_empty() {
        return None;
    }
    let total: f32 = references.iter().map(|r| query.euclidean_distance(r)).sum();
    Some(total / references.len() as f32)
}
