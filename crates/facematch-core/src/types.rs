use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Rescale the box (and landmarks) from `from` pixel space into `to` pixel space.
    ///
    /// Used to map detections made on the captured frame onto the display surface.
    pub fn resized(&self, from: (u32, u32), to: (u32, u32)) -> BoundingBox {
        let sx = if from.0 > 0 { to.0 as f32 / from.0 as f32 } else { 1.0 };
        let sy = if from.1 > 0 { to.1 as f32 / from.1 as f32 } else { 1.0 };

        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }
}

/// Face descriptor: an L2-normalized ArcFace embedding (512 values).
///
/// Read-only once built; there is no API to modify the values in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Build a descriptor from raw model output, scaling it to unit length.
    pub fn l2_normalized(raw: Vec<f32>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face: its box (with landmarks) and its descriptor.
#[derive(Debug, Clone)]
pub struct FaceDescription {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}
