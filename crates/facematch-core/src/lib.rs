//! facematch-core: face detection, description and matching.
//!
//! SCRFD finds faces and landmarks, ArcFace turns aligned crops into
//! descriptors, both via ONNX Runtime on the CPU. `FaceMatcher` labels
//! descriptors against a reference library and `Overlay` draws the result.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use annotate::Overlay;
pub use detector::FaceDetector;
pub use matcher::{BestMatch, FaceMatcher, LabeledDescriptors, DEFAULT_DISTANCE_THRESHOLD};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Descriptor, FaceDescription};
