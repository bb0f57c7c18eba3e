//! facematch-hw: camera access for live capture.
//!
//! V4L2 capture with format negotiation and conversion of raw buffers to
//! grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
