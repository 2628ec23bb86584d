//! facegate-hw: V4L2 camera capture for the interactive enrollment loop.
//!
//! Opens a capture device, negotiates a grayscale-convertible pixel format
//! and streams [`Frame`]s.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
