pub mod camera;
pub mod detector;
pub mod landmarker;
pub mod rgba_converter;
pub mod skeleton;

// Re-exports for convenience
pub use camera::{CameraStream, CaptureConfig, available_cameras, start_camera_stream};
pub use detector::{DetectorWorker, start_detector_worker};
pub use landmarker::LandmarkerBackend;
