pub mod bounding_box;
pub mod category;
pub mod clock;
pub mod constants;
pub mod frame;
pub mod model_resolver;
pub mod onnx_session;

/// Error type at trait seams where implementations bring their own errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
