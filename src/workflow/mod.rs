//! ComfyUI workflow preparation for serverless submission.
pub mod ops;
pub mod payload;

pub use payload::{build_payload, load_any_workflow, load_input_image, load_workflow, InputImage};
