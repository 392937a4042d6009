//! Error types shared by the image and mesh utilities.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`PrepError`].
pub type Result<T> = std::result::Result<T, PrepError>;

/// Errors raised by compositing, mesh cleanup and export.
#[derive(Error, Debug)]
pub enum PrepError {
    /// The mesh violates a structural invariant.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// A face references a vertex row that does not exist.
    #[error("face {face} references invalid vertex index {vertex} (mesh has {count} vertices)")]
    InvalidVertexIndex {
        face: usize,
        vertex: u32,
        count: usize,
    },

    /// Vertex colors left the [0, 1] range.
    #[error("vertex colors out of range: min={min}, max={max}")]
    ColorOutOfRange { min: f32, max: f32 },

    /// Two buffers that must agree in size do not.
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No pixel of the image passes the foreground alpha threshold.
    #[error("image has no foreground pixels (alpha > {threshold})")]
    EmptyForeground { threshold: u8 },

    /// File extension not handled by the loader or exporter.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    /// Malformed text mesh file.
    #[error("failed to parse {} at line {line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The mesh engine rejected the input or failed.
    #[error("mesh engine error: {0}")]
    Engine(String),

    /// Background removal was requested without the `rembg` feature.
    #[error("background removal is unavailable (build with the `rembg` feature)")]
    SegmentationUnavailable,

    /// The segmentation model produced an unusable output.
    #[error("segmentation failed: {0}")]
    Segmentation(String),

    #[cfg(feature = "rembg")]
    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PrepError {
    /// Create an engine error from any debuggable engine failure.
    pub fn engine<E: std::fmt::Debug>(context: &str, err: E) -> Self {
        PrepError::Engine(format!("{}: {:?}", context, err))
    }
}
