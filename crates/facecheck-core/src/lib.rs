//! facecheck-core: face alignment, embedding, and verification engine.
//!
//! Uses YuNet for face detection and EdgeFace for face embeddings, both running
//! via ONNX Runtime for CPU inference. Alignment, tensor preparation, embedding
//! normalization, and the verification decision are pure Rust.

pub mod alignment;
pub mod detector;
pub mod embedding;
pub mod pipeline;
pub mod recognizer;
pub mod similarity;
pub mod tensor;
pub mod types;

pub use alignment::{align_face, AlignedFace, AlignmentError, SimilarityTransform};
pub use detector::{DetectorConfig, DetectorError, YuNetDetector};
pub use embedding::{normalize_embedding, Embedding, EmbeddingError, EMBEDDING_DIM};
pub use pipeline::{
    select_largest_face, DetectionOutcome, Detector, EmbeddingModel, EmbeddingOutcome,
    FaceEmbedding, FaceOutcome, ImageSlot, Pipeline, PipelineError, PipelineState, Stage,
    VerifyOutcome,
};
pub use recognizer::{EdgeFaceRecognizer, RecognizerError};
pub use similarity::{SimilarityEvaluator, Thresholds, Verdict};
pub use types::{ChannelOrder, FaceDetection, Image, Landmarks};

use std::path::PathBuf;

/// Pipeline over the ONNX-backed detector and recognizer.
pub type FacePipeline = Pipeline<YuNetDetector, EdgeFaceRecognizer>;

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back to
/// `~/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}
