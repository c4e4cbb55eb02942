//! EdgeFace embedding model via ONNX Runtime.
//!
//! Maps a normalized `[1, 3, 112, 112]` RGB face tensor to a raw 512-dimensional
//! embedding. Normalization of the output happens in [`crate::embedding`].

use crate::pipeline::EmbeddingModel;
use crate::types::ChannelOrder;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// EdgeFace-based face recognizer.
pub struct EdgeFaceRecognizer {
    session: Session,
    model_version: String,
}

impl EdgeFaceRecognizer {
    /// Load the EdgeFace ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, RecognizerError> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded EdgeFace model"
        );

        let model_version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "edgeface".to_string());

        Ok(Self { session, model_version })
    }
}

impl EmbeddingModel for EdgeFaceRecognizer {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    fn model_version(&self) -> Option<&str> {
        Some(&self.model_version)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, RecognizerError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(RecognizerError::InferenceFailed("model returned an empty tensor".into()));
        }
        Ok(raw.to_vec())
    }
}
