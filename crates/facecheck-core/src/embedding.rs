//! L2 normalization of raw embedding model output.

use thiserror::Error;

/// Embedding dimension produced by the EdgeFace model.
pub const EMBEDDING_DIM: usize = 512;

/// Accepted deviation of a normalized embedding's norm from 1.0.
const UNIT_NORM_TOLERANCE: f32 = 1e-4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding has zero norm")]
    ZeroNormEmbedding,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("expected {expected}-dim embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding is not unit-norm (norm {norm})")]
    NotNormalized { norm: f32 },
}

/// A unit-norm face embedding of length [`EMBEDDING_DIM`].
///
/// Only [`normalize_embedding`] and [`Embedding::from_normalized`] construct one,
/// so every value reaching the similarity evaluator is comparable.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
    /// Model that produced this embedding (e.g., "edgeface_xxs").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Accept an already normalized vector.
    ///
    /// Fails with [`EmbeddingError::NotNormalized`] when the norm is off by more
    /// than the unit-norm tolerance; the vector is never rescaled.
    pub fn from_normalized(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        check_dim(&values)?;
        let norm = l2_norm(&values);
        if !norm.is_finite() {
            return Err(EmbeddingError::NonFinite);
        }
        if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(EmbeddingError::NotNormalized { norm });
        }
        Ok(Self { values, model_version: None })
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Cosine similarity. Both vectors are unit-norm, so this is the dot product.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl std::ops::Neg for &Embedding {
    type Output = Embedding;

    fn neg(self) -> Embedding {
        Embedding {
            values: self.values.iter().map(|v| -v).collect(),
            model_version: self.model_version.clone(),
        }
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn check_dim(values: &[f32]) -> Result<(), EmbeddingError> {
    if values.len() != EMBEDDING_DIM {
        return Err(EmbeddingError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: values.len(),
        });
    }
    Ok(())
}

/// Divide every component by the vector's L2 norm.
pub fn normalize_embedding(raw: Vec<f32>) -> Result<Embedding, EmbeddingError> {
    check_dim(&raw)?;
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }

    let norm = l2_norm(&raw);
    if norm == 0.0 {
        return Err(EmbeddingError::ZeroNormEmbedding);
    }
    if !norm.is_finite() {
        return Err(EmbeddingError::NonFinite);
    }

    let values = raw.into_iter().map(|x| x / norm).collect();
    Ok(Embedding { values, model_version: None })
}
