//! Per-request orchestration: detect → align → normalize → embed → post-process,
//! for one image or a verification pair.

use crate::alignment::{self, AlignmentError};
use crate::detector::DetectorError;
use crate::embedding::{normalize_embedding, Embedding, EmbeddingError};
use crate::recognizer::RecognizerError;
use crate::similarity::{SimilarityEvaluator, Thresholds, Verdict};
use crate::tensor::{self, TensorError};
use crate::types::{ChannelOrder, FaceDetection, Image};
use ndarray::Array4;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A face detector. Returns every candidate face, possibly none.
pub trait Detector {
    /// Run detection with the detector configured for `input_size` (width, height).
    fn detect(
        &mut self,
        image: &Image,
        input_size: (u32, u32),
    ) -> Result<Vec<FaceDetection>, DetectorError>;
}

/// A face embedding model mapping a `[1, 3, 112, 112]` tensor to a raw vector.
pub trait EmbeddingModel {
    /// Channel order the model was trained on.
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Identifier attached to produced embeddings.
    fn model_version(&self) -> Option<&str> {
        None
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, RecognizerError>;
}

/// Pipeline stages that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detecting,
    Aligning,
    Normalizing,
    Embedding,
    PostProcessing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detecting => "detecting",
            Stage::Aligning => "aligning",
            Stage::Normalizing => "normalizing",
            Stage::Embedding => "embedding",
            Stage::PostProcessing => "post-processing",
        };
        f.write_str(name)
    }
}

/// Per-request state. `NoFaceFound`, `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Detecting,
    NoFaceFound,
    Detected,
    Aligning,
    Normalizing,
    Embedding,
    PostProcessing,
    Done,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoFaceFound | Self::Done | Self::Failed(_))
    }
}

/// Which image of a verification pair an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageSlot {
    #[serde(rename = "image1")]
    First,
    #[serde(rename = "image2")]
    Second,
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageSlot::First => "image1",
            ImageSlot::Second => "image2",
        })
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("alignment error: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("{image}: {source}")]
    InImage {
        image: ImageSlot,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Stage that produced the failure.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Detector(_) => Stage::Detecting,
            Self::Alignment(_) => Stage::Aligning,
            Self::Tensor(_) => Stage::Normalizing,
            Self::Recognizer(_) => Stage::Embedding,
            Self::Embedding(_) => Stage::PostProcessing,
            Self::InImage { source, .. } => source.stage(),
        }
    }

    /// Terminal state of the request that returned this error.
    pub fn state(&self) -> PipelineState {
        PipelineState::Failed(self.stage())
    }

    /// Image of a verification pair that failed, if tagged.
    pub fn image(&self) -> Option<ImageSlot> {
        match self {
            Self::InImage { image, .. } => Some(*image),
            _ => None,
        }
    }

    fn in_image(self, image: ImageSlot) -> Self {
        Self::InImage { image, source: Box::new(self) }
    }
}

/// Either a value for the selected face, or no face in the image.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome<T> {
    Found(T),
    NoFaceFound,
}

impl<T> FaceOutcome<T> {
    /// Terminal state of the request that produced this outcome.
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Found(_) => PipelineState::Done,
            Self::NoFaceFound => PipelineState::NoFaceFound,
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(v) => Some(v),
            Self::NoFaceFound => None,
        }
    }
}

pub type DetectionOutcome = FaceOutcome<FaceDetection>;
pub type EmbeddingOutcome = FaceOutcome<FaceEmbedding>;

/// The selected face of an image and its normalized embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    pub face: FaceDetection,
    pub embedding: Embedding,
}

/// Result of a verification request.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Compared {
        verdict: Verdict,
        first: FaceDetection,
        second: FaceDetection,
    },
    /// No face in the given image; nothing was compared.
    NoFaceFound(ImageSlot),
}

impl VerifyOutcome {
    /// Terminal state of the verification request.
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Compared { .. } => PipelineState::Done,
            Self::NoFaceFound(_) => PipelineState::NoFaceFound,
        }
    }
}

/// Pick the candidate with the largest bounding-box area.
///
/// Ties keep the earliest candidate in detector order.
pub fn select_largest_face<I>(candidates: I) -> Option<FaceDetection>
where
    I: IntoIterator<Item = FaceDetection>,
{
    let mut best: Option<FaceDetection> = None;
    for face in candidates {
        if best.as_ref().map_or(true, |b| face.area() > b.area()) {
            best = Some(face);
        }
    }
    best
}

/// Face verification pipeline over an owned detector and embedding model.
///
/// Built once at startup. It keeps no per-request state; each call tracks its
/// own progress and reports the terminal state through its outcome or error.
pub struct Pipeline<D, E> {
    detector: D,
    embedder: E,
    evaluator: SimilarityEvaluator,
}

/// Progress of a single request through the stages.
struct Run {
    state: PipelineState,
}

impl Run {
    fn start() -> Self {
        Self {
            state: PipelineState::Received,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        self.transition(err.state());
        err
    }
}

impl<D: Detector, E: EmbeddingModel> Pipeline<D, E> {
    pub fn new(detector: D, embedder: E, thresholds: Thresholds) -> Self {
        Self {
            detector,
            embedder,
            evaluator: SimilarityEvaluator::new(thresholds),
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Run detection and select the largest face.
    fn locate(
        &mut self,
        run: &mut Run,
        image: &Image,
    ) -> Result<Option<FaceDetection>, PipelineError> {
        run.transition(PipelineState::Detecting);

        let candidates = self
            .detector
            .detect(image, (image.width, image.height))
            .map_err(|e| run.fail(e.into()))?;
        let total = candidates.len();

        let face = select_largest_face(
            candidates
                .into_iter()
                .filter(|f| f.width > 0.0 && f.height > 0.0),
        );

        match &face {
            Some(f) => {
                tracing::debug!(
                    candidates = total,
                    area = f.area(),
                    confidence = f.confidence,
                    "face selected"
                );
                run.transition(PipelineState::Detected);
            }
            None => {
                tracing::debug!(candidates = total, "no face found");
                run.transition(PipelineState::NoFaceFound);
            }
        }
        Ok(face)
    }

    /// Detect the largest face in `image`.
    pub fn detect(&mut self, image: &Image) -> Result<DetectionOutcome, PipelineError> {
        let mut run = Run::start();
        let Some(face) = self.locate(&mut run, image)? else {
            return Ok(FaceOutcome::NoFaceFound);
        };
        run.transition(PipelineState::Done);
        Ok(FaceOutcome::Found(face))
    }

    /// Detect, align, and embed the largest face in `image`.
    pub fn embed(&mut self, image: &Image) -> Result<EmbeddingOutcome, PipelineError> {
        let mut run = Run::start();
        let Some(face) = self.locate(&mut run, image)? else {
            return Ok(FaceOutcome::NoFaceFound);
        };

        run.transition(PipelineState::Aligning);
        let aligned =
            alignment::align_face(image, &face.landmarks).map_err(|e| run.fail(e.into()))?;

        run.transition(PipelineState::Normalizing);
        let input = tensor::normalize(&aligned.image, self.embedder.channel_order())
            .map_err(|e| run.fail(e.into()))?;

        run.transition(PipelineState::Embedding);
        let raw = self.embedder.infer(&input).map_err(|e| run.fail(e.into()))?;

        run.transition(PipelineState::PostProcessing);
        let mut embedding = normalize_embedding(raw).map_err(|e| run.fail(e.into()))?;
        if let Some(version) = self.embedder.model_version() {
            embedding = embedding.with_model_version(version);
        }

        run.transition(PipelineState::Done);
        Ok(FaceOutcome::Found(FaceEmbedding { face, embedding }))
    }

    /// Embed the largest face of each image and compare them.
    ///
    /// Stops at the first image without a face; failures are tagged with the image they came from.
    pub fn verify(
        &mut self,
        first: &Image,
        second: &Image,
    ) -> Result<VerifyOutcome, PipelineError> {
        let mut embed_slot = |image: &Image, slot: ImageSlot| match self.embed(image) {
            Ok(FaceOutcome::Found(found)) => Ok(Some(found)),
            Ok(FaceOutcome::NoFaceFound) => Ok(None),
            Err(e) => Err(e.in_image(slot)),
        };

        let Some(a) = embed_slot(first, ImageSlot::First)? else {
            return Ok(VerifyOutcome::NoFaceFound(ImageSlot::First));
        };
        let Some(b) = embed_slot(second, ImageSlot::Second)? else {
            return Ok(VerifyOutcome::NoFaceFound(ImageSlot::Second));
        };

        let verdict = self.evaluator.compare(&a.embedding, &b.embedding);
        tracing::debug!(
            cosine = verdict.cosine_similarity,
            l2 = verdict.euclidean_distance,
            verified = verdict.verified,
            "verification compared"
        );

        Ok(VerifyOutcome::Compared {
            verdict,
            first: a.face,
            second: b.face,
        })
    }
}
