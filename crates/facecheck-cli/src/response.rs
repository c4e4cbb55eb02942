//! JSON documents printed by the `facecheck` subcommands.

use crate::engine::EngineError;
use facecheck_core::{
    DetectionOutcome, EmbeddingOutcome, FaceOutcome, VerifyOutcome, EMBEDDING_DIM,
};
use serde_json::{json, Value};
use std::process::ExitCode;

/// A response body plus its outcome class.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: ResponseKind,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    /// The request was well formed but an image held no face.
    NoFace,
    Failed,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { kind: ResponseKind::Ok, body }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.kind {
            ResponseKind::Ok => ExitCode::SUCCESS,
            ResponseKind::Failed => ExitCode::from(1),
            ResponseKind::NoFace => ExitCode::from(2),
        }
    }
}

pub fn detect(outcome: &DetectionOutcome) -> Response {
    match outcome {
        FaceOutcome::Found(face) => Response::ok(json!({
            "face_found": true,
            "bbox": {
                "x": face.x as i64,
                "y": face.y as i64,
                "width": face.width as i64,
                "height": face.height as i64,
            },
            "confidence": face.confidence,
        })),
        FaceOutcome::NoFaceFound => no_face(None),
    }
}

pub fn embed(outcome: &EmbeddingOutcome) -> Response {
    match outcome {
        FaceOutcome::Found(found) => Response::ok(json!({
            "face_found": true,
            "embedding": found.embedding.values(),
            "embedding_size": found.embedding.values().len(),
        })),
        FaceOutcome::NoFaceFound => no_face(None),
    }
}

pub fn verify(outcome: &VerifyOutcome) -> Response {
    match outcome {
        VerifyOutcome::Compared { verdict, .. } => Response::ok(json!({
            "verified": verdict.verified,
            "confidence": verdict.cosine_similarity,
            "details": verdict,
        })),
        VerifyOutcome::NoFaceFound(slot) => no_face(Some(slot.to_string())),
    }
}

fn no_face(image: Option<String>) -> Response {
    let body = match image {
        Some(image) => json!({
            "error": format!("no face detected in {image}"),
            "image": image,
        }),
        None => json!({
            "error": "no face detected in image",
            "face_found": false,
        }),
    };
    Response {
        kind: ResponseKind::NoFace,
        body,
    }
}

pub fn error(err: &EngineError) -> Response {
    let mut body = json!({ "error": err.to_string() });
    if let EngineError::Pipeline(e) = err {
        body["stage"] = json!(e.stage().to_string());
        if let Some(image) = e.image() {
            body["image"] = json!(image);
        }
    }
    Response {
        kind: ResponseKind::Failed,
        body,
    }
}

/// A failure outside the pipeline, such as an unreadable input file.
pub fn failure(message: impl Into<String>) -> Response {
    Response {
        kind: ResponseKind::Failed,
        body: json!({ "error": message.into() }),
    }
}

pub fn status(models_loaded: bool) -> Value {
    json!({
        "status": "ok",
        "model": "EdgeFace-XXS",
        "embedding_size": EMBEDDING_DIM,
        "models_loaded": models_loaded,
    })
}
