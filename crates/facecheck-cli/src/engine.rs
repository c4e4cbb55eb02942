use crate::config::Config;
use facecheck_core::{
    DetectionOutcome, Detector, EdgeFaceRecognizer, EmbeddingModel, EmbeddingOutcome, FacePipeline,
    Image, Pipeline, PipelineError, VerifyOutcome, YuNetDetector,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] facecheck_core::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] facecheck_core::RecognizerError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Detect {
        image: Image,
        reply: oneshot::Sender<Result<DetectionOutcome, EngineError>>,
    },
    Embed {
        image: Image,
        reply: oneshot::Sender<Result<EmbeddingOutcome, EngineError>>,
    },
    Verify {
        first: Image,
        second: Image,
        reply: oneshot::Sender<Result<VerifyOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect the largest face in an image.
    pub async fn detect(&self, image: Image) -> Result<DetectionOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Detect { image, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect, align and embed the largest face in an image.
    pub async fn embed(&self, image: Image) -> Result<EmbeddingOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Embed { image, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Embed the largest face of both images and compare them.
    pub async fn verify(&self, first: Image, second: Image) -> Result<VerifyOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Verify {
            first,
            second,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Load both ONNX models into a pipeline. Fails fast if either is unavailable.
pub fn load_pipeline(config: &Config) -> Result<FacePipeline, EngineError> {
    let detector_path = config.detector_model_path();
    let detector = YuNetDetector::load(&detector_path, config.detector, config.intra_threads)?;
    tracing::info!(path = %detector_path, "YuNet detector loaded");

    let recognizer_path = config.recognizer_model_path();
    let recognizer = EdgeFaceRecognizer::load(&recognizer_path, config.intra_threads)?;
    tracing::info!(path = %recognizer_path, "EdgeFace recognizer loaded");

    Ok(Pipeline::new(detector, recognizer, config.thresholds))
}

/// Spawn the engine on a dedicated OS thread that owns the pipeline.
///
/// Requests are served one at a time; the thread exits once every handle
/// has been dropped.
pub fn spawn_engine<D, E>(mut pipeline: Pipeline<D, E>) -> Result<EngineHandle, EngineError>
where
    D: Detector + Send + 'static,
    E: EmbeddingModel + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facecheck-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let _ = reply.send(pipeline.detect(&image).map_err(EngineError::from));
                    }
                    EngineRequest::Embed { image, reply } => {
                        let _ = reply.send(pipeline.embed(&image).map_err(EngineError::from));
                    }
                    EngineRequest::Verify {
                        first,
                        second,
                        reply,
                    } => {
                        let result = pipeline.verify(&first, &second).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecheck_core::{
        ChannelOrder, DetectorError, FaceDetection, RecognizerError, Stage, Thresholds,
        EMBEDDING_DIM,
    };
    use ndarray::Array4;

    struct FixedDetector(Vec<FaceDetection>);

    impl Detector for FixedDetector {
        fn detect(
            &mut self,
            _image: &Image,
            _input_size: (u32, u32),
        ) -> Result<Vec<FaceDetection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FixedEmbedder(Vec<f32>);

    impl EmbeddingModel for FixedEmbedder {
        fn infer(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>, RecognizerError> {
            Ok(self.0.clone())
        }
    }

    fn face() -> FaceDetection {
        FaceDetection {
            x: 40.0,
            y: 30.0,
            width: 100.0,
            height: 120.0,
            confidence: 0.97,
            landmarks: [(70.0, 80.0), (110.0, 80.0), (90.0, 100.0), (74.0, 125.0), (106.0, 125.0)],
        }
    }

    fn image() -> Image {
        Image::zeros(200, 200, ChannelOrder::Bgr)
    }

    fn engine(faces: Vec<FaceDetection>, raw: Vec<f32>) -> EngineHandle {
        let pipeline =
            Pipeline::new(FixedDetector(faces), FixedEmbedder(raw), Thresholds::default());
        spawn_engine(pipeline).expect("spawn engine")
    }

    #[tokio::test]
    async fn test_detect_roundtrip() {
        let handle = engine(vec![face()], vec![1.0; EMBEDDING_DIM]);
        let outcome = handle.detect(image()).await.expect("detect");
        assert_eq!(outcome.found(), Some(face()));
    }

    #[tokio::test]
    async fn test_verify_same_face() {
        let handle = engine(vec![face()], vec![0.5; EMBEDDING_DIM]);
        match handle.verify(image(), image()).await.expect("verify") {
            VerifyOutcome::Compared { verdict, .. } => assert!(verdict.verified),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pipeline_error_is_forwarded() {
        let handle = engine(vec![face()], vec![0.0; EMBEDDING_DIM]);
        let err = handle.embed(image()).await.err().expect("zero embedding must fail");
        match err {
            EngineError::Pipeline(e) => assert_eq!(e.stage(), Stage::PostProcessing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_handle_is_clone_and_serves_many() {
        let handle = engine(vec![], vec![1.0; EMBEDDING_DIM]);
        let other = handle.clone();
        assert!(handle.detect(image()).await.expect("detect").found().is_none());
        assert!(other.embed(image()).await.expect("embed").found().is_none());
    }
}
