use facecheck_core::{DetectorConfig, Thresholds};
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// File name of the YuNet detection model inside `model_dir`.
    pub detector_model: String,
    /// File name of the EdgeFace recognition model inside `model_dir`.
    pub recognizer_model: String,
    /// Detector score threshold, NMS IoU threshold and top-K.
    pub detector: DetectorConfig,
    /// Verification thresholds.
    pub thresholds: Thresholds,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());
        let f32_or = |key: &str, default: f32| parsed(key).map(|v| v as f32).unwrap_or(default);
        let usize_or = |key: &str, default: usize| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let detector_defaults = DetectorConfig::default();

        Self {
            model_dir: lookup("FACECHECK_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facecheck_core::default_model_dir),
            detector_model: lookup("FACECHECK_DETECTOR_MODEL")
                .unwrap_or_else(|| "face_detection_yunet_2023mar.onnx".to_string()),
            recognizer_model: lookup("FACECHECK_RECOGNIZER_MODEL")
                .unwrap_or_else(|| "edgeface_xxs.onnx".to_string()),
            detector: DetectorConfig {
                score_threshold: f32_or(
                    "FACECHECK_SCORE_THRESHOLD",
                    detector_defaults.score_threshold,
                ),
                nms_threshold: f32_or("FACECHECK_NMS_THRESHOLD", detector_defaults.nms_threshold),
                top_k: usize_or("FACECHECK_TOP_K", detector_defaults.top_k),
            },
            thresholds: Thresholds {
                cosine: f32_or("FACECHECK_COSINE_THRESHOLD", Thresholds::DEFAULT_COSINE),
                euclidean: f32_or("FACECHECK_L2_THRESHOLD", Thresholds::DEFAULT_EUCLIDEAN),
            },
            intra_threads: usize_or("FACECHECK_INTRA_THREADS", 2).max(1),
        }
    }

    /// Path to the YuNet detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the EdgeFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(&self.recognizer_model)
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("FACECHECK_MODEL_DIR", "/opt/models")]);
        let expected = DetectorConfig {
            score_threshold: 0.9,
            nms_threshold: 0.3,
            top_k: 5000,
        };
        assert_eq!(config.detector, expected);
        assert_eq!(config.thresholds, Thresholds { cosine: 0.4, euclidean: 1.0 });
        assert_eq!(config.intra_threads, 2);
        assert_eq!(config.detector_model_path(), "/opt/models/face_detection_yunet_2023mar.onnx");
        assert_eq!(config.recognizer_model_path(), "/opt/models/edgeface_xxs.onnx");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("FACECHECK_MODEL_DIR", "/m"),
            ("FACECHECK_RECOGNIZER_MODEL", "edgeface_s.onnx"),
            ("FACECHECK_COSINE_THRESHOLD", "0.55"),
            ("FACECHECK_TOP_K", "100"),
            ("FACECHECK_INTRA_THREADS", "0"),
        ]);
        assert_eq!(config.recognizer_model_path(), "/m/edgeface_s.onnx");
        assert!((config.thresholds.cosine - 0.55).abs() < 1e-6);
        assert_eq!(config.detector.top_k, 100);
        assert_eq!(config.intra_threads, 1);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_from(&[
            ("FACECHECK_L2_THRESHOLD", "strict"),
            ("FACECHECK_TOP_K", "-3"),
        ]);
        assert_eq!(config.thresholds.euclidean, 1.0);
        assert_eq!(config.detector.top_k, 5000);
    }
}
