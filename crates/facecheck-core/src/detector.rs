//! YuNet face detector via ONNX Runtime.
//!
//! Runs the YuNet (2023mar) model on a BGR frame zero-padded to a multiple of 32,
//! decodes the three stride levels (cls × obj scores, boxes, 5-point landmarks),
//! and applies top-K selection followed by NMS.

use crate::pipeline::Detector;
use crate::types::{ChannelOrder, FaceDetection, Image};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const YUNET_STRIDES: [usize; 3] = [8, 16, 32];
const YUNET_PAD_DIVISOR: u32 = 32;
const YUNET_DEFAULT_INPUT_SIZE: (u32, u32) = (320, 320);
const YUNET_OUTPUTS: usize = 12;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.9;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;
pub const DEFAULT_TOP_K: usize = 5000;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid detector input size {width}x{height}")]
    InvalidInputSize { width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector post-processing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Requested input size and the padded size the network actually runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputGeometry {
    pub width: u32,
    pub height: u32,
    pub padded_width: u32,
    pub padded_height: u32,
}

impl InputGeometry {
    pub fn new(width: u32, height: u32) -> Result<Self, DetectorError> {
        if width == 0 || height == 0 {
            return Err(DetectorError::InvalidInputSize { width, height });
        }
        let pad = |v: u32| v.div_ceil(YUNET_PAD_DIVISOR) * YUNET_PAD_DIVISOR;
        Ok(Self {
            width,
            height,
            padded_width: pad(width),
            padded_height: pad(height),
        })
    }

    /// Switch to a new requested size. Returns `true` if the size changed.
    ///
    /// An invalid size leaves the current geometry untouched.
    pub fn update(&mut self, (width, height): (u32, u32)) -> Result<bool, DetectorError> {
        if self.width == width && self.height == height {
            return Ok(false);
        }
        let next = Self::new(width, height)?;
        tracing::debug!(from = ?*self, to = ?next, "YuNet input size changed");
        *self = next;
        Ok(true)
    }

    /// Feature-map (rows, cols) at `stride`.
    fn grid(&self, stride: usize) -> (usize, usize) {
        (
            self.padded_height as usize / stride,
            self.padded_width as usize / stride,
        )
    }
}

/// Factors mapping network coordinates back to source-image coordinates.
#[derive(Debug, Clone, Copy)]
struct ResizeInfo {
    scale_x: f32,
    scale_y: f32,
}

/// Output tensor indices for one stride: (cls_idx, obj_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize, usize);

/// YuNet-based face detector.
pub struct YuNetDetector {
    session: Session,
    config: DetectorConfig,
    geometry: InputGeometry,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl YuNetDetector {
    /// Load the YuNet ONNX model from the given path.
    pub fn load(
        model_path: &str,
        config: DetectorConfig,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded YuNet model"
        );

        if output_names.len() < YUNET_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "YuNet model requires {YUNET_OUTPUTS} outputs \
                 (3 strides × cls/obj/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "YuNet output tensor mapping");

        let (w, h) = YUNET_DEFAULT_INPUT_SIZE;
        Ok(Self {
            session,
            config,
            geometry: InputGeometry::new(w, h)?,
            stride_indices,
        })
    }

    /// Reconfigure the network input size. Returns `true` if the size changed.
    pub fn set_input_size(&mut self, size: (u32, u32)) -> Result<bool, DetectorError> {
        self.geometry.update(size)
    }

    fn run(&mut self, image: &Image) -> Result<Vec<FaceDetection>, DetectorError> {
        let (input, resize) = preprocess(image, &self.geometry);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in YUNET_STRIDES.iter().enumerate() {
            let (cls_idx, obj_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let cls = extract(cls_idx, "cls")?;
            let obj = extract(obj_idx, "obj")?;
            let bboxes = extract(bbox_idx, "bbox")?;
            let kps = extract(kps_idx, "kps")?;

            all_detections.extend(decode_stride(
                StrideOutputs { cls, obj, bboxes, kps },
                stride,
                &self.geometry,
                resize,
                self.config.score_threshold,
            ));
        }

        Ok(postprocess(all_detections, &self.config))
    }
}

impl Detector for YuNetDetector {
    fn detect(
        &mut self,
        image: &Image,
        input_size: (u32, u32),
    ) -> Result<Vec<FaceDetection>, DetectorError> {
        if !image.is_well_formed() || image.width == 0 || image.height == 0 {
            return Err(DetectorError::InvalidInputSize {
                width: image.width,
                height: image.height,
            });
        }
        self.set_input_size(input_size)?;
        self.run(image)
    }
}

/// Build the network input: BGR, raw 0–255 floats, NCHW, zero-padded right/bottom.
///
/// Frames whose size differs from the configured input are bilinearly resized first.
fn preprocess(image: &Image, geometry: &InputGeometry) -> (Array4<f32>, ResizeInfo) {
    let bgr = image.to_order(ChannelOrder::Bgr);
    let (src_w, src_h) = (bgr.width as usize, bgr.height as usize);
    let (new_w, new_h) = (geometry.width as usize, geometry.height as usize);

    let resize = ResizeInfo {
        scale_x: new_w as f32 / src_w as f32,
        scale_y: new_h as f32 / src_h as f32,
    };
    let resized = if (src_w, src_h) == (new_w, new_h) {
        bgr.data
    } else {
        resize_bilinear(&bgr.data, src_w, src_h, new_w, new_h)
    };

    let (pad_w, pad_h) = (geometry.padded_width as usize, geometry.padded_height as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, pad_h, pad_w));
    for y in 0..new_h {
        for x in 0..new_w {
            let base = (y * new_w + x) * Image::CHANNELS;
            for c in 0..Image::CHANNELS {
                tensor[[0, c, y, x]] = resized[base + c] as f32;
            }
        }
    }

    (tensor, resize)
}

/// Resize an interleaved 3-channel buffer using bilinear interpolation.
fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let sx = width as f32 / new_w as f32;
    let sy = height as f32 / new_h as f32;
    let mut resized = vec![0u8; new_w * new_h * Image::CHANNELS];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * sy - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * sx - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..Image::CHANNELS {
                let at = |xx: usize, yy: usize| src[(yy * width + xx) * Image::CHANNELS + c] as f32;
                let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                resized[(y * new_w + x) * Image::CHANNELS + c] =
                    val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    resized
}

/// Discover output tensor ordering by name.
///
/// YuNet exports name their outputs "cls_8", "obj_8", "bbox_8", "kps_8", ... If that
/// pattern is present it is used; otherwise the standard positional ordering applies:
///   [0-2] = cls, [3-5] = obj, [6-8] = bbox, [9-11] = kps (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = YUNET_STRIDES
        .iter()
        .map(|&stride| {
            Some((
                find("cls", stride)?,
                find("obj", stride)?,
                find("bbox", stride)?,
                find("kps", stride)?,
            ))
        })
        .collect();

    match named {
        Some(v) => {
            tracing::info!("YuNet: using name-based output tensor mapping");
            [v[0], v[1], v[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "YuNet: output names not recognized, using positional mapping \
                 [0-2]=cls, [3-5]=obj, [6-8]=bbox, [9-11]=kps"
            );
            [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]
        }
    }
}

/// Raw output slices for one stride level.
struct StrideOutputs<'a> {
    cls: &'a [f32],
    obj: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode detections for a single stride level.
fn decode_stride(
    out: StrideOutputs<'_>,
    stride: usize,
    geometry: &InputGeometry,
    resize: ResizeInfo,
    threshold: f32,
) -> Vec<FaceDetection> {
    let (rows, cols) = geometry.grid(stride);
    let s = stride as f32;
    let mut detections = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            let idx = r * cols + c;
            let cls = out.cls.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            let obj = out.obj.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            let score = (cls * obj).sqrt();
            if score < threshold {
                continue;
            }

            let Some(bbox) = out.bboxes.get(idx * 4..idx * 4 + 4) else {
                continue;
            };
            let Some(kps) = out.kps.get(idx * 10..idx * 10 + 10) else {
                continue;
            };

            let cx = (c as f32 + bbox[0]) * s;
            let cy = (r as f32 + bbox[1]) * s;
            let w = bbox[2].exp() * s;
            let h = bbox[3].exp() * s;

            let mut landmarks = [(0.0f32, 0.0f32); 5];
            for (i, lm) in landmarks.iter_mut().enumerate() {
                *lm = (
                    (kps[i * 2] + c as f32) * s / resize.scale_x,
                    (kps[i * 2 + 1] + r as f32) * s / resize.scale_y,
                );
            }

            detections.push(FaceDetection {
                x: (cx - w / 2.0) / resize.scale_x,
                y: (cy - h / 2.0) / resize.scale_y,
                width: w / resize.scale_x,
                height: h / resize.scale_y,
                confidence: score,
                landmarks,
            });
        }
    }

    detections
}

/// Keep the top-K candidates by score, suppress overlaps, return by descending confidence.
fn postprocess(mut detections: Vec<FaceDetection>, config: &DetectorConfig) -> Vec<FaceDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    detections.truncate(config.top_k);
    nms(detections, config.nms_threshold)
}

/// Non-Maximum Suppression over confidence-sorted detections.
fn nms(detections: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
    let mut keep: Vec<FaceDetection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two detections.
fn iou(a: &FaceDetection, b: &FaceDetection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceDetection {
        FaceDetection {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    const UNIT_SCALE: ResizeInfo = ResizeInfo { scale_x: 1.0, scale_y: 1.0 };

    #[test]
    fn test_iou_identical() {
        let a = make_det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_det(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let config = DetectorConfig { nms_threshold: 0.3, ..Default::default() };
        let result = postprocess(
            vec![
                make_det(5.0, 5.0, 100.0, 100.0, 0.92),
                make_det(200.0, 200.0, 50.0, 50.0, 0.91),
                make_det(0.0, 0.0, 100.0, 100.0, 0.99),
            ],
            &config,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.99).abs() < 1e-6);
        assert!((result[1].confidence - 0.91).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_truncates_before_nms() {
        let config = DetectorConfig { top_k: 2, ..Default::default() };
        let result = postprocess(
            vec![
                make_det(0.0, 0.0, 10.0, 10.0, 0.95),
                make_det(50.0, 0.0, 10.0, 10.0, 0.97),
                make_det(100.0, 0.0, 10.0, 10.0, 0.93),
            ],
            &config,
        );
        let confs: Vec<f32> = result.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.97, 0.95]);
    }

    #[test]
    fn test_input_geometry_padding() {
        let g = InputGeometry::new(200, 150).unwrap();
        assert_eq!((g.padded_width, g.padded_height), (224, 160));
        assert_eq!(g.grid(8), (20, 28));
        assert_eq!(g.grid(32), (5, 7));

        let exact = InputGeometry::new(320, 320).unwrap();
        assert_eq!((exact.padded_width, exact.padded_height), (320, 320));

        assert!(matches!(
            InputGeometry::new(0, 10),
            Err(DetectorError::InvalidInputSize { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_input_geometry_update_same_size_is_noop() {
        let mut g = InputGeometry::new(320, 320).unwrap();
        assert!(!g.update((320, 320)).unwrap());
        assert_eq!(g, InputGeometry::new(320, 320).unwrap());
    }

    #[test]
    fn test_input_geometry_update_new_size_reinitializes() {
        let mut g = InputGeometry::new(320, 320).unwrap();
        assert!(g.update((200, 150)).unwrap());
        assert_eq!((g.width, g.height), (200, 150));
        assert_eq!((g.padded_width, g.padded_height), (224, 160));
        // same size again reports no change
        assert!(!g.update((200, 150)).unwrap());
    }

    #[test]
    fn test_input_geometry_update_rejects_zero_size() {
        let mut g = InputGeometry::new(320, 320).unwrap();
        assert!(matches!(
            g.update((0, 240)),
            Err(DetectorError::InvalidInputSize { width: 0, height: 240 })
        ));
        assert_eq!(g, InputGeometry::new(320, 320).unwrap());
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // 64x64 input, stride 8 → 8x8 grid. Anchor at row 2, col 3.
        let g = InputGeometry::new(64, 64).unwrap();
        let n = 64;
        let idx = 2 * 8 + 3;
        let mut cls = vec![0.0f32; n];
        let mut obj = vec![0.0f32; n];
        let mut bboxes = vec![0.0f32; n * 4];
        let mut kps = vec![0.0f32; n * 10];
        cls[idx] = 1.0;
        obj[idx] = 0.9025; // sqrt → 0.95
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.5, 2f32.ln(), 4f32.ln()]);
        kps[idx * 10] = 0.25; // first landmark x offset

        let dets = decode_stride(
            StrideOutputs { cls: &cls, obj: &obj, bboxes: &bboxes, kps: &kps },
            8,
            &g,
            UNIT_SCALE,
            0.9,
        );
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.confidence - 0.95).abs() < 1e-5);
        // center (28, 20), size (16, 32)
        assert!((d.x - 20.0).abs() < 1e-4 && (d.y - 4.0).abs() < 1e-4);
        assert!((d.width - 16.0).abs() < 1e-4 && (d.height - 32.0).abs() < 1e-4);
        assert!((d.landmarks[0].0 - 26.0).abs() < 1e-4);
        assert!((d.landmarks[0].1 - 16.0).abs() < 1e-4);
        assert!((d.landmarks[1].0 - 24.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_threshold_and_rescale() {
        let g = InputGeometry::new(32, 32).unwrap();
        let n = 16; // 4x4 grid at stride 8
        let mut cls = vec![0.5f32; n];
        let obj = vec![1.0f32; n];
        cls[0] = 1.0;
        let bboxes = vec![0.0f32; n * 4];
        let kps = vec![0.0f32; n * 10];
        let half = ResizeInfo { scale_x: 0.5, scale_y: 0.5 };

        let dets = decode_stride(
            StrideOutputs { cls: &cls, obj: &obj, bboxes: &bboxes, kps: &kps },
            8,
            &g,
            half,
            0.9,
        );
        // only anchor 0 passes sqrt(cls * obj) >= 0.9
        assert_eq!(dets.len(), 1);
        // width exp(0) * 8 = 8 in network space → 16 in source space
        assert!((dets[0].width - 16.0).abs() < 1e-4);
        assert!((dets[0].x + 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "cls_8", "cls_16", "cls_32", "obj_8", "obj_16", "obj_32", "bbox_8", "bbox_16",
            "bbox_32", "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "cls_8", "obj_8", "bbox_16", "kps_16", "cls_16", "obj_16",
            "bbox_32", "kps_32", "cls_32", "obj_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (2, 3, 0, 1));
        assert_eq!(indices[1], (6, 7, 4, 5));
        assert_eq!(indices[2], (10, 11, 8, 9));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..12).map(|i: usize| i.to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]);
    }

    #[test]
    fn test_preprocess_layout_and_padding() {
        let mut img = Image::zeros(40, 20, ChannelOrder::Rgb);
        // pixel (1, 0) = R:10, G:20, B:30
        img.data[3..6].copy_from_slice(&[10, 20, 30]);
        let g = InputGeometry::new(40, 20).unwrap();
        let (tensor, resize) = preprocess(&img, &g);

        assert_eq!(tensor.shape(), &[1, 3, 32, 64]);
        assert_eq!(resize.scale_x, 1.0);
        // BGR planes, raw 0-255 values
        assert_eq!(tensor[[0, 0, 0, 1]], 30.0);
        assert_eq!(tensor[[0, 1, 0, 1]], 20.0);
        assert_eq!(tensor[[0, 2, 0, 1]], 10.0);
        // padding stays zero
        assert_eq!(tensor[[0, 0, 25, 50]], 0.0);
    }

    #[test]
    fn test_bilinear_resize_uniform() {
        let frame = vec![128u8; 100 * 100 * 3];
        let resized = resize_bilinear(&frame, 100, 100, 200, 150);
        assert_eq!(resized.len(), 200 * 150 * 3);
        assert!(resized.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }
}
