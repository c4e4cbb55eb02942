//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical 112×112 position using the five
//! ArcFace reference landmarks and least-squares estimation. Only rotation,
//! uniform scale and translation are fitted; shear is never introduced.

use crate::types::{Image, Landmarks};
use thiserror::Error;

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // right eye
    (73.5318, 51.5014), // left eye
    (56.0252, 71.7366), // nose tip
    (41.5493, 92.3655), // right mouth corner
    (70.7299, 92.2041), // left mouth corner
];

pub const ALIGNED_SIZE: usize = 112;

/// Landmarks closer than this (in pixels) are treated as coincident.
const MIN_LANDMARK_SEPARATION: f64 = 1e-3;
/// Minimum ratio of the minor to major spread of the landmark cloud.
const MIN_SPREAD_RATIO: f64 = 1e-4;
const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("degenerate landmarks: {reason}")]
    DegenerateLandmarks { reason: &'static str },
    #[error("malformed image buffer: expected {expected} bytes, got {actual}")]
    MalformedImage { expected: usize, actual: usize },
}

/// A 2D similarity transform:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Row-major 2×3 matrix `[a, -b, tx, b, a, ty]`.
    pub fn matrix(&self) -> [f32; 6] {
        [self.a, -self.b, self.tx, self.b, self.a, self.ty]
    }

    /// Uniform scale factor.
    pub fn scale(&self) -> f32 {
        self.a.hypot(self.b)
    }

    /// Rotation in radians.
    pub fn rotation(&self) -> f32 {
        self.b.atan2(self.a)
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` if the scale is zero.
    pub fn inverse(&self) -> Option<Self> {
        // M = [[a, -b], [b, a]], det = a^2 + b^2
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON * f32::EPSILON || !det.is_finite() {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Result of aligning one face.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    /// 112×112 crop in the source image's channel order.
    pub image: Image,
    /// Transform from source coordinates to crop coordinates.
    pub transform: SimilarityTransform,
}

/// Reject landmark sets that cannot determine a unique, meaningful transform.
fn check_landmarks(src: &Landmarks) -> Result<(), AlignmentError> {
    if src.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(AlignmentError::DegenerateLandmarks { reason: "non-finite coordinate" });
    }

    for i in 0..src.len() {
        for j in (i + 1)..src.len() {
            let dx = (src[i].0 - src[j].0) as f64;
            let dy = (src[i].1 - src[j].1) as f64;
            if dx.hypot(dy) < MIN_LANDMARK_SEPARATION {
                return Err(AlignmentError::DegenerateLandmarks { reason: "coincident points" });
            }
        }
    }

    // Eigenvalues of the 2x2 scatter matrix: a vanishing minor axis means collinear.
    let n = src.len() as f64;
    let mx = src.iter().map(|p| p.0 as f64).sum::<f64>() / n;
    let my = src.iter().map(|p| p.1 as f64).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for &(x, y) in src {
        let (dx, dy) = (x as f64 - mx, y as f64 - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let half_trace = (sxx + syy) / 2.0;
    let root = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
    let major = half_trace + root;
    let minor = (half_trace - root).max(0.0);
    if major <= 0.0 || minor / major < MIN_SPREAD_RATIO {
        return Err(AlignmentError::DegenerateLandmarks { reason: "collinear points" });
    }

    Ok(())
}

/// Estimate the similarity transform mapping `src` landmarks onto `dst`
/// in the least-squares sense.
pub fn estimate_similarity_transform(
    src: &Landmarks,
    dst: &Landmarks,
) -> Result<SimilarityTransform, AlignmentError> {
    check_landmarks(src)?;

    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [[0.0f64; 4]; 4];
    let mut atb = [0.0f64; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(ata, atb).ok_or(AlignmentError::DegenerateLandmarks {
        reason: "singular normal equations",
    })?;

    let transform = SimilarityTransform {
        a: x[0] as f32,
        b: x[1] as f32,
        tx: x[2] as f32,
        ty: x[3] as f32,
    };
    if transform.matrix().iter().any(|v| !v.is_finite()) || transform.inverse().is_none() {
        return Err(AlignmentError::DegenerateLandmarks { reason: "non-invertible transform" });
    }
    Ok(transform)
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot vanishes.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(a: [[f64; 4]; 4], b: [f64; 4]) -> Option<[f64; 4]> {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f64; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let max_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < PIVOT_EPSILON {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    // Back substitution
    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Warp `src` through `transform` into an `out_size`×`out_size` image.
///
/// Backward mapping with bilinear interpolation. Samples outside the source are black.
pub fn warp_affine(src: &Image, transform: &SimilarityTransform, out_size: usize) -> Image {
    let mut output = Image::zeros(out_size as u32, out_size as u32, src.order);
    let Some(inv) = transform.inverse() else {
        return output;
    };

    let (w, h) = (src.width as i64, src.height as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            let idx = (y * w + x) as usize * Image::CHANNELS + c;
            src.data.get(idx).copied().unwrap_or(0) as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            let (sx, sy) = inv.apply((ox as f32, oy as f32));
            if !sx.is_finite() || !sy.is_finite() {
                continue;
            }

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let out_idx = (oy * out_size + ox) * Image::CHANNELS;
            for c in 0..Image::CHANNELS {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                output.data[out_idx + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Align a detected face to a canonical 112×112 crop.
///
/// Computes the similarity transform from `landmarks` to the reference positions
/// and warps the face region into a new buffer. The source image is not modified.
/// Landmarks outside the image are not rejected; they yield a mostly black crop.
pub fn align_face(image: &Image, landmarks: &Landmarks) -> Result<AlignedFace, AlignmentError> {
    if !image.is_well_formed() {
        return Err(AlignmentError::MalformedImage {
            expected: image.width as usize * image.height as usize * Image::CHANNELS,
            actual: image.data.len(),
        });
    }

    let transform = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112)
        .map_err(|e| {
            tracing::warn!(error = %e, ?landmarks, "face alignment rejected");
            e
        })?;

    tracing::trace!(
        scale = transform.scale(),
        rotation = transform.rotation(),
        "similarity transform estimated"
    );

    Ok(AlignedFace {
        image: warp_affine(image, &transform, ALIGNED_SIZE),
        transform,
    })
}
