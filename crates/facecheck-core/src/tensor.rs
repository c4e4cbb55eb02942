//! Conversion between aligned face crops and the embedding model's input tensor.
//!
//! Input contract: `[1, 3, 112, 112]` float32, NCHW, values in [-1, 1].

use crate::alignment::ALIGNED_SIZE;
use crate::types::{ChannelOrder, Image};
use ndarray::Array4;
use thiserror::Error;

const PIXEL_SCALE: f32 = 255.0;
// torchvision Normalize(mean=0.5, std=0.5)
const NORM_MEAN: f32 = 0.5;
const NORM_STD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },
}

/// Shape of the tensor produced by [`normalize`].
pub const fn input_shape() -> [usize; 4] {
    [1, Image::CHANNELS, ALIGNED_SIZE, ALIGNED_SIZE]
}

/// Convert a 112×112 crop into the model input tensor.
///
/// Channels are reordered to `target`, each value is mapped through
/// `(x / 255 - 0.5) / 0.5`, and the layout becomes batch × channel × height × width.
pub fn normalize(crop: &Image, target: ChannelOrder) -> Result<Array4<f32>, TensorError> {
    let actual = vec![crop.height as usize, crop.width as usize, Image::CHANNELS];
    if crop.width as usize != ALIGNED_SIZE
        || crop.height as usize != ALIGNED_SIZE
        || !crop.is_well_formed()
    {
        return Err(TensorError::ShapeMismatch {
            expected: vec![ALIGNED_SIZE, ALIGNED_SIZE, Image::CHANNELS],
            actual: if crop.is_well_formed() { actual } else { vec![crop.data.len()] },
        });
    }

    let rgb_bgr_swap = crop.order != target;
    let size = ALIGNED_SIZE;
    let mut tensor = Array4::<f32>::zeros(input_shape());

    for y in 0..size {
        for x in 0..size {
            let base = (y * size + x) * Image::CHANNELS;
            for c in 0..Image::CHANNELS {
                let src_c = if rgb_bgr_swap { Image::CHANNELS - 1 - c } else { c };
                let pixel = crop.data[base + src_c] as f32;
                tensor[[0, c, y, x]] = (pixel / PIXEL_SCALE - NORM_MEAN) / NORM_STD;
            }
        }
    }

    Ok(tensor)
}

/// Inverse of [`normalize`]: rebuild an interleaved crop in `order` from a model input tensor.
pub fn denormalize(
    tensor: &Array4<f32>,
    tensor_order: ChannelOrder,
    order: ChannelOrder,
) -> Result<Image, TensorError> {
    if tensor.shape() != input_shape().as_slice() {
        return Err(TensorError::ShapeMismatch {
            expected: input_shape().to_vec(),
            actual: tensor.shape().to_vec(),
        });
    }

    let swap = tensor_order != order;
    let size = ALIGNED_SIZE;
    let mut image = Image::zeros(size as u32, size as u32, order);
    for y in 0..size {
        for x in 0..size {
            let base = (y * size + x) * Image::CHANNELS;
            for c in 0..Image::CHANNELS {
                let dst_c = if swap { Image::CHANNELS - 1 - c } else { c };
                let v = (tensor[[0, c, y, x]] * NORM_STD + NORM_MEAN) * PIXEL_SCALE;
                image.data[base + dst_c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    Ok(image)
}
