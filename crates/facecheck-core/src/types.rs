
/// Five-point facial landmarks in image coordinates:
/// [right_eye, left_eye, nose_tip, right_mouth, left_mouth].
///
/// The order is fixed; the canonical template in [`crate::alignment`] uses the same order.
pub type Landmarks = [(f32, f32); 5];

/// Interleaving order of the three 8-bit channels in an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A decoded 3-channel raster, row-major, interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
}

impl Image {
    pub const CHANNELS: usize = 3;

    /// Black image of the given size.
    pub fn zeros(width: u32, height: u32, order: ChannelOrder) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * Self::CHANNELS],
            width,
            height,
            order,
        }
    }

    /// Wrap an RGB buffer decoded by the `image` crate.
    pub fn from_rgb(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            order: ChannelOrder::Rgb,
        }
    }

    /// True if the buffer length matches `width * height * 3`.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * Self::CHANNELS
    }

    /// Pixel at (x, y) as stored, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        self.data.get(i..i + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Copy of this image with its channels reordered to `order`.
    pub fn to_order(&self, order: ChannelOrder) -> Image {
        if order == self.order {
            return self.clone();
        }
        // RGB <-> BGR is the same swap in both directions.
        let mut data = self.data.clone();
        for px in data.chunks_exact_mut(Self::CHANNELS) {
            px.swap(0, 2);
        }
        Image {
            data,
            width: self.width,
            height: self.height,
            order,
        }
    }
}

/// A face returned by the detector: bounding box, landmarks, and score.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub landmarks: Landmarks,
}

impl FaceDetection {
    /// Bounding-box area (width × height).
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_order_swaps_red_and_blue() {
        let img = Image {
            data: vec![10, 20, 30, 40, 50, 60],
            width: 2,
            height: 1,
            order: ChannelOrder::Bgr,
        };
        let rgb = img.to_order(ChannelOrder::Rgb);
        assert_eq!(rgb.order, ChannelOrder::Rgb);
        assert_eq!(rgb.data, vec![30, 20, 10, 60, 50, 40]);
        assert_eq!(rgb.to_order(ChannelOrder::Bgr), img);
    }

    #[test]
    fn test_pixel_bounds() {
        let mut img = Image::zeros(3, 2, ChannelOrder::Rgb);
        // pixel (2, 1) starts at byte (1 * 3 + 2) * 3 = 15
        img.data[15..18].copy_from_slice(&[1, 2, 3]);
        assert_eq!(img.pixel(2, 1), Some([1, 2, 3]));
        assert_eq!(img.pixel(3, 0), None);
        assert_eq!(img.pixel(0, 2), None);
    }

    #[test]
    fn test_from_rgb_keeps_layout() {
        let buf = image::RgbImage::from_pixel(4, 3, image::Rgb([7, 8, 9]));
        let img = Image::from_rgb(buf);
        assert_eq!((img.width, img.height), (4, 3));
        assert!(img.is_well_formed());
        assert_eq!(img.pixel(3, 2), Some([7, 8, 9]));
    }

    #[test]
    fn test_area() {
        let face = FaceDetection {
            x: 0.0,
            y: 0.0,
            width: 20.0,
            height: 10.0,
            confidence: 0.9,
            landmarks: [(0.0, 0.0); 5],
        };
        assert_eq!(face.area(), 200.0);
    }
}
