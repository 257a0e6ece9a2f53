//! Image preprocessing for the EAST detector
//!
//! Handles working-size selection, resizing, and tensor conversion.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

/// Working-size policy
///
/// Caps the longer side at `max_side_len` and snaps both sides to a multiple
/// of `multiple` (the network downsamples by 32). A side that is not already
/// a multiple is rounded down one step further than the nearest multiple,
/// with a floor of one `multiple`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePolicy {
    pub max_side_len: u32,
    pub multiple: u32,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            max_side_len: 2400,
            multiple: 32,
        }
    }
}

/// An image resized to its working size
#[derive(Debug, Clone)]
pub struct ResizedImage {
    pub image: RgbImage,
    /// working height / original height
    pub ratio_h: f32,
    /// working width / original width
    pub ratio_w: f32,
}

impl ResizePolicy {
    /// Working (width, height) for an image of the given size
    pub fn working_size(&self, width: u32, height: u32) -> (u32, u32) {
        let ratio = if height.max(width) > self.max_side_len {
            if height > width {
                self.max_side_len as f32 / height as f32
            } else {
                self.max_side_len as f32 / width as f32
            }
        } else {
            1.0
        };

        let resize_h = (height as f32 * ratio) as u32;
        let resize_w = (width as f32 * ratio) as u32;

        (self.snap(resize_w), self.snap(resize_h))
    }

    fn snap(&self, side: u32) -> u32 {
        let m = self.multiple.max(1);
        let snapped = if side % m == 0 {
            side
        } else {
            (side / m).saturating_sub(1) * m
        };
        snapped.max(m)
    }

    /// Resize `image` to its working size (bilinear)
    pub fn apply(&self, image: &RgbImage) -> ResizedImage {
        let (width, height) = image.dimensions();
        let (resize_w, resize_h) = self.working_size(width, height);

        let resized = if (resize_w, resize_h) == (width, height) {
            image.clone()
        } else {
            image::imageops::resize(image, resize_w, resize_h, FilterType::Triangle)
        };

        ResizedImage {
            image: resized,
            ratio_h: resize_h as f32 / height as f32,
            ratio_w: resize_w as f32 / width as f32,
        }
    }
}

/// Convert an RGB image to an NHWC f32 tensor (batch size 1)
///
/// Pixel values stay in 0-255; the exported graph subtracts channel means
/// itself.
pub fn to_nhwc_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    Array4::from_shape_fn((1, height as usize, width as usize, 3), |(_, y, x, c)| {
        image.get_pixel(x as u32, y as u32).0[c] as f32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_working_size_small_image() {
        let policy = ResizePolicy::default();
        // 100 -> 64 (rounded down one extra step), 50 -> 32 (floor at one multiple)
        assert_eq!(policy.working_size(100, 50), (64, 32));
        // Exact multiples are kept
        assert_eq!(policy.working_size(640, 320), (640, 320));
    }

    #[test]
    fn test_working_size_caps_long_side() {
        let policy = ResizePolicy::default();
        let (w, h) = policy.working_size(4800, 1200);
        assert_eq!(w, 2400);
        assert_eq!(h, 544); // 600 -> (18 - 1) * 32
    }

    #[test]
    fn test_apply_records_ratios() {
        let image = RgbImage::new(200, 100);
        let resized = ResizePolicy::default().apply(&image);

        assert_eq!(resized.image.dimensions(), (160, 64));
        assert!((resized.ratio_w - 0.8).abs() < 1e-6);
        assert!((resized.ratio_h - 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_apply_keeps_exact_size() {
        let mut image = RgbImage::new(64, 32);
        image.put_pixel(3, 4, Rgb([10, 20, 30]));
        let resized = ResizePolicy::default().apply(&image);

        assert_eq!(resized.ratio_w, 1.0);
        assert_eq!(resized.ratio_h, 1.0);
        assert_eq!(resized.image.get_pixel(3, 4), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_to_nhwc_tensor() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(1, 0, Rgb([255, 128, 7]));

        let tensor = to_nhwc_tensor(&image);

        assert_eq!(tensor.dim(), (1, 2, 4, 3));
        assert_eq!(tensor[[0, 0, 1, 0]], 255.0);
        assert_eq!(tensor[[0, 0, 1, 1]], 128.0);
        assert_eq!(tensor[[0, 0, 1, 2]], 7.0);
        assert_eq!(tensor[[0, 1, 3, 2]], 0.0);
    }
}
