use crate::error::{ClassifierError, ClassifierResult};
use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array, Ix4};
use std::path::Path;

/// Input resolution of the CLIP ViT-L/14 image encoder.
pub const IMAGE_SIZE: u32 = 224;

pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// CLIP image transform: center square of the shortest edge resized to `size`
/// (bicubic), rescaled to [0, 1] and normalized per channel.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            size: IMAGE_SIZE,
            mean: CLIP_MEAN,
            std: CLIP_STD,
        }
    }
}

impl Preprocessor {
    pub fn preprocess(&self, path: &Path) -> ClassifierResult<Array<f32, Ix4>> {
        let decode_error = |reason: String| ClassifierError::ImageDecode {
            path: path.to_path_buf(),
            reason,
        };

        let image = image::ImageReader::open(path)
            .map_err(|e| decode_error(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| decode_error(e.to_string()))?
            .decode()
            .map_err(|e| decode_error(e.to_string()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(decode_error("image has no pixels".into()));
        }

        Ok(self.transform(&image))
    }

    pub fn transform(&self, image: &DynamicImage) -> Array<f32, Ix4> {
        let rgb = image.to_rgb8();
        let cropped = self.resize_and_crop(&rgb);

        let size = self.size as usize;
        let mut input = Array::zeros((1, 3, size, size));
        for (x, y, pixel) in cropped.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                let value = pixel.0[channel] as f32 / 255.;
                input[[0, channel, y, x]] = (value - self.mean[channel]) / self.std[channel];
            }
        }
        input
    }

    /// Cropping happens in source coordinates, so the resize buffer is never
    /// larger than `size x size` whatever the aspect ratio.
    fn resize_and_crop(&self, rgb: &RgbImage) -> RgbImage {
        let (left, top, side) = center_square(rgb.width(), rgb.height());
        let square = imageops::crop_imm(rgb, left, top, side, side).to_image();
        if side == self.size {
            return square;
        }
        imageops::resize(&square, self.size, self.size, FilterType::CatmullRom)
    }
}

/// Largest centered square: `(left, top, side)`.
fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let side = width.min(height);
    ((width - side) / 2, (height - side) / 2, side)
}
