//! Image decoding and tensor layout shared by both embedders.
//!
//! Follows the torchvision EfficientNet eval transform: take the centered
//! square, resize it to the model input, scale to `[0, 1]`, normalize with
//! ImageNet statistics, NCHW layout.

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;

use crate::error::EmbedError;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decode encoded image bytes.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, EmbedError> {
    if bytes.is_empty() {
        return Err(EmbedError::Input("image is empty".into()));
    }
    image::load_from_memory(bytes).map_err(|e| EmbedError::Input(e.to_string()))
}

/// Decode and lay out an image as a `[1, 3, size, size]` tensor.
pub fn preprocess(bytes: &[u8], size: u32) -> Result<Array4<f32>, EmbedError> {
    let image = decode(bytes)?;
    Ok(to_tensor(&image, size))
}

/// Crop, resize, and normalize a decoded image.
pub fn to_tensor(image: &DynamicImage, size: u32) -> Array4<f32> {
    // Crop in source coordinates before resizing so the work is bounded by
    // `size²` whatever the aspect ratio.
    let (w, h) = (image.width(), image.height());
    let edge = w.min(h).max(1);
    let square = image.crop_imm(
        w.saturating_sub(edge) / 2,
        h.saturating_sub(edge) / 2,
        edge,
        edge,
    );
    let resized = square
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let side = size as usize;
    let mut array = Array4::<f32>::zeros((1, 3, side, side));
    for y in 0..side {
        for x in 0..side {
            let pixel = resized.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                array[[0, c, y, x]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
    }

    array
}

/// Flatten a tensor into row-major order for transport.
pub fn flatten(tensor: &Array4<f32>) -> Vec<f32> {
    tensor.iter().copied().collect()
}
