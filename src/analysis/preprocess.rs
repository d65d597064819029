// Image decoding and tensor preparation shared by every vision model.
//
// All models here take a single RGB image as a [1, 3, H, W] float tensor in
// channel-first order, normalized per channel.

use anyhow::{Context, Result};
use image::imageops::FilterType;

/// How raw 0-255 pixel values are mapped into model input range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Per-channel mean, applied after scaling by `scale`
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Multiplier applied to the raw byte before mean/std (1/255 for most nets)
    pub scale: f32,
}

impl Normalization {
    /// CLIP ViT preprocessing constants.
    pub const CLIP: Normalization = Normalization {
        mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
        std: [0.268_629_55, 0.261_302_6, 0.275_777_1],
        scale: 1.0 / 255.0,
    };

    /// Standard ImageNet constants used by the ViT/ConvNeXt detectors.
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
        scale: 1.0 / 255.0,
    };

    /// UltraFace expects (px - 127) / 128.
    pub const ULTRAFACE: Normalization = Normalization {
        mean: [127.0, 127.0, 127.0],
        std: [128.0, 128.0, 128.0],
        scale: 1.0,
    };
}

/// A decoded image resized to model input, ready to wrap in a Tensor.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// [1, 3, height, width]
    pub shape: [i64; 4],
    pub data: Vec<f32>,
    /// Dimensions of the source image before resizing.
    pub original_size: (u32, u32),
}

/// Decode `bytes`, resize to exactly `width` x `height`, and normalize into
/// a channel-first float buffer.
pub fn prepare_image(
    bytes: &[u8],
    width: u32,
    height: u32,
    norm: Normalization,
) -> Result<PreparedImage> {
    let decoded = image::load_from_memory(bytes).context("Failed to decode image")?;
    let original_size = (decoded.width(), decoded.height());

    let rgb = decoded
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let plane = (width * height) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            let raw = pixel[c] as f32 * norm.scale;
            data[c * plane + offset] = (raw - norm.mean[c]) / norm.std[c];
        }
    }

    Ok(PreparedImage {
        shape: [1, 3, height as i64, width as i64],
        data,
        original_size,
    })
}
