// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for Florence-2

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;
use tracing::debug;

/// Target size for Florence-2 vision encoder
pub const FLORENCE_INPUT_SIZE: u32 = 768;

/// ImageNet normalization mean values (Florence-2 uses ImageNet, not CLIP)
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Bicubic, as used by the Florence-2 image processor
const RESAMPLE: FilterType = FilterType::CatmullRom;

/// Resize strategy applied before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Resize to exact size (may distort aspect ratio)
    #[default]
    Stretch,
    /// Resize keeping aspect ratio with center crop
    CenterCrop,
    /// Resize keeping aspect ratio with padding (letterbox)
    Letterbox,
}

impl std::str::FromStr for ResizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stretch" => Ok(Self::Stretch),
            "center-crop" | "center_crop" | "crop" => Ok(Self::CenterCrop),
            "letterbox" | "pad" => Ok(Self::Letterbox),
            other => Err(format!("unknown resize mode '{}'", other)),
        }
    }
}

/// Preprocess an image for the Florence-2 vision encoder
///
/// Steps:
/// 1. Resize to FLORENCE_INPUT_SIZE x FLORENCE_INPUT_SIZE using `mode`
/// 2. Convert to RGB
/// 3. Normalize with ImageNet mean/std: (pixel/255 - mean) / std
/// 4. Convert to NCHW tensor format [1, 3, H, W]
pub fn preprocess_for_florence(image: &DynamicImage, mode: ResizeMode) -> Array4<f32> {
    if !matches!(image, DynamicImage::ImageRgb8(_)) {
        debug!("Image mode is not RGB, converting...");
    }

    let resized = resize_for_encoder(image, FLORENCE_INPUT_SIZE, mode);
    let rgb = resized.to_rgb8();

    let size = FLORENCE_INPUT_SIZE as usize;
    let mut tensor = Array4::zeros((1, 3, size, size));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    tensor
}

/// Resize image to target size using specified mode
pub fn resize_for_encoder(image: &DynamicImage, target_size: u32, mode: ResizeMode) -> DynamicImage {
    let (orig_w, orig_h) = image.dimensions();

    if orig_w == 0 || orig_h == 0 {
        return DynamicImage::ImageRgb8(RgbImage::from_pixel(
            target_size,
            target_size,
            Rgb([128, 128, 128]),
        ));
    }

    match mode {
        ResizeMode::Stretch => image.resize_exact(target_size, target_size, RESAMPLE),
        ResizeMode::CenterCrop => center_crop_resize(image, target_size),
        ResizeMode::Letterbox => letterbox_resize(image, target_size),
    }
}

/// Resize with center crop (no distortion, may lose edges)
fn center_crop_resize(image: &DynamicImage, target_size: u32) -> DynamicImage {
    let (orig_w, orig_h) = image.dimensions();

    // Cover the target with the larger of the two scales
    let scale = (target_size as f32 / orig_w as f32).max(target_size as f32 / orig_h as f32);

    let new_w = ((orig_w as f32 * scale).round() as u32).max(target_size);
    let new_h = ((orig_h as f32 * scale).round() as u32).max(target_size);

    let resized = image.resize_exact(new_w, new_h, RESAMPLE);

    let crop_x = (new_w - target_size) / 2;
    let crop_y = (new_h - target_size) / 2;

    resized.crop_imm(crop_x, crop_y, target_size, target_size)
}

/// Resize with letterbox (padding, no distortion, keeps all content)
fn letterbox_resize(image: &DynamicImage, target_size: u32) -> DynamicImage {
    let (orig_w, orig_h) = image.dimensions();

    // Fit within the target with the smaller of the two scales
    let scale = (target_size as f32 / orig_w as f32).min(target_size as f32 / orig_h as f32);

    let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, target_size);

    let resized = image.resize_exact(new_w, new_h, RESAMPLE).to_rgb8();

    let mut output = RgbImage::from_pixel(target_size, target_size, Rgb([128, 128, 128]));
    let offset_x = (target_size - new_w) / 2;
    let offset_y = (target_size - new_h) / 2;
    image::imageops::replace(&mut output, &resized, offset_x as i64, offset_y as i64);

    DynamicImage::ImageRgb8(output)
}
