//! Input discovery and decoding into the engine's [`ImageTensor`].

use std::path::{Path, PathBuf};

use derma_core::types::CHANNELS;
use derma_core::ImageTensor;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use walkdir::WalkDir;

/// Collect supported image files under each input, sorted per input.
///
/// A file given explicitly is kept even if its extension is unknown; the
/// decoder decides.
pub fn discover(inputs: &[PathBuf], supported_formats: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_supported(e.path(), supported_formats))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        files.extend(found);
    }
    files
}

fn is_supported(path: &Path, supported_formats: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| supported_formats.iter().any(|f| f.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Decode an image file into a square `[1, 3, size, size]` tensor in `[0, 1]`.
pub fn load(path: &Path, size: u32) -> anyhow::Result<ImageTensor> {
    let image = image::open(path)
        .map_err(|e| anyhow::anyhow!("cannot decode {}: {e}", path.display()))?;
    Ok(to_tensor(&image, size)?)
}

/// Resize and scale a decoded image. Per-model normalization happens later.
pub fn to_tensor(image: &DynamicImage, size: u32) -> Result<ImageTensor, derma_core::InferenceError> {
    let rgb = image.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();
    let side = size as usize;
    let plane = side * side;

    let mut data = vec![0.0_f32; CHANNELS * plane];
    for (i, pixel) in rgb.as_raw().chunks_exact(CHANNELS).enumerate() {
        for (c, &value) in pixel.iter().enumerate() {
            // NCHW: c * H * W + y * W + x, and i = y * W + x
            data[c * plane + i] = value as f32 / 255.0;
        }
    }

    let array = Array4::from_shape_vec((1, CHANNELS, side, side), data)
        .map_err(|e| derma_core::InferenceError::InvalidInput(e.to_string()))?;
    ImageTensor::new(array)
}
