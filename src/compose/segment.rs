//! Background removal with a U²-Net style salient-object model.
//!
//! The ONNX session is process-wide and created lazily on first use. Builds
//! without the `rembg` feature keep the same API but report
//! [`PrepError::SegmentationUnavailable`].

use image::{DynamicImage, RgbaImage};
use std::path::PathBuf;

use crate::error::{PrepError, Result};

/// Environment variable overriding the model location.
pub const MODEL_PATH_ENV: &str = "MVPREP_REMBG_MODEL";

/// Side length of the square model input.
pub const MODEL_INPUT_SIZE: u32 = 320;

/// Settings used when the segmentation session is created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model_path: PathBuf,
    /// Accelerator device to try first.
    pub device_id: i32,
    /// Arena limit on the accelerator, in bytes.
    pub gpu_mem_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let model_path = std::env::var_os(MODEL_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = std::env::var_os("HOME").unwrap_or_default();
                PathBuf::from(home).join(".u2net").join("u2net.onnx")
            });

        Self {
            model_path,
            device_id: 0,
            gpu_mem_limit: 8 * 1024 * 1024 * 1024,
        }
    }
}

#[cfg(feature = "rembg")]
mod session {
    use image::imageops::{self, FilterType};
    use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgba, RgbaImage};
    use ndarray::Array4;
    use ort::execution_providers::CUDAExecutionProvider;
    use ort::session::Session;
    use ort::value::Value;
    use std::sync::{Mutex, OnceLock};
    use tracing::info;

    use super::{SessionConfig, MODEL_INPUT_SIZE};
    use crate::error::{PrepError, Result};

    // ImageNet normalization constants
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    static SESSION: OnceLock<Mutex<Session>> = OnceLock::new();

    pub fn init_session(config: &SessionConfig) -> Result<()> {
        if SESSION.get().is_some() {
            return Ok(());
        }

        info!(model = %config.model_path.display(), "creating background removal session");
        let cuda = CUDAExecutionProvider::default()
            .with_device_id(config.device_id)
            .with_memory_limit(config.gpu_mem_limit)
            .build();
        let session = Session::builder()?
            .with_execution_providers([cuda])?
            .commit_from_file(&config.model_path)?;

        // Racing initializers: first one wins
        let _ = SESSION.set(Mutex::new(session));
        Ok(())
    }

    pub fn remove_background(img: &DynamicImage) -> Result<RgbaImage> {
        init_session(&SessionConfig::default())?;
        let lock = SESSION
            .get()
            .ok_or_else(|| PrepError::Segmentation("session was not initialized".to_string()))?;
        let mut session = lock
            .lock()
            .map_err(|_| PrepError::Segmentation("session lock poisoned".to_string()))?;

        let size = MODEL_INPUT_SIZE;
        let resized = img.resize_exact(size, size, FilterType::Lanczos3);
        let max_value = resized
            .pixels()
            .flat_map(|(_, _, p)| [p[0], p[1], p[2]])
            .max()
            .unwrap_or(0)
            .max(1) as f32;

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, p) in resized.pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (p[c] as f32 / max_value - MEAN[c]) / STD[c];
            }
        }

        let input_val = Value::from_array(input)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input.1".into());
        let outputs = session.run(ort::inputs![input_name => input_val])?;
        let arr = outputs[0].try_extract_array::<f32>()?;

        let shape = arr.shape();
        let (oh, ow) = match shape.len() {
            4 => (shape[2], shape[3]),
            3 => (shape[1], shape[2]),
            2 => (shape[0], shape[1]),
            _ => {
                return Err(PrepError::Segmentation(format!(
                    "unexpected output shape {:?}",
                    shape
                )));
            }
        };

        // First channel holds the saliency map
        let flat: Vec<f32> = arr.iter().copied().take(oh * ow).collect();
        let (min_v, max_v) = flat
            .iter()
            .fold((f32::MAX, f32::MIN), |(mn, mx), &v| (mn.min(v), mx.max(v)));
        let range = (max_v - min_v).max(1e-6);

        let mask = GrayImage::from_fn(ow as u32, oh as u32, |x, y| {
            let v = flat[y as usize * ow + x as usize];
            Luma([(((v - min_v) / range) * 255.0).round() as u8])
        });
        let mask = imageops::resize(&mask, img.width(), img.height(), FilterType::Lanczos3);

        let rgb = img.to_rgb8();
        Ok(RgbaImage::from_fn(img.width(), img.height(), |x, y| {
            let p = rgb.get_pixel(x, y);
            Rgba([p[0], p[1], p[2], mask.get_pixel(x, y)[0]])
        }))
    }
}

/// Create the shared session now instead of on first use.
#[cfg(feature = "rembg")]
pub fn init_session(config: &SessionConfig) -> Result<()> {
    session::init_session(config)
}

/// Create the shared session now instead of on first use.
#[cfg(not(feature = "rembg"))]
pub fn init_session(_config: &SessionConfig) -> Result<()> {
    Err(PrepError::SegmentationUnavailable)
}

/// Cut the salient object out of an opaque image, returning it with alpha.
#[cfg(feature = "rembg")]
pub fn remove_background(img: &DynamicImage) -> Result<RgbaImage> {
    session::remove_background(img)
}

/// Cut the salient object out of an opaque image, returning it with alpha.
#[cfg(not(feature = "rembg"))]
pub fn remove_background(_img: &DynamicImage) -> Result<RgbaImage> {
    Err(PrepError::SegmentationUnavailable)
}
