use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

use super::segment::remove_background;
use crate::error::{PrepError, Result};

/// Alpha value a pixel must exceed to count as foreground when cropping.
pub const FOREGROUND_ALPHA_THRESHOLD: u8 = 60;

/// Longest side accepted by [`preprocess_image`]; larger inputs are shrunk.
pub const MAX_RESOLUTION: u32 = 2048;

/// Pad an image to a square canvas filled with `fill`, centering the original.
///
/// The canvas side is the longer of width and height. The original is placed
/// at `((side - w) / 2, (side - h) / 2)` without any resampling.
pub fn expand_to_square(img: &RgbaImage, fill: Rgba<u8>) -> RgbaImage {
    let (width, height) = img.dimensions();
    if width == height {
        return img.clone();
    }

    let side = width.max(height);
    let mut canvas = RgbaImage::from_pixel(side, side, fill);
    let x = (side - width) / 2;
    let y = (side - height) / 2;
    imageops::replace(&mut canvas, img, x as i64, y as i64);
    canvas
}

/// Inclusive bounding box `(x_min, y_min, x_max, y_max)` of pixels whose alpha
/// exceeds `threshold`.
pub fn alpha_bounds(img: &RgbaImage, threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel[3] <= threshold {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds
}

/// Crop an RGBA image to the bounding box of its foreground.
pub fn foreground_crop(img: &RgbaImage) -> Result<RgbaImage> {
    let (x0, y0, x1, y1) = alpha_bounds(img, FOREGROUND_ALPHA_THRESHOLD).ok_or(
        PrepError::EmptyForeground {
            threshold: FOREGROUND_ALPHA_THRESHOLD,
        },
    )?;

    debug!(x0, y0, x1, y1, "foreground bounds");
    Ok(imageops::crop_imm(img, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image())
}

/// Prepare a single input photo for multi-view generation.
///
/// Shrinks the image to fit [`MAX_RESOLUTION`], removes the background when
/// the image carries no alpha channel, crops to the foreground and pads to a
/// square with a transparent `(background, background, background)` fill.
pub fn preprocess_image(img: DynamicImage, background: u8) -> Result<RgbaImage> {
    let mut img = img;
    if img.width() > MAX_RESOLUTION || img.height() > MAX_RESOLUTION {
        img = img.resize(MAX_RESOLUTION, MAX_RESOLUTION, FilterType::Lanczos3);
    }

    let rgba = if img.color().has_alpha() {
        img.to_rgba8()
    } else {
        remove_background(&img)?
    };

    let cropped = foreground_crop(&rgba)?;
    Ok(expand_to_square(
        &cropped,
        Rgba([background, background, background, 0]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]))
    }

    #[test]
    fn test_expand_wide_image_centers_vertically() {
        let img = gradient(100, 50);
        let out = expand_to_square(&img, Rgba([255, 255, 255, 255]));

        assert_eq!(out.dimensions(), (100, 100));
        for x in 0..100 {
            assert_eq!(out.get_pixel(x, 0), &Rgba([255, 255, 255, 255]));
            assert_eq!(out.get_pixel(x, 24), &Rgba([255, 255, 255, 255]));
            assert_eq!(out.get_pixel(x, 75), &Rgba([255, 255, 255, 255]));
            assert_eq!(out.get_pixel(x, 99), &Rgba([255, 255, 255, 255]));
        }
        for y in 0..50 {
            for x in 0..100 {
                assert_eq!(out.get_pixel(x, y + 25), img.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_expand_tall_image_centers_horizontally() {
        let img = gradient(31, 60);
        let out = expand_to_square(&img, Rgba([0, 0, 0, 0]));

        assert_eq!(out.dimensions(), (60, 60));
        // (60 - 31) / 2 == 14
        assert_eq!(out.get_pixel(13, 10), &Rgba([0, 0, 0, 0]));
        assert_eq!(out.get_pixel(14, 10), img.get_pixel(0, 10));
        assert_eq!(out.get_pixel(44, 59), img.get_pixel(30, 59));
        assert_eq!(out.get_pixel(45, 59), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_expand_square_is_unchanged() {
        let img = gradient(16, 16);
        assert_eq!(expand_to_square(&img, Rgba([1, 2, 3, 4])), img);
    }

    #[test]
    fn test_foreground_crop_uses_threshold() {
        let mut img = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 0, 0]));
        img.put_pixel(3, 2, Rgba([10, 10, 10, 61]));
        img.put_pixel(12, 7, Rgba([10, 10, 10, 255]));
        // Exactly at threshold is background
        img.put_pixel(18, 9, Rgba([10, 10, 10, 60]));

        let cropped = foreground_crop(&img).unwrap();
        assert_eq!(cropped.dimensions(), (10, 6));
        assert_eq!(cropped.get_pixel(0, 0)[3], 61);
        assert_eq!(cropped.get_pixel(9, 5)[3], 255);
    }

    #[test]
    fn test_foreground_crop_empty_is_error() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 10]));
        assert!(matches!(
            foreground_crop(&img),
            Err(PrepError::EmptyForeground { threshold: 60 })
        ));
    }

    #[test]
    fn test_preprocess_rgba_input() {
        let mut img = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 0]));
        for y in 10..20 {
            for x in 5..35 {
                img.put_pixel(x, y, Rgba([200, 100, 50, 255]));
            }
        }

        let out = preprocess_image(DynamicImage::ImageRgba8(img), 255).unwrap();
        assert_eq!(out.dimensions(), (30, 30));
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 255, 255, 0]));
        assert_eq!(out.get_pixel(15, 15), &Rgba([200, 100, 50, 255]));
    }
}
