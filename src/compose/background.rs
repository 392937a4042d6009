use image::{Rgba, Rgba32FImage, RgbaImage};

/// Pixels at or below this alpha are treated as pure background.
pub const BACKGROUND_ALPHA_CUTOFF: f32 = 0.05;

/// Lower bound for alpha when dividing it out.
pub const ALPHA_FLOOR: f32 = 1e-6;

/// Undo `observed = fg * alpha + bg * (1 - alpha)` for one pixel.
pub fn recover_foreground(observed: [f32; 3], alpha: f32, background: [f32; 3]) -> [f32; 3] {
    let divisor = alpha.clamp(ALPHA_FLOOR, 1.0);
    std::array::from_fn(|c| (observed[c] - background[c] * (1.0 - alpha)) / divisor)
}

/// Composite a foreground color over a background with the given coverage.
pub fn composite(foreground: [f32; 3], alpha: f32, background: [f32; 3]) -> [f32; 3] {
    std::array::from_fn(|c| foreground[c] * alpha + background[c] * (1.0 - alpha))
}

/// Background color inferred from the top-left pixel, in [0, 1].
pub fn infer_background(img: &RgbaImage) -> [f32; 3] {
    match img.width().min(img.height()) {
        0 => [0.0; 3],
        _ => {
            let p = img.get_pixel(0, 0);
            [unit(p[0]), unit(p[1]), unit(p[2])]
        }
    }
}

/// Replace the background `old_bg` of a composited image with `new_bg`.
///
/// The foreground color is recovered algebraically from the observed color
/// and alpha, then recomposited over the new background. Alpha is kept.
pub fn change_background_from(img: &RgbaImage, old_bg: [f32; 3], new_bg: [f32; 3]) -> RgbaImage {
    let mut out = RgbaImage::new(img.width(), img.height());
    for (x, y, p) in img.enumerate_pixels() {
        let alpha = unit(p[3]);
        let rgb = if alpha > BACKGROUND_ALPHA_CUTOFF {
            let observed = [unit(p[0]), unit(p[1]), unit(p[2])];
            let fg = recover_foreground(observed, alpha, old_bg);
            composite(fg, alpha, new_bg)
        } else {
            new_bg
        };
        out.put_pixel(x, y, Rgba([to_u8(rgb[0]), to_u8(rgb[1]), to_u8(rgb[2]), p[3]]));
    }
    out
}

/// Replace the background of an image whose top-left pixel is background.
pub fn change_background(img: &RgbaImage, new_bg: [f32; 3]) -> RgbaImage {
    change_background_from(img, infer_background(img), new_bg)
}

/// Apply [`change_background`] to every view.
pub fn change_backgrounds(imgs: &[RgbaImage], new_bg: [f32; 3]) -> Vec<RgbaImage> {
    imgs.iter().map(|img| change_background(img, new_bg)).collect()
}

/// Float variant of [`change_backgrounds`] used to build optimization targets.
///
/// The recovered foreground is clamped to [0, 1] before recompositing, and
/// the output keeps every channel (alpha included) in [0, 1].
pub fn init_target(imgs: &[RgbaImage], new_bg: [f32; 3]) -> Vec<Rgba32FImage> {
    imgs.iter()
        .map(|img| {
            let old_bg = infer_background(img);
            let mut out = Rgba32FImage::new(img.width(), img.height());
            for (x, y, p) in img.enumerate_pixels() {
                let alpha = unit(p[3]);
                let rgb = if alpha > BACKGROUND_ALPHA_CUTOFF {
                    let observed = [unit(p[0]), unit(p[1]), unit(p[2])];
                    let fg = recover_foreground(observed, alpha, old_bg).map(|c| c.clamp(0.0, 1.0));
                    composite(fg, alpha, new_bg)
                } else {
                    new_bg
                };
                out.put_pixel(x, y, Rgba([rgb[0], rgb[1], rgb[2], alpha]));
            }
            out
        })
        .collect()
}

pub(crate) fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

pub(crate) fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn composited(fg: [f32; 3], alpha: u8, bg: [f32; 3]) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([to_u8(bg[0]), to_u8(bg[1]), to_u8(bg[2]), 0]));
        let rgb = composite(fg, unit(alpha), bg);
        img.put_pixel(2, 2, Rgba([to_u8(rgb[0]), to_u8(rgb[1]), to_u8(rgb[2]), alpha]));
        img
    }

    #[test]
    fn test_recover_foreground_inverts_composite() {
        let bg = [0.2, 0.9, 0.5];
        for &alpha in &[0.06, 0.3, 0.5, 0.99, 1.0] {
            for &fg in &[[0.0, 0.0, 0.0], [1.0, 0.5, 0.25], [0.7, 0.1, 0.9]] {
                let observed = composite(fg, alpha, bg);
                let recovered = recover_foreground(observed, alpha, bg);
                for c in 0..3 {
                    assert_relative_eq!(recovered[c], fg[c], epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_recover_foreground_zero_alpha_is_finite() {
        let recovered = recover_foreground([0.5, 0.5, 0.5], 0.0, [0.5, 0.5, 0.5]);
        assert!(recovered.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_change_background_matches_direct_composite() {
        let fg = [0.8, 0.3, 0.1];
        let white = [1.0, 1.0, 1.0];
        let black = [0.0, 0.0, 0.0];

        for alpha in [40u8, 128, 200, 255] {
            let img = composited(fg, alpha, white);
            let out = change_background(&img, black);
            let expected = composite(fg, unit(alpha), black);
            let p = out.get_pixel(2, 2);
            for c in 0..3 {
                let diff = (p[c] as i32 - to_u8(expected[c]) as i32).abs();
                assert!(diff <= 2, "alpha {} channel {} off by {}", alpha, c, diff);
            }
            assert_eq!(p[3], alpha);
        }
    }

    #[test]
    fn test_change_background_transparent_pixels_take_new_color() {
        let img = composited([0.1, 0.2, 0.3], 10, [1.0, 1.0, 1.0]);
        let out = change_background(&img, [0.0, 1.0, 0.0]);
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 255, 0, 0]));
        // alpha 10/255 is below the cutoff
        assert_eq!(out.get_pixel(2, 2), &Rgba([0, 255, 0, 10]));
    }

    #[test]
    fn test_same_background_round_trip() {
        let bg = [0.5, 0.5, 0.5];
        let img = composited([0.9, 0.05, 0.4], 180, bg);
        let out = change_background_from(&img, bg, bg);
        assert_eq!(out, img);
    }

    #[test]
    fn test_init_target_clamps_and_keeps_alpha() {
        // Observed darker than the background allows at this alpha
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 0]));
        img.put_pixel(1, 1, Rgba([0, 0, 0, 64]));

        let targets = init_target(&[img], [0.0, 0.0, 0.0]);
        assert_eq!(targets.len(), 1);
        for p in targets[0].pixels() {
            assert!(p.0.iter().all(|c| (0.0..=1.0).contains(c)));
        }
        let p = targets[0].get_pixel(1, 1);
        assert_relative_eq!(p[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(p[3], 64.0 / 255.0, epsilon = 1e-6);
    }
}
