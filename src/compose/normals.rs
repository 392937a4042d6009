use image::{GrayImage, Luma, Rgba, RgbaImage};
use nalgebra::{Rotation3, Vector3};

use super::background::{to_u8, unit, BACKGROUND_ALPHA_CUTOFF};

/// Summed per-channel difference above which a normal-map pixel is foreground.
pub const NORMAL_MASK_TOLERANCE: i32 = 80;

/// Rotation about the vertical (+Y) axis by `degrees`.
///
/// Matches `[[c, 0, s], [0, 1, 0], [-s, 0, c]]`.
pub fn vertical_rotation(degrees: f32) -> Rotation3<f32> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), degrees.to_radians())
}

/// Rotate a single direction about the vertical axis.
pub fn rotate_normal_by_angle(normal: Vector3<f32>, degrees: f32) -> Vector3<f32> {
    vertical_rotation(degrees) * normal
}

/// Decode an 8-bit normal-map pixel to a direction in [-1, 1].
pub fn decode_normal(p: &Rgba<u8>) -> Vector3<f32> {
    Vector3::new(unit(p[0]), unit(p[1]), unit(p[2])) * 2.0 - Vector3::repeat(1.0)
}

fn encode_normal(n: Vector3<f32>, alpha: u8) -> Rgba<u8> {
    let rgb = (n + Vector3::repeat(1.0)) / 2.0;
    Rgba([to_u8(rgb.x), to_u8(rgb.y), to_u8(rgb.z), alpha])
}

/// Angle of view `index` in a ring of `n_views`, in degrees.
pub fn view_angle(index: usize, n_views: usize) -> f32 {
    index as f32 * (360.0 / n_views as f32)
}

/// Rotate every normal of an RGBA normal map about the vertical axis.
///
/// Alpha is passed through; the background is left as rotated.
pub fn rotate_normal_map_by_angle(img: &RgbaImage, degrees: f32) -> RgbaImage {
    let rotation = vertical_rotation(degrees);
    let mut out = RgbaImage::new(img.width(), img.height());
    for (x, y, p) in img.enumerate_pixels() {
        out.put_pixel(x, y, encode_normal(rotation * decode_normal(p), p[3]));
    }
    out
}

/// Express every view's normals in the frame of the first view.
///
/// View `i` of `N` is rotated by `direction * i * 360 / N` degrees. After the
/// rotation the encoded color is multiplied by alpha, so background pixels
/// become black while alpha is preserved.
pub fn rotate_views(views: &[RgbaImage], direction: f32) -> Vec<RgbaImage> {
    let n_views = views.len();
    views
        .iter()
        .enumerate()
        .map(|(idx, view)| {
            let rotation = vertical_rotation(direction * view_angle(idx, n_views));
            let mut out = RgbaImage::new(view.width(), view.height());
            for (x, y, p) in view.enumerate_pixels() {
                let alpha = unit(p[3]);
                let rgb = ((rotation * decode_normal(p)) + Vector3::repeat(1.0)) / 2.0 * alpha;
                out.put_pixel(x, y, Rgba([to_u8(rgb.x), to_u8(rgb.y), to_u8(rgb.z), p[3]]));
            }
            out
        })
        .collect()
}

/// Recomposite each view's normals over that view's own background normal.
///
/// The backdrop of view `i` is the canonical normal `(0, 0, 1)` rotated by
/// `i * 360 / N` degrees. The old backdrop is read from the top-left pixel
/// and divided out of every pixel whose alpha exceeds the cutoff before the
/// whole image is recomposited over the new backdrop.
pub fn recompose_normal_background(views: &[RgbaImage]) -> Vec<RgbaImage> {
    let n_views = views.len();
    views
        .iter()
        .enumerate()
        .map(|(idx, view)| {
            let target = rotate_normal_by_angle(Vector3::z(), view_angle(idx, n_views));
            let old_bg = match view.width().min(view.height()) {
                0 => Vector3::zeros(),
                _ => decode_normal(view.get_pixel(0, 0)),
            };

            let mut out = RgbaImage::new(view.width(), view.height());
            for (x, y, p) in view.enumerate_pixels() {
                let alpha = unit(p[3]);
                let mut normal = decode_normal(p);
                if alpha > BACKGROUND_ALPHA_CUTOFF {
                    normal = (normal - old_bg * (1.0 - alpha)) / alpha;
                }
                let recomposed = normal * alpha + target * (1.0 - alpha);
                out.put_pixel(x, y, encode_normal(recomposed, p[3]));
            }
            out
        })
        .collect()
}

/// Foreground mask of a normal map rendered over a flat background.
///
/// The top-left pixel is the reference background; pixels whose summed
/// absolute RGB difference exceeds [`NORMAL_MASK_TOLERANCE`] are marked 255.
pub fn normal_map_mask(img: &RgbaImage) -> GrayImage {
    let mut mask = GrayImage::new(img.width(), img.height());
    if img.width() == 0 || img.height() == 0 {
        return mask;
    }

    let base = *img.get_pixel(0, 0);
    for (x, y, p) in img.enumerate_pixels() {
        let diff: i32 = (0..3).map(|c| (p[c] as i32 - base[c] as i32).abs()).sum();
        let value = if diff > NORMAL_MASK_TOLERANCE { 255 } else { 0 };
        mask.put_pixel(x, y, Luma([value]));
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn normal_view(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 37 % 256) as u8, (y * 53 % 256) as u8, 200, 255])
        })
    }

    #[test]
    fn test_rotation_matrix_layout() {
        let r = vertical_rotation(90.0);
        let m = r.matrix();
        assert_relative_eq!(m[(0, 2)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(m[(2, 0)], -1.0, epsilon = 1e-6);
        assert_relative_eq!(m[(1, 1)], 1.0, epsilon = 1e-6);

        let n = rotate_normal_by_angle(Vector3::z(), 90.0);
        assert_relative_eq!(n, Vector3::x(), epsilon = 1e-6);
    }

    #[test]
    fn test_first_view_is_identity() {
        let views = vec![normal_view(8, 8), normal_view(8, 8), normal_view(8, 8), normal_view(8, 8)];
        let rotated = rotate_views(&views, 1.0);
        assert_eq!(rotated.len(), 4);
        assert_eq!(rotated[0], views[0]);
    }

    #[test]
    fn test_full_turn_is_identity() {
        let view = normal_view(6, 6);
        let out = rotate_normal_map_by_angle(&view, 360.0);
        for (a, b) in out.pixels().zip(view.pixels()) {
            for c in 0..4 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_rotate_views_blackens_background() {
        let mut view = normal_view(4, 4);
        view.put_pixel(0, 0, Rgba([128, 128, 255, 0]));
        let rotated = rotate_views(&[view.clone(), view], -1.0);
        assert_eq!(rotated[1].get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_rotate_views_direction() {
        // Front-facing normal in the second of four views
        let front = RgbaImage::from_pixel(1, 1, Rgba([128, 128, 255, 255]));
        let views = vec![front.clone(), front.clone(), front.clone(), front];
        let rotated = rotate_views(&views, 1.0);
        let n = decode_normal(rotated[1].get_pixel(0, 0));
        assert!(n.x > 0.95, "expected +X after 90 degrees, got {:?}", n);

        let rotated = rotate_views(&views[..2], -1.0);
        let n = decode_normal(rotated[1].get_pixel(0, 0));
        // 180 degrees either way flips Z
        assert!(n.z < -0.95);
    }

    #[test]
    fn test_recompose_background_per_view() {
        // Flat background encoded as the front normal, one opaque pixel
        let mut view = RgbaImage::from_pixel(3, 3, Rgba([128, 128, 255, 0]));
        view.put_pixel(1, 1, Rgba([255, 128, 128, 255]));
        let views = vec![view.clone(), view.clone(), view.clone(), view];

        let out = recompose_normal_background(&views);
        assert_eq!(out.len(), 4);

        // View 1 backdrop is (0,0,1) rotated by 90 degrees: +X
        let bg = decode_normal(out[1].get_pixel(0, 0));
        assert_relative_eq!(bg.x, 1.0, epsilon = 0.01);
        assert_relative_eq!(bg.z, 0.0, epsilon = 0.01);

        // Opaque pixels keep their normal
        for view in &out {
            assert_eq!(view.get_pixel(1, 1), &Rgba([255, 128, 128, 255]));
        }
    }

    #[test]
    fn test_normal_map_mask() {
        let mut img = RgbaImage::from_pixel(5, 5, Rgba([255, 255, 255, 255]));
        img.put_pixel(2, 2, Rgba([128, 128, 255, 255]));
        img.put_pixel(3, 3, Rgba([230, 230, 250, 255]));

        let mask = normal_map_mask(&img);
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        assert_eq!(mask.get_pixel(3, 3)[0], 0);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_empty_view_list() {
        assert!(rotate_views(&[], 1.0).is_empty());
        assert!(recompose_normal_background(&[]).is_empty());
    }
}
