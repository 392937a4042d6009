//! Image and normal-map compositing for multi-view inputs.

pub mod background;
pub mod canvas;
pub mod normals;
pub mod segment;

pub use background::{
    change_background, change_background_from, change_backgrounds, composite, infer_background,
    init_target, recover_foreground,
};
pub use canvas::{expand_to_square, foreground_crop, preprocess_image};
pub use normals::{
    normal_map_mask, recompose_normal_background, rotate_normal_by_angle,
    rotate_normal_map_by_angle, rotate_views,
};
pub use segment::{init_session, remove_background, SessionConfig};
