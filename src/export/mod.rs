//! Writing cleaned meshes to OBJ and GLB.

pub mod glb;
pub mod obj;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PrepError, Result};
use crate::mesh::filters::remove_unreferenced_vertices;
use crate::mesh::ColoredMesh;

pub use glb::{patch_vertex_color_material, write_glb};
pub use obj::write_obj;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Convert vertex colors from sRGB to linear before writing.
    pub srgb_to_linear: bool,
}

/// sRGB transfer function inverse, clipped to [0, 1].
pub fn srgb_to_linear(c: f32) -> f32 {
    let linear = if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    };
    linear.clamp(0.0, 1.0)
}

/// Save a mesh as `.glb` or `.obj`, chosen by extension.
///
/// GLB output is turned 180° about +Y and gets a vertex-color material.
pub fn save_mesh(mesh: &ColoredMesh, path: &Path, options: &ExportOptions) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let is_glb = match extension.as_str() {
        "glb" => true,
        "obj" => false,
        _ => return Err(PrepError::UnsupportedFormat { extension }),
    };

    let mut out = mesh.clone();
    if is_glb {
        for p in &mut out.positions {
            p.x = -p.x;
            p.z = -p.z;
        }
        if let Some(normals) = out.normals.as_mut() {
            for n in normals {
                n.x = -n.x;
                n.z = -n.z;
            }
        }
    }
    if options.srgb_to_linear {
        for color in &mut out.colors {
            *color = color.map(srgb_to_linear);
        }
    }

    out.validate()?;
    remove_unreferenced_vertices(&mut out);

    if is_glb {
        write_glb(&out, path)?;
        patch_vertex_color_material(path)?;
    } else {
        write_obj(&out, path)?;
    }

    info!("Saved {} vertices, {} faces to {:?}", out.vertex_count(), out.face_count(), path);
    Ok(())
}

/// Save as `<prefix>.glb`, optionally suffixed with the current unix time.
///
/// Colors are converted from sRGB to linear. Any extension on `prefix` is
/// dropped. Returns the written path.
pub fn save_glb_with_prefix(prefix: &Path, mesh: &ColoredMesh, with_timestamp: bool) -> Result<PathBuf> {
    let mut base = prefix.with_extension("").into_os_string();
    if with_timestamp {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        base.push(format!("_{}", seconds));
    }
    base.push(".glb");

    let path = PathBuf::from(base);
    save_mesh(mesh, &path, &ExportOptions { srgb_to_linear: true })?;
    Ok(path)
}
