use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::types::{ColoredMesh, DEFAULT_GRAY};
use crate::error::{PrepError, Result};

/// Colors given to a mesh whose file carries no vertex colors at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFallback {
    /// Uniform [`DEFAULT_GRAY`].
    #[default]
    Gray,
    /// Vertex normals mapped to RGB as `n / 2 + 0.5`.
    Normals,
}

/// Load mesh from file (supports .obj, .glb and .gltf)
pub fn load_mesh(input: &Path, mesh_name: Option<&str>) -> Result<ColoredMesh> {
    load_mesh_with_fallback(input, mesh_name, ColorFallback::Gray)
}

/// Like [`load_mesh`], choosing how an uncolored mesh is colored.
///
/// Files with colors on only some vertices keep gray for the rest.
pub fn load_mesh_with_fallback(
    input: &Path,
    mesh_name: Option<&str>,
    fallback: ColorFallback,
) -> Result<ColoredMesh> {
    let extension = input
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let (mut mesh, has_colors) = match extension.as_str() {
        "obj" => read_obj(input)?,
        "glb" | "gltf" => read_glb(input, mesh_name)?,
        _ => return Err(PrepError::UnsupportedFormat { extension }),
    };

    if !has_colors && fallback == ColorFallback::Normals {
        debug!("No vertex colors in {:?}, coloring by normal", input);
        color_by_normals(&mut mesh);
    }
    Ok(mesh)
}

fn color_by_normals(mesh: &mut ColoredMesh) {
    if mesh.normals.is_none() {
        mesh.compute_vertex_normals();
    }
    if let Some(normals) = &mesh.normals {
        for (color, n) in mesh.colors.iter_mut().zip(normals) {
            *color = [n.x, n.y, n.z].map(|c| (c * 0.5 + 0.5).clamp(0.0, 1.0));
        }
    }
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> PrepError {
    PrepError::Parse {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

/// Resolve a 1-based (or negative, relative) OBJ index.
fn obj_index(token: &str, vertex_count: usize, path: &Path, line: usize) -> Result<u32> {
    let raw = token.split('/').next().unwrap_or_default();
    let index: i64 = raw
        .parse()
        .map_err(|_| parse_error(path, line, format!("bad face index '{}'", token)))?;
    let resolved = if index < 0 {
        vertex_count as i64 + index
    } else {
        index - 1
    };
    if resolved < 0 || resolved >= vertex_count as i64 {
        return Err(parse_error(
            path,
            line,
            format!("face index {} out of range ({} vertices)", index, vertex_count),
        ));
    }
    Ok(resolved as u32)
}

/// Load an OBJ file with optional `v x y z r g b` vertex colors.
///
/// Polygons are fan-triangulated; vertices without a color get gray.
pub fn load_mesh_from_obj(path: &Path) -> Result<ColoredMesh> {
    read_obj(path).map(|(mesh, _)| mesh)
}

fn read_obj(path: &Path) -> Result<(ColoredMesh, bool)> {
    let reader = BufReader::new(File::open(path)?);

    let mut positions = Vec::new();
    let mut colors = Vec::new();
    let mut faces = Vec::new();
    let mut has_colors = false;

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = line_idx + 1;
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let values = tokens
                    .map(|t| t.parse::<f32>())
                    .collect::<std::result::Result<Vec<f32>, _>>()
                    .map_err(|e| parse_error(path, line_no, format!("bad vertex: {}", e)))?;
                if values.len() < 3 {
                    return Err(parse_error(path, line_no, "vertex needs 3 coordinates"));
                }
                positions.push(Point3::new(values[0], values[1], values[2]));
                colors.push(if values.len() >= 6 {
                    has_colors = true;
                    [values[3], values[4], values[5]]
                } else {
                    DEFAULT_GRAY
                });
            }
            Some("f") => {
                let corners = tokens
                    .map(|t| obj_index(t, positions.len(), path, line_no))
                    .collect::<Result<Vec<u32>>>()?;
                if corners.len() < 3 {
                    return Err(parse_error(path, line_no, "face needs at least 3 vertices"));
                }
                for i in 1..corners.len() - 1 {
                    faces.push([corners[0], corners[i], corners[i + 1]]);
                }
            }
            _ => {}
        }
    }

    debug!("Read {} vertices, {} faces from {:?}", positions.len(), faces.len(), path);
    Ok((ColoredMesh::new(positions, faces, colors)?, has_colors))
}

#[derive(Default)]
struct MeshAccumulator {
    positions: Vec<Point3<f32>>,
    colors: Vec<[f32; 3]>,
    normals: Vec<Vector3<f32>>,
    faces: Vec<[u32; 3]>,
    missing_normals: bool,
    has_colors: bool,
}

impl MeshAccumulator {
    fn add_mesh(&mut self, mesh: &gltf::Mesh, buffers: &[gltf::buffer::Data], transform: &Matrix4<f32>) -> Result<()> {
        let normal_matrix: Matrix3<f32> = transform
            .fixed_view::<3, 3>(0, 0)
            .into_owned()
            .try_inverse()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix3::identity);

        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                warn!("Skipping non-triangle primitive in mesh {}", mesh.name().unwrap_or("<unnamed>"));
                continue;
            }

            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let vertex_offset = self.positions.len() as u32;

            let positions = reader
                .read_positions()
                .ok_or_else(|| PrepError::InvalidMesh("Primitive has no position data".to_string()))?;
            let pos_vec: Vec<[f32; 3]> = positions.collect();
            self.positions.extend(
                pos_vec
                    .iter()
                    .map(|p| transform.transform_point(&Point3::from(*p))),
            );

            match reader.read_colors(0) {
                Some(colors) => {
                    self.has_colors = true;
                    self.colors.extend(colors.into_rgb_f32());
                }
                None => self
                    .colors
                    .extend(std::iter::repeat(DEFAULT_GRAY).take(pos_vec.len())),
            }

            match reader.read_normals() {
                Some(normals) => self.normals.extend(normals.map(|n| {
                    (normal_matrix * Vector3::from(n))
                        .try_normalize(f32::EPSILON)
                        .unwrap_or_else(Vector3::zeros)
                })),
                None => self.missing_normals = true,
            }

            // Get indices
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().map(|i| i + vertex_offset).collect(),
                // Generate indices for non-indexed geometry
                None => (0..pos_vec.len() as u32).map(|i| i + vertex_offset).collect(),
            };
            if indices.len() % 3 != 0 {
                return Err(PrepError::InvalidMesh(
                    "Index count is not a multiple of 3 (non-triangular faces)".to_string(),
                ));
            }
            self.faces
                .extend(indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]));
        }
        Ok(())
    }

    fn visit(&mut self, node: gltf::Node, parent: &Matrix4<f32>, buffers: &[gltf::buffer::Data]) -> Result<()> {
        let transform = parent * Matrix4::from(node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            self.add_mesh(&mesh, buffers, &transform)?;
        }
        for child in node.children() {
            self.visit(child, &transform, buffers)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<(ColoredMesh, bool)> {
        let mut mesh = ColoredMesh::new(self.positions, self.faces, self.colors)?;
        if !self.missing_normals && self.normals.len() == mesh.vertex_count() {
            mesh.normals = Some(self.normals);
        }
        Ok((mesh, self.has_colors))
    }
}

/// Load mesh from GLB/glTF file
///
/// Without `mesh_name`, every mesh instanced by the scene is concatenated
/// with its node transform applied. With a name, only that mesh is read, in
/// its local coordinates.
pub fn load_mesh_from_glb(path: &Path, mesh_name: Option<&str>) -> Result<ColoredMesh> {
    read_glb(path, mesh_name).map(|(mesh, _)| mesh)
}

fn read_glb(path: &Path, mesh_name: Option<&str>) -> Result<(ColoredMesh, bool)> {
    let (document, buffers, _images) = gltf::import(path)?;

    let meshes: Vec<_> = document.meshes().collect();

    if meshes.is_empty() {
        return Err(PrepError::InvalidMesh("GLB file contains no meshes".to_string()));
    }

    let mut acc = MeshAccumulator::default();

    match mesh_name {
        Some(name) => {
            let selected_mesh = meshes.iter().find(|m| m.name() == Some(name)).ok_or_else(|| {
                let mesh_list: Vec<String> = meshes
                    .iter()
                    .map(|m| m.name().unwrap_or("<unnamed>").to_string())
                    .collect();
                PrepError::InvalidMesh(format!(
                    "Mesh '{}' not found in GLB file.\nAvailable meshes: {}",
                    name,
                    mesh_list.join(", ")
                ))
            })?;
            debug!("Loading mesh: {}", name);
            acc.add_mesh(selected_mesh, &buffers, &Matrix4::identity())?;
        }
        None => {
            let scene = document.default_scene().or_else(|| document.scenes().next());
            match scene {
                Some(scene) => {
                    for node in scene.nodes() {
                        acc.visit(node, &Matrix4::identity(), &buffers)?;
                    }
                }
                None => {
                    for mesh in &meshes {
                        acc.add_mesh(mesh, &buffers, &Matrix4::identity())?;
                    }
                }
            }
            debug!("Loaded {} meshes from {:?}", meshes.len(), path);
        }
    }

    acc.finish()
}

/// Path with its extension replaced, used for derived output files.
pub fn with_suffix(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("mesh");
    path.with_file_name(format!("{}{}.{}", stem, suffix, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str, name: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_obj_with_colors() {
        let (_dir, path) = write_temp(
            "# colored triangle\nv 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1 2 3\n",
            "tri.obj",
        );
        let mesh = load_mesh(&path, None).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
        assert_eq!(mesh.colors[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_load_obj_without_colors_and_quads() {
        let (_dir, path) = write_temp(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n",
            "quad.obj",
        );
        let mesh = load_mesh(&path, None).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
        assert!(mesh.colors.iter().all(|c| *c == DEFAULT_GRAY));
    }

    #[test]
    fn test_load_obj_negative_indices() {
        let (_dir, path) = write_temp("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n", "neg.obj");
        let mesh = load_mesh(&path, None).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_load_obj_reports_line() {
        let (_dir, path) = write_temp("v 0 0 0\nv 1 0 0\nf 1 2 7\n", "bad.obj");
        match load_mesh(&path, None) {
            Err(PrepError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_uncolored_obj_can_take_normal_colors() {
        let (_dir, path) = write_temp("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n", "tri.obj");
        let mesh = load_mesh_with_fallback(&path, None, ColorFallback::Normals).unwrap();
        // +Z normal maps to (0.5, 0.5, 1.0)
        for color in &mesh.colors {
            assert!((color[0] - 0.5).abs() < 1e-6);
            assert!((color[1] - 0.5).abs() < 1e-6);
            assert!((color[2] - 1.0).abs() < 1e-6);
        }

        let gray = load_mesh(&path, None).unwrap();
        assert!(gray.colors.iter().all(|c| *c == DEFAULT_GRAY));
    }

    #[test]
    fn test_colored_obj_ignores_normal_fallback() {
        let (_dir, path) = write_temp("v 0 0 0 1 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n", "tri.obj");
        let mesh = load_mesh_with_fallback(&path, None, ColorFallback::Normals).unwrap();
        assert_eq!(mesh.colors[0], [1.0, 0.0, 0.0]);
        assert_eq!(mesh.colors[1], DEFAULT_GRAY);
    }

    #[test]
    fn test_unsupported_extension() {
        let (_dir, path) = write_temp("", "mesh.stl");
        assert!(matches!(
            load_mesh(&path, None),
            Err(PrepError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_with_suffix() {
        let path = Path::new("/tmp/model.glb");
        assert_eq!(with_suffix(path, "_clean", "obj"), PathBuf::from("/tmp/model_clean.obj"));
    }
}
