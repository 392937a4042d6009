//! Bridge to the baby_shark corner-table mesh and its incremental remesher.

use std::collections::HashMap;

use baby_shark::io::{Builder, IndexedBuilder};
use baby_shark::mesh::corner_table::CornerTableF;
use baby_shark::remeshing::incremental::IncrementalRemesher;
use nalgebra::Point3;
use tracing::info;

use super::spatial::PointIndex;
use super::types::{ColoredMesh, DEFAULT_GRAY};
use crate::error::{PrepError, Result};

/// Build a corner table from the mesh geometry. Colors are not carried over.
pub fn to_corner_table(mesh: &ColoredMesh) -> Result<CornerTableF> {
    let mut builder = CornerTableF::builder_indexed();

    builder.set_num_vertices(mesh.vertex_count());
    for p in &mesh.positions {
        builder
            .add_vertex([p.x, p.y, p.z])
            .map_err(|e| PrepError::engine("Failed to add vertex", e))?;
    }

    builder.set_num_faces(mesh.face_count());
    for tri in &mesh.faces {
        builder
            .add_face(tri[0] as usize, tri[1] as usize, tri[2] as usize)
            .map_err(|e| PrepError::engine("Failed to add face", e))?;
    }

    builder
        .finish()
        .map_err(|e| PrepError::engine("Failed to build mesh", e))
}

/// Extract positions and faces from a corner table.
pub fn from_corner_table(table: &CornerTableF) -> (Vec<Point3<f32>>, Vec<[u32; 3]>) {
    let mut positions = Vec::new();
    let mut vertex_id_to_idx = HashMap::new();

    for vertex_id in table.vertices() {
        let pos = table.vertex_position(vertex_id);
        vertex_id_to_idx.insert(vertex_id, positions.len() as u32);
        positions.push(Point3::new(pos.x, pos.y, pos.z));
    }

    let faces = table
        .faces()
        .filter_map(|face_id| {
            let (v0, v1, v2) = table.face_vertices(face_id);
            Some([
                *vertex_id_to_idx.get(&v0)?,
                *vertex_id_to_idx.get(&v1)?,
                *vertex_id_to_idx.get(&v2)?,
            ])
        })
        .collect();

    (positions, faces)
}

/// Isotropic remeshing towards `target_edge_length`.
///
/// Vertex colors of the result are copied from the nearest input vertex.
pub fn isotropic_remesh(mesh: &ColoredMesh, target_edge_length: f32, iterations: u32) -> Result<ColoredMesh> {
    if mesh.is_empty() {
        return Ok(mesh.clone());
    }
    if !(target_edge_length > 0.0) {
        return Err(PrepError::InvalidMesh(format!(
            "remesh target edge length must be positive, got {}",
            target_edge_length
        )));
    }

    let mut table = to_corner_table(mesh)?;

    let iterations_u16 = iterations.min(u16::MAX as u32) as u16;
    let remesher = IncrementalRemesher::new()
        .with_iterations_count(iterations_u16)
        .with_split_edges(true)
        .with_collapse_edges(true)
        .with_flip_edges(true)
        .with_shift_vertices(true)
        .with_project_vertices(true);
    remesher.remesh(&mut table, target_edge_length);

    let (positions, faces) = from_corner_table(&table);
    let index = PointIndex::new(&mesh.positions);
    let colors = positions
        .iter()
        .map(|p| index.nearest(p).map_or(DEFAULT_GRAY, |idx| mesh.colors[idx as usize]))
        .collect();

    info!(
        "Remeshed {} vertices, {} faces into {} vertices, {} faces",
        mesh.vertex_count(),
        mesh.face_count(),
        positions.len(),
        faces.len()
    );

    ColoredMesh::new(positions, faces, colors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::types::fixtures::{cube, grid};

    #[test]
    fn test_corner_table_round_trip_keeps_counts() {
        let mesh = cube();
        let table = to_corner_table(&mesh).unwrap();
        let (positions, faces) = from_corner_table(&table);
        assert_eq!(positions.len(), 8);
        assert_eq!(faces.len(), 12);
    }

    #[test]
    fn test_remesh_rejects_non_positive_length() {
        let mesh = cube();
        assert!(isotropic_remesh(&mesh, 0.0, 1).is_err());
    }

    #[test]
    fn test_remesh_refines_and_keeps_colors_in_range() {
        let mesh = grid(2);
        let remeshed = isotropic_remesh(&mesh, 0.5, 3).unwrap();
        assert!(!remeshed.is_empty());
        remeshed.validate().unwrap();
        assert!(remeshed.colors.iter().all(|c| *c == DEFAULT_GRAY));
    }

    #[test]
    fn test_remesh_keeps_color_regions() {
        let red = [1.0, 0.0, 0.0];
        let blue = [0.0, 0.0, 1.0];
        let mut mesh = grid(4);
        for (p, color) in mesh.positions.iter().zip(mesh.colors.iter_mut()) {
            *color = if p.x < 2.0 { red } else { blue };
        }

        let remeshed = isotropic_remesh(&mesh, 0.5, 3).unwrap();
        remeshed.validate().unwrap();

        let mut left = 0;
        let mut right = 0;
        for (p, color) in remeshed.positions.iter().zip(&remeshed.colors) {
            if p.x < 1.4 {
                assert_eq!(*color, red, "vertex at {:?}", p);
                left += 1;
            } else if p.x > 2.6 {
                assert_eq!(*color, blue, "vertex at {:?}", p);
                right += 1;
            }
        }
        assert!(left > 0 && right > 0);
    }

    #[test]
    fn test_remesh_coarse_mesh_to_fine_length() {
        let mesh = cube();
        let remeshed = isotropic_remesh(&mesh, 0.01, 3).unwrap();
        remeshed.validate().unwrap();
        assert!(remeshed.vertex_count() > mesh.vertex_count());

        // Each color comes from a closest input corner
        for (p, color) in remeshed.positions.iter().zip(&remeshed.colors) {
            let best = mesh
                .positions
                .iter()
                .map(|q| (q - p).norm())
                .fold(f32::MAX, f32::min);
            let source = mesh
                .colors
                .iter()
                .position(|c| c == color)
                .expect("color copied from an input vertex");
            assert!((mesh.positions[source] - p).norm() <= best + 1e-5);
        }
    }
}
