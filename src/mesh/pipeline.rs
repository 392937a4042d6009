//! Cleanup pipelines composed from the individual filters.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::engine::isotropic_remesh;
use super::filters::{
    merge_close_vertices, remove_components_by_diameter, remove_components_by_face_count,
    remove_duplicate_faces, remove_null_faces, remove_unreferenced_vertices,
    repair_non_manifold_edges, repair_non_manifold_vertices,
};
use super::holes::close_holes;
use super::smooth::{laplacian_smooth, unsharp_mask};
use super::subdivide::loop_subdivide;
use super::types::ColoredMesh;
use crate::error::Result;

/// Loop subdivision passes run by the `subdivide` stage.
pub const SUBDIVIDE_ITERATIONS: usize = 2;

/// Defaults for [`sharpen_mesh`].
pub const SHARPEN_WEIGHT: f32 = 0.4;
pub const SHARPEN_WEIGHT_ORIG: f32 = 1.0;
pub const SHARPEN_ITERATIONS: usize = 25;

/// Options for [`advanced_clean`].
///
/// Percentages are relative to the bounding-box diagonal of the mesh as it
/// enters the stage that uses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanOptions {
    pub smooth: bool,
    pub smooth_steps: usize,
    pub subdivide: bool,
    pub subdivide_threshold_pct: f32,
    pub merge_pct: f32,
    pub min_faces: usize,
    pub min_diameter_pct: f32,
    pub repair: bool,
    pub remesh: bool,
    pub remesh_size: f32,
    pub remesh_iters: u32,
    pub close_holes: bool,
    pub max_hole_size: usize,
    pub refine_holes: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            smooth: true,
            smooth_steps: 1,
            subdivide: false,
            subdivide_threshold_pct: 0.25,
            merge_pct: 1.0,
            min_faces: 0,
            min_diameter_pct: 0.0,
            repair: false,
            remesh: false,
            remesh_size: 0.01,
            remesh_iters: 3,
            close_holes: false,
            max_hole_size: 1000,
            refine_holes: false,
        }
    }
}

fn pct_of_diagonal(mesh: &ColoredMesh, pct: f32) -> f32 {
    mesh.diagonal() * pct / 100.0
}

/// Drop unreferenced vertices, duplicate faces and null faces.
fn baseline(mesh: &mut ColoredMesh) {
    remove_unreferenced_vertices(mesh);
    remove_duplicate_faces(mesh);
    remove_null_faces(mesh);
    remove_unreferenced_vertices(mesh);
}

fn subdivide_stage(mesh: &mut ColoredMesh, threshold_pct: f32) {
    repair_non_manifold_vertices(mesh);
    repair_non_manifold_edges(mesh);
    remove_unreferenced_vertices(mesh);
    let threshold = pct_of_diagonal(mesh, threshold_pct);
    loop_subdivide(mesh, SUBDIVIDE_ITERATIONS, threshold);
}

/// Full cleanup: hygiene, component filtering, optional repair, hole
/// closing, remeshing, smoothing and subdivision, in that order.
pub fn advanced_clean(mut mesh: ColoredMesh, options: &CleanOptions) -> Result<ColoredMesh> {
    mesh.validate()?;
    let (vertices_in, faces_in) = (mesh.vertex_count(), mesh.face_count());

    remove_unreferenced_vertices(&mut mesh);

    if options.merge_pct > 0.0 {
        let threshold = pct_of_diagonal(&mesh, options.merge_pct);
        merge_close_vertices(&mut mesh, threshold);
    }

    remove_duplicate_faces(&mut mesh);
    remove_null_faces(&mut mesh);

    if options.min_diameter_pct > 0.0 {
        let min_diagonal = pct_of_diagonal(&mesh, options.min_diameter_pct);
        remove_components_by_diameter(&mut mesh, min_diagonal);
    }
    if options.min_faces > 0 {
        remove_components_by_face_count(&mut mesh, options.min_faces);
    }

    if options.repair {
        repair_non_manifold_edges(&mut mesh);
        repair_non_manifold_vertices(&mut mesh);
    }

    if options.close_holes {
        close_holes(&mut mesh, options.max_hole_size, options.refine_holes);
    }

    if options.remesh {
        remove_unreferenced_vertices(&mut mesh);
        mesh = isotropic_remesh(&mesh, options.remesh_size, options.remesh_iters)?;
    }

    remove_unreferenced_vertices(&mut mesh);

    if options.smooth {
        laplacian_smooth(&mut mesh, options.smooth_steps);
    }

    if options.subdivide {
        subdivide_stage(&mut mesh, options.subdivide_threshold_pct);
    }

    mesh.compute_vertex_normals();
    mesh.validate()?;

    info!(
        "Cleaned mesh: {} -> {} vertices, {} -> {} faces",
        vertices_in,
        mesh.vertex_count(),
        faces_in,
        mesh.face_count()
    );
    Ok(mesh)
}

/// Smoothing followed by optional subdivision, without any hygiene pass.
pub fn simple_clean(
    mut mesh: ColoredMesh,
    smooth: bool,
    smooth_steps: usize,
    subdivide: bool,
    subdivide_threshold_pct: f32,
) -> Result<ColoredMesh> {
    mesh.validate()?;
    if smooth {
        laplacian_smooth(&mut mesh, smooth_steps);
    }
    if subdivide {
        subdivide_stage(&mut mesh, subdivide_threshold_pct);
    }
    mesh.compute_vertex_normals();
    Ok(mesh)
}

/// Close holes of at most `max_hole_size` edges and compact the result.
pub fn close_mesh_holes(
    mut mesh: ColoredMesh,
    max_hole_size: usize,
    refine: bool,
    do_baseline: bool,
) -> Result<ColoredMesh> {
    mesh.validate()?;
    if do_baseline {
        baseline(&mut mesh);
    }
    let closed = close_holes(&mut mesh, max_hole_size, refine);
    debug!("close_mesh_holes closed {} holes", closed);
    remove_unreferenced_vertices(&mut mesh);
    mesh.compute_vertex_normals();
    Ok(mesh)
}

/// Remove components whose diagonal is below `fraction` of the mesh diagonal.
///
/// `fraction` is clamped to [0, 1].
pub fn remove_isolated_pieces(mut mesh: ColoredMesh, fraction: f32, do_baseline: bool) -> Result<ColoredMesh> {
    mesh.validate()?;
    if do_baseline {
        baseline(&mut mesh);
    }
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    let min_diagonal = mesh.diagonal() * fraction;
    remove_components_by_diameter(&mut mesh, min_diagonal);
    baseline(&mut mesh);
    mesh.compute_vertex_normals();
    Ok(mesh)
}

/// Sharpen surface detail with an unsharp mask over vertex coordinates.
pub fn sharpen_mesh(
    mut mesh: ColoredMesh,
    weight: f32,
    weight_orig: f32,
    iterations: usize,
    do_baseline: bool,
) -> Result<ColoredMesh> {
    mesh.validate()?;
    if do_baseline {
        baseline(&mut mesh);
    }
    unsharp_mask(&mut mesh, weight, weight_orig, iterations);
    remove_unreferenced_vertices(&mut mesh);
    mesh.compute_vertex_normals();
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::topology::boundary_loops;
    use crate::mesh::types::fixtures::{cube, grid, quad};
    use crate::mesh::types::DEFAULT_GRAY;
    use nalgebra::{Point3, Vector3};

    fn messy_cube() -> ColoredMesh {
        let mut mesh = cube();
        // Unreferenced vertex, duplicate face, degenerate face
        mesh.push_vertex(Point3::new(5.0, 5.0, 5.0), DEFAULT_GRAY);
        mesh.faces.push([2, 0, 1]);
        mesh.faces.push([0, 0, 1]);
        mesh
    }

    fn assert_indices_valid(mesh: &ColoredMesh) {
        let n = mesh.vertex_count() as u32;
        assert!(mesh.faces.iter().flatten().all(|&v| v < n));
    }

    #[test]
    fn test_default_options() {
        let options = CleanOptions::default();
        assert!(options.smooth);
        assert_eq!(options.smooth_steps, 1);
        assert_eq!(options.merge_pct, 1.0);
        assert_eq!(options.max_hole_size, 1000);
        assert!(!options.remesh);
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: CleanOptions = serde_json::from_str(r#"{"smooth": false, "min_faces": 10}"#).unwrap();
        assert!(!options.smooth);
        assert_eq!(options.min_faces, 10);
        assert_eq!(options.remesh_iters, 3);
    }

    #[test]
    fn test_clean_never_grows_without_refinement() {
        let mesh = messy_cube();
        let (v, f) = (mesh.vertex_count(), mesh.face_count());
        let cleaned = advanced_clean(mesh, &CleanOptions::default()).unwrap();
        assert!(cleaned.vertex_count() <= v);
        assert!(cleaned.face_count() <= f);
        assert_eq!(cleaned.vertex_count(), 8);
        assert_eq!(cleaned.face_count(), 12);
        assert_indices_valid(&cleaned);
        assert!(cleaned.normals.is_some());
    }

    #[test]
    fn test_clean_closes_holes() {
        let mut mesh = cube();
        mesh.faces.truncate(10);
        let options = CleanOptions {
            smooth: false,
            close_holes: true,
            ..Default::default()
        };
        let cleaned = advanced_clean(mesh, &options).unwrap();
        assert!(boundary_loops(&cleaned.faces).is_empty());
        assert_indices_valid(&cleaned);
    }

    #[test]
    fn test_clean_removes_small_pieces() {
        let mut mesh = grid(4);
        let offset = mesh.vertex_count() as u32;
        let speck = quad();
        for (p, c) in speck.positions.iter().zip(&speck.colors) {
            mesh.push_vertex(p * 0.01 + Vector3::new(10.0, 0.0, 0.0), *c);
        }
        mesh.faces.extend(speck.faces.iter().map(|tri| tri.map(|v| v + offset)));

        let options = CleanOptions {
            smooth: false,
            merge_pct: 0.0,
            min_diameter_pct: 5.0,
            ..Default::default()
        };
        let cleaned = advanced_clean(mesh, &options).unwrap();
        assert_eq!(cleaned.face_count(), 32);
        assert_eq!(cleaned.vertex_count(), 25);
    }

    #[test]
    fn test_clean_subdivide_refines() {
        let options = CleanOptions {
            smooth: false,
            subdivide: true,
            subdivide_threshold_pct: 1.0,
            ..Default::default()
        };
        let cleaned = advanced_clean(cube(), &options).unwrap();
        assert!(cleaned.face_count() > 12);
        assert!(boundary_loops(&cleaned.faces).is_empty());
        assert_indices_valid(&cleaned);
    }

    #[test]
    fn test_clean_rejects_invalid_mesh() {
        let mut mesh = quad();
        mesh.faces.push([0, 1, 9]);
        assert!(advanced_clean(mesh, &CleanOptions::default()).is_err());
    }

    #[test]
    fn test_remove_isolated_pieces_clamps_fraction() {
        let mesh = cube();
        // A fraction above 1 behaves like 1: the cube itself spans the full diagonal
        let cleaned = remove_isolated_pieces(mesh, 7.0, true).unwrap();
        assert_eq!(cleaned.face_count(), 12);
    }

    #[test]
    fn test_remove_isolated_pieces_always_cleans_after() {
        let mesh = messy_cube();
        let cleaned = remove_isolated_pieces(mesh, 0.0, false).unwrap();
        assert_eq!(cleaned.vertex_count(), 8);
        assert_eq!(cleaned.face_count(), 12);
        assert!(cleaned.normals.is_some());
    }

    #[test]
    fn test_clean_repair_then_remesh() {
        let mut mesh = cube();
        let fin = mesh.push_vertex(Point3::new(0.5, -0.5, -0.5), DEFAULT_GRAY);
        mesh.faces.push([1, 0, fin]);
        let source_colors = cube().colors;

        let options = CleanOptions {
            smooth: false,
            repair: true,
            remesh: true,
            remesh_size: 0.25,
            ..Default::default()
        };
        let cleaned = advanced_clean(mesh, &options).unwrap();
        assert!(cleaned.face_count() > 12);
        assert_indices_valid(&cleaned);
        assert!(boundary_loops(&cleaned.faces).is_empty());
        for color in &cleaned.colors {
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
            assert!(source_colors.contains(color), "fin color leaked: {:?}", color);
        }
    }

    #[test]
    fn test_close_mesh_holes_entry_point() {
        let mut mesh = cube();
        mesh.faces.truncate(10);
        let closed = close_mesh_holes(mesh, 100, false, true).unwrap();
        assert_eq!(closed.face_count(), 12);
        assert!(closed.normals.is_some());
    }

    #[test]
    fn test_sharpen_mesh_keeps_topology() {
        let mesh = grid(3);
        let sharpened = sharpen_mesh(mesh.clone(), 0.5, 1.0, 2, false).unwrap();
        assert_eq!(sharpened.faces, mesh.faces);
        assert_eq!(sharpened.vertex_count(), mesh.vertex_count());
    }

    #[test]
    fn test_simple_clean_smooths() {
        let mut mesh = grid(4);
        mesh.positions[12].z = 1.0;
        let cleaned = simple_clean(mesh, true, 1, false, 0.25).unwrap();
        assert!(cleaned.positions[12].z < 1.0);
    }
}
