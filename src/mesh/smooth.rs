//! Coordinate smoothing filters.

use nalgebra::{Point3, Vector3};
use tracing::debug;

use super::topology::{boundary_neighbors, vertex_neighbors};
use super::types::ColoredMesh;

/// Uniform-weight Laplacian smoothing.
///
/// Each step moves every vertex to the average of its one-ring. Vertices on
/// the border only average their border neighbors, which keeps open
/// boundaries from shrinking inward.
pub fn laplacian_smooth(mesh: &mut ColoredMesh, steps: usize) {
    if steps == 0 || mesh.is_empty() {
        return;
    }

    let neighbors = vertex_neighbors(mesh.vertex_count(), &mesh.faces);
    let border = boundary_neighbors(mesh.vertex_count(), &mesh.faces);

    for _ in 0..steps {
        let snapshot = mesh.positions.clone();
        for (idx, position) in mesh.positions.iter_mut().enumerate() {
            let ring = if border[idx].is_empty() { &neighbors[idx] } else { &border[idx] };
            if ring.is_empty() {
                continue;
            }
            let sum: Vector3<f32> = ring.iter().map(|&n| snapshot[n as usize].coords).sum();
            *position = Point3::from(sum / ring.len() as f32);
        }
    }

    mesh.normals = None;
    debug!("Applied {} Laplacian smoothing steps", steps);
}

/// Unsharp masking of vertex coordinates.
///
/// `p' = weight_orig * p + weight * (p - smooth(p))`, where `smooth` is
/// [`laplacian_smooth`] run for `iterations` steps.
pub fn unsharp_mask(mesh: &mut ColoredMesh, weight: f32, weight_orig: f32, iterations: usize) {
    let mut smoothed = mesh.clone();
    laplacian_smooth(&mut smoothed, iterations);

    for (p, s) in mesh.positions.iter_mut().zip(&smoothed.positions) {
        let detail = p.coords - s.coords;
        *p = Point3::from(p.coords * weight_orig + detail * weight);
    }

    mesh.normals = None;
    debug!("Applied unsharp mask (weight {}, {} iterations)", weight, iterations);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::types::fixtures::{cube, grid};
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_grid_stays_flat() {
        let mut mesh = grid(4);
        mesh.positions[12].z = 0.0;
        laplacian_smooth(&mut mesh, 3);
        for p in &mesh.positions {
            assert_relative_eq!(p.z, 0.0);
        }
    }

    #[test]
    fn test_spike_is_reduced() {
        let mut mesh = grid(4);
        mesh.positions[12].z = 1.0;
        laplacian_smooth(&mut mesh, 1);
        assert!(mesh.positions[12].z < 0.01);
        // Neighbors pick up part of the spike
        assert!(mesh.positions[7].z > 0.0);
    }

    #[test]
    fn test_border_moves_along_border() {
        let mut mesh = grid(2);
        laplacian_smooth(&mut mesh, 1);
        // Corner averages its two border neighbors (1,0) and (0,1)
        assert_relative_eq!(mesh.positions[0], Point3::new(0.5, 0.5, 0.0));
        // Border midpoint stays on the border line
        assert_relative_eq!(mesh.positions[1].y, 0.0);
    }

    #[test]
    fn test_zero_steps_is_noop() {
        let mut mesh = cube();
        let before = mesh.clone();
        laplacian_smooth(&mut mesh, 0);
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_unsharp_identity_with_zero_weight() {
        let mut mesh = cube();
        let before = mesh.positions.clone();
        unsharp_mask(&mut mesh, 0.0, 1.0, 5);
        for (a, b) in mesh.positions.iter().zip(&before) {
            assert_relative_eq!(a, b);
        }
    }

    #[test]
    fn test_unsharp_exaggerates_spike() {
        let mut mesh = grid(4);
        mesh.positions[12].z = 1.0;
        unsharp_mask(&mut mesh, 0.5, 1.0, 1);
        assert!(mesh.positions[12].z > 1.0);
    }
}
