//! Adaptive Loop subdivision.
//!
//! Only edges longer than a threshold are split. Faces are retriangulated
//! with a 1-to-2, 1-to-3 or 1-to-4 template depending on how many of their
//! edges were split, so neighbouring faces always agree and no cracks form.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};
use tracing::debug;

use super::topology::{boundary_neighbors, edge_faces, edge_key, vertex_neighbors};
use super::types::ColoredMesh;

fn loop_beta(valence: usize) -> f32 {
    if valence == 3 {
        3.0 / 16.0
    } else {
        3.0 / (8.0 * valence as f32)
    }
}

fn opposite(tri: &[u32; 3], a: u32, b: u32) -> u32 {
    tri.iter().copied().find(|&v| v != a && v != b).unwrap_or(a)
}

/// One pass of adaptive Loop subdivision. Returns the number of split edges.
fn subdivide_once(mesh: &mut ColoredMesh, threshold: f32) -> usize {
    let incident = edge_faces(&mesh.faces);
    let mut split_edges: Vec<(u32, u32)> = incident
        .keys()
        .copied()
        .filter(|&(a, b)| (mesh.positions[a as usize] - mesh.positions[b as usize]).norm() > threshold)
        .collect();
    if split_edges.is_empty() {
        return 0;
    }
    split_edges.sort_unstable();

    let original = mesh.positions.clone();
    let neighbors = vertex_neighbors(mesh.vertex_count(), &mesh.faces);
    let border = boundary_neighbors(mesh.vertex_count(), &mesh.faces);

    // Vertex rule for endpoints of split edges
    let mut touched = vec![false; mesh.vertex_count()];
    for &(a, b) in &split_edges {
        touched[a as usize] = true;
        touched[b as usize] = true;
    }
    for (idx, moved) in touched.iter().enumerate() {
        if !moved {
            continue;
        }
        let p = original[idx].coords;
        let updated = if !border[idx].is_empty() {
            match border[idx][..] {
                [l, r] => p * 0.75 + (original[l as usize].coords + original[r as usize].coords) * 0.125,
                _ => p,
            }
        } else {
            let ring = &neighbors[idx];
            if ring.is_empty() {
                p
            } else {
                let beta = loop_beta(ring.len());
                let sum: Vector3<f32> = ring.iter().map(|&n| original[n as usize].coords).sum();
                p * (1.0 - ring.len() as f32 * beta) + sum * beta
            }
        };
        mesh.positions[idx] = Point3::from(updated);
    }

    // Edge rule
    let mut midpoints: HashMap<(u32, u32), u32> = HashMap::with_capacity(split_edges.len());
    for &(a, b) in &split_edges {
        let pa = original[a as usize].coords;
        let pb = original[b as usize].coords;
        let faces = &incident[&(a, b)];
        let position = if faces.len() == 2 {
            let o1 = opposite(&mesh.faces[faces[0]], a, b);
            let o2 = opposite(&mesh.faces[faces[1]], a, b);
            (pa + pb) * 0.375 + (original[o1 as usize].coords + original[o2 as usize].coords) * 0.125
        } else {
            (pa + pb) * 0.5
        };
        let ca = mesh.colors[a as usize];
        let cb = mesh.colors[b as usize];
        let color = std::array::from_fn(|k| (ca[k] + cb[k]) * 0.5);
        let m = mesh.push_vertex(Point3::from(position), color);
        midpoints.insert((a, b), m);
    }

    let mut faces = Vec::with_capacity(mesh.faces.len() * 2);
    for &tri in &mesh.faces {
        // Rotate so split edges come first: e0 = (t0, t1), e1 = (t1, t2), e2 = (t2, t0)
        let mid = |i: usize, t: &[u32; 3]| midpoints.get(&edge_key(t[i], t[(i + 1) % 3])).copied();
        let splits = (0..3).filter(|&i| mid(i, &tri).is_some()).count();
        let rotation = match splits {
            1 => (0..3).find(|&i| mid(i, &tri).is_some()).unwrap_or(0),
            2 => (0..3).find(|&i| mid((i + 2) % 3, &tri).is_none()).unwrap_or(0),
            _ => 0,
        };
        let t = [tri[rotation], tri[(rotation + 1) % 3], tri[(rotation + 2) % 3]];
        let [a, b, c] = t;

        match (mid(0, &t), mid(1, &t), mid(2, &t)) {
            (None, None, None) => faces.push(t),
            (Some(m0), None, None) => {
                faces.push([a, m0, c]);
                faces.push([m0, b, c]);
            }
            (Some(m0), Some(m1), None) => {
                faces.push([m0, b, m1]);
                faces.push([a, m0, m1]);
                faces.push([a, m1, c]);
            }
            (Some(m0), Some(m1), Some(m2)) => {
                faces.push([a, m0, m2]);
                faces.push([m0, b, m1]);
                faces.push([m2, m1, c]);
                faces.push([m0, m1, m2]);
            }
            _ => faces.push(t),
        }
    }
    mesh.faces = faces;
    mesh.normals = None;

    split_edges.len()
}

/// Loop subdivision refining only edges longer than `threshold`.
///
/// Returns the total number of edges split over all iterations.
pub fn loop_subdivide(mesh: &mut ColoredMesh, iterations: usize, threshold: f32) -> usize {
    let mut total = 0;
    for iteration in 0..iterations {
        let split = subdivide_once(mesh, threshold);
        debug!("Loop subdivision pass {}: split {} edges", iteration + 1, split);
        if split == 0 {
            break;
        }
        total += split;
    }
    total
}
