//! Hole closing by ear clipping of boundary loops.

use std::collections::HashSet;

use nalgebra::Point3;
use tracing::{debug, info};

use super::topology::{boundary_loops, edge_key};
use super::types::ColoredMesh;

/// Upper bound on centroid-split rounds when refining a patch.
const MAX_REFINE_ROUNDS: usize = 4;

fn corner_angle(prev: &Point3<f32>, at: &Point3<f32>, next: &Point3<f32>) -> f32 {
    let a = prev - at;
    let b = next - at;
    let denom = a.norm() * b.norm();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    (a.dot(&b) / denom).clamp(-1.0, 1.0).acos()
}

/// Triangulate one hole given in face winding order.
///
/// The polygon is walked in reverse so the new triangles agree with the
/// orientation of the faces around the hole. Ears whose diagonal already
/// exists in the mesh are avoided when possible; among the rest the
/// sharpest corner is clipped first.
fn triangulate_loop(
    positions: &[Point3<f32>],
    hole: &[u32],
    edges: &mut HashSet<(u32, u32)>,
) -> Vec<[u32; 3]> {
    let mut ring: Vec<u32> = hole.iter().rev().copied().collect();
    let mut triangles = Vec::with_capacity(ring.len().saturating_sub(2));

    while ring.len() > 3 {
        let n = ring.len();
        let mut best: Option<(bool, f32, usize)> = None;
        for j in 0..n {
            let prev = ring[(j + n - 1) % n];
            let at = ring[j];
            let next = ring[(j + 1) % n];
            let blocked = prev == next || edges.contains(&edge_key(prev, next));
            let angle = corner_angle(
                &positions[prev as usize],
                &positions[at as usize],
                &positions[next as usize],
            );
            let better = match best {
                None => true,
                Some((best_blocked, best_angle, _)) => {
                    (blocked, angle) < (best_blocked, best_angle)
                }
            };
            if better {
                best = Some((blocked, angle, j));
            }
        }

        let Some((_, _, j)) = best else { break };
        let prev = ring[(j + n - 1) % n];
        let at = ring[j];
        let next = ring[(j + 1) % n];
        if prev != at && at != next && prev != next {
            triangles.push([prev, at, next]);
            edges.insert(edge_key(prev, next));
        }
        ring.remove(j);
    }

    if let [a, b, c] = ring[..] {
        if a != b && b != c && a != c {
            triangles.push([a, b, c]);
        }
    }
    triangles
}

/// Split oversized patch triangles at their centroids.
fn refine_patch(mesh: &mut ColoredMesh, patch: Vec<[u32; 3]>, target_area: f32) -> Vec<[u32; 3]> {
    let mut current = patch;
    for _ in 0..MAX_REFINE_ROUNDS {
        let mut next = Vec::with_capacity(current.len() * 3);
        let mut split_any = false;
        for tri in current {
            let [a, b, c] = tri.map(|v| mesh.positions[v as usize]);
            let area = (b - a).cross(&(c - a)).norm() * 0.5;
            if area <= target_area {
                next.push(tri);
                continue;
            }

            let centroid = Point3::from((a.coords + b.coords + c.coords) / 3.0);
            let color = std::array::from_fn(|k| {
                tri.iter().map(|&v| mesh.colors[v as usize][k]).sum::<f32>() / 3.0
            });
            let m = mesh.push_vertex(centroid, color);
            next.push([tri[0], tri[1], m]);
            next.push([tri[1], tri[2], m]);
            next.push([tri[2], tri[0], m]);
            split_any = true;
        }
        current = next;
        if !split_any {
            break;
        }
    }
    current
}

/// Close every hole bounded by at most `max_hole_size` edges.
///
/// With `refine`, patch triangles larger than an equilateral triangle with
/// the hole's mean edge length are split. Returns the number of holes closed.
pub fn close_holes(mesh: &mut ColoredMesh, max_hole_size: usize, refine: bool) -> usize {
    let loops = boundary_loops(&mesh.faces);
    let mut edges: HashSet<(u32, u32)> = mesh
        .faces
        .iter()
        .flat_map(|tri| (0..3).map(move |i| edge_key(tri[i], tri[(i + 1) % 3])))
        .collect();

    let mut closed = 0;
    let mut skipped = 0;
    for hole in loops {
        if hole.len() > max_hole_size {
            skipped += 1;
            continue;
        }

        let mut patch = triangulate_loop(&mesh.positions, &hole, &mut edges);
        if patch.is_empty() {
            continue;
        }

        if refine {
            let perimeter: f32 = (0..hole.len())
                .map(|i| {
                    let a = mesh.positions[hole[i] as usize];
                    let b = mesh.positions[hole[(i + 1) % hole.len()] as usize];
                    (b - a).norm()
                })
                .sum();
            let mean_edge = perimeter / hole.len() as f32;
            let target_area = mean_edge * mean_edge * 3.0f32.sqrt() / 4.0;
            patch = refine_patch(mesh, patch, target_area);
        }

        debug!("Closed hole with {} boundary edges using {} faces", hole.len(), patch.len());
        mesh.faces.extend(patch);
        closed += 1;
    }

    if closed > 0 || skipped > 0 {
        mesh.normals = None;
        info!("Closed {} holes, skipped {} larger than {} edges", closed, skipped, max_hole_size);
    }
    closed
}
