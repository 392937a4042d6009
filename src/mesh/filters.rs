//! Hygiene and repair filters over [`ColoredMesh`].
//!
//! Every filter edits the mesh in place and returns how many elements it
//! removed or changed, so callers can log what happened.

use std::collections::{HashMap, HashSet};

use nalgebra::Point3;
use tracing::{debug, info};

use super::spatial::PointIndex;
use super::topology::{connected_components, edge_faces, vertex_faces};
use super::types::ColoredMesh;

/// Remove vertices not referenced by any face.
///
/// Returns the number of vertices removed.
pub fn remove_unreferenced_vertices(mesh: &mut ColoredMesh) -> usize {
    let mut referenced = vec![false; mesh.vertex_count()];
    for tri in &mesh.faces {
        for &v in tri {
            referenced[v as usize] = true;
        }
    }

    let removed = mesh.retain_vertices(&referenced);
    if removed > 0 {
        debug!("Removed {} unreferenced vertices", removed);
    }
    removed
}

/// Remove faces built from the same three vertices as an earlier face,
/// regardless of winding.
pub fn remove_duplicate_faces(mesh: &mut ColoredMesh) -> usize {
    let original = mesh.faces.len();
    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(original);
    mesh.faces.retain(|tri| {
        let mut key = *tri;
        key.sort_unstable();
        seen.insert(key)
    });

    let removed = original - mesh.faces.len();
    if removed > 0 {
        debug!("Removed {} duplicate faces", removed);
    }
    removed
}

/// Remove faces with a repeated vertex index or exactly zero area.
pub fn remove_null_faces(mesh: &mut ColoredMesh) -> usize {
    let original = mesh.faces.len();
    let positions = &mesh.positions;
    mesh.faces.retain(|&[a, b, c]| {
        if a == b || b == c || a == c {
            return false;
        }
        let (pa, pb, pc) = (positions[a as usize], positions[b as usize], positions[c as usize]);
        (pb - pa).cross(&(pc - pa)).norm_squared() > 0.0
    });

    let removed = original - mesh.faces.len();
    if removed > 0 {
        debug!("Removed {} null faces", removed);
    }
    removed
}

/// Merge vertices closer than `threshold` into the lowest-indexed one.
///
/// The surviving vertex takes the average color of its group. Faces are
/// remapped, collapsed faces dropped and merged-away vertices removed.
/// Returns the number of vertices merged.
pub fn merge_close_vertices(mesh: &mut ColoredMesh, threshold: f32) -> usize {
    if mesh.vertex_count() == 0 || threshold <= 0.0 {
        return 0;
    }

    let index = PointIndex::new(&mesh.positions);
    let mut remap: Vec<u32> = (0..mesh.vertex_count() as u32).collect();
    let mut merged = 0;

    for idx in 0..mesh.vertex_count() {
        if remap[idx] != idx as u32 {
            continue;
        }
        for other in index.within(&mesh.positions[idx], threshold) {
            let other = other as usize;
            if other <= idx || remap[other] != other as u32 {
                continue;
            }
            remap[other] = idx as u32;
            merged += 1;
        }
    }

    if merged == 0 {
        return 0;
    }

    let mut sums = vec![([0.0f32; 3], 0u32); mesh.vertex_count()];
    for (idx, &rep) in remap.iter().enumerate() {
        let (sum, count) = &mut sums[rep as usize];
        for k in 0..3 {
            sum[k] += mesh.colors[idx][k];
        }
        *count += 1;
    }
    for (color, (sum, count)) in mesh.colors.iter_mut().zip(&sums) {
        if *count > 1 {
            *color = sum.map(|c| c / *count as f32);
        }
    }

    for tri in &mut mesh.faces {
        for v in tri.iter_mut() {
            *v = remap[*v as usize];
        }
    }
    mesh.faces.retain(|&[a, b, c]| a != b && b != c && a != c);
    remove_unreferenced_vertices(mesh);
    mesh.normals = None;

    info!("Merged {} vertices (threshold = {:.6})", merged, threshold);
    merged
}

fn remove_faces(mesh: &mut ColoredMesh, doomed: &HashSet<usize>) {
    let mut idx = 0;
    mesh.faces.retain(|_| {
        let keep = !doomed.contains(&idx);
        idx += 1;
        keep
    });
}

/// Remove connected components with fewer than `min_faces` faces.
///
/// Returns the number of faces removed. Vertices are left for compaction.
pub fn remove_components_by_face_count(mesh: &mut ColoredMesh, min_faces: usize) -> usize {
    let doomed: HashSet<usize> = connected_components(mesh)
        .into_iter()
        .filter(|component| component.len() < min_faces)
        .flatten()
        .collect();

    remove_faces(mesh, &doomed);
    if !doomed.is_empty() {
        info!("Removed {} faces in components smaller than {} faces", doomed.len(), min_faces);
    }
    doomed.len()
}

/// Remove connected components whose bounding-box diagonal is below
/// `min_diagonal`.
pub fn remove_components_by_diameter(mesh: &mut ColoredMesh, min_diagonal: f32) -> usize {
    let mut doomed = HashSet::new();
    for component in connected_components(mesh) {
        let mut min = Point3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Point3::new(f32::MIN, f32::MIN, f32::MIN);
        for &face in &component {
            for &v in &mesh.faces[face] {
                let p = &mesh.positions[v as usize];
                min = min.inf(p);
                max = max.sup(p);
            }
        }
        if (max - min).norm() < min_diagonal {
            doomed.extend(component);
        }
    }

    remove_faces(mesh, &doomed);
    if !doomed.is_empty() {
        info!("Removed {} faces in components with diagonal < {:.6}", doomed.len(), min_diagonal);
    }
    doomed.len()
}

/// Make every edge manifold by removing the smallest faces beyond two.
///
/// Returns the number of faces removed.
pub fn repair_non_manifold_edges(mesh: &mut ColoredMesh) -> usize {
    let areas: Vec<f32> = (0..mesh.face_count()).map(|f| mesh.face_area(f)).collect();
    let mut edges: Vec<((u32, u32), Vec<usize>)> = edge_faces(&mesh.faces)
        .into_iter()
        .filter(|(_, faces)| faces.len() > 2)
        .collect();
    edges.sort_unstable_by_key(|(key, _)| *key);

    let mut doomed = HashSet::new();
    for (_, faces) in edges {
        let mut alive: Vec<usize> = faces.into_iter().filter(|f| !doomed.contains(f)).collect();
        if alive.len() <= 2 {
            continue;
        }
        alive.sort_by(|&a, &b| areas[b].total_cmp(&areas[a]).then(a.cmp(&b)));
        doomed.extend(alive.into_iter().skip(2));
    }

    remove_faces(mesh, &doomed);
    if !doomed.is_empty() {
        info!("Removed {} faces on non-manifold edges", doomed.len());
    }
    doomed.len()
}

fn root(fan: &mut [usize], mut x: usize) -> usize {
    while fan[x] != x {
        fan[x] = fan[fan[x]];
        x = fan[x];
    }
    x
}

/// Split vertices whose incident faces form more than one fan.
///
/// Each extra fan gets its own copy of the vertex at the same position.
/// Returns the number of vertices added.
pub fn repair_non_manifold_vertices(mesh: &mut ColoredMesh) -> usize {
    let incident = vertex_faces(mesh.vertex_count(), &mesh.faces);
    let mut added = 0;

    for (vertex, faces) in incident.iter().enumerate() {
        if faces.len() < 2 {
            continue;
        }
        let vertex = vertex as u32;

        // Union faces around the vertex that share a second vertex.
        let mut fan: Vec<usize> = (0..faces.len()).collect();
        let mut by_spoke: HashMap<u32, usize> = HashMap::new();
        for (slot, &face) in faces.iter().enumerate() {
            for &other in &mesh.faces[face] {
                if other == vertex {
                    continue;
                }
                match by_spoke.get(&other) {
                    Some(&first) => {
                        let (a, b) = (root(&mut fan, first), root(&mut fan, slot));
                        if a != b {
                            fan[b] = a;
                        }
                    }
                    None => {
                        by_spoke.insert(other, slot);
                    }
                }
            }
        }

        let first_root = root(&mut fan, 0);
        let mut copies: HashMap<usize, u32> = HashMap::new();
        for slot in 0..faces.len() {
            let r = root(&mut fan, slot);
            if r == first_root {
                continue;
            }
            let copy = *copies.entry(r).or_insert_with(|| {
                added += 1;
                let position = mesh.positions[vertex as usize];
                let color = mesh.colors[vertex as usize];
                mesh.positions.push(position);
                mesh.colors.push(color);
                (mesh.positions.len() - 1) as u32
            });
            for v in mesh.faces[faces[slot]].iter_mut() {
                if *v == vertex {
                    *v = copy;
                }
            }
        }
    }

    if added > 0 {
        mesh.normals = None;
        info!("Split non-manifold vertices into {} extra copies", added);
    }
    added
}
