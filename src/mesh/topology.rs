use std::collections::HashMap;

use super::types::ColoredMesh;

/// Undirected edge key with the smaller index first.
pub fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

/// Faces incident to each undirected edge.
pub fn edge_faces(faces: &[[u32; 3]]) -> HashMap<(u32, u32), Vec<usize>> {
    let mut map: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (face_idx, tri) in faces.iter().enumerate() {
        for i in 0..3 {
            map.entry(edge_key(tri[i], tri[(i + 1) % 3]))
                .or_default()
                .push(face_idx);
        }
    }
    map
}

/// Faces incident to each vertex.
pub fn vertex_faces(vertex_count: usize, faces: &[[u32; 3]]) -> Vec<Vec<usize>> {
    let mut map = vec![Vec::new(); vertex_count];
    for (face_idx, tri) in faces.iter().enumerate() {
        for &v in tri {
            map[v as usize].push(face_idx);
        }
    }
    map
}

/// Sorted, deduplicated one-ring neighbors of each vertex.
pub fn vertex_neighbors(vertex_count: usize, faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut neighbors = vec![Vec::new(); vertex_count];
    for tri in faces {
        for i in 0..3 {
            let a = tri[i];
            let b = tri[(i + 1) % 3];
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }
    neighbors
}

/// Directed edges that belong to exactly one face, in that face's winding.
///
/// Sorted for deterministic traversal.
pub fn boundary_edges(faces: &[[u32; 3]]) -> Vec<(u32, u32)> {
    let counts = edge_faces(faces);
    let mut edges: Vec<(u32, u32)> = faces
        .iter()
        .flat_map(|tri| (0..3).map(move |i| (tri[i], tri[(i + 1) % 3])))
        .filter(|&(a, b)| counts.get(&edge_key(a, b)).map_or(false, |f| f.len() == 1))
        .collect();
    edges.sort_unstable();
    edges
}

/// Neighbors of each vertex along boundary edges only.
pub fn boundary_neighbors(vertex_count: usize, faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut neighbors = vec![Vec::new(); vertex_count];
    for (a, b) in boundary_edges(faces) {
        neighbors[a as usize].push(b);
        neighbors[b as usize].push(a);
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }
    neighbors
}

/// Closed loops of boundary edges (holes), as vertex sequences.
///
/// Each loop lists vertices in the winding of the faces bordering the hole:
/// consecutive entries `v[i] -> v[i + 1]` are boundary edges. Chains that
/// cannot be closed (non-manifold boundaries) are skipped.
pub fn boundary_loops(faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let edges = boundary_edges(faces);
    let mut outgoing: HashMap<u32, Vec<usize>> = HashMap::new();
    for (idx, &(a, _)) in edges.iter().enumerate() {
        outgoing.entry(a).or_default().push(idx);
    }

    let mut used = vec![false; edges.len()];
    let mut loops = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;

        let (origin, mut current) = edges[start];
        let mut chain = vec![origin];
        let mut closed = false;

        while chain.len() <= edges.len() {
            if current == origin {
                closed = true;
                break;
            }
            chain.push(current);

            let next = outgoing
                .get(&current)
                .and_then(|candidates| candidates.iter().copied().find(|&e| !used[e]));
            match next {
                Some(e) => {
                    used[e] = true;
                    current = edges[e].1;
                }
                None => break,
            }
        }

        if closed && chain.len() >= 3 {
            loops.push(chain);
        }
    }

    loops
}

/// Connected components as lists of face indices.
///
/// Faces are connected when they share a vertex.
pub fn connected_components(mesh: &ColoredMesh) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..mesh.vertex_count()).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for tri in &mesh.faces {
        let a = find(&mut parent, tri[0] as usize);
        for &v in &tri[1..] {
            let b = find(&mut parent, v as usize);
            if a != b {
                parent[b] = a;
            }
        }
    }

    let mut groups: HashMap<usize, usize> = HashMap::new();
    let mut components: Vec<Vec<usize>> = Vec::new();
    for (face_idx, tri) in mesh.faces.iter().enumerate() {
        let root = find(&mut parent, tri[0] as usize);
        let slot = *groups.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[slot].push(face_idx);
    }
    components
}

/// Number of unique undirected edges.
pub fn count_edges(faces: &[[u32; 3]]) -> usize {
    edge_faces(faces).len()
}
