use std::fmt;
use std::ops::ControlFlow;

use baby_shark::mesh::corner_table::CornerTableF;
use nalgebra::Point3;
use tracing::debug;

use super::engine::to_corner_table;
use super::filters::repair_non_manifold_vertices;
use super::topology::{boundary_loops, connected_components, count_edges, edge_faces};
use super::types::ColoredMesh;

/// Summary numbers for a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshStats {
    pub vertices: usize,
    pub faces: usize,
    pub edges: usize,
    pub components: usize,
    pub holes: usize,
    pub bounds: Option<(Point3<f32>, Point3<f32>)>,
    pub color_range: Option<(f32, f32)>,
}

pub fn mesh_stats(mesh: &ColoredMesh) -> MeshStats {
    let (non_manifold_edges, non_manifold_vertices) = non_manifold_counts(mesh);
    let boundary = boundary_summary(mesh, non_manifold_edges == 0 && non_manifold_vertices == 0);
    MeshStats {
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        edges: boundary.edges,
        components: connected_components(mesh).len(),
        holes: boundary.rings.len(),
        bounds: mesh.bounding_box(),
        color_range: mesh.color_range(),
    }
}

fn non_manifold_counts(mesh: &ColoredMesh) -> (usize, usize) {
    let edges = edge_faces(&mesh.faces)
        .values()
        .filter(|faces| faces.len() > 2)
        .count();

    // Count fans that would need splitting, on a scratch copy
    let mut scratch = ColoredMesh {
        normals: None,
        ..mesh.clone()
    };
    (edges, repair_non_manifold_vertices(&mut scratch))
}

struct BoundarySummary {
    /// Edge count of each boundary ring.
    rings: Vec<usize>,
    edges: usize,
}

fn ring_sizes(table: &CornerTableF) -> Vec<usize> {
    table
        .boundary_rings()
        .iter()
        .map(|ring| {
            let mut edge_count = 0;
            table.boundary_edges(*ring, |_edge| {
                edge_count += 1;
                ControlFlow::Continue(())
            });
            edge_count
        })
        .collect()
}

/// Boundary rings and unique edges, read from the corner table when the
/// mesh is manifold and from the face list otherwise.
fn boundary_summary(mesh: &ColoredMesh, manifold: bool) -> BoundarySummary {
    if manifold && !mesh.is_empty() {
        match to_corner_table(mesh) {
            Ok(table) => {
                return BoundarySummary {
                    rings: ring_sizes(&table),
                    edges: table.unique_edges().count(),
                };
            }
            Err(e) => debug!("Walking boundaries on the face list: {}", e),
        }
    }
    BoundarySummary {
        rings: boundary_loops(&mesh.faces).iter().map(|l| l.len()).collect(),
        edges: count_edges(&mesh.faces),
    }
}

impl fmt::Display for MeshStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Mesh Statistics ===")?;
        writeln!(f, "Vertices:   {}", self.vertices)?;
        writeln!(f, "Faces:      {}", self.faces)?;
        writeln!(f, "Edges:      {}", self.edges)?;
        writeln!(f, "Components: {}", self.components)?;
        writeln!(f, "Holes:      {}", self.holes)?;
        if let Some((lo, hi)) = self.color_range {
            writeln!(f, "Colors:     [{:.3}, {:.3}]", lo, hi)?;
        }

        if let Some((min, max)) = self.bounds {
            let size = max - min;
            writeln!(f, "\n=== Bounding Box ===")?;
            writeln!(f, "Min: ({:.3}, {:.3}, {:.3})", min.x, min.y, min.z)?;
            writeln!(f, "Max: ({:.3}, {:.3}, {:.3})", max.x, max.y, max.z)?;
            write!(f, "Size: ({:.3}, {:.3}, {:.3})", size.x, size.y, size.z)?;
        }
        Ok(())
    }
}

/// Topology defects found by [`check_manifold`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifoldReport {
    /// Boundary edge count of each hole.
    pub holes: Vec<usize>,
    pub non_manifold_edges: usize,
    pub non_manifold_vertices: usize,
}

impl ManifoldReport {
    pub fn is_manifold(&self) -> bool {
        self.non_manifold_edges == 0 && self.non_manifold_vertices == 0
    }

    pub fn is_watertight(&self) -> bool {
        self.is_manifold() && self.holes.is_empty()
    }
}

pub fn check_manifold(mesh: &ColoredMesh) -> ManifoldReport {
    let (non_manifold_edges, non_manifold_vertices) = non_manifold_counts(mesh);
    let boundary = boundary_summary(mesh, non_manifold_edges == 0 && non_manifold_vertices == 0);

    ManifoldReport {
        holes: boundary.rings,
        non_manifold_edges,
        non_manifold_vertices,
    }
}

impl fmt::Display for ManifoldReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Manifold Check ===")?;
        if self.is_watertight() {
            writeln!(f, "✓ Mesh is MANIFOLD (watertight)")?;
            return write!(f, "  No holes or boundaries detected.");
        }

        if self.is_manifold() {
            writeln!(f, "✓ Mesh is manifold but open")?;
        } else {
            writeln!(f, "✗ Mesh is NOT MANIFOLD")?;
            writeln!(f, "  Non-manifold edges:    {}", self.non_manifold_edges)?;
            writeln!(f, "  Non-manifold vertices: {}", self.non_manifold_vertices)?;
        }

        if !self.holes.is_empty() {
            writeln!(f, "  Found {} boundary ring(s) (holes):", self.holes.len())?;
            for (i, edges) in self.holes.iter().enumerate() {
                writeln!(f, "  Hole {}: {} boundary edges", i + 1, edges)?;
            }
        }
        Ok(())
    }
}
