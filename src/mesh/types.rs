use nalgebra::{Point3, Vector3};

use crate::error::{PrepError, Result};

/// Color given to vertices of meshes loaded without colors.
pub const DEFAULT_GRAY: [f32; 3] = [0.5, 0.5, 0.5];

/// Indexed triangle mesh with per-vertex color.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColoredMesh {
    pub positions: Vec<Point3<f32>>,
    pub faces: Vec<[u32; 3]>,
    /// One RGB color per vertex, channels in [0, 1].
    pub colors: Vec<[f32; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
}

impl ColoredMesh {
    /// Build a mesh and check its invariants.
    pub fn new(positions: Vec<Point3<f32>>, faces: Vec<[u32; 3]>, colors: Vec<[f32; 3]>) -> Result<Self> {
        let mesh = Self {
            positions,
            faces,
            colors,
            normals: None,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Build a mesh whose vertices all share one color.
    pub fn with_uniform_color(
        positions: Vec<Point3<f32>>,
        faces: Vec<[u32; 3]>,
        color: [f32; 3],
    ) -> Result<Self> {
        let colors = vec![color; positions.len()];
        Self::new(positions, faces, colors)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Check index bounds, buffer lengths and color range.
    pub fn validate(&self) -> Result<()> {
        let count = self.positions.len();

        if self.colors.len() != count {
            return Err(PrepError::ShapeMismatch {
                what: "vertex colors",
                expected: count,
                actual: self.colors.len(),
            });
        }

        if let Some(normals) = &self.normals {
            if normals.len() != count {
                return Err(PrepError::ShapeMismatch {
                    what: "vertex normals",
                    expected: count,
                    actual: normals.len(),
                });
            }
        }

        for (face, tri) in self.faces.iter().enumerate() {
            for &vertex in tri {
                if vertex as usize >= count {
                    return Err(PrepError::InvalidVertexIndex { face, vertex, count });
                }
            }
        }

        if let Some((min, max)) = self.color_range() {
            if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) {
                return Err(PrepError::ColorOutOfRange { min, max });
            }
        }

        Ok(())
    }

    /// Smallest and largest color channel value.
    pub fn color_range(&self) -> Option<(f32, f32)> {
        self.colors
            .iter()
            .flatten()
            .fold(None, |acc, &c| match acc {
                None => Some((c, c)),
                Some((mn, mx)) => Some((f32::min(mn, c), f32::max(mx, c))),
            })
    }

    /// Axis-aligned bounds of all vertices, referenced or not.
    pub fn bounding_box(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(min, max), p| {
            (min.inf(p), max.sup(p))
        }))
    }

    /// Length of the bounding-box diagonal, zero for an empty mesh.
    pub fn diagonal(&self) -> f32 {
        self.bounding_box()
            .map(|(min, max)| (max - min).norm())
            .unwrap_or(0.0)
    }

    pub fn triangle(&self, face: usize) -> [Point3<f32>; 3] {
        let [a, b, c] = self.faces[face];
        [
            self.positions[a as usize],
            self.positions[b as usize],
            self.positions[c as usize],
        ]
    }

    /// Non-normalized face normal, twice the triangle area in length.
    pub fn face_cross(&self, face: usize) -> Vector3<f32> {
        let [a, b, c] = self.triangle(face);
        (b - a).cross(&(c - a))
    }

    pub fn face_area(&self, face: usize) -> f32 {
        self.face_cross(face).norm() * 0.5
    }

    /// Append a vertex and return its index. Drops stored normals.
    pub fn push_vertex(&mut self, position: Point3<f32>, color: [f32; 3]) -> u32 {
        self.positions.push(position);
        self.colors.push(color);
        self.normals = None;
        (self.positions.len() - 1) as u32
    }

    /// Keep only vertices flagged in `keep`, remapping faces.
    ///
    /// Faces touching a removed vertex are dropped. Returns the number of
    /// vertices removed.
    pub fn retain_vertices(&mut self, keep: &[bool]) -> usize {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut next = 0u32;
        for (idx, &k) in keep.iter().enumerate() {
            if k {
                remap[idx] = next;
                next += 1;
            }
        }

        let removed = self.positions.len() - next as usize;
        if removed == 0 {
            return 0;
        }

        let mut flags = keep.iter();
        self.positions.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = keep.iter();
        self.colors.retain(|_| *flags.next().unwrap_or(&false));
        if let Some(normals) = self.normals.as_mut() {
            let mut flags = keep.iter();
            normals.retain(|_| *flags.next().unwrap_or(&false));
        }

        self.faces.retain(|tri| tri.iter().all(|&v| remap[v as usize] != u32::MAX));
        for tri in &mut self.faces {
            for v in tri.iter_mut() {
                *v = remap[*v as usize];
            }
        }

        removed
    }

    /// Area-weighted per-vertex normals.
    pub fn compute_vertex_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.positions.len()];
        for face in 0..self.faces.len() {
            let n = self.face_cross(face);
            for &v in &self.faces[face] {
                normals[v as usize] += n;
            }
        }
        for n in &mut normals {
            *n = n.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros);
        }
        self.normals = Some(normals);
    }
}
