//! R*-tree over mesh vertex positions.

use nalgebra::Point3;
use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPoint = GeomWithData<[f32; 3], u32>;

/// Nearest-neighbor and radius queries over a fixed point set.
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new(points: &[Point3<f32>]) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedPoint::new([p.x, p.y, p.z], idx as u32))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Index of the closest point, or `None` for an empty index.
    pub fn nearest(&self, query: &Point3<f32>) -> Option<u32> {
        self.tree
            .nearest_neighbor(&[query.x, query.y, query.z])
            .map(|entry| entry.data)
    }

    /// Indices of all points strictly closer than `radius` to `query`.
    pub fn within(&self, query: &Point3<f32>, radius: f32) -> impl Iterator<Item = u32> + '_ {
        let center = [query.x, query.y, query.z];
        let max_sq = radius * radius;
        self.tree
            .locate_within_distance(center, max_sq)
            .filter(move |entry| {
                let p = entry.geom();
                let d = (0..3).map(|k| (p[k] - center[k]).powi(2)).sum::<f32>();
                d < max_sq
            })
            .map(|entry| entry.data)
    }
}
