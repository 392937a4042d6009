pub mod engine;
pub mod filters;
pub mod holes;
pub mod loader;
pub mod pipeline;
pub mod processing;
pub mod smooth;
pub mod spatial;
pub mod subdivide;
pub mod topology;
pub mod types;

pub use engine::isotropic_remesh;
pub use holes::close_holes;
pub use loader::{
    load_mesh, load_mesh_from_glb, load_mesh_from_obj, load_mesh_with_fallback, ColorFallback,
};
pub use pipeline::{
    advanced_clean, close_mesh_holes, remove_isolated_pieces, sharpen_mesh, simple_clean,
    CleanOptions,
};
pub use processing::{check_manifold, mesh_stats, ManifoldReport, MeshStats};
pub use smooth::{laplacian_smooth, unsharp_mask};
pub use subdivide::loop_subdivide;
pub use types::{ColoredMesh, DEFAULT_GRAY};
