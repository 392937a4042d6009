//! Image and mesh preprocessing for multi-view 3D reconstruction.
//!
//! - [`compose`]: background replacement, normal-map view rotation, square
//!   padding and foreground cropping of RGBA views.
//! - [`mesh`]: a vertex-colored triangle mesh and the cleanup pipeline run
//!   on reconstructed surfaces.
//! - [`export`]: OBJ and GLB writers.

pub mod compose;
pub mod error;
pub mod export;
pub mod mesh;

pub use error::{PrepError, Result};
pub use export::{save_glb_with_prefix, save_mesh, ExportOptions};
pub use mesh::{advanced_clean, load_mesh, CleanOptions, ColoredMesh};
