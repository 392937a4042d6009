use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::mesh::ColoredMesh;

/// Write `v x y z r g b` and 1-based `f` lines.
pub fn write_obj(mesh: &ColoredMesh, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "# {} vertices, {} faces", mesh.vertex_count(), mesh.face_count())?;
    for (p, c) in mesh.positions.iter().zip(&mesh.colors) {
        writeln!(out, "v {} {} {} {} {} {}", p.x, p.y, p.z, c[0], c[1], c[2])?;
    }
    for tri in &mesh.faces {
        writeln!(out, "f {} {} {}", tri[0] + 1, tri[1] + 1, tri[2] + 1)?;
    }
    out.flush()?;
    Ok(())
}
