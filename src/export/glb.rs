//! Binary glTF writer for vertex-colored meshes.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use gltf::binary::{Glb, Header};
use gltf::json;
use json::accessor::{ComponentType, GenericComponentType, Type};
use json::buffer::Target;
use json::material::{PbrMetallicRoughness, StrengthFactor};
use json::mesh::{Mode, Semantic};
use json::validation::Checked::Valid;
use json::validation::USize64;
use tracing::debug;

use crate::error::{PrepError, Result};
use crate::mesh::ColoredMesh;

/// Size of the GLB file header plus the two chunk headers.
const GLB_OVERHEAD: usize = 12 + 8 + 8;

fn pad_to_four(bytes: &mut Vec<u8>, fill: u8) {
    while bytes.len() % 4 != 0 {
        bytes.push(fill);
    }
}

/// Accumulates the binary chunk and the glTF objects that describe it.
struct BinBuilder {
    data: Vec<u8>,
    root: json::Root,
    buffer: json::Index<json::Buffer>,
}

impl BinBuilder {
    fn new() -> Self {
        let mut root = json::Root::default();
        root.asset.generator = Some(concat!("mvprep ", env!("CARGO_PKG_VERSION")).to_string());
        let buffer = root.push(json::Buffer {
            byte_length: USize64(0),
            name: None,
            uri: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        Self {
            data: Vec::new(),
            root,
            buffer,
        }
    }

    fn push_view(&mut self, bytes: &[u8], target: Target) -> json::Index<json::buffer::View> {
        pad_to_four(&mut self.data, 0);
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        self.root.push(json::buffer::View {
            buffer: self.buffer,
            byte_length: USize64::from(bytes.len()),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            name: None,
            target: Some(Valid(target)),
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn push_accessor(
        &mut self,
        view: json::Index<json::buffer::View>,
        count: usize,
        component_type: ComponentType,
        type_: Type,
        bounds: Option<([f32; 3], [f32; 3])>,
    ) -> json::Index<json::Accessor> {
        let (min, max) = match bounds {
            Some((min, max)) => (
                Some(json::Value::from(Vec::from(min))),
                Some(json::Value::from(Vec::from(max))),
            ),
            None => (None, None),
        };
        self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: None,
            count: USize64::from(count),
            component_type: Valid(GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        })
    }

    fn push_vec3(&mut self, values: &[[f32; 3]], with_bounds: bool) -> json::Index<json::Accessor> {
        let bytes: Vec<u8> = values
            .iter()
            .flat_map(|v| v.iter().flat_map(|c| c.to_le_bytes()))
            .collect();
        let view = self.push_view(&bytes, Target::ArrayBuffer);

        let bounds = with_bounds.then(|| {
            let mut min = [f32::MAX; 3];
            let mut max = [f32::MIN; 3];
            for v in values {
                for k in 0..3 {
                    min[k] = min[k].min(v[k]);
                    max[k] = max[k].max(v[k]);
                }
            }
            (min, max)
        });
        self.push_accessor(view, values.len(), ComponentType::F32, Type::Vec3, bounds)
    }

    fn push_indices(&mut self, faces: &[[u32; 3]]) -> json::Index<json::Accessor> {
        let bytes: Vec<u8> = faces
            .iter()
            .flat_map(|tri| tri.iter().flat_map(|i| i.to_le_bytes()))
            .collect();
        let view = self.push_view(&bytes, Target::ElementArrayBuffer);
        self.push_accessor(view, faces.len() * 3, ComponentType::U32, Type::Scalar, None)
    }

    fn finish(mut self) -> (json::Root, Vec<u8>) {
        pad_to_four(&mut self.data, 0);
        self.root.buffers[self.buffer.value()].byte_length = USize64::from(self.data.len());
        (self.root, self.data)
    }
}

fn write_glb_bytes(path: &Path, root: &json::Root, bin: Vec<u8>) -> Result<()> {
    let mut json_bytes = serde_json::to_vec(root)?;
    pad_to_four(&mut json_bytes, b' ');
    let mut bin = bin;
    pad_to_four(&mut bin, 0);

    let glb = Glb {
        header: Header {
            magic: *b"glTF",
            version: 2,
            length: (GLB_OVERHEAD + json_bytes.len() + bin.len()) as u32,
        },
        json: Cow::Owned(json_bytes),
        bin: Some(Cow::Owned(bin)),
    };

    fs::write(path, glb.to_vec()?)?;
    Ok(())
}

/// Write positions, `COLOR_0` (float RGB), optional normals and indices as a
/// single-primitive GLB.
pub fn write_glb(mesh: &ColoredMesh, path: &Path) -> Result<()> {
    let mut bin = BinBuilder::new();

    let positions: Vec<[f32; 3]> = mesh.positions.iter().map(|p| [p.x, p.y, p.z]).collect();
    let mut attributes = BTreeMap::new();
    attributes.insert(Valid(Semantic::Positions), bin.push_vec3(&positions, true));
    attributes.insert(Valid(Semantic::Colors(0)), bin.push_vec3(&mesh.colors, false));
    if let Some(normals) = &mesh.normals {
        let normals: Vec<[f32; 3]> = normals.iter().map(|n| [n.x, n.y, n.z]).collect();
        attributes.insert(Valid(Semantic::Normals), bin.push_vec3(&normals, false));
    }
    let indices = bin.push_indices(&mesh.faces);

    let (mut root, data) = bin.finish();
    let primitive = json::mesh::Primitive {
        attributes,
        extensions: Default::default(),
        extras: Default::default(),
        indices: Some(indices),
        material: None,
        mode: Valid(Mode::Triangles),
        targets: None,
    };
    let mesh_index = root.push(json::Mesh {
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        primitives: vec![primitive],
        weights: None,
    });
    let node = root.push(json::Node {
        mesh: Some(mesh_index),
        ..Default::default()
    });
    let scene = root.push(json::Scene {
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        nodes: vec![node],
    });
    root.scene = Some(scene);

    debug!("Writing GLB with {} vertices, {} faces to {:?}", mesh.vertex_count(), mesh.face_count(), path);
    write_glb_bytes(path, &root, data)
}

/// Unlit-looking PBR material that lets vertex colors show through.
fn vertex_color_material() -> json::Material {
    json::Material {
        name: Some("vertex_color".to_string()),
        pbr_metallic_roughness: PbrMetallicRoughness {
            metallic_factor: StrengthFactor(0.0),
            roughness_factor: StrengthFactor(1.0),
            ..Default::default()
        },
        double_sided: true,
        ..Default::default()
    }
}

/// Append a vertex-color material and assign it to the first primitive.
///
/// The material is appended so its index equals the number of materials
/// already present; for files written by [`write_glb`] that is index 0.
pub fn patch_vertex_color_material(path: &Path) -> Result<()> {
    let bytes = fs::read(path)?;
    let glb = Glb::from_slice(&bytes)?;
    let mut root: json::Root = serde_json::from_slice(&glb.json)?;

    let material = root.push(vertex_color_material());
    let primitive = root
        .meshes
        .first_mut()
        .and_then(|mesh| mesh.primitives.first_mut())
        .ok_or_else(|| PrepError::InvalidMesh("GLB file has no primitive to patch".to_string()))?;
    primitive.material = Some(material);

    let bin = glb.bin.map(|b| b.into_owned()).unwrap_or_default();
    write_glb_bytes(path, &root, bin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::types::fixtures::cube;

    #[test]
    fn test_write_glb_is_importable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.glb");
        write_glb(&cube(), &path).unwrap();

        let (document, _buffers, _images) = gltf::import(&path).unwrap();
        let mesh = document.meshes().next().unwrap();
        let primitive = mesh.primitives().next().unwrap();
        assert!(primitive.get(&gltf::Semantic::Colors(0)).is_some());
        assert_eq!(primitive.indices().unwrap().count(), 36);
    }

    #[test]
    fn test_patch_adds_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.glb");
        write_glb(&cube(), &path).unwrap();
        patch_vertex_color_material(&path).unwrap();

        let (document, _buffers, _images) = gltf::import(&path).unwrap();
        let material = document.materials().next().unwrap();
        assert!(material.double_sided());
        assert_eq!(material.pbr_metallic_roughness().metallic_factor(), 0.0);
        assert_eq!(material.pbr_metallic_roughness().roughness_factor(), 1.0);

        let primitive = document.meshes().next().unwrap().primitives().next().unwrap();
        assert_eq!(primitive.material().index(), Some(0));
    }

    #[test]
    fn test_material_is_appended_after_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.glb");
        write_glb(&cube(), &path).unwrap();
        patch_vertex_color_material(&path).unwrap();
        patch_vertex_color_material(&path).unwrap();

        let (document, _buffers, _images) = gltf::import(&path).unwrap();
        assert_eq!(document.materials().count(), 2);
        let primitive = document.meshes().next().unwrap().primitives().next().unwrap();
        assert_eq!(primitive.material().index(), Some(1));
        assert_eq!(primitive.material().name(), Some("vertex_color"));
    }

    #[test]
    fn test_position_bounds_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.glb");
        write_glb(&cube(), &path).unwrap();

        let (document, _buffers, _images) = gltf::import(&path).unwrap();
        let primitive = document.meshes().next().unwrap().primitives().next().unwrap();
        let bounds = primitive.bounding_box();
        assert_eq!(bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_glb_length_is_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.glb");
        write_glb(&cube(), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(&bytes[..4], b"glTF");
    }
}
