//! Wavefront OBJ loading.
//!
//! Every model (`o`/`g` group) in the file is converted to a face-varying
//! [`Mesh`] and merged into one global vertex and face space.

use std::io::BufReader;
use std::path::Path;

use tessera_math::{Vec2, Vec3};

use crate::error::{MeshError, MeshResult};
use crate::mesh::{compute_bounds, flat_normals, Mesh};

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    }
}

/// Load an OBJ file, scaling all positions by `scale`.
///
/// Materials are optional: a missing or broken `.mtl` is logged and ignored,
/// but per-face material ids from the OBJ are kept.
pub fn load_obj<P: AsRef<Path>>(path: P, scale: f32) -> MeshResult<Mesh> {
    let path = path.as_ref();
    log::info!("Loading OBJ: {}", path.display());

    let (models, materials) = tobj::load_obj(path, &load_options())?;
    log_materials(&materials);
    convert_models(models, scale)
}

/// Load OBJ source text. Material libraries are not resolved.
pub fn load_obj_from_str(source: &str, scale: f32) -> MeshResult<Mesh> {
    let mut reader = BufReader::new(source.as_bytes());
    let (models, _materials) = tobj::load_obj_buf(&mut reader, &load_options(), |_mtl_path| {
        Err(tobj::LoadError::GenericFailure)
    })?;
    convert_models(models, scale)
}

fn log_materials(materials: &Result<Vec<tobj::Material>, tobj::LoadError>) {
    match materials {
        Ok(materials) => log::info!("  # of materials: {}", materials.len()),
        Err(e) => log::warn!("  Material library not loaded: {}", e),
    }
}

fn convert_models(models: Vec<tobj::Model>, scale: f32) -> MeshResult<Mesh> {
    log::info!("  # of shapes: {}", models.len());

    let mut merged = Mesh::default();
    for model in models {
        let face_offset = merged.triangle_count();
        let shape = convert_model(model, scale, face_offset)?;
        merged.append(shape);
    }

    merged.validate()?;

    log::info!(
        "  # of faces: {}, # of vertices: {}",
        merged.triangle_count(),
        merged.vertex_count()
    );
    Ok(merged)
}

/// Convert one tobj model. `face_offset` only affects error reporting.
fn convert_model(model: tobj::Model, scale: f32, face_offset: usize) -> MeshResult<Mesh> {
    let tobj::Model { mesh, name } = model;

    log::debug!(
        "  shape '{}': {} indices, {} positions, {} normals, {} texcoords",
        name,
        mesh.indices.len(),
        mesh.positions.len() / 3,
        mesh.normals.len() / 3,
        mesh.texcoords.len() / 2
    );

    if mesh.indices.len() % 3 != 0 {
        return Err(MeshError::NotTriangulated {
            model: name,
            index_count: mesh.indices.len(),
        });
    }

    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]) * scale)
        .collect();
    let vertex_count = positions.len();

    let triangles: Vec<[u32; 3]> = mesh
        .indices
        .chunks_exact(3)
        .map(|f| [f[0], f[1], f[2]])
        .collect();

    for (face, tri) in triangles.iter().enumerate() {
        if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange {
                face: face_offset + face,
                index,
                vertex_count,
            });
        }
    }

    // With `single_index` the attribute arrays run parallel to `positions`.
    let normals = if mesh.normals.len() == vertex_count * 3 && vertex_count > 0 {
        triangles
            .iter()
            .map(|tri| tri.map(|i| Vec3::from_slice(&mesh.normals[i as usize * 3..])))
            .collect()
    } else {
        if !mesh.normals.is_empty() {
            log::warn!(
                "  shape '{}': {} normals for {} vertices, using face normals",
                name,
                mesh.normals.len() / 3,
                vertex_count
            );
        }
        flat_normals(&positions, &triangles)
    };

    let uvs = if mesh.texcoords.len() == vertex_count * 2 && vertex_count > 0 {
        triangles
            .iter()
            .map(|tri| tri.map(|i| Vec2::from_slice(&mesh.texcoords[i as usize * 2..])))
            .collect()
    } else {
        vec![[Vec2::ZERO; 3]; triangles.len()]
    };

    let material_id = mesh.material_id.map(|id| id as u32);
    let material_ids = vec![material_id; triangles.len()];

    Ok(Mesh {
        bounds: compute_bounds(&positions),
        positions,
        triangles,
        normals,
        uvs,
        material_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SHAPES: &str = "\
o first
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o second
v 0 0 1
v 1 0 1
v 0 1 1
v 1 1 1
f 4 5 6
f 5 7 6
";

    #[test]
    fn test_shapes_are_merged_with_offsets() {
        let mesh = load_obj_from_str(TWO_SHAPES, 1.0).unwrap();

        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.vertex_count(), 7);
        assert!(mesh.validate().is_ok());

        // Faces of the second shape must point past the first shape's vertices.
        for face in 1..3 {
            let tri = mesh.triangle(face).unwrap();
            assert!(tri.iter().all(|&i| i >= 3), "face {} = {:?}", face, tri);
            let verts = mesh.triangle_vertices(face).unwrap();
            assert!(verts.iter().all(|v| v.z == 1.0));
        }
    }

    #[test]
    fn test_scale_is_applied() {
        let mesh = load_obj_from_str(TWO_SHAPES, 2.0).unwrap();

        assert_eq!(mesh.bounds.max(), Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(mesh.triangle_vertices(0).unwrap()[1], Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_missing_normals_are_synthesized_flat() {
        let mesh = load_obj_from_str(TWO_SHAPES, 1.0).unwrap();

        let normals = mesh.face_normals(0).unwrap();
        for n in normals {
            assert!((n - Vec3::NEG_Z).length() < 1e-6, "{:?}", n);
        }
    }

    #[test]
    fn test_file_normals_and_uvs_are_face_varying() {
        let src = "\
v 0 0 0
v 1 0 0
v 0 1 0
vn 0 0 1
vt 0.5 0.25
f 1/1/1 2/1/1 3/1/1
";
        let mesh = load_obj_from_str(src, 1.0).unwrap();

        assert_eq!(mesh.face_normals(0).unwrap(), [Vec3::Z; 3]);
        assert_eq!(mesh.face_uvs(0).unwrap(), [Vec2::new(0.5, 0.25); 3]);
    }

    #[test]
    fn test_missing_uvs_are_zero() {
        let mesh = load_obj_from_str(TWO_SHAPES, 1.0).unwrap();
        assert!(mesh.uvs.iter().all(|uv| *uv == [Vec2::ZERO; 3]));
        assert!(mesh.material_ids.iter().all(|id| id.is_none()));
    }

    #[test]
    fn test_quads_are_triangulated() {
        let src = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";
        let mesh = load_obj_from_str(src, 1.0).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn test_malformed_source_fails() {
        let result = load_obj_from_str("v not a number\nf 1 2 3\n", 1.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        let result = load_obj("/definitely/not/here.obj", 1.0);
        assert!(matches!(result, Err(MeshError::Load(_))));
    }

    #[test]
    fn test_load_asset_from_disk() {
        let _ = env_logger::builder().is_test(true).try_init();

        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/cube.obj");
        let mesh = load_obj(path, 0.5).unwrap();

        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.bounds.min(), Vec3::splat(-0.5));
        assert_eq!(mesh.bounds.max(), Vec3::splat(0.5));
    }
}
