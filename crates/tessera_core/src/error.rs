use thiserror::Error;

/// Errors that can occur while loading or validating a mesh.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("OBJ load error: {0}")]
    Load(#[from] tobj::LoadError),

    #[error("Model '{model}' has {index_count} indices, which is not a multiple of 3")]
    NotTriangulated { model: String, index_count: usize },

    #[error("Face {face} references vertex {index}, but the mesh has {vertex_count} vertices")]
    IndexOutOfRange {
        face: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Attribute '{name}' has {len} entries for {faces} faces")]
    AttributeMismatch {
        name: &'static str,
        len: usize,
        faces: usize,
    },
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
