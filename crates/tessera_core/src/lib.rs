//! Tessera Core - mesh geometry and scene file loading.
//!
//! This crate provides:
//!
//! - **`Mesh`**: triangle geometry with face-varying normals and UVs
//! - **OBJ loading**: `load_obj` merges every shape of a file into one mesh
//!
//! # Example
//!
//! ```ignore
//! use tessera_core::load_obj;
//!
//! let mesh = load_obj("bunny.obj", 1.0)?;
//! println!("{} triangles", mesh.triangle_count());
//! ```

pub mod error;
pub mod mesh;
pub mod obj;

pub use error::{MeshError, MeshResult};
pub use mesh::Mesh;
pub use obj::{load_obj, load_obj_from_str};
