//! Math types shared by the Tessera crates.
//!
//! Vectors come straight from `glam`; this crate adds the small set of
//! geometric types the BVH and the renderer need.

pub use glam::*;

mod aabb;
mod interval;
mod ray;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::Ray;
