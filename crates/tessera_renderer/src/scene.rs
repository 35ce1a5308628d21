//! Caller-owned scene: one mesh and the BVH built over it.

use std::path::Path;

use tessera_core::{load_obj, Mesh, MeshError};
use tessera_math::{Interval, Ray};
use thiserror::Error;

use crate::bvh::{BuildOptions, Bvh, BvhError};
use crate::cancel::CancelFlag;
use crate::framebuffer::FrameBuffer;
use crate::renderer::{render, GradientShader, PixelShader, RenderConfig, RenderOutcome, RenderResult};
use crate::scheduler::SchedulerOptions;
use crate::triangle::TriangleHit;

/// Errors that can occur while replacing the scene contents.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Failed to load mesh: {0}")]
    Mesh(#[from] MeshError),

    #[error("Failed to build BVH: {0}")]
    Bvh(#[from] BvhError),
}

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// A mesh together with its acceleration structure.
///
/// A new scene is empty and cannot be rendered until a mesh is loaded.
#[derive(Debug, Default)]
pub struct Scene {
    mesh: Mesh,
    accel: Bvh,
    build_options: BuildOptions,
}

impl Scene {
    pub fn new(build_options: BuildOptions) -> Self {
        Self {
            build_options,
            ..Default::default()
        }
    }

    /// Load an OBJ file and build its BVH.
    ///
    /// On error the scene keeps its previous mesh and BVH.
    pub fn load_obj<P: AsRef<Path>>(&mut self, path: P, scale: f32) -> SceneResult<()> {
        let mesh = load_obj(path, scale)?;
        self.set_mesh(mesh)
    }

    /// Replace the mesh and rebuild the BVH.
    pub fn set_mesh(&mut self, mesh: Mesh) -> SceneResult<()> {
        let accel = Bvh::build(&mesh, &self.build_options)?;
        self.mesh = mesh;
        self.accel = accel;
        Ok(())
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn accel(&self) -> &Bvh {
        &self.accel
    }

    pub fn build_options(&self) -> &BuildOptions {
        &self.build_options
    }

    pub fn is_ready(&self) -> bool {
        self.accel.is_valid()
    }

    /// Closest face hit by `ray` within `ray_t`.
    pub fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<TriangleHit> {
        self.accel.intersect(&self.mesh, ray, ray_t)
    }

    /// Render the debug gradient with default scheduler options.
    pub fn render(
        &self,
        color: &mut FrameBuffer,
        aux: &mut FrameBuffer,
        config: &RenderConfig,
        cancel: &CancelFlag,
    ) -> RenderResult<RenderOutcome> {
        self.render_with(
            color,
            aux,
            config,
            cancel,
            &SchedulerOptions::default(),
            &GradientShader,
        )
    }

    pub fn render_with<S: PixelShader + ?Sized>(
        &self,
        color: &mut FrameBuffer,
        aux: &mut FrameBuffer,
        config: &RenderConfig,
        cancel: &CancelFlag,
        options: &SchedulerOptions,
        shader: &S,
    ) -> RenderResult<RenderOutcome> {
        render(&self.accel, color, aux, config, cancel, options, shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::RenderError;
    use tessera_math::Vec3;

    fn quad() -> Mesh {
        Mesh::new(
            vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [1, 3, 2]],
        )
    }

    #[test]
    fn test_new_scene_is_not_renderable() {
        let scene = Scene::new(BuildOptions::default());
        assert!(!scene.is_ready());

        let config = RenderConfig::default().with_resolution(2, 2);
        let mut color = FrameBuffer::new(2, 2);
        let mut aux = FrameBuffer::new(2, 2);
        let result = scene.render(&mut color, &mut aux, &config, &CancelFlag::new());
        assert_eq!(result, Err(RenderError::InvalidAccel));
    }

    #[test]
    fn test_set_mesh_builds_bvh() {
        let mut scene = Scene::default();
        scene.set_mesh(quad()).unwrap();

        assert!(scene.is_ready());
        assert_eq!(scene.mesh().triangle_count(), 2);
        let bounds = scene.accel().bounding_box();
        assert_eq!((bounds.min().x, bounds.min().y), (-1.0, -1.0));
        assert_eq!((bounds.max().x, bounds.max().y), (1.0, 1.0));

        let ray = Ray::new(Vec3::new(0.5, 0.5, 5.0), Vec3::NEG_Z);
        let hit = scene.intersect(&ray, Interval::new(0.0, f32::INFINITY)).unwrap();
        assert!((hit.t - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_failed_load_keeps_previous_contents() {
        let mut scene = Scene::default();
        scene.set_mesh(quad()).unwrap();

        let result = scene.load_obj("/definitely/not/here.obj", 1.0);
        assert!(matches!(result, Err(SceneError::Mesh(_))));

        let result = scene.set_mesh(Mesh::default());
        assert!(matches!(result, Err(SceneError::Bvh(BvhError::EmptyMesh))));

        assert!(scene.is_ready());
        assert_eq!(scene.mesh().triangle_count(), 2);
    }

    #[test]
    fn test_load_obj_from_disk() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../tessera_core/assets/cube.obj");
        let mut scene = Scene::new(BuildOptions {
            cache_bbox: true,
            ..Default::default()
        });
        scene.load_obj(path, 1.0).unwrap();

        assert_eq!(scene.mesh().triangle_count(), 12);
        assert!(scene.build_options().cache_bbox);

        let config = RenderConfig::default().with_resolution(16, 16);
        let mut color = FrameBuffer::new(16, 16);
        let mut aux = FrameBuffer::new(16, 16);
        let outcome = scene
            .render(&mut color, &mut aux, &config, &CancelFlag::new())
            .unwrap();
        assert!(outcome.is_completed());
    }
}
