//! Tessera Renderer - BVH and multi-threaded row rendering.
//!
//! Rows of the framebuffer are handed out to a fixed pool of worker threads
//! through a shared atomic cursor. While a row is in flight its slice of the
//! auxiliary buffer shows an alternating marker, which is cleared once the
//! row's pixels are written. Long renders can be stopped cooperatively with
//! a [`CancelFlag`].
//!
//! The pixel pass is a [`PixelShader`]; [`GradientShader`] fills the frame
//! with a debug gradient.

mod cancel;
mod framebuffer;
mod progress;
mod scheduler;
mod triangle;

pub mod bvh;
pub mod renderer;
pub mod scene;

pub use bvh::{BuildOptions, BuildStatistics, Bvh, BvhError, BvhNode, BvhResult};
pub use cancel::{CancelFlag, CancelMonitor};
pub use framebuffer::{FrameBuffer, CHANNELS};
pub use progress::{is_marker_row, marker_value, MARKER_BLOCK};
pub use renderer::{
    render, GradientShader, PixelShader, RenderConfig, RenderError, RenderOutcome, RenderResult,
};
pub use scene::{Scene, SceneError, SceneResult};
pub use scheduler::{SchedulerOptions, DEFAULT_CANCEL_POLL_INTERVAL};
pub use triangle::{intersect_triangle, TriangleHit};

/// Re-export math types used in the public API
pub use tessera_math::{Aabb, Interval, Ray, Vec3};
