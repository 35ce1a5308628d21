//! Render entry point.
//!
//! Validates its inputs, then hands the frame to the row scheduler and
//! reports how many rows were finished.

use std::time::Instant;

use thiserror::Error;

use crate::bvh::Bvh;
use crate::cancel::CancelFlag;
use crate::framebuffer::FrameBuffer;
use crate::scheduler::{self, SchedulerOptions};

/// Errors that prevent a render from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Acceleration structure is not built")]
    InvalidAccel,

    #[error("Invalid render config: {0}")]
    InvalidConfig(String),

    #[error("The {buffer} buffer is {width}x{height}, expected {expected_width}x{expected_height}")]
    BufferSizeMismatch {
        buffer: &'static str,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
}

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Render configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Index of the current pass
    pub pass: u32,
    /// Total number of passes
    pub max_passes: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            pass: 0,
            max_passes: 1,
        }
    }
}

impl RenderConfig {
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_pass(mut self, pass: u32, max_passes: u32) -> Self {
        self.pass = pass;
        self.max_passes = max_passes;
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check `width > 0`, `height > 0` and `pass < max_passes`.
    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidConfig(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.pass >= self.max_passes {
            return Err(RenderError::InvalidConfig(format!(
                "pass {} is outside 0..{}",
                self.pass, self.max_passes
            )));
        }
        Ok(())
    }
}

/// How a render that started ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Every row was written.
    Completed { rows: usize },
    /// Workers stopped early after observing the cancel flag.
    Cancelled {
        rows_completed: usize,
        rows_total: usize,
    },
}

impl RenderOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RenderOutcome::Completed { .. })
    }

    pub fn rows_completed(&self) -> usize {
        match *self {
            RenderOutcome::Completed { rows } => rows,
            RenderOutcome::Cancelled { rows_completed, .. } => rows_completed,
        }
    }
}

/// Computes the color of one pixel.
///
/// Called concurrently from every worker thread.
pub trait PixelShader: Sync {
    fn shade(&self, x: u32, y: u32, config: &RenderConfig) -> [f32; 4];
}

impl<F> PixelShader for F
where
    F: Fn(u32, u32, &RenderConfig) -> [f32; 4] + Sync,
{
    fn shade(&self, x: u32, y: u32, config: &RenderConfig) -> [f32; 4] {
        self(x, y, config)
    }
}

/// Debug gradient: R follows x, G follows y, B follows the pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientShader;

impl PixelShader for GradientShader {
    fn shade(&self, x: u32, y: u32, config: &RenderConfig) -> [f32; 4] {
        [
            x as f32 / config.width as f32,
            y as f32 / config.height as f32,
            config.pass as f32 / config.max_passes as f32,
            1.0,
        ]
    }
}

/// Render one pass into `color`, publishing in-flight rows in `aux`.
///
/// Nothing is spawned or written when `accel` is unbuilt, `config` is
/// invalid or a buffer does not match the configured resolution. A raised
/// `cancel` flag is not an error: the result is
/// [`RenderOutcome::Cancelled`] and unprocessed rows keep their contents.
pub fn render<S: PixelShader + ?Sized>(
    accel: &Bvh,
    color: &mut FrameBuffer,
    aux: &mut FrameBuffer,
    config: &RenderConfig,
    cancel: &CancelFlag,
    options: &SchedulerOptions,
    shader: &S,
) -> RenderResult<RenderOutcome> {
    if !accel.is_valid() {
        return Err(RenderError::InvalidAccel);
    }
    config.validate()?;
    check_size("color", color, config)?;
    check_size("aux", aux, config)?;

    log::debug!(
        "Rendering {}x{} pass {}/{} on {} threads",
        config.width,
        config.height,
        config.pass + 1,
        config.max_passes,
        options.worker_count()
    );

    let start = Instant::now();
    let report = scheduler::run_rows(
        color.as_mut_slice(),
        aux.as_mut_slice(),
        config,
        cancel,
        options,
        shader,
    );
    let elapsed = start.elapsed();

    let rows_total = config.height as usize;
    let outcome = if report.rows_finished == rows_total {
        RenderOutcome::Completed { rows: rows_total }
    } else {
        RenderOutcome::Cancelled {
            rows_completed: report.rows_finished,
            rows_total,
        }
    };

    match outcome {
        RenderOutcome::Completed { .. } => log::debug!(
            "Pass {} finished in {:.2} ms",
            config.pass,
            elapsed.as_secs_f64() * 1000.0
        ),
        RenderOutcome::Cancelled { .. } => log::info!(
            "Pass {} cancelled after {}/{} rows ({} of {} workers stopped)",
            config.pass,
            report.rows_finished,
            rows_total,
            report.workers_cancelled,
            report.workers
        ),
    }

    Ok(outcome)
}

fn check_size(buffer: &'static str, fb: &FrameBuffer, config: &RenderConfig) -> RenderResult<()> {
    if fb.width() != config.width || fb.height() != config.height {
        return Err(RenderError::BufferSizeMismatch {
            buffer,
            width: fb.width(),
            height: fb.height(),
            expected_width: config.width,
            expected_height: config.height,
        });
    }
    Ok(())
}
