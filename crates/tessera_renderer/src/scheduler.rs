//! Row scheduler for the multi-threaded renderer.
//!
//! A fixed set of scoped worker threads share one atomic row cursor. Each
//! worker claims the next row with a fetch-and-increment, renders it and
//! loops until the rows run out or it observes cancellation. Workers are
//! spawned per call and joined before returning.

use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::cancel::{CancelFlag, CancelMonitor};
use crate::framebuffer::CHANNELS;
use crate::progress::{clear_progress, mark_in_progress};
use crate::renderer::{PixelShader, RenderConfig};

/// How long a worker runs before it starts reading the cancel flag.
///
/// The flag is read only once a worker has run for strictly longer than this.
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Threading and cancellation settings for one render call.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Worker count; `None` uses the available hardware parallelism
    pub threads: Option<NonZeroUsize>,
    /// Minimum worker run time before the cancel flag is consulted
    pub cancel_poll_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            threads: None,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }
}

impl SchedulerOptions {
    /// Use exactly `threads` workers. Zero restores auto-detection.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = NonZeroUsize::new(threads);
        self
    }

    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }

    /// Number of workers a render will spawn, never less than one.
    pub fn worker_count(&self) -> usize {
        self.threads
            .or_else(|| thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }
}

/// One claimed row: its index and its slices of both buffers.
pub(crate) struct RowLease<'c> {
    pub y: usize,
    pub color: &'c mut [f32],
    pub aux: &'c mut [f32],
}

/// Hands out the rows of two equally sized buffers, each exactly once.
///
/// Claiming a row is the only way to reach its slices, so the atomic cursor
/// doubles as the proof that no two workers write the same row.
pub(crate) struct RowCursor<'a> {
    next: AtomicUsize,
    finished: AtomicUsize,
    height: usize,
    row_len: usize,
    color: *mut f32,
    aux: *mut f32,
    _buffers: PhantomData<&'a mut [f32]>,
}

// SAFETY: the raw pointers are only turned into slices in `claim`, which
// yields disjoint rows.
unsafe impl Sync for RowCursor<'_> {}

impl<'a> RowCursor<'a> {
    pub fn new(color: &'a mut [f32], aux: &'a mut [f32], row_len: usize) -> Self {
        assert!(row_len > 0, "rows must not be empty");
        assert_eq!(color.len(), aux.len(), "buffers differ in size");
        assert_eq!(color.len() % row_len, 0, "buffer is not a whole number of rows");

        Self {
            next: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            height: color.len() / row_len,
            row_len,
            color: color.as_mut_ptr(),
            aux: aux.as_mut_ptr(),
            _buffers: PhantomData,
        }
    }

    /// Claim the next row, or `None` once every row has been handed out.
    pub fn claim(&self) -> Option<RowLease<'_>> {
        let y = self.next.fetch_add(1, Ordering::Relaxed);
        if y >= self.height {
            return None;
        }

        let start = y * self.row_len;
        // SAFETY: `fetch_add` returns each `y` at most once, so the ranges
        // never overlap, and `y < height` keeps them inside both buffers.
        // The pointers come from `&'a mut` borrows held for `'a`.
        let (color, aux) = unsafe {
            (
                std::slice::from_raw_parts_mut(self.color.add(start), self.row_len),
                std::slice::from_raw_parts_mut(self.aux.add(start), self.row_len),
            )
        };
        Some(RowLease { y, color, aux })
    }

    /// Record that a claimed row was fully written.
    pub fn finish(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_finished(&self) -> usize {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Lifecycle of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Stopping,
    Terminated,
}

/// What the workers did during one call to [`run_rows`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScheduleReport {
    pub workers: usize,
    pub rows_finished: usize,
    pub workers_cancelled: usize,
}

/// Render every row of `color`, publishing progress in `aux`.
///
/// Blocks until all workers have terminated. A worker panic is re-raised
/// on the calling thread.
pub(crate) fn run_rows<S: PixelShader + ?Sized>(
    color: &mut [f32],
    aux: &mut [f32],
    config: &RenderConfig,
    cancel: &CancelFlag,
    options: &SchedulerOptions,
    shader: &S,
) -> ScheduleReport {
    let workers = options.worker_count();
    let cursor = RowCursor::new(color, aux, config.width as usize * CHANNELS);
    let poll_interval = options.cancel_poll_interval;

    let cancelled: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let cursor = &cursor;
                scope.spawn(move || run_worker(id, cursor, config, cancel, poll_interval, shader))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    ScheduleReport {
        workers,
        rows_finished: cursor.rows_finished(),
        workers_cancelled: cancelled.iter().filter(|&&c| c).count(),
    }
}

/// Worker loop. Returns true if the worker stopped because of cancellation.
fn run_worker<S: PixelShader + ?Sized>(
    id: usize,
    cursor: &RowCursor<'_>,
    config: &RenderConfig,
    cancel: &CancelFlag,
    poll_interval: Duration,
    shader: &S,
) -> bool {
    let monitor = CancelMonitor::start(cancel, poll_interval);
    let mut state = WorkerState::Running;
    let mut stopped = false;

    loop {
        state = match state {
            WorkerState::Running => match cursor.claim() {
                None => WorkerState::Terminated,
                // The claimed row is abandoned untouched.
                Some(_) if monitor.should_stop() => WorkerState::Stopping,
                Some(lease) => {
                    render_row(lease, config, shader);
                    cursor.finish();
                    WorkerState::Running
                }
            },
            WorkerState::Stopping => {
                log::trace!("worker {} observed cancellation", id);
                stopped = true;
                WorkerState::Terminated
            }
            WorkerState::Terminated => break,
        };
    }

    stopped
}

fn render_row<S: PixelShader + ?Sized>(lease: RowLease<'_>, config: &RenderConfig, shader: &S) {
    mark_in_progress(lease.aux);

    let y = lease.y as u32;
    for (x, px) in lease.color.chunks_exact_mut(CHANNELS).enumerate() {
        px.copy_from_slice(&shader.shade(x as u32, y, config));
    }

    clear_progress(lease.aux);
}
