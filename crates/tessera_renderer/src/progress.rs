//! In-flight row markers for the auxiliary buffer.
//!
//! While a row is being rendered its aux slice holds alternating on/off
//! blocks of [`MARKER_BLOCK`] pixels with zero alpha. Once the row's color is
//! written the slice is cleared back to transparent black.

use crate::framebuffer::CHANNELS;

/// Width in pixels of one on/off block of the marker.
pub const MARKER_BLOCK: usize = 8;

/// Marker value of pixel `x`: 0.0 or 1.0 for R, G and B.
#[inline]
pub fn marker_value(x: usize) -> f32 {
    ((x / MARKER_BLOCK) % 2) as f32
}

/// Write the in-progress marker to one aux row.
pub fn mark_in_progress(aux_row: &mut [f32]) {
    for (x, px) in aux_row.chunks_exact_mut(CHANNELS).enumerate() {
        let c = marker_value(x);
        px.copy_from_slice(&[c, c, c, 0.0]);
    }
}

/// Clear one aux row to transparent black.
pub fn clear_progress(aux_row: &mut [f32]) {
    aux_row.fill(0.0);
}

/// True if `aux_row` holds exactly the in-progress marker.
pub fn is_marker_row(aux_row: &[f32]) -> bool {
    aux_row.chunks_exact(CHANNELS).enumerate().all(|(x, px)| {
        let c = marker_value(x);
        px == [c, c, c, 0.0]
    })
}
