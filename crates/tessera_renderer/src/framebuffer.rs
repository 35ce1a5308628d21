//! Flat RGBA float framebuffers.

/// Channels per pixel (R, G, B, A).
pub const CHANNELS: usize = 4;

/// A row-major, channel-interleaved RGBA `f32` image.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl FrameBuffer {
    /// Create a buffer filled with zeros.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of floats in one row.
    pub fn row_len(&self) -> usize {
        self.width as usize * CHANNELS
    }

    /// RGBA value at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = &self.data[start..start + CHANNELS];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// The `4 * width` floats of row `y`.
    pub fn row(&self, y: u32) -> Option<&[f32]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_len();
        Some(&self.data[start..start + self.row_len()])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn clear(&mut self) {
        self.fill(0.0);
    }

    /// Convert to 8-bit RGBA, clamping each channel to `[0, 1]`.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|c| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)
            .collect()
    }
}
