//! Monochrome in-memory canvas, expanded to RGB565 on flush.

use crate::protocol::{BUFFER_SIZE, HEIGHT, LINE_BYTES, WIDTH};

/// 1bpp framebuffer. Bit 7 of each byte is the leftmost pixel.
#[derive(Clone)]
pub struct FrameBuffer {
    bytes: [u8; BUFFER_SIZE],
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0u8; BUFFER_SIZE],
        }
    }

    pub fn bytes(&self) -> &[u8; BUFFER_SIZE] {
        &self.bytes
    }

    /// Sets every pixel to `on`.
    pub fn clear(&mut self, on: bool) {
        let fill = if on { u8::MAX } else { 0 };
        self.bytes.fill(fill);
    }

    /// Byte offset and bit mask of an on-panel pixel.
    fn locate(x: usize, y: usize) -> Option<(usize, u8)> {
        (x < WIDTH && y < HEIGHT).then(|| (y * LINE_BYTES + x / 8, 0x80 >> (x % 8)))
    }

    /// Returns `false` when the pixel is off-panel.
    pub fn set_pixel(&mut self, x: usize, y: usize, on: bool) -> bool {
        let Some((at, mask)) = Self::locate(x, y) else {
            return false;
        };
        let byte = &mut self.bytes[at];
        *byte = if on { *byte | mask } else { *byte & !mask };
        true
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<bool> {
        Self::locate(x, y).map(|(at, mask)| self.bytes[at] & mask != 0)
    }

    /// Row `y` (0-based).
    pub fn row(&self, y: usize) -> Option<&[u8; LINE_BYTES]> {
        if y >= HEIGHT {
            return None;
        }

        let start = y * LINE_BYTES;
        <&[u8; LINE_BYTES]>::try_from(&self.bytes[start..start + LINE_BYTES]).ok()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8; LINE_BYTES]> {
        (0..HEIGHT).filter_map(|y| self.row(y))
    }
}
