//! Command set and pixel packing for the ST7789 controller.

/// Panel width in pixels.
pub const WIDTH: usize = 240;
/// Panel height in pixels.
pub const HEIGHT: usize = 240;
/// Bytes per row of the 1bpp framebuffer.
pub const LINE_BYTES: usize = WIDTH / 8;
/// Total 1bpp framebuffer size in bytes.
pub const BUFFER_SIZE: usize = LINE_BYTES * HEIGHT;
/// Bytes per row once expanded to RGB565 on the wire.
pub const LINE_PIXEL_BYTES: usize = WIDTH * 2;

pub const SWRESET: u8 = 0x01;
pub const SLPOUT: u8 = 0x11;
pub const NORON: u8 = 0x13;
pub const INVOFF: u8 = 0x20;
pub const INVON: u8 = 0x21;
pub const DISPOFF: u8 = 0x28;
pub const DISPON: u8 = 0x29;
pub const CASET: u8 = 0x2A;
pub const RASET: u8 = 0x2B;
pub const RAMWR: u8 = 0x2C;
pub const MADCTL: u8 = 0x36;
pub const COLMOD: u8 = 0x3A;

/// 16 bits per pixel on both the RGB and MCU interfaces.
pub const COLMOD_RGB565: u8 = 0x55;

pub const BLACK: u16 = 0x0000;
pub const WHITE: u16 = 0xFFFF;

/// Parameter bytes for `CASET`/`RASET`: inclusive start and end, big endian.
///
/// Returns `None` when the range is reversed or leaves the panel.
pub fn window_params(start: u16, end: u16, limit: usize) -> Option<[u8; 4]> {
    if start > end || usize::from(end) >= limit {
        return None;
    }

    let [sh, sl] = start.to_be_bytes();
    let [eh, el] = end.to_be_bytes();
    Some([sh, sl, eh, el])
}

/// Packs 8-bit channels into RGB565.
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Scales every channel of an RGB565 color by `percent` (clamped to 100).
pub fn scale_rgb565(color: u16, percent: u8) -> u16 {
    let percent = u32::from(percent.min(100));
    let scale = |value: u16, max: u32| -> u16 { ((u32::from(value) * percent + 50) / 100).min(max) as u16 };

    let r = scale(color >> 11, 0x1F);
    let g = scale((color >> 5) & 0x3F, 0x3F);
    let b = scale(color & 0x1F, 0x1F);
    (r << 11) | (g << 5) | b
}

/// Expands one 1bpp row (MSB first) into big-endian RGB565 bytes.
pub fn expand_line(
    line: &[u8; LINE_BYTES],
    on: u16,
    off: u16,
    out: &mut [u8; LINE_PIXEL_BYTES],
) {
    let on = on.to_be_bytes();
    let off = off.to_be_bytes();

    for (x, pixel) in out.chunks_exact_mut(2).enumerate() {
        let set = line[x / 8] & (0x80 >> (x % 8)) != 0;
        pixel.copy_from_slice(if set { &on } else { &off });
    }
}
