//! File storage collaborator: the image area on flash.

use crate::settings::{IMAGE_PATH_FIELD_BYTES, ImagePath};

/// Directory holding displayable images.
pub const IMAGE_DIR: &str = "/image/";

/// Leading word of every stored image.
pub const IMAGE_HEADER_MAGIC: u32 = 0x474D_4953;
/// Magic, payload length and the NUL-padded path.
pub const IMAGE_HEADER_LEN: usize = 8 + IMAGE_PATH_FIELD_BYTES;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct StorageUsage {
    pub total_bytes: u32,
    pub used_bytes: u32,
}

impl StorageUsage {
    pub const fn free_bytes(&self) -> u32 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

pub trait FileStore {
    type Error: core::fmt::Debug;

    /// Removes every stored image and returns how many were removed.
    fn clear_images(&mut self) -> Result<u32, Self::Error>;

    /// Removes the file stored under `path`. `Ok(false)` when there is none.
    fn delete(&mut self, path: &str) -> Result<bool, Self::Error>;

    /// Wipes the whole file area.
    fn format(&mut self) -> Result<(), Self::Error>;

    fn usage(&mut self) -> Result<StorageUsage, Self::Error>;
}

/// Header in front of each image in the flash file area. Images start on a
/// sector boundary and the payload follows the header directly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHeader {
    pub len: u32,
    pub path: ImagePath,
}

impl ImageHeader {
    pub fn encode(&self) -> [u8; IMAGE_HEADER_LEN] {
        let mut raw = [0u8; IMAGE_HEADER_LEN];
        raw[..4].copy_from_slice(&IMAGE_HEADER_MAGIC.to_le_bytes());
        raw[4..8].copy_from_slice(&self.len.to_le_bytes());
        raw[8..8 + self.path.len()].copy_from_slice(self.path.as_bytes());
        raw
    }

    /// `None` for erased sectors, foreign data and unterminated paths.
    pub fn decode(raw: &[u8; IMAGE_HEADER_LEN]) -> Option<Self> {
        if u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) != IMAGE_HEADER_MAGIC {
            return None;
        }
        let len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);

        let field = &raw[8..];
        let end = field.iter().position(|b| *b == 0)?;
        let mut path = ImagePath::new();
        path.push_str(core::str::from_utf8(&field[..end]).ok()?).ok()?;
        Some(Self { len, path })
    }

    /// Bytes the image occupies on the medium, header included.
    pub const fn stored_len(&self) -> u32 {
        (IMAGE_HEADER_LEN as u32).saturating_add(self.len)
    }

    /// Whole sectors the image spans.
    pub const fn sectors(&self, sector_size: u32) -> u32 {
        self.stored_len().div_ceil(sector_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(path: &str, len: u32) -> ImageHeader {
        let mut stored = ImagePath::new();
        stored.push_str(path).unwrap();
        ImageHeader { len, path: stored }
    }

    #[test]
    fn header_survives_encoding() {
        let original = header("/image/cat.jpg", 10_000);
        assert_eq!(ImageHeader::decode(&original.encode()), Some(original));
    }

    #[test]
    fn erased_sector_has_no_header() {
        assert_eq!(ImageHeader::decode(&[0xFF; IMAGE_HEADER_LEN]), None);
    }

    #[test]
    fn path_without_terminator_is_rejected() {
        let mut raw = header("/image/a.jpg", 1).encode();
        raw[8..].fill(b'a');
        assert_eq!(ImageHeader::decode(&raw), None);
    }

    #[test]
    fn span_counts_the_header() {
        assert_eq!(header("/image/a.jpg", 0).sectors(4_096), 1);
        assert_eq!(
            header("/image/a.jpg", 4_096 - IMAGE_HEADER_LEN as u32).sectors(4_096),
            1
        );
        assert_eq!(
            header("/image/a.jpg", 4_097 - IMAGE_HEADER_LEN as u32).sectors(4_096),
            2
        );
    }
}
