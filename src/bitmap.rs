//! Minimal image value exchanged between the dispatch façade and plugins.
//!
//! Pixels are stored top-down with rows tightly packed.  1-bpp rows are
//! packed MSB-first and padded to a whole byte.  A bitmap without a pixel
//! payload is a *header-only* image: legal to hold, illegal to save.

use serde::{Deserialize, Serialize};

/// Pixel storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    Unknown,
    /// 1-, 8-, 24- or 32-bit integer pixels.
    Bitmap,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float,
    Double,
    Complex,
    Rgb16,
    Rgba16,
    RgbF,
    RgbaF,
}

impl ImageType {
    const ALL: [ImageType; 13] = [
        ImageType::Unknown,
        ImageType::Bitmap,
        ImageType::Uint16,
        ImageType::Int16,
        ImageType::Uint32,
        ImageType::Int32,
        ImageType::Float,
        ImageType::Double,
        ImageType::Complex,
        ImageType::Rgb16,
        ImageType::Rgba16,
        ImageType::RgbF,
        ImageType::RgbaF,
    ];

    /// Numeric code used across the external plugin ABI.
    pub fn code(self) -> u32 {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0) as u32
    }

    /// Inverse of [`code`](Self::code); unknown codes map to `Unknown`.
    pub fn from_code(code: u32) -> Self {
        Self::ALL.get(code as usize).copied().unwrap_or(ImageType::Unknown)
    }

    /// Bits per pixel for fixed-size types; `None` for [`ImageType::Bitmap`]
    /// (depth is carried by the bitmap) and [`ImageType::Unknown`].
    pub fn fixed_bpp(self) -> Option<u32> {
        match self {
            ImageType::Unknown | ImageType::Bitmap => None,
            ImageType::Uint16 | ImageType::Int16    => Some(16),
            ImageType::Uint32 | ImageType::Int32 | ImageType::Float => Some(32),
            ImageType::Double | ImageType::Rgba16   => Some(64),
            ImageType::Rgb16                        => Some(48),
            ImageType::RgbF                         => Some(96),
            ImageType::RgbaF | ImageType::Complex   => Some(128),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub image_type: ImageType,
    pub width:      u32,
    pub height:     u32,
    pub bpp:        u32,
    pixels:         Option<Vec<u8>>,
}

impl Bitmap {
    /// Allocate a zero-filled bitmap.
    pub fn new(image_type: ImageType, width: u32, height: u32, bpp: u32) -> Self {
        let mut bitmap = Self::header_only(image_type, width, height, bpp);
        bitmap.pixels = Some(vec![0u8; bitmap.pitch() * height as usize]);
        bitmap
    }

    /// Fallible [`new`](Self::new) for sizes taken from untrusted headers.
    /// `None` when the buffer size overflows or cannot be reserved.
    pub fn try_new(image_type: ImageType, width: u32, height: u32, bpp: u32) -> Option<Self> {
        let mut bitmap = Self::header_only(image_type, width, height, bpp);
        let len = (width as usize)
            .checked_mul(bpp as usize)?
            .div_ceil(8)
            .checked_mul(height as usize)?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).ok()?;
        pixels.resize(len, 0);
        bitmap.pixels = Some(pixels);
        Some(bitmap)
    }

    /// A bitmap that carries dimensions but no pixel payload.
    pub fn header_only(image_type: ImageType, width: u32, height: u32, bpp: u32) -> Self {
        Self { image_type, width, height, bpp, pixels: None }
    }

    /// Wrap an existing buffer.  Returns `None` when the length does not
    /// match `pitch * height`.
    pub fn from_pixels(
        image_type: ImageType,
        width:      u32,
        height:     u32,
        bpp:        u32,
        pixels:     Vec<u8>,
    ) -> Option<Self> {
        let mut bitmap = Self::header_only(image_type, width, height, bpp);
        if pixels.len() != bitmap.pitch() * height as usize {
            return None;
        }
        bitmap.pixels = Some(pixels);
        Some(bitmap)
    }

    pub fn has_pixels(&self) -> bool {
        self.pixels.is_some()
    }

    /// Bytes per row.
    pub fn pitch(&self) -> usize {
        (self.width as usize * self.bpp as usize).div_ceil(8)
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }

    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.pixels.as_deref_mut()
    }

    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let pitch = self.pitch();
        let start = y as usize * pitch;
        self.pixels.as_deref()?.get(start..start + pitch)
    }

    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u8]> {
        let pitch = self.pitch();
        let start = y as usize * pitch;
        self.pixels.as_deref_mut()?.get_mut(start..start + pitch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_rounds_bits_up() {
        assert_eq!(Bitmap::header_only(ImageType::Bitmap, 9, 1, 1).pitch(), 2);
        assert_eq!(Bitmap::header_only(ImageType::Bitmap, 3, 1, 24).pitch(), 9);
        assert_eq!(Bitmap::header_only(ImageType::RgbF, 2, 1, 96).pitch(), 24);
    }

    #[test]
    fn header_only_has_no_pixels() {
        let b = Bitmap::header_only(ImageType::Bitmap, 4, 4, 24);
        assert!(!b.has_pixels());
        assert!(b.row(0).is_none());
        assert!(Bitmap::new(ImageType::Bitmap, 4, 4, 24).has_pixels());
    }

    #[test]
    fn try_new_rejects_overflowing_sizes() {
        assert!(Bitmap::try_new(ImageType::Bitmap, u32::MAX, u32::MAX, 128).is_none());
        let b = Bitmap::try_new(ImageType::Bitmap, 3, 2, 24).unwrap();
        assert_eq!(b, Bitmap::new(ImageType::Bitmap, 3, 2, 24));
    }

    #[test]
    fn type_codes_are_stable() {
        assert_eq!(ImageType::Bitmap.code(), 1);
        assert_eq!(ImageType::RgbaF.code(), 12);
        assert_eq!(ImageType::from_code(11), ImageType::RgbF);
        assert_eq!(ImageType::from_code(99), ImageType::Unknown);
    }

    #[test]
    fn from_pixels_checks_length() {
        assert!(Bitmap::from_pixels(ImageType::Bitmap, 2, 2, 8, vec![0; 4]).is_some());
        assert!(Bitmap::from_pixels(ImageType::Bitmap, 2, 2, 8, vec![0; 3]).is_none());
    }
}
