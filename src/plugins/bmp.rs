//! Windows BMP, uncompressed 24- and 32-bit.
//!
//! On disk rows are bottom-up (unless the height is negative), BGR(A), and
//! padded to four bytes.  In memory the bitmap is top-down RGB(A).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;

use crate::bitmap::{Bitmap, ImageType};
use crate::error::{PluginError, Result};
use crate::io_stream::{read_prefix, ReadSeek, WriteSeek};
use crate::plugin::{Capabilities, CodecState, LoadFlags, Plugin, SaveFlags};
use crate::plugins::{new_raster, require_remaining};
use crate::registry::FormatId;

const FILE_HEADER_LEN: u32 = 14;
const INFO_HEADER_LEN: u32 = 40;
const BI_RGB: u32 = 0;
/// Largest accepted dimension, either axis.
const MAX_DIMENSION: u32 = 1 << 16;

/// Signatures of the Windows and OS/2 variants.
const SIGNATURES: [&[u8; 2]; 6] = [b"BM", b"BA", b"CI", b"CP", b"IC", b"PT"];

pub struct BmpPlugin;

pub fn init(_id: FormatId) -> Box<dyn Plugin> {
    Box::new(BmpPlugin)
}

fn padded_row(width: u32, bpp: u32) -> usize {
    ((width as usize * bpp as usize + 31) / 32) * 4
}

impl Plugin for BmpPlugin {
    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE | Capabilities::LOAD | Capabilities::SAVE
    }

    fn format(&self) -> Option<&str> {
        Some("BMP")
    }

    fn description(&self) -> Option<&str> {
        Some("Windows or OS/2 Bitmap File (*.BMP)")
    }

    fn extension_list(&self) -> Option<&str> {
        Some("bmp")
    }

    fn regexp(&self) -> Option<&str> {
        Some("^BM")
    }

    fn mime_type(&self) -> Option<&str> {
        Some("image/bmp")
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> std::io::Result<bool> {
        let mut sig = [0u8; 2];
        if read_prefix(io, &mut sig)? < 2 {
            return Ok(false);
        }
        Ok(SIGNATURES.iter().any(|s| **s == sig))
    }

    fn load(
        &self,
        io:     &mut dyn ReadSeek,
        _page:  i32,
        flags:  LoadFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<Bitmap> {
        let start = io.stream_position()?;

        let mut magic = [0u8; 2];
        io.read_exact(&mut magic)?;
        if &magic != b"BM" {
            return Err(PluginError::invalid("not a Windows bitmap"));
        }
        let _file_size = io.read_u32::<LittleEndian>()?;
        let _reserved = io.read_u32::<LittleEndian>()?;
        let data_offset = io.read_u32::<LittleEndian>()?;

        let header_len = io.read_u32::<LittleEndian>()?;
        if header_len < INFO_HEADER_LEN {
            return Err(PluginError::invalid(format!("unsupported BMP header size {header_len}")));
        }
        let width = io.read_i32::<LittleEndian>()?;
        let height = io.read_i32::<LittleEndian>()?;
        let _planes = io.read_u16::<LittleEndian>()?;
        let bpp = u32::from(io.read_u16::<LittleEndian>()?);
        let compression = io.read_u32::<LittleEndian>()?;

        if compression != BI_RGB {
            return Err(PluginError::invalid(format!("unsupported BMP compression {compression}")));
        }
        if bpp != 24 && bpp != 32 {
            return Err(PluginError::invalid(format!("unsupported BMP depth {bpp}")));
        }
        let top_down = height < 0;
        let width = width.unsigned_abs();
        let height = height.unsigned_abs();
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PluginError::invalid(format!("bad BMP dimensions {width}x{height}")));
        }

        if flags.contains(LoadFlags::NO_PIXELS) {
            return Ok(Bitmap::header_only(ImageType::Bitmap, width, height, bpp));
        }

        io.seek(SeekFrom::Start(start + u64::from(data_offset)))?;

        let stride = padded_row(width, bpp);
        require_remaining(io, stride as u64 * u64::from(height), "BMP")?;

        let mut bitmap = new_raster(ImageType::Bitmap, width, height, bpp)?;
        let channels = (bpp / 8) as usize;
        let mut row = vec![0u8; stride];
        for file_row in 0..height {
            io.read_exact(&mut row)?;
            let y = if top_down { file_row } else { height - 1 - file_row };
            let dst = bitmap
                .row_mut(y)
                .ok_or_else(|| PluginError::invalid("row out of range"))?;
            for (d, s) in dst.chunks_exact_mut(channels).zip(row.chunks_exact(channels)) {
                d.copy_from_slice(s);
                d.swap(0, 2);
            }
        }
        Ok(bitmap)
    }

    fn save(
        &self,
        io:     &mut dyn WriteSeek,
        bitmap: &Bitmap,
        _page:  i32,
        _flags: SaveFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<()> {
        let bpp = bitmap.bpp;
        if bitmap.image_type != ImageType::Bitmap || !self.supports_export_bpp(bpp) {
            return Err(PluginError::invalid(format!(
                "BMP cannot store {:?} at {bpp} bpp",
                bitmap.image_type
            )));
        }
        let stride = padded_row(bitmap.width, bpp);
        let image_size = stride * bitmap.height as usize;
        let data_offset = FILE_HEADER_LEN + INFO_HEADER_LEN;
        let file_size = u32::try_from(image_size + data_offset as usize)
            .map_err(|_| PluginError::invalid("image too large for BMP"))?;

        io.write_all(b"BM")?;
        io.write_u32::<LittleEndian>(file_size)?;
        io.write_u32::<LittleEndian>(0)?;
        io.write_u32::<LittleEndian>(data_offset)?;

        io.write_u32::<LittleEndian>(INFO_HEADER_LEN)?;
        io.write_i32::<LittleEndian>(bitmap.width as i32)?;
        io.write_i32::<LittleEndian>(bitmap.height as i32)?;
        io.write_u16::<LittleEndian>(1)?;
        io.write_u16::<LittleEndian>(bpp as u16)?;
        io.write_u32::<LittleEndian>(BI_RGB)?;
        io.write_u32::<LittleEndian>(image_size as u32)?;
        io.write_i32::<LittleEndian>(2835)?; // 72 dpi
        io.write_i32::<LittleEndian>(2835)?;
        io.write_u32::<LittleEndian>(0)?;
        io.write_u32::<LittleEndian>(0)?;

        let channels = (bpp / 8) as usize;
        let mut out = vec![0u8; stride];
        for y in (0..bitmap.height).rev() {
            let src = bitmap.row(y).ok_or(PluginError::HeaderOnly)?;
            for (d, s) in out.chunks_exact_mut(channels).zip(src.chunks_exact(channels)) {
                d.copy_from_slice(s);
                d.swap(0, 2);
            }
            io.write_all(&out)?;
        }
        io.flush()?;
        Ok(())
    }

    fn supports_export_bpp(&self, depth: u32) -> bool {
        depth == 24 || depth == 32
    }

    fn supports_export_type(&self, image_type: ImageType) -> bool {
        image_type == ImageType::Bitmap
    }

    fn supports_no_pixels(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn gradient(width: u32, height: u32, bpp: u32) -> Bitmap {
        let mut b = Bitmap::new(ImageType::Bitmap, width, height, bpp);
        for (i, px) in b.pixels_mut().unwrap().iter_mut().enumerate() {
            *px = (i * 7 % 251) as u8;
        }
        b
    }

    fn encode(b: &Bitmap) -> Vec<u8> {
        let mut c = Cursor::new(Vec::new());
        BmpPlugin.save(&mut c, b, -1, SaveFlags::DEFAULT, None).unwrap();
        c.into_inner()
    }

    #[test]
    fn rgb_round_trip_with_row_padding() {
        // Width 3 at 24 bpp: 9 data bytes padded to 12.
        let src = gradient(3, 5, 24);
        let bytes = encode(&src);
        assert_eq!(bytes.len(), 54 + 12 * 5);
        let back = BmpPlugin
            .load(&mut Cursor::new(bytes), -1, LoadFlags::DEFAULT, None)
            .unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn rgba_round_trip() {
        let src = gradient(4, 2, 32);
        let back = BmpPlugin
            .load(&mut Cursor::new(encode(&src)), -1, LoadFlags::DEFAULT, None)
            .unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn disk_order_is_bottom_up_bgr() {
        let mut src = Bitmap::new(ImageType::Bitmap, 1, 2, 24);
        src.row_mut(0).unwrap().copy_from_slice(&[1, 2, 3]);
        src.row_mut(1).unwrap().copy_from_slice(&[4, 5, 6]);
        let bytes = encode(&src);
        assert_eq!(&bytes[54..57], &[6, 5, 4]);
        assert_eq!(&bytes[58..61], &[3, 2, 1]);
    }

    #[test]
    fn header_only_load() {
        let bytes = encode(&gradient(8, 6, 24));
        let b = BmpPlugin
            .load(&mut Cursor::new(bytes), -1, LoadFlags::NO_PIXELS, None)
            .unwrap();
        assert!(!b.has_pixels());
        assert_eq!((b.width, b.height, b.bpp), (8, 6, 24));
    }

    #[test]
    fn rejects_unsupported_depth() {
        let b = Bitmap::new(ImageType::Bitmap, 2, 2, 8);
        let mut c = Cursor::new(Vec::new());
        assert!(BmpPlugin.save(&mut c, &b, -1, SaveFlags::DEFAULT, None).is_err());
    }

    #[test]
    fn truncated_pixel_data_is_an_error() {
        let mut bytes = encode(&gradient(4, 4, 24));
        bytes.truncate(60);
        assert!(BmpPlugin
            .load(&mut Cursor::new(bytes), -1, LoadFlags::DEFAULT, None)
            .is_err());
    }

    #[test]
    fn oversized_header_fails_without_allocating() {
        let mut hdr = b"BM".to_vec();
        for v in [54u32, 0, 54, INFO_HEADER_LEN, 65536, 65536] {
            hdr.extend_from_slice(&v.to_le_bytes());
        }
        hdr.extend_from_slice(&1u16.to_le_bytes());
        hdr.extend_from_slice(&32u16.to_le_bytes());
        hdr.resize(54, 0);

        let err = BmpPlugin
            .load(&mut Cursor::new(hdr), -1, LoadFlags::DEFAULT, None)
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidData(_)), "{err}");
    }

    #[test]
    fn os2_signatures_validate() {
        assert!(BmpPlugin.validate(&mut Cursor::new(b"BA....")).unwrap());
        assert!(!BmpPlugin.validate(&mut Cursor::new(b"B")).unwrap());
    }
}
