//! Portable FloatMap.
//!
//! Header: `PF` (RGB) or `Pf` (grey), width and height, then a scale whose
//! sign gives the byte order (negative = little-endian).  Rows are stored
//! bottom-up as 32-bit IEEE floats.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::io;

use crate::bitmap::{Bitmap, ImageType};
use crate::error::{PluginError, Result};
use crate::io_stream::{read_prefix, ReadSeek, WriteSeek};
use crate::plugin::{Capabilities, CodecState, LoadFlags, Plugin, SaveFlags};
use crate::plugins::{new_raster, require_remaining};
use crate::registry::FormatId;

const MAX_DIMENSION: u32 = 1 << 16;
/// Header tokens longer than this are rejected.
const MAX_TOKEN: usize = 32;

pub struct PfmPlugin;

pub fn init(_id: FormatId) -> Box<dyn Plugin> {
    Box::new(PfmPlugin)
}

impl Plugin for PfmPlugin {
    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE | Capabilities::LOAD | Capabilities::SAVE
    }

    fn format(&self) -> Option<&str> {
        Some("PFM")
    }

    fn description(&self) -> Option<&str> {
        Some("Portable floatmap")
    }

    fn extension_list(&self) -> Option<&str> {
        Some("pfm")
    }

    fn mime_type(&self) -> Option<&str> {
        Some("image/x-portable-floatmap")
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
        let mut magic = [0u8; 2];
        Ok(read_prefix(io, &mut magic)? == 2 && (&magic == b"PF" || &magic == b"Pf"))
    }

    fn load(
        &self,
        io:     &mut dyn ReadSeek,
        _page:  i32,
        flags:  LoadFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<Bitmap> {
        let (image_type, channels) = match header_token(io)?.as_str() {
            "PF" => (ImageType::RgbF, 3),
            "Pf" => (ImageType::Float, 1),
            other => return Err(PluginError::invalid(format!("bad PFM magic {other:?}"))),
        };
        let width: u32 = parse(&header_token(io)?)?;
        let height: u32 = parse(&header_token(io)?)?;
        let scale: f32 = parse(&header_token(io)?)?;
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PluginError::invalid(format!("bad PFM dimensions {width}x{height}")));
        }
        if scale == 0.0 || !scale.is_finite() {
            return Err(PluginError::invalid(format!("bad PFM scale {scale}")));
        }

        let bpp = 32 * channels as u32;
        if flags.contains(LoadFlags::NO_PIXELS) {
            return Ok(Bitmap::header_only(image_type, width, height, bpp));
        }

        let samples = u64::from(width) * u64::from(height) * channels as u64;
        require_remaining(io, samples * 4, "PFM")?;

        let mut bitmap = new_raster(image_type, width, height, bpp)?;
        let mut line = vec![0f32; width as usize * channels];
        for file_row in 0..height {
            if scale < 0.0 {
                io.read_f32_into::<LittleEndian>(&mut line)?;
            } else {
                io.read_f32_into::<BigEndian>(&mut line)?;
            }
            let row = bitmap
                .row_mut(height - 1 - file_row)
                .ok_or_else(|| PluginError::invalid("row out of range"))?;
            for (dst, v) in row.chunks_exact_mut(4).zip(&line) {
                dst.copy_from_slice(&v.to_ne_bytes());
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
        let magic = match bitmap.image_type {
            ImageType::RgbF  => "PF",
            ImageType::Float => "Pf",
            other => return Err(PluginError::invalid(format!("PFM cannot store {other:?}"))),
        };
        write!(io, "{magic}\n{} {}\n-1.000000\n", bitmap.width, bitmap.height)?;

        for y in (0..bitmap.height).rev() {
            let row = bitmap.row(y).ok_or(PluginError::HeaderOnly)?;
            let mut out = vec![0u8; row.len()];
            for (dst, src) in out.chunks_exact_mut(4).zip(row.chunks_exact(4)) {
                LittleEndian::write_f32(dst, f32::from_ne_bytes([src[0], src[1], src[2], src[3]]));
            }
            io.write_all(&out)?;
        }
        io.flush()?;
        Ok(())
    }

    fn supports_export_bpp(&self, depth: u32) -> bool {
        depth == 32 || depth == 96
    }

    fn supports_export_type(&self, image_type: ImageType) -> bool {
        matches!(image_type, ImageType::Float | ImageType::RgbF)
    }

    fn supports_no_pixels(&self) -> bool {
        true
    }
}

/// Next whitespace-delimited header token.  Consumes the single whitespace
/// byte that ends it.
fn header_token(io: &mut dyn ReadSeek) -> Result<String> {
    let mut token = Vec::new();
    loop {
        let b = match io.read_u8() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !token.is_empty() => break,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(PluginError::invalid("unexpected end of PFM header"));
            }
            Err(e) => return Err(e.into()),
        };
        if b.is_ascii_whitespace() {
            if token.is_empty() {
                continue;
            }
            break;
        }
        if token.len() == MAX_TOKEN {
            return Err(PluginError::invalid("PFM header token too long"));
        }
        token.push(b);
    }
    String::from_utf8(token).map_err(|_| PluginError::invalid("non-ASCII PFM header"))
}

fn parse<T: std::str::FromStr>(token: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| PluginError::invalid(format!("bad PFM header value {token:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn float_bitmap(image_type: ImageType, width: u32, height: u32, bpp: u32) -> Bitmap {
        let mut b = Bitmap::new(image_type, width, height, bpp);
        for (i, px) in b.pixels_mut().unwrap().chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&(i as f32 * 0.25 - 1.5).to_ne_bytes());
        }
        b
    }

    fn round_trip(b: &Bitmap) -> Bitmap {
        let mut c = Cursor::new(Vec::new());
        PfmPlugin.save(&mut c, b, -1, SaveFlags::DEFAULT, None).unwrap();
        c.set_position(0);
        PfmPlugin.load(&mut c, -1, LoadFlags::DEFAULT, None).unwrap()
    }

    #[test]
    fn rgb_and_grey_round_trip() {
        let rgb = float_bitmap(ImageType::RgbF, 3, 2, 96);
        assert_eq!(round_trip(&rgb), rgb);
        let grey = float_bitmap(ImageType::Float, 4, 3, 32);
        assert_eq!(round_trip(&grey), grey);
    }

    #[test]
    fn big_endian_input() {
        let mut data = b"Pf\n2 1\n1.0\n".to_vec();
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.extend_from_slice(&(-2.0f32).to_be_bytes());
        let b = PfmPlugin
            .load(&mut Cursor::new(data), -1, LoadFlags::DEFAULT, None)
            .unwrap();
        let px = b.pixels().unwrap();
        assert_eq!(f32::from_ne_bytes([px[0], px[1], px[2], px[3]]), 1.5);
        assert_eq!(f32::from_ne_bytes([px[4], px[5], px[6], px[7]]), -2.0);
    }

    #[test]
    fn rows_are_bottom_up_on_disk() {
        let mut data = b"Pf\n1 2\n-1\n".to_vec();
        data.extend_from_slice(&10.0f32.to_le_bytes());
        data.extend_from_slice(&20.0f32.to_le_bytes());
        let b = PfmPlugin
            .load(&mut Cursor::new(data), -1, LoadFlags::DEFAULT, None)
            .unwrap();
        let top = b.row(0).unwrap();
        assert_eq!(f32::from_ne_bytes([top[0], top[1], top[2], top[3]]), 20.0);
    }

    #[test]
    fn rejects_bad_headers() {
        for data in [
            &b"PF\n0 1\n-1\n"[..],
            &b"PF\n1 1\n0\n"[..],
            &b"PF\nx 1\n-1\n"[..],
            &b"PX\n1 1\n-1\n"[..],
        ] {
            assert!(PfmPlugin
                .load(&mut Cursor::new(data), -1, LoadFlags::DEFAULT, None)
                .is_err());
        }
    }

    #[test]
    fn oversized_header_fails_without_allocating() {
        let err = PfmPlugin
            .load(&mut Cursor::new(&b"PF\n65536 65536\n-1\n\0\0\0\0"[..]), -1, LoadFlags::DEFAULT, None)
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidData(_)), "{err}");
    }

    #[test]
    fn integer_bitmaps_are_refused() {
        let b = Bitmap::new(ImageType::Bitmap, 1, 1, 24);
        let mut c = Cursor::new(Vec::new());
        assert!(PfmPlugin.save(&mut c, &b, -1, SaveFlags::DEFAULT, None).is_err());
    }
}
