//! Netpbm family: PBM, PGM and PPM in ASCII (`P1`..`P3`) and binary
//! (`P4`..`P6`) forms.
//!
//! One plugin type serves all six variants.  Each registration passes the
//! variant's name, description, extension and regexp as overrides; the
//! plugin itself only knows which magic it accepts.
//!
//! In memory, PBM images are 1-bpp with bit 1 meaning white (the file format
//! uses 1 for black).  Greymaps and pixmaps with `maxval <= 255` load as 8-
//! and 24-bpp bitmaps scaled to 0..255; wider samples load as `Uint16` /
//! `Rgb16` in native byte order, unscaled.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

use crate::bitmap::{Bitmap, ImageType};
use crate::error::{PluginError, Result};
use crate::io_stream::{read_prefix, ReadSeek, WriteSeek};
use crate::plugin::{Capabilities, CodecState, LoadFlags, Plugin, SaveFlags};
use crate::plugins::{new_raster, require_remaining};
use crate::registry::Registration;

const MAX_DIMENSION: u32 = 1 << 16;
/// ASCII output wraps before this many characters per line.
const LINE_LIMIT: usize = 70;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    Bitmap,
    Greymap,
    Pixmap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PnmKind {
    Pbm,
    PbmRaw,
    Pgm,
    PgmRaw,
    Ppm,
    PpmRaw,
}

impl PnmKind {
    pub const ALL: [PnmKind; 6] = [
        PnmKind::Pbm,
        PnmKind::PbmRaw,
        PnmKind::Pgm,
        PnmKind::PgmRaw,
        PnmKind::Ppm,
        PnmKind::PpmRaw,
    ];

    pub fn magic(self) -> [u8; 2] {
        let digit = match self {
            PnmKind::Pbm    => b'1',
            PnmKind::Pgm    => b'2',
            PnmKind::Ppm    => b'3',
            PnmKind::PbmRaw => b'4',
            PnmKind::PgmRaw => b'5',
            PnmKind::PpmRaw => b'6',
        };
        [b'P', digit]
    }

    pub fn is_raw(self) -> bool {
        matches!(self, PnmKind::PbmRaw | PnmKind::PgmRaw | PnmKind::PpmRaw)
    }

    fn family(self) -> Family {
        match self {
            PnmKind::Pbm | PnmKind::PbmRaw => Family::Bitmap,
            PnmKind::Pgm | PnmKind::PgmRaw => Family::Greymap,
            PnmKind::Ppm | PnmKind::PpmRaw => Family::Pixmap,
        }
    }

    pub fn format_name(self) -> &'static str {
        match self {
            PnmKind::Pbm    => "PBM",
            PnmKind::PbmRaw => "PBMRAW",
            PnmKind::Pgm    => "PGM",
            PnmKind::PgmRaw => "PGMRAW",
            PnmKind::Ppm    => "PPM",
            PnmKind::PpmRaw => "PPMRAW",
        }
    }

    fn description(self) -> &'static str {
        match self {
            PnmKind::Pbm    => "Portable Bitmap (ASCII)",
            PnmKind::PbmRaw => "Portable Bitmap (RAW)",
            PnmKind::Pgm    => "Portable Greymap (ASCII)",
            PnmKind::PgmRaw => "Portable Greymap (RAW)",
            PnmKind::Ppm    => "Portable Pixelmap (ASCII)",
            PnmKind::PpmRaw => "Portable Pixelmap (RAW)",
        }
    }

    fn extension(self) -> &'static str {
        match self.family() {
            Family::Bitmap  => "pbm",
            Family::Greymap => "pgm",
            Family::Pixmap  => "ppm",
        }
    }

    /// Registration overrides for this variant.
    pub fn registration(self) -> Registration {
        let [_, digit] = self.magic();
        Registration::new()
            .format(self.format_name())
            .description(self.description())
            .extension(self.extension())
            .regexp(format!("^P{}", digit as char))
    }
}

pub struct PnmPlugin {
    kind: PnmKind,
}

impl PnmPlugin {
    pub fn new(kind: PnmKind) -> Self {
        Self { kind }
    }
}

impl Plugin for PnmPlugin {
    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE | Capabilities::LOAD | Capabilities::SAVE
    }

    fn description(&self) -> Option<&str> {
        Some("Portable Network Media")
    }

    fn extension_list(&self) -> Option<&str> {
        Some("pbm,pgm,ppm,pnm")
    }

    fn mime_type(&self) -> Option<&str> {
        Some(match self.kind.family() {
            Family::Bitmap  => "image/x-portable-bitmap",
            Family::Greymap => "image/x-portable-graymap",
            Family::Pixmap  => "image/x-portable-pixmap",
        })
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
        let mut magic = [0u8; 2];
        Ok(read_prefix(io, &mut magic)? == 2 && magic == self.kind.magic())
    }

    fn load(
        &self,
        io:     &mut dyn ReadSeek,
        _page:  i32,
        flags:  LoadFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<Bitmap> {
        let mut magic = [0u8; 2];
        io.read_exact(&mut magic)?;
        if magic != self.kind.magic() {
            return Err(PluginError::invalid(format!(
                "expected {} magic, found {:?}",
                self.kind.format_name(),
                String::from_utf8_lossy(&magic)
            )));
        }

        let width = header_value(io)?;
        let height = header_value(io)?;
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PluginError::invalid(format!("bad PNM dimensions {width}x{height}")));
        }

        let family = self.kind.family();
        if family == Family::Bitmap {
            if flags.contains(LoadFlags::NO_PIXELS) {
                return Ok(Bitmap::header_only(ImageType::Bitmap, width, height, 1));
            }
            return self.load_bilevel(io, width, height);
        }

        let maxval = header_value(io)?;
        if maxval == 0 || maxval > u32::from(u16::MAX) {
            return Err(PluginError::invalid(format!("bad PNM maxval {maxval}")));
        }
        let wide = maxval > 255;
        let (image_type, bpp, channels) = match (family, wide) {
            (Family::Greymap, false) => (ImageType::Bitmap, 8, 1),
            (Family::Greymap, true)  => (ImageType::Uint16, 16, 1),
            (_, false)               => (ImageType::Bitmap, 24, 3),
            (_, true)                => (ImageType::Rgb16, 48, 3),
        };
        if flags.contains(LoadFlags::NO_PIXELS) {
            return Ok(Bitmap::header_only(image_type, width, height, bpp));
        }

        let count = width as usize * height as usize * channels;
        // Raw samples take one or two bytes; ASCII samples at least one digit.
        let sample_len: u64 = if self.kind.is_raw() && wide { 2 } else { 1 };
        require_remaining(io, count as u64 * sample_len, self.kind.format_name())?;

        let samples = if self.kind.is_raw() {
            read_binary_samples(io, count, wide)?
        } else {
            let mut text = Vec::new();
            io.read_to_end(&mut text)?;
            let mut tokens = AsciiTokens::new(&text);
            (0..count).map(|_| tokens.value()).collect::<Result<Vec<_>>>()?
        };

        let mut bitmap = new_raster(image_type, width, height, bpp)?;
        let pixels = bitmap
            .pixels_mut()
            .ok_or_else(|| PluginError::invalid("no pixel buffer"))?;
        if wide {
            for (dst, &v) in pixels.chunks_exact_mut(2).zip(&samples) {
                check_sample(v, maxval)?;
                dst.copy_from_slice(&(v as u16).to_ne_bytes());
            }
        } else {
            for (dst, &v) in pixels.iter_mut().zip(&samples) {
                check_sample(v, maxval)?;
                *dst = ((v * 255 + maxval / 2) / maxval) as u8;
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
        if !self.supports_export_type(bitmap.image_type)
            || (bitmap.image_type == ImageType::Bitmap && !self.supports_export_bpp(bitmap.bpp))
        {
            return Err(PluginError::invalid(format!(
                "{} cannot store {:?} at {} bpp",
                self.kind.format_name(),
                bitmap.image_type,
                bitmap.bpp
            )));
        }
        let pixels = bitmap.pixels().ok_or(PluginError::HeaderOnly)?;
        let [p, digit] = self.kind.magic();

        write!(io, "{}{}\n{} {}\n", p as char, digit as char, bitmap.width, bitmap.height)?;

        if self.kind.family() == Family::Bitmap {
            return self.save_bilevel(io, bitmap);
        }

        let wide = bitmap.image_type != ImageType::Bitmap;
        let maxval: u32 = if wide { 65535 } else { 255 };
        writeln!(io, "{maxval}")?;

        let samples: Vec<u32> = if wide {
            pixels
                .chunks_exact(2)
                .map(|c| u32::from(u16::from_ne_bytes([c[0], c[1]])))
                .collect()
        } else {
            pixels.iter().map(|&b| u32::from(b)).collect()
        };

        if self.kind.is_raw() {
            if wide {
                for v in samples {
                    io.write_u16::<BigEndian>(v as u16)?;
                }
            } else {
                io.write_all(pixels)?;
            }
        } else {
            let mut line = LineWriter::new(io);
            for v in samples {
                line.push(&v.to_string())?;
            }
            line.finish()?;
        }
        io.flush()?;
        Ok(())
    }

    fn supports_export_bpp(&self, depth: u32) -> bool {
        match self.kind.family() {
            Family::Bitmap  => depth == 1,
            Family::Greymap => depth == 8,
            Family::Pixmap  => depth == 24,
        }
    }

    fn supports_export_type(&self, image_type: ImageType) -> bool {
        match (self.kind.family(), image_type) {
            (_, ImageType::Bitmap) => true,
            (Family::Greymap, ImageType::Uint16) => true,
            (Family::Pixmap, ImageType::Rgb16) => true,
            _ => false,
        }
    }

    fn supports_no_pixels(&self) -> bool {
        true
    }
}

// ── Bilevel ──────────────────────────────────────────────────────────────────

/// Mask of the meaningful bits in the last byte of a 1-bpp row.
fn tail_mask(width: u32) -> u8 {
    match width % 8 {
        0 => 0xFF,
        r => 0xFFu8 << (8 - r),
    }
}

impl PnmPlugin {
    fn load_bilevel(&self, io: &mut dyn ReadSeek, width: u32, height: u32) -> Result<Bitmap> {
        let pitch = (width as usize).div_ceil(8);
        // Raw rows are packed; ASCII needs at least one digit per pixel.
        let min_bytes = if self.kind.is_raw() {
            pitch as u64 * u64::from(height)
        } else {
            u64::from(width) * u64::from(height)
        };
        require_remaining(io, min_bytes, self.kind.format_name())?;

        let mut bitmap = new_raster(ImageType::Bitmap, width, height, 1)?;
        let mask = tail_mask(width);

        let mut text = Vec::new();
        let mut tokens = None;
        if !self.kind.is_raw() {
            io.read_to_end(&mut text)?;
            tokens = Some(AsciiTokens::new(&text));
        }

        for y in 0..height {
            let row = bitmap
                .row_mut(y)
                .ok_or_else(|| PluginError::invalid("row out of range"))?;
            match tokens.as_mut() {
                None => {
                    io.read_exact(row)?;
                    for b in row.iter_mut() {
                        *b = !*b;
                    }
                }
                Some(tokens) => {
                    for x in 0..width as usize {
                        if !tokens.bit()? {
                            row[x / 8] |= 0x80 >> (x % 8);
                        }
                    }
                }
            }
            row[pitch - 1] &= mask;
        }
        Ok(bitmap)
    }

    fn save_bilevel(&self, io: &mut dyn WriteSeek, bitmap: &Bitmap) -> Result<()> {
        let mask = tail_mask(bitmap.width);
        if self.kind.is_raw() {
            for y in 0..bitmap.height {
                let row = bitmap.row(y).ok_or(PluginError::HeaderOnly)?;
                let mut inverted: Vec<u8> = row.iter().map(|b| !b).collect();
                if let Some(last) = inverted.last_mut() {
                    *last &= mask;
                }
                io.write_all(&inverted)?;
            }
        } else {
            let mut line = LineWriter::new(&mut *io);
            for y in 0..bitmap.height {
                let row = bitmap.row(y).ok_or(PluginError::HeaderOnly)?;
                for x in 0..bitmap.width as usize {
                    let white = row[x / 8] & (0x80 >> (x % 8)) != 0;
                    line.push(if white { "0" } else { "1" })?;
                }
            }
            line.finish()?;
        }
        io.flush()?;
        Ok(())
    }
}

// ── Header and sample parsing ────────────────────────────────────────────────

fn next_byte(io: &mut dyn ReadSeek) -> io::Result<Option<u8>> {
    let mut b = [0u8; 1];
    Ok(match read_prefix(io, &mut b)? {
        0 => None,
        _ => Some(b[0]),
    })
}

/// Read one decimal header field, skipping whitespace and `#` comments.
/// Consumes exactly one byte past the digits, which for binary variants is
/// the single whitespace separating the header from the raster.
fn header_value(io: &mut dyn ReadSeek) -> Result<u32> {
    let eof = || PluginError::invalid("unexpected end of PNM header");
    loop {
        let b = next_byte(io)?.ok_or_else(eof)?;
        if b == b'#' {
            while !matches!(next_byte(io)?, None | Some(b'\n') | Some(b'\r')) {}
            continue;
        }
        if b.is_ascii_whitespace() {
            continue;
        }
        if !b.is_ascii_digit() {
            return Err(PluginError::invalid(format!("unexpected byte {b:#04x} in PNM header")));
        }
        let mut value = u32::from(b - b'0');
        loop {
            match next_byte(io)? {
                Some(d) if d.is_ascii_digit() => {
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(u32::from(d - b'0')))
                        .ok_or_else(|| PluginError::invalid("PNM header value overflow"))?;
                }
                _ => return Ok(value),
            }
        }
    }
}

fn read_binary_samples(io: &mut dyn ReadSeek, count: usize, wide: bool) -> Result<Vec<u32>> {
    if wide {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(u32::from(io.read_u16::<BigEndian>()?));
        }
        Ok(out)
    } else {
        let mut raw = vec![0u8; count];
        io.read_exact(&mut raw)?;
        Ok(raw.into_iter().map(u32::from).collect())
    }
}

fn check_sample(value: u32, maxval: u32) -> Result<()> {
    if value > maxval {
        return Err(PluginError::invalid(format!("sample {value} exceeds maxval {maxval}")));
    }
    Ok(())
}

/// Cursor over the ASCII raster.
struct AsciiTokens<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl<'a> AsciiTokens<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn skip_blank(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if b == b'#' {
                while !matches!(self.data.get(self.pos), None | Some(b'\n') | Some(b'\r')) {
                    self.pos += 1;
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn value(&mut self) -> Result<u32> {
        self.skip_blank();
        let start = self.pos;
        while self.data.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(PluginError::invalid("truncated or malformed PNM raster"));
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PluginError::invalid("PNM sample out of range"))
    }

    /// PBM pixels are single characters and need no separator.
    fn bit(&mut self) -> Result<bool> {
        self.skip_blank();
        let b = self.data.get(self.pos).copied();
        self.pos += 1;
        match b {
            Some(b'0') => Ok(false),
            Some(b'1') => Ok(true),
            _ => Err(PluginError::invalid("truncated or malformed PBM raster")),
        }
    }
}

/// Space-separated ASCII output with bounded line length.
struct LineWriter<'w> {
    io:   &'w mut dyn WriteSeek,
    line: String,
}

impl<'w> LineWriter<'w> {
    fn new(io: &'w mut dyn WriteSeek) -> Self {
        Self { io, line: String::with_capacity(LINE_LIMIT + 8) }
    }

    fn push(&mut self, token: &str) -> io::Result<()> {
        if !self.line.is_empty() && self.line.len() + 1 + token.len() > LINE_LIMIT {
            self.flush_line()?;
        }
        if !self.line.is_empty() {
            self.line.push(' ');
        }
        self.line.push_str(token);
        Ok(())
    }

    fn flush_line(&mut self) -> io::Result<()> {
        self.line.push('\n');
        self.io.write_all(self.line.as_bytes())?;
        self.line.clear();
        Ok(())
    }

    fn finish(mut self) -> io::Result<()> {
        if !self.line.is_empty() {
            self.flush_line()?;
        }
        Ok(())
    }
}
