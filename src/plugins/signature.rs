//! Formats recognised by signature only.
//!
//! Each entry carries its metadata and a probe.  The plugin validates and
//! describes itself but has no load or save capability.  Formats with no
//! reliable magic (Photo CD, Dr. Halo, raw G3 fax) have no probe at all and
//! can only be selected by name or file extension.

use std::io::{self, SeekFrom};

use crate::io_stream::{read_prefix, ReadSeek};
use crate::plugin::{Capabilities, Plugin};

/// How a format is recognised.
pub enum Probe {
    /// No validate capability.
    Absent,
    /// Any of `magics` found `offset` bytes after the current position.
    AnyOf {
        offset: u64,
        magics: &'static [&'static [u8]],
    },
    Custom(fn(&mut dyn ReadSeek) -> io::Result<bool>),
}

pub struct SignatureFormat {
    pub format:      &'static str,
    pub description: &'static str,
    pub extensions:  &'static str,
    pub regexp:      Option<&'static str>,
    pub mime:        Option<&'static str>,
    pub probe:       Probe,
}

/// Plugin backed by a static [`SignatureFormat`].
pub struct SignaturePlugin {
    spec: &'static SignatureFormat,
}

impl SignaturePlugin {
    pub fn new(spec: &'static SignatureFormat) -> Self {
        Self { spec }
    }
}

impl Plugin for SignaturePlugin {
    fn capabilities(&self) -> Capabilities {
        match self.spec.probe {
            Probe::Absent => Capabilities::NONE,
            _ => Capabilities::VALIDATE,
        }
    }

    fn format(&self) -> Option<&str> {
        Some(self.spec.format)
    }

    fn description(&self) -> Option<&str> {
        Some(self.spec.description)
    }

    fn extension_list(&self) -> Option<&str> {
        Some(self.spec.extensions)
    }

    fn regexp(&self) -> Option<&str> {
        self.spec.regexp
    }

    fn mime_type(&self) -> Option<&str> {
        self.spec.mime
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
        match &self.spec.probe {
            Probe::Absent => Ok(false),
            Probe::AnyOf { offset, magics } => any_magic_at(io, *offset, magics),
            Probe::Custom(check) => check(io),
        }
    }
}

// ── Probe helpers ────────────────────────────────────────────────────────────

/// True when one of `magics` starts `offset` bytes past the current position.
/// A stream too short for a magic is a non-match for that magic.
pub fn any_magic_at(io: &mut dyn ReadSeek, offset: u64, magics: &[&[u8]]) -> io::Result<bool> {
    let longest = magics.iter().map(|m| m.len()).max().unwrap_or(0);
    if offset > 0 {
        io.seek(SeekFrom::Current(offset as i64))?;
    }
    let mut buf = vec![0u8; longest];
    let got = read_prefix(io, &mut buf)?;
    Ok(magics.iter().any(|m| got >= m.len() && buf.starts_with(m)))
}

fn iff(io: &mut dyn ReadSeek) -> io::Result<bool> {
    let mut hdr = [0u8; 12];
    if read_prefix(io, &mut hdr)? < 12 {
        return Ok(false);
    }
    Ok(&hdr[..4] == b"FORM" && (&hdr[8..] == b"ILBM" || &hdr[8..] == b"PBM "))
}

fn webp(io: &mut dyn ReadSeek) -> io::Result<bool> {
    let mut hdr = [0u8; 12];
    if read_prefix(io, &mut hdr)? < 12 {
        return Ok(false);
    }
    Ok(&hdr[..4] == b"RIFF" && &hdr[8..] == b"WEBP")
}

/// WBMP type 0: type byte 0, fixed header with no extension bits, then two
/// non-zero multi-byte integers.
fn wbmp(io: &mut dyn ReadSeek) -> io::Result<bool> {
    let mut hdr = [0u8; 2];
    if read_prefix(io, &mut hdr)? < 2 || hdr[0] != 0 || hdr[1] & 0x9F != 0 {
        return Ok(false);
    }
    for _ in 0..2 {
        match read_multibyte(io)? {
            Some(v) if v > 0 => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn read_multibyte(io: &mut dyn ReadSeek) -> io::Result<Option<u32>> {
    let mut value: u32 = 0;
    for _ in 0..5 {
        let mut b = [0u8; 1];
        if read_prefix(io, &mut b)? == 0 {
            return Ok(None);
        }
        value = (value << 7) | u32::from(b[0] & 0x7F);
        if b[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Targa has no leading magic.  A v2 file is identified by its footer;
/// older files by plausible header fields.
fn targa(io: &mut dyn ReadSeek) -> io::Result<bool> {
    const FOOTER: &[u8] = b"TRUEVISION-XFILE.\0";

    let start = io.stream_position()?;
    let end = io.seek(SeekFrom::End(0))?;
    if end >= start + FOOTER.len() as u64 {
        io.seek(SeekFrom::End(-(FOOTER.len() as i64)))?;
        let mut tail = [0u8; 18];
        if read_prefix(io, &mut tail)? == tail.len() && tail == FOOTER {
            return Ok(true);
        }
    }

    io.seek(SeekFrom::Start(start))?;
    let mut hdr = [0u8; 18];
    if read_prefix(io, &mut hdr)? < hdr.len() {
        return Ok(false);
    }
    let color_map = hdr[1];
    let image_type = hdr[2];
    let depth = hdr[16];
    let width = u16::from_le_bytes([hdr[12], hdr[13]]);
    let height = u16::from_le_bytes([hdr[14], hdr[15]]);
    Ok(color_map <= 1
        && matches!(image_type, 1 | 2 | 3 | 9 | 10 | 11)
        && matches!(depth, 8 | 15 | 16 | 24 | 32)
        && width > 0
        && height > 0)
}

// ── Format table ─────────────────────────────────────────────────────────────

pub static ICO: SignatureFormat = SignatureFormat {
    format:      "ICO",
    description: "Windows Icon",
    extensions:  "ico",
    regexp:      None,
    mime:        Some("image/vnd.microsoft.icon"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\0\0\x01\0"] },
};

pub static JPEG: SignatureFormat = SignatureFormat {
    format:      "JPEG",
    description: "JPEG - JFIF Compliant",
    extensions:  "jpg,jif,jpeg,jpe",
    regexp:      Some("^\u{FF}\u{D8}\u{FF}"),
    mime:        Some("image/jpeg"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\xFF\xD8"] },
};

pub static JNG: SignatureFormat = SignatureFormat {
    format:      "JNG",
    description: "JPEG Network Graphics",
    extensions:  "jng",
    regexp:      None,
    mime:        Some("image/x-mng"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x8BJNG\r\n\x1A\n"] },
};

pub static KOALA: SignatureFormat = SignatureFormat {
    format:      "KOALA",
    description: "C64 Koala Graphics",
    extensions:  "koa",
    regexp:      None,
    mime:        Some("image/x-koala"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x00\x60"] },
};

pub static IFF: SignatureFormat = SignatureFormat {
    format:      "IFF",
    description: "IFF Interleaved Bitmap",
    extensions:  "iff,lbm",
    regexp:      Some("^FORM"),
    mime:        Some("image/x-iff"),
    probe:       Probe::Custom(iff),
};

pub static MNG: SignatureFormat = SignatureFormat {
    format:      "MNG",
    description: "Multiple-image Network Graphics",
    extensions:  "mng",
    regexp:      None,
    mime:        Some("video/x-mng"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x8AMNG\r\n\x1A\n"] },
};

pub static PCD: SignatureFormat = SignatureFormat {
    format:      "PCD",
    description: "Kodak PhotoCD",
    extensions:  "pcd",
    regexp:      None,
    mime:        Some("image/x-photo-cd"),
    probe:       Probe::Absent,
};

pub static PCX: SignatureFormat = SignatureFormat {
    format:      "PCX",
    description: "Zsoft Paintbrush PCX bitmap format",
    extensions:  "pcx",
    regexp:      Some("^\u{0A}\u{05}\u{01}\u{08}"),
    mime:        Some("image/x-pcx"),
    probe:       Probe::AnyOf {
        offset: 0,
        magics: &[b"\x0A\x00", b"\x0A\x02", b"\x0A\x03", b"\x0A\x04", b"\x0A\x05"],
    },
};

pub static PNG: SignatureFormat = SignatureFormat {
    format:      "PNG",
    description: "Portable Network Graphics",
    extensions:  "png",
    regexp:      Some("^.PNG\r"),
    mime:        Some("image/png"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x89PNG\r\n\x1A\n"] },
};

pub static RAS: SignatureFormat = SignatureFormat {
    format:      "RAS",
    description: "Sun Raster Image",
    extensions:  "ras",
    regexp:      None,
    mime:        Some("image/x-cmu-raster"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x59\xA6\x6A\x95"] },
};

pub static TARGA: SignatureFormat = SignatureFormat {
    format:      "TARGA",
    description: "Truevision Targa",
    extensions:  "tga,targa",
    regexp:      None,
    mime:        Some("image/x-tga"),
    probe:       Probe::Custom(targa),
};

pub static WBMP: SignatureFormat = SignatureFormat {
    format:      "WBMP",
    description: "Wireless Bitmap",
    extensions:  "wap,wbmp,wbm",
    regexp:      None,
    mime:        Some("image/vnd.wap.wbmp"),
    probe:       Probe::Custom(wbmp),
};

pub static PSD: SignatureFormat = SignatureFormat {
    format:      "PSD",
    description: "Adobe Photoshop",
    extensions:  "psd,psb",
    regexp:      Some("^8BPS"),
    mime:        Some("image/vnd.adobe.photoshop"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"8BPS"] },
};

pub static CUT: SignatureFormat = SignatureFormat {
    format:      "CUT",
    description: "Dr. Halo",
    extensions:  "cut",
    regexp:      None,
    mime:        Some("image/x-cut"),
    probe:       Probe::Absent,
};

pub static XBM: SignatureFormat = SignatureFormat {
    format:      "XBM",
    description: "X11 Bitmap Format",
    extensions:  "xbm",
    regexp:      None,
    mime:        Some("image/x-xbitmap"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"#define "] },
};

pub static XPM: SignatureFormat = SignatureFormat {
    format:      "XPM",
    description: "X11 Pixmap Format",
    extensions:  "xpm",
    regexp:      Some("^[ \\t]*/\\* XPM \\*/"),
    mime:        Some("image/x-xpixmap"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"/* XPM */"] },
};

pub static DDS: SignatureFormat = SignatureFormat {
    format:      "DDS",
    description: "DirectX Surface",
    extensions:  "dds",
    regexp:      None,
    mime:        Some("image/x-dds"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"DDS "] },
};

pub static GIF: SignatureFormat = SignatureFormat {
    format:      "GIF",
    description: "Graphics Interchange Format",
    extensions:  "gif",
    regexp:      Some("^GIF"),
    mime:        Some("image/gif"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"GIF87a", b"GIF89a"] },
};

pub static HDR: SignatureFormat = SignatureFormat {
    format:      "HDR",
    description: "High Dynamic Range Image",
    extensions:  "hdr",
    regexp:      None,
    mime:        Some("image/vnd.radiance"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"#?RADIANCE", b"#?RGBE"] },
};

pub static G3: SignatureFormat = SignatureFormat {
    format:      "G3",
    description: "Raw fax format CCITT G.3",
    extensions:  "g3",
    regexp:      None,
    mime:        Some("image/fax-g3"),
    probe:       Probe::Absent,
};

pub static SGI: SignatureFormat = SignatureFormat {
    format:      "SGI",
    description: "SGI Image Format",
    extensions:  "sgi,rgb,rgba,bw",
    regexp:      None,
    mime:        Some("image/x-sgi"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x01\xDA"] },
};

pub static EXR: SignatureFormat = SignatureFormat {
    format:      "EXR",
    description: "ILM OpenEXR",
    extensions:  "exr",
    regexp:      None,
    mime:        Some("image/x-exr"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\x76\x2F\x31\x01"] },
};

pub static J2K: SignatureFormat = SignatureFormat {
    format:      "J2K",
    description: "JPEG-2000 codestream",
    extensions:  "j2k,j2c",
    regexp:      None,
    mime:        Some("image/j2k"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\xFF\x4F\xFF\x51"] },
};

pub static JP2: SignatureFormat = SignatureFormat {
    format:      "JP2",
    description: "JPEG-2000 File Format",
    extensions:  "jp2",
    regexp:      None,
    mime:        Some("image/jp2"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"\0\0\0\x0CjP  \r\n\x87\n"] },
};

pub static PICT: SignatureFormat = SignatureFormat {
    format:      "PICT",
    description: "Macintosh PICT",
    extensions:  "pct,pict,pic",
    regexp:      None,
    mime:        Some("image/x-pict"),
    // Version opcode after the 512-byte application header and the picture
    // size and frame fields.
    probe:       Probe::AnyOf { offset: 522, magics: &[b"\x00\x11\x02\xFF", b"\x11\x01"] },
};

pub static WEBP: SignatureFormat = SignatureFormat {
    format:      "WEBP",
    description: "Google WebP image format",
    extensions:  "webp",
    regexp:      None,
    mime:        Some("image/webp"),
    probe:       Probe::Custom(webp),
};

pub static JXR: SignatureFormat = SignatureFormat {
    format:      "JPEG-XR",
    description: "JPEG XR image format",
    extensions:  "jxr,wdp,hdp",
    regexp:      None,
    mime:        Some("image/vnd.ms-photo"),
    probe:       Probe::AnyOf { offset: 0, magics: &[b"II\xBC\x01"] },
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn check(spec: &'static SignatureFormat, data: &[u8]) -> bool {
        SignaturePlugin::new(spec).validate(&mut Cursor::new(data)).unwrap()
    }

    #[test]
    fn magic_prefixes() {
        assert!(check(&PNG, b"\x89PNG\r\n\x1A\n\0\0\0\x0DIHDR"));
        assert!(!check(&PNG, b"\x89PNG"));
        assert!(check(&GIF, b"GIF89a...."));
        assert!(!check(&GIF, b"GIF88a"));
        assert!(check(&JPEG, b"\xFF\xD8\xFF\xE0"));
        assert!(check(&JP2, b"\0\0\0\x0CjP  \r\n\x87\n\0"));
    }

    #[test]
    fn offset_probe() {
        let mut pict = vec![0u8; 522];
        pict.extend_from_slice(b"\x00\x11\x02\xFF");
        assert!(check(&PICT, &pict));
        assert!(!check(&PICT, &pict[..520]));
    }

    #[test]
    fn riff_and_form_containers() {
        assert!(check(&WEBP, b"RIFF\x10\0\0\0WEBPVP8 "));
        assert!(!check(&WEBP, b"RIFF\x10\0\0\0WAVEfmt "));
        assert!(check(&IFF, b"FORM\0\0\0\x10ILBMBMHD"));
        assert!(check(&IFF, b"FORM\0\0\0\x10PBM BMHD"));
        assert!(!check(&IFF, b"FORM\0\0\0\x10AIFF"));
    }

    #[test]
    fn wbmp_header() {
        assert!(check(&WBMP, &[0, 0, 0x81, 0x00, 0x10]));
        assert!(!check(&WBMP, &[0, 0, 0, 0x10]));
        assert!(!check(&WBMP, &[1, 0, 8, 8]));
    }

    #[test]
    fn targa_footer_and_header() {
        let mut hdr = vec![0u8, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 4, 0, 24, 0];
        assert!(check(&TARGA, &hdr));
        hdr[2] = 7;
        assert!(!check(&TARGA, &hdr));
        hdr.extend_from_slice(b"TRUEVISION-XFILE.\0");
        assert!(check(&TARGA, &hdr));
    }

    #[test]
    fn formats_without_probe_have_no_validate() {
        for spec in [&PCD, &CUT, &G3] {
            let p = SignaturePlugin::new(spec);
            assert_eq!(p.capabilities(), Capabilities::NONE);
            assert!(!p.validate(&mut Cursor::new(vec![0u8; 64])).unwrap());
        }
        assert_eq!(SignaturePlugin::new(&PNG).capabilities(), Capabilities::VALIDATE);
    }
}
