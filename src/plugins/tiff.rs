//! TIFF container and camera RAW recognition.
//!
//! Many raw formats (CR2, DNG, NEF, ARW, ...) are TIFF files underneath, so
//! any of them also passes the TIFF check.  The RAW plugin recognises the
//! subset it can tell apart: TIFF files carrying a raw marker, plus raw
//! formats with their own signature.  The detector consults RAW whenever
//! TIFF matches.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{self, SeekFrom};

use crate::io_stream::{read_prefix, ReadSeek};
use crate::plugin::{Capabilities, Plugin};
use crate::plugins::signature::any_magic_at;

const TIFF_LE: &[u8] = b"II*\0";
const TIFF_BE: &[u8] = b"MM\0*";

/// DNGVersion, mandatory in IFD0 of every DNG.
const TAG_DNG_VERSION: u16 = 0xC612;
/// Sanity bound on IFD0 entries.
const MAX_IFD_ENTRIES: u16 = 4096;

/// Raw formats with a signature of their own, at offset 0.
const RAW_MAGICS: &[&[u8]] = &[
    b"FUJIFILMCCD-RAW", // Fuji RAF
    b"IIRO",            // Olympus ORF
    b"IIRS",
    b"MMOR",
    b"IIU\0",           // Panasonic RW2
    b"\0MRM",           // Minolta MRW
    b"FOVb",            // Sigma X3F
];

/// Canon CRW (CIFF) carries its magic after the byte order and header length.
const CRW_MAGIC: &[u8] = b"HEAPCCDR";
const CRW_OFFSET: u64 = 6;

// ── TIFF ─────────────────────────────────────────────────────────────────────

pub struct TiffPlugin;

impl Plugin for TiffPlugin {
    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE
    }

    fn format(&self) -> Option<&str> {
        Some("TIFF")
    }

    fn description(&self) -> Option<&str> {
        Some("Tagged Image File Format")
    }

    fn extension_list(&self) -> Option<&str> {
        Some("tif,tiff")
    }

    fn regexp(&self) -> Option<&str> {
        Some("^[MI][MI][\\x01*][\\x01*]")
    }

    fn mime_type(&self) -> Option<&str> {
        Some("image/tiff")
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
        any_magic_at(io, 0, &[TIFF_LE, TIFF_BE])
    }
}

// ── RAW ──────────────────────────────────────────────────────────────────────

pub struct RawPlugin;

impl Plugin for RawPlugin {
    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE
    }

    fn format(&self) -> Option<&str> {
        Some("RAW")
    }

    fn description(&self) -> Option<&str> {
        Some("RAW camera image")
    }

    fn extension_list(&self) -> Option<&str> {
        Some(
            "3fr,arw,bay,bmq,cap,cine,cr2,crw,cs1,dc2,dcr,drf,dsc,dng,erf,fff,ia,iiq,\
             k25,kc2,kdc,mdc,mef,mos,mrw,nef,nrw,orf,pef,ptx,pxn,qtk,raf,raw,rdc,rw2,\
             rwl,rwz,sr2,srf,srw,sti,x3f",
        )
    }

    fn mime_type(&self) -> Option<&str> {
        Some("image/x-dcraw")
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
        let start = io.stream_position()?;

        let mut hdr = [0u8; 16];
        let got = read_prefix(io, &mut hdr)?;
        let hdr = &hdr[..got];

        if RAW_MAGICS.iter().any(|m| hdr.starts_with(m)) {
            return Ok(true);
        }
        if hdr.len() >= CRW_OFFSET as usize + CRW_MAGIC.len()
            && &hdr[CRW_OFFSET as usize..CRW_OFFSET as usize + CRW_MAGIC.len()] == CRW_MAGIC
        {
            return Ok(true);
        }

        if hdr.len() < 8 {
            return Ok(false);
        }
        // Canon CR2: TIFF header followed by "CR" and a version.
        if hdr.starts_with(TIFF_LE) && hdr.len() >= 10 && &hdr[8..10] == b"CR" {
            return Ok(true);
        }

        if hdr.starts_with(TIFF_LE) {
            let ifd = LittleEndian::read_u32(&hdr[4..8]);
            ifd0_has_tag::<LittleEndian>(io, start, ifd, TAG_DNG_VERSION)
        } else if hdr.starts_with(TIFF_BE) {
            let ifd = BigEndian::read_u32(&hdr[4..8]);
            ifd0_has_tag::<BigEndian>(io, start, ifd, TAG_DNG_VERSION)
        } else {
            Ok(false)
        }
    }
}

/// Scan the first IFD for `tag`.  A truncated directory is a non-match.
fn ifd0_has_tag<B: ByteOrder>(io: &mut dyn ReadSeek, start: u64, ifd: u32, tag: u16) -> io::Result<bool> {
    if ifd < 8 {
        return Ok(false);
    }
    io.seek(SeekFrom::Start(start + u64::from(ifd)))?;

    let count = match io.read_u16::<B>() {
        Ok(n) => n.min(MAX_IFD_ENTRIES),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
        Err(e) => return Err(e),
    };
    let mut entry = [0u8; 12];
    for _ in 0..count {
        if read_prefix(io, &mut entry)? < entry.len() {
            return Ok(false);
        }
        if B::read_u16(&entry[..2]) == tag {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    /// Minimal little-endian TIFF with the given IFD0 tags.
    fn tiff_with_tags(tags: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_all(TIFF_LE).unwrap();
        out.write_u32::<LittleEndian>(8).unwrap();
        out.write_u16::<LittleEndian>(tags.len() as u16).unwrap();
        for &t in tags {
            out.write_u16::<LittleEndian>(t).unwrap();
            out.write_u16::<LittleEndian>(3).unwrap();
            out.write_u32::<LittleEndian>(1).unwrap();
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        out.write_u32::<LittleEndian>(0).unwrap();
        out
    }

    fn raw(data: &[u8]) -> bool {
        RawPlugin.validate(&mut Cursor::new(data)).unwrap()
    }

    #[test]
    fn tiff_both_byte_orders() {
        assert!(TiffPlugin.validate(&mut Cursor::new(b"II*\0\x08\0\0\0")).unwrap());
        assert!(TiffPlugin.validate(&mut Cursor::new(b"MM\0*\0\0\0\x08")).unwrap());
        assert!(!TiffPlugin.validate(&mut Cursor::new(b"II+\0")).unwrap());
    }

    #[test]
    fn plain_tiff_is_not_raw() {
        assert!(!raw(&tiff_with_tags(&[0x0100, 0x0101, 0x0111])));
    }

    #[test]
    fn dng_version_tag_marks_raw() {
        assert!(raw(&tiff_with_tags(&[0x0100, TAG_DNG_VERSION])));
    }

    #[test]
    fn big_endian_dng() {
        let mut out = Vec::new();
        out.write_all(TIFF_BE).unwrap();
        out.write_u32::<BigEndian>(8).unwrap();
        out.write_u16::<BigEndian>(1).unwrap();
        out.write_u16::<BigEndian>(TAG_DNG_VERSION).unwrap();
        out.extend_from_slice(&[0u8; 10]);
        assert!(raw(&out));
    }

    #[test]
    fn cr2_marker() {
        assert!(raw(b"II*\0\x10\0\0\0CR\x02\0"));
    }

    #[test]
    fn own_signatures() {
        assert!(raw(b"FUJIFILMCCD-RAW 0201"));
        assert!(raw(b"IIRO\x08\0\0\0"));
        assert!(raw(b"II\x1A\0\0\0HEAPCCDR"));
        assert!(!raw(b"GIF89a"));
    }

    #[test]
    fn truncated_ifd_is_not_raw() {
        let mut t = tiff_with_tags(&[TAG_DNG_VERSION]);
        t.truncate(12);
        assert!(!raw(&t));
        assert!(!raw(b"II*\0\xFF\xFF\0\0"));
    }
}
