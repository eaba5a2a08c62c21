//! Built-in formats.
//!
//! # Stable ids
//! Built-ins are registered in one fixed order into an empty registry, so
//! their ids are permanent.  A format is never removed from or reordered in
//! [`register_builtins`]; new built-ins go at the end.  The [`fif`]
//! constants name those ids.
//!
//! Only BMP, the Netpbm family and PFM decode and encode pixels.  The other
//! built-ins recognise their signature and describe themselves; loading or
//! saving them reports the missing capability.

pub mod bmp;
pub mod pfm;
pub mod pnm;
pub mod signature;
pub mod tiff;

use crate::bitmap::{Bitmap, ImageType};
use crate::error::{PluginError, Result};
use crate::io_stream::{remaining, ReadSeek};
use crate::plugin::Plugin;
use crate::registry::{FormatId, PluginRegistry, Registration};

use pnm::{PnmKind, PnmPlugin};
use signature::{SignatureFormat, SignaturePlugin};

// ── Built-in format ids (permanent) ──────────────────────────────────────────

pub mod fif {
    use crate::registry::FormatId;

    pub const BMP:     FormatId = FormatId(0);
    pub const ICO:     FormatId = FormatId(1);
    pub const JPEG:    FormatId = FormatId(2);
    pub const JNG:     FormatId = FormatId(3);
    pub const KOALA:   FormatId = FormatId(4);
    pub const IFF:     FormatId = FormatId(5);
    pub const MNG:     FormatId = FormatId(6);
    pub const PBM:     FormatId = FormatId(7);
    pub const PBMRAW:  FormatId = FormatId(8);
    pub const PCD:     FormatId = FormatId(9);
    pub const PCX:     FormatId = FormatId(10);
    pub const PGM:     FormatId = FormatId(11);
    pub const PGMRAW:  FormatId = FormatId(12);
    pub const PNG:     FormatId = FormatId(13);
    pub const PPM:     FormatId = FormatId(14);
    pub const PPMRAW:  FormatId = FormatId(15);
    pub const RAS:     FormatId = FormatId(16);
    pub const TARGA:   FormatId = FormatId(17);
    pub const TIFF:    FormatId = FormatId(18);
    pub const WBMP:    FormatId = FormatId(19);
    pub const PSD:     FormatId = FormatId(20);
    pub const CUT:     FormatId = FormatId(21);
    pub const XBM:     FormatId = FormatId(22);
    pub const XPM:     FormatId = FormatId(23);
    pub const DDS:     FormatId = FormatId(24);
    pub const GIF:     FormatId = FormatId(25);
    pub const HDR:     FormatId = FormatId(26);
    pub const FAXG3:   FormatId = FormatId(27);
    pub const SGI:     FormatId = FormatId(28);
    pub const EXR:     FormatId = FormatId(29);
    pub const J2K:     FormatId = FormatId(30);
    pub const JP2:     FormatId = FormatId(31);
    pub const PFM:     FormatId = FormatId(32);
    pub const PICT:    FormatId = FormatId(33);
    pub const RAW:     FormatId = FormatId(34);
    pub const WEBP:    FormatId = FormatId(35);
    pub const JXR:     FormatId = FormatId(36);

    /// Number of built-in formats.
    pub const COUNT: usize = 37;
}

// ── Raster allocation ────────────────────────────────────────────────────────

/// Fail unless `io` still holds at least `min_bytes`.  Decoders call this
/// before sizing buffers from header fields.
pub(crate) fn require_remaining(io: &mut dyn ReadSeek, min_bytes: u64, format: &str) -> Result<()> {
    let available = remaining(io)?;
    if available < min_bytes {
        return Err(PluginError::invalid(format!(
            "{format} header needs {min_bytes} raster bytes, stream holds {available}"
        )));
    }
    Ok(())
}

/// Zeroed destination bitmap sized from header fields.
pub(crate) fn new_raster(image_type: ImageType, width: u32, height: u32, bpp: u32) -> Result<Bitmap> {
    Bitmap::try_new(image_type, width, height, bpp).ok_or_else(|| {
        PluginError::invalid(format!("cannot allocate a {width}x{height}x{bpp} raster"))
    })
}

fn tiff_init(_id: FormatId) -> Box<dyn Plugin> {
    Box::new(tiff::TiffPlugin)
}

fn raw_init(_id: FormatId) -> Box<dyn Plugin> {
    Box::new(tiff::RawPlugin)
}

fn add_signature(registry: &PluginRegistry, spec: &'static SignatureFormat) -> Result<FormatId> {
    registry.register(
        Some(move |_: FormatId| Box::new(SignaturePlugin::new(spec)) as Box<dyn Plugin>),
        None,
        Registration::new(),
    )
}

fn add_pnm(registry: &PluginRegistry, kind: PnmKind) -> Result<FormatId> {
    registry.register(
        Some(move |_: FormatId| Box::new(PnmPlugin::new(kind)) as Box<dyn Plugin>),
        None,
        kind.registration(),
    )
}

/// Register every built-in format, in id order.  Returns the number
/// registered.
///
/// Meant for an empty registry; on a registry that already holds entries the
/// built-ins still register but their ids no longer match [`fif`].
pub fn register_builtins(registry: &PluginRegistry) -> usize {
    let results = [
        registry.register_local(bmp::init, Registration::new()),
        add_signature(registry, &signature::ICO),
        add_signature(registry, &signature::JPEG),
        add_signature(registry, &signature::JNG),
        add_signature(registry, &signature::KOALA),
        add_signature(registry, &signature::IFF),
        add_signature(registry, &signature::MNG),
        add_pnm(registry, PnmKind::Pbm),
        add_pnm(registry, PnmKind::PbmRaw),
        add_signature(registry, &signature::PCD),
        add_signature(registry, &signature::PCX),
        add_pnm(registry, PnmKind::Pgm),
        add_pnm(registry, PnmKind::PgmRaw),
        add_signature(registry, &signature::PNG),
        add_pnm(registry, PnmKind::Ppm),
        add_pnm(registry, PnmKind::PpmRaw),
        add_signature(registry, &signature::RAS),
        add_signature(registry, &signature::TARGA),
        registry.register_local(tiff_init, Registration::new()),
        add_signature(registry, &signature::WBMP),
        add_signature(registry, &signature::PSD),
        add_signature(registry, &signature::CUT),
        add_signature(registry, &signature::XBM),
        add_signature(registry, &signature::XPM),
        add_signature(registry, &signature::DDS),
        add_signature(registry, &signature::GIF),
        add_signature(registry, &signature::HDR),
        add_signature(registry, &signature::G3),
        add_signature(registry, &signature::SGI),
        add_signature(registry, &signature::EXR),
        add_signature(registry, &signature::J2K),
        add_signature(registry, &signature::JP2),
        registry.register_local(pfm::init, Registration::new()),
        add_signature(registry, &signature::PICT),
        registry.register_local(raw_init, Registration::new()),
        add_signature(registry, &signature::WEBP),
        add_signature(registry, &signature::JXR),
    ];

    let registered = results.iter().filter(|r| r.is_ok()).count();
    log::debug!(target: "imgplug", "registered {registered} built-in formats");
    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Capabilities;

    #[test]
    fn builtin_ids_are_stable() {
        let reg = PluginRegistry::with_builtins();
        assert_eq!(reg.len(), fif::COUNT);
        let expect = [
            (fif::BMP, "BMP"),
            (fif::ICO, "ICO"),
            (fif::PBM, "PBM"),
            (fif::PBMRAW, "PBMRAW"),
            (fif::PGMRAW, "PGMRAW"),
            (fif::PNG, "PNG"),
            (fif::PPMRAW, "PPMRAW"),
            (fif::TIFF, "TIFF"),
            (fif::FAXG3, "G3"),
            (fif::PFM, "PFM"),
            (fif::RAW, "RAW"),
            (fif::JXR, "JPEG-XR"),
        ];
        for (id, name) in expect {
            assert_eq!(reg.format_name(id).as_deref(), Some(name), "id {id}");
        }
    }

    #[test]
    fn every_builtin_has_mime_and_extension() {
        let reg = PluginRegistry::with_builtins();
        for (entry, enabled) in reg.entries() {
            assert!(enabled);
            assert!(entry.extension_list().is_some(), "{}", entry.format());
            assert!(entry.mime_type().is_some(), "{}", entry.format());
        }
    }

    #[test]
    fn pnm_variants_carry_overrides() {
        let reg = PluginRegistry::with_builtins();
        assert_eq!(reg.regexp(fif::PPM).as_deref(), Some("^P3"));
        assert_eq!(reg.description(fif::PBMRAW).as_deref(), Some("Portable Bitmap (RAW)"));
        assert_eq!(reg.find_by_mime("image/x-portable-graymap").unwrap().id(), fif::PGM);
    }

    #[test]
    fn pnm_plugin_without_override_has_no_name() {
        let reg = PluginRegistry::new();
        let r = reg.register(
            Some(|_: FormatId| Box::new(PnmPlugin::new(PnmKind::Pgm)) as Box<dyn Plugin>),
            None,
            Registration::new(),
        );
        assert!(r.is_err());
    }

    #[test]
    fn capability_matrix() {
        let reg = PluginRegistry::with_builtins();
        for id in [fif::BMP, fif::PGM, fif::PPMRAW, fif::PFM] {
            assert!(reg.supports_reading(id) && reg.supports_writing(id), "id {id}");
        }
        assert!(!reg.supports_reading(fif::PNG));
        for id in [fif::PCD, fif::CUT, fif::FAXG3] {
            let caps = reg.find_by_id(id).unwrap().capabilities();
            assert!(!caps.contains(Capabilities::VALIDATE));
        }
        assert!(reg.supports_export_bpp(fif::BMP, 24));
        assert!(!reg.supports_export_bpp(fif::BMP, 8));
    }

    #[test]
    fn short_stream_is_rejected_before_allocation() {
        let mut c = std::io::Cursor::new(vec![0u8; 8]);
        c.set_position(2);
        assert!(require_remaining(&mut c, 6, "TEST").is_ok());
        assert!(matches!(require_remaining(&mut c, 7, "TEST"), Err(PluginError::InvalidData(_))));
        assert_eq!(c.position(), 2);
    }

    #[test]
    fn extension_lookup_over_builtins() {
        let reg = PluginRegistry::with_builtins();
        assert_eq!(reg.format_from_filename("photo.JPG"), Some(fif::JPEG));
        assert_eq!(reg.format_from_filename("scan.tif"), Some(fif::TIFF));
        assert_eq!(reg.format_from_filename("shot.cr2"), Some(fif::RAW));
        // PBM is registered before PBMRAW and both list "pbm".
        assert_eq!(reg.format_from_filename("x.pbm"), Some(fif::PBM));
    }
}
