//! The capability interface every format plugin implements.
//!
//! A plugin is a trait object registered once per format.  Each operation is
//! optional: a plugin declares the operations it provides through
//! [`Plugin::capabilities`], and the default method bodies answer with an
//! explicit "unsupported" result.  The registry and the dispatch façade
//! consult the declared set before calling an operation, so a missing
//! capability is a normal signal and never an error by itself.
//!
//! Metadata accessors (`format`, `mime_type`, ...) return `None` when the
//! plugin has nothing to say; registration-time overrides take precedence.

use std::any::Any;
use std::io;
use std::ops::BitOr;

use crate::bitmap::{Bitmap, ImageType};
use crate::error::{capability, PluginError, Result};
use crate::io_stream::{IoHandle, ReadSeek, WriteSeek};
use crate::registry::FormatId;

/// Page argument meaning "the default page".
pub const DEFAULT_PAGE: i32 = -1;

/// Codec-private state returned by `open` and handed back to `load`, `save`
/// and `close`.  Opaque to the core.
pub type CodecState = Box<dyn Any + Send>;

/// Builds the plugin for a freshly assigned format id.
pub type InitProc = fn(format_id: FormatId) -> Box<dyn Plugin>;

// ── Capability set ───────────────────────────────────────────────────────────

/// Set of optional operations a plugin provides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE:     Self = Capabilities(0);
    pub const VALIDATE: Self = Capabilities(1 << 0);
    pub const OPEN:     Self = Capabilities(1 << 1);
    pub const CLOSE:    Self = Capabilities(1 << 2);
    pub const LOAD:     Self = Capabilities(1 << 3);
    pub const SAVE:     Self = Capabilities(1 << 4);

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Capabilities(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ── Flags ────────────────────────────────────────────────────────────────────

/// Flag word passed through to a plugin's `load`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LoadFlags(pub i32);

impl LoadFlags {
    pub const DEFAULT:   Self = LoadFlags(0);
    /// Read the header only; honoured by plugins reporting
    /// `supports_no_pixels()`.
    pub const NO_PIXELS: Self = LoadFlags(0x8000);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LoadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        LoadFlags(self.0 | rhs.0)
    }
}

/// Flag word passed through to a plugin's `save`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SaveFlags(pub i32);

impl SaveFlags {
    pub const DEFAULT: Self = SaveFlags(0);
}

// ── Plugin trait ─────────────────────────────────────────────────────────────

pub trait Plugin: Send + Sync {
    /// Operations this plugin actually implements.
    fn capabilities(&self) -> Capabilities;

    fn format(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> Option<&str> {
        None
    }

    /// Comma-separated list of file extensions, without dots.
    fn extension_list(&self) -> Option<&str> {
        None
    }

    fn regexp(&self) -> Option<&str> {
        None
    }

    fn mime_type(&self) -> Option<&str> {
        None
    }

    /// Inspect the stream and report whether it carries this format's
    /// signature.  The caller restores the stream position afterwards.
    fn validate(&self, _io: &mut dyn ReadSeek) -> io::Result<bool> {
        Ok(false)
    }

    /// Prepare codec state before a load (`IoHandle::Reader`) or a save
    /// (`IoHandle::Writer`).
    fn open(&self, _io: &mut IoHandle<'_>) -> Option<CodecState> {
        None
    }

    fn close(&self, _io: &mut IoHandle<'_>, _state: Option<CodecState>) {}

    fn load(
        &self,
        _io:    &mut dyn ReadSeek,
        _page:  i32,
        _flags: LoadFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<Bitmap> {
        Err(PluginError::unsupported(FormatId::UNKNOWN, capability::LOAD))
    }

    fn save(
        &self,
        _io:     &mut dyn WriteSeek,
        _bitmap: &Bitmap,
        _page:   i32,
        _flags:  SaveFlags,
        _state:  Option<&mut CodecState>,
    ) -> Result<()> {
        Err(PluginError::unsupported(FormatId::UNKNOWN, capability::SAVE))
    }

    fn supports_export_bpp(&self, _depth: u32) -> bool {
        false
    }

    fn supports_export_type(&self, _image_type: ImageType) -> bool {
        false
    }

    fn supports_icc_profiles(&self) -> bool {
        false
    }

    fn supports_no_pixels(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_algebra() {
        let caps = Capabilities::VALIDATE | Capabilities::LOAD;
        assert!(caps.contains(Capabilities::VALIDATE));
        assert!(caps.contains(Capabilities::LOAD));
        assert!(!caps.contains(Capabilities::SAVE));
        assert!(caps.contains(Capabilities::NONE));
    }

    #[test]
    fn load_flags_contains() {
        let flags = LoadFlags(0x8001);
        assert!(flags.contains(LoadFlags::NO_PIXELS));
        assert!(!LoadFlags::DEFAULT.contains(LoadFlags::NO_PIXELS));
    }

    struct Bare;
    impl Plugin for Bare {
        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }
    }

    #[test]
    fn absent_capabilities_answer_unsupported() {
        let p = Bare;
        let mut c = std::io::Cursor::new(Vec::<u8>::new());
        assert!(!p.validate(&mut c).unwrap());
        assert!(matches!(
            p.load(&mut c, DEFAULT_PAGE, LoadFlags::DEFAULT, None),
            Err(PluginError::Unsupported { capability: "load", .. })
        ));
        assert!(p.format().is_none());
        assert!(!p.supports_export_bpp(24));
    }
}
