//! Content-based format detection.
//!
//! The detector walks the MRU list front to back under the registry lock and
//! asks each enabled plugin to validate the stream.  The stream is put back
//! at its starting offset after every probe, whatever the plugin did, so a
//! plugin that forgets to rewind cannot disturb the next candidate.
//!
//! Camera raw files often carry a plain TIFF header.  When the TIFF plugin
//! matches, the RAW plugin (if registered and enabled) gets a second look at
//! the same stream and takes the match if it accepts.  No other pair of
//! formats is special-cased.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use crate::io_stream::{with_restored_position, ReadSeek};
use crate::plugin::Capabilities;
use crate::registry::{FormatEntry, FormatId, PluginRegistry};

/// Format whose matches are re-checked against [`RAW_FORMAT`].
pub const CONTAINER_FORMAT: &str = "TIFF";
/// Format that overrides a [`CONTAINER_FORMAT`] match.
pub const RAW_FORMAT: &str = "RAW";

/// Run one plugin's validate and restore the stream position.
///
/// A plugin without a validate capability, or one that fails with an I/O
/// error (including failing to report or restore the position), is a
/// non-match.
fn probe(entry: &FormatEntry, io: &mut dyn ReadSeek) -> bool {
    if !entry.capabilities().contains(Capabilities::VALIDATE) {
        return false;
    }
    match with_restored_position(io, |s| entry.plugin().validate(s)) {
        Ok(matched) => matched,
        Err(e) => {
            log::debug!(target: "imgplug", "{}: validate failed: {e}", entry.format());
            false
        }
    }
}

impl PluginRegistry {
    /// Identify the format of `io` by content.
    ///
    /// Holds the registry lock for the whole scan.  On a match the winner's
    /// MRU weight is bumped; on no match the MRU list is left untouched.
    /// Returns `None` without touching the registry when the stream cannot
    /// report its position.
    pub fn detect(&self, io: &mut dyn ReadSeek) -> Option<FormatId> {
        if io.stream_position().is_err() {
            return None;
        }

        let lock = self.lock();
        let candidates = lock.with(|s| s.mru().len());

        for k in 0..candidates {
            let slot = lock.with(|s| s.mru().get(k).and_then(|item| s.slot(item.format)));
            let Some((entry, enabled)) = slot else {
                continue;
            };
            if !enabled || !probe(&entry, io) {
                continue;
            }

            let mut found = entry.id();
            if entry.format().eq_ignore_ascii_case(CONTAINER_FORMAT) {
                let raw = lock.with(|s| s.find_enabled(|e| e.format().eq_ignore_ascii_case(RAW_FORMAT)));
                if let Some(raw) = raw {
                    if probe(&raw, io) {
                        found = raw.id();
                    }
                }
            }

            lock.with_mut(|s| s.mru_mut().promote(found));
            log::debug!(target: "imgplug", "detected format id {found} at MRU position {k}");
            return Some(found);
        }

        None
    }

    /// Detect the format of the file at `path`.  `None` when the file cannot
    /// be opened.
    pub fn detect_from_path(&self, path: impl AsRef<Path>) -> Option<FormatId> {
        let path = path.as_ref();
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::debug!(target: "imgplug", "detect: cannot open {}: {e}", path.display());
                return None;
            }
        };
        self.detect(&mut file)
    }

    pub fn detect_from_memory(&self, data: &[u8]) -> Option<FormatId> {
        self.detect(&mut Cursor::new(data))
    }

    /// Ask a single format whether `io` carries its signature.
    ///
    /// False for unknown or disabled formats and for plugins without a
    /// validate capability.  The stream position is restored.
    pub fn validate(&self, id: FormatId, io: &mut dyn ReadSeek) -> bool {
        let lock = self.lock();
        match lock.with(|s| s.slot(id)) {
            Some((entry, true)) => probe(&entry, io),
            _ => false,
        }
    }
}
