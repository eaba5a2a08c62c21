//! Load/save façade.
//!
//! Every load and save is bracketed by the plugin's `open` and `close`
//! capabilities: `open` runs first and may hand back codec state, the codec
//! operation receives that state, and `close` runs exactly once afterwards
//! whether the operation succeeded or not.
//!
//! The entry is resolved under the registry lock; the codec I/O runs with the
//! lock released, so a slow decode never blocks detection on other threads.

use std::fs::{File, OpenOptions};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::error::{capability, PluginError, Result};
use crate::io_stream::{IoHandle, ReadSeek, WriteSeek};
use crate::message::output_message;
use crate::plugin::{Capabilities, CodecState, LoadFlags, SaveFlags, DEFAULT_PAGE};
use crate::registry::{FormatEntry, FormatId, PluginRegistry};

/// Run the entry's `open` capability, if it has one.
pub fn open(entry: &FormatEntry, io: &mut IoHandle<'_>) -> Option<CodecState> {
    if entry.capabilities().contains(Capabilities::OPEN) {
        entry.plugin().open(io)
    } else {
        None
    }
}

/// Run the entry's `close` capability, if it has one.  Pairs with [`open`].
pub fn close(entry: &FormatEntry, io: &mut IoHandle<'_>, state: Option<CodecState>) {
    if entry.capabilities().contains(Capabilities::CLOSE) {
        entry.plugin().close(io, state);
    }
}

/// Attach the format id to errors raised by a plugin that could not know it.
fn attribute(err: PluginError, id: FormatId) -> PluginError {
    match err {
        PluginError::Unsupported { format, capability } if format.is_unknown() => {
            PluginError::Unsupported { format: id, capability }
        }
        PluginError::Codec { format, message } if format.is_unknown() => {
            PluginError::Codec { format: id, message }
        }
        other => other,
    }
}

impl PluginRegistry {
    /// Resolve `id` to an entry that provides `cap`.
    fn resolve(&self, id: FormatId, cap: Capabilities, name: &'static str) -> Result<Arc<FormatEntry>> {
        if id.is_unknown() {
            return Err(PluginError::UnknownFormat(id));
        }
        let entry = self.find_by_id(id).ok_or(PluginError::UnknownFormat(id))?;
        if !entry.capabilities().contains(cap) {
            return Err(PluginError::unsupported(id, name));
        }
        Ok(entry)
    }

    /// Decode an image of format `id` from `io`.
    pub fn load(&self, id: FormatId, io: &mut dyn ReadSeek, flags: LoadFlags) -> Result<Bitmap> {
        let entry = self.resolve(id, Capabilities::LOAD, capability::LOAD)?;

        let mut state = open(&entry, &mut IoHandle::Reader(&mut *io));
        let result = entry.plugin().load(&mut *io, DEFAULT_PAGE, flags, state.as_mut());
        close(&entry, &mut IoHandle::Reader(&mut *io), state);

        result.map_err(|e| attribute(e, id))
    }

    /// Encode `bitmap` as format `id` into `io`.
    ///
    /// A header-only bitmap is rejected before the registry is consulted.
    pub fn save(&self, id: FormatId, bitmap: &Bitmap, io: &mut dyn WriteSeek, flags: SaveFlags) -> Result<()> {
        if !bitmap.has_pixels() {
            let err = PluginError::HeaderOnly;
            output_message(id, &err.to_string());
            return Err(err);
        }
        let entry = self.resolve(id, Capabilities::SAVE, capability::SAVE)?;

        let mut state = open(&entry, &mut IoHandle::Writer(&mut *io));
        let result = entry.plugin().save(&mut *io, bitmap, DEFAULT_PAGE, flags, state.as_mut());
        close(&entry, &mut IoHandle::Writer(&mut *io), state);

        result.map_err(|e| attribute(e, id))
    }

    pub fn load_from_path(&self, id: FormatId, path: impl AsRef<Path>, flags: LoadFlags) -> Result<Bitmap> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            output_message(id, &format!("cannot open {} for reading: {e}", path.display()));
            PluginError::Io(e)
        })?;
        self.load(id, &mut file, flags)
    }

    /// Save to `path`, creating or truncating the file.
    pub fn save_to_path(
        &self,
        id:     FormatId,
        bitmap: &Bitmap,
        path:   impl AsRef<Path>,
        flags:  SaveFlags,
    ) -> Result<()> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                output_message(id, &format!("cannot open {} for writing: {e}", path.display()));
                PluginError::Io(e)
            })?;
        self.save(id, bitmap, &mut file, flags)
    }

    pub fn load_from_memory(&self, id: FormatId, data: &[u8], flags: LoadFlags) -> Result<Bitmap> {
        self.load(id, &mut Cursor::new(data), flags)
    }

    /// Save into a fresh in-memory buffer.
    pub fn save_to_memory(&self, id: FormatId, bitmap: &Bitmap, flags: SaveFlags) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.save(id, bitmap, &mut out, flags)?;
        Ok(out.into_inner())
    }
}
