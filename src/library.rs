//! Process-wide, reference-counted registry.
//!
//! `initialise` and `deinitialise` nest: the first `initialise` builds a
//! [`PluginRegistry`] holding the built-ins (and, on request, the external
//! plugins found on the search path); every further call only bumps the
//! count.  The registry is dropped when the count returns to zero.  Handles
//! obtained through [`registry`] keep it alive past that point, which also
//! keeps any loaded plugin library mapped.
//!
//! Applications that want several independent registries construct
//! [`PluginRegistry`] directly; the free functions here are a thin layer over
//! the shared instance.

use parking_lot::{const_mutex, Mutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::error::{PluginError, Result};
use crate::external;
use crate::plugin::{LoadFlags, SaveFlags};
use crate::registry::{FormatId, PluginRegistry};

struct Shared {
    refs:     usize,
    registry: Arc<PluginRegistry>,
}

static SHARED: Mutex<Option<Shared>> = const_mutex(None);

/// What the first [`initialise_with`] call sets up.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub load_external_plugins: bool,
    /// Directories scanned for `.fip` libraries when
    /// `load_external_plugins` is set.
    pub search_paths:          Vec<PathBuf>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            load_external_plugins: false,
            search_paths:          external::default_search_paths(),
        }
    }
}

/// Take a reference on the shared registry, building it on first use.
pub fn initialise(load_external_plugins: bool) -> Arc<PluginRegistry> {
    initialise_with(InitOptions { load_external_plugins, ..InitOptions::default() })
}

pub fn initialise_with(options: InitOptions) -> Arc<PluginRegistry> {
    let mut shared = SHARED.lock();
    if let Some(s) = shared.as_mut() {
        s.refs += 1;
        log::debug!(target: "imgplug", "library: initialise (refs = {})", s.refs);
        return Arc::clone(&s.registry);
    }

    let registry = Arc::new(PluginRegistry::with_builtins());
    if options.load_external_plugins {
        let n = external::load_from_search_path(&registry, &options.search_paths);
        log::info!(target: "imgplug", "library: {n} external plugin(s) registered");
    }
    log::debug!(target: "imgplug", "library: initialised with {} formats", registry.len());

    *shared = Some(Shared { refs: 1, registry: Arc::clone(&registry) });
    registry
}

/// Release one reference.  Returns the remaining count; extra calls are
/// ignored and return 0.
pub fn deinitialise() -> usize {
    let mut shared = SHARED.lock();
    let remaining = match shared.as_mut() {
        Some(s) => {
            s.refs -= 1;
            s.refs
        }
        None => return 0,
    };
    if remaining == 0 {
        *shared = None;
        log::debug!(target: "imgplug", "library: deinitialised");
    }
    remaining
}

/// The live shared registry, if the library is initialised.
pub fn registry() -> Option<Arc<PluginRegistry>> {
    SHARED.lock().as_ref().map(|s| Arc::clone(&s.registry))
}

pub fn is_initialised() -> bool {
    SHARED.lock().is_some()
}

fn required() -> Result<Arc<PluginRegistry>> {
    registry().ok_or(PluginError::NotInitialised)
}

// ── Convenience over the shared registry ─────────────────────────────────────

/// Number of registered formats; 0 when not initialised.
pub fn format_count() -> usize {
    registry().map(|r| r.len()).unwrap_or(0)
}

/// Content-based detection of the file at `path`.
pub fn file_type(path: impl AsRef<Path>) -> Option<FormatId> {
    registry()?.detect_from_path(path)
}

pub fn file_type_from_memory(data: &[u8]) -> Option<FormatId> {
    registry()?.detect_from_memory(data)
}

pub fn format_from_filename(filename: &str) -> Option<FormatId> {
    registry()?.format_from_filename(filename)
}

pub fn set_plugin_enabled(id: FormatId, enabled: bool) -> Result<bool> {
    required()?.set_enabled(id, enabled)
}

pub fn load(id: FormatId, path: impl AsRef<Path>, flags: LoadFlags) -> Result<Bitmap> {
    required()?.load_from_path(id, path, flags)
}

pub fn save(id: FormatId, bitmap: &Bitmap, path: impl AsRef<Path>, flags: SaveFlags) -> Result<()> {
    required()?.save_to_path(id, bitmap, path, flags)
}
