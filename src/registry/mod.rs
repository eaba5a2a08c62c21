//! Plugin registry: one entry per format, plus the MRU detection order.
//!
//! # Identity rules
//! A format is identified by a small integer [`FormatId`] assigned at
//! registration time, in registration order, starting at 0.  Ids are never
//! reused or renumbered during the registry's lifetime.  The built-in set is
//! registered in a fixed order, so its ids are a stable public contract (see
//! [`crate::plugins::fif`]).
//!
//! # Locking
//! The id → entry map and the MRU list live in one [`RegistryState`] behind a
//! single recursive mutex.  Every registration inserts into both inside the
//! same critical section, so no reader ever observes one without the other.
//! Entries are immutable once registered apart from their enabled flag, which
//! is stored next to the entry in the locked state.

pub mod mru;

use libloading::Library;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::bitmap::ImageType;
use crate::error::{PluginError, Result};
use crate::message::output_message;
use crate::plugin::{Capabilities, InitProc, Plugin};
use crate::sync::{RecursiveMutex, ScopedLock};

pub use mru::{MruItem, MruList};

// ── FormatId ─────────────────────────────────────────────────────────────────

/// Registry-assigned format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormatId(pub i32);

impl FormatId {
    /// Returned where no format applies.
    pub const UNKNOWN: FormatId = FormatId(-1);

    #[inline]
    pub fn is_unknown(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("unknown")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ── Registration overrides ───────────────────────────────────────────────────

/// Optional strings that take precedence over the plugin's own accessors.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub format:      Option<String>,
    pub description: Option<String>,
    pub extension:   Option<String>,
    pub regexp:      Option<String>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn regexp(mut self, regexp: impl Into<String>) -> Self {
        self.regexp = Some(regexp.into());
        self
    }
}

// ── FormatEntry ──────────────────────────────────────────────────────────────

/// One registered format.
///
/// Handed out as `Arc<FormatEntry>`; a handle stays usable after the registry
/// is dropped, and keeps a dynamically loaded module mapped for as long as it
/// is held.
pub struct FormatEntry {
    id:          FormatId,
    // Declared before `module`: the plugin must be dropped while the library
    // backing its code is still loaded.
    plugin:      Box<dyn Plugin>,
    format:      String,
    description: Option<String>,
    extension:   Option<String>,
    regexp:      Option<String>,
    module:      Option<Library>,
}

impl FormatEntry {
    pub fn id(&self) -> FormatId {
        self.id
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.plugin.capabilities()
    }

    /// Effective format name: override, else the plugin's.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref().or_else(|| self.plugin.description())
    }

    pub fn extension_list(&self) -> Option<&str> {
        self.extension.as_deref().or_else(|| self.plugin.extension_list())
    }

    pub fn regexp(&self) -> Option<&str> {
        self.regexp.as_deref().or_else(|| self.plugin.regexp())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.plugin.mime_type()
    }

    pub fn is_external(&self) -> bool {
        self.module.is_some()
    }

    pub fn supports_reading(&self) -> bool {
        self.capabilities().contains(Capabilities::LOAD)
    }

    pub fn supports_writing(&self) -> bool {
        self.capabilities().contains(Capabilities::SAVE)
    }

    pub fn supports_export_bpp(&self, depth: u32) -> bool {
        self.plugin.supports_export_bpp(depth)
    }

    pub fn supports_export_type(&self, image_type: ImageType) -> bool {
        self.plugin.supports_export_type(image_type)
    }

    pub fn supports_icc_profiles(&self) -> bool {
        self.plugin.supports_icc_profiles()
    }

    pub fn supports_no_pixels(&self) -> bool {
        self.plugin.supports_no_pixels()
    }

    /// Whether `ext` (without dot) names this format or one of its listed
    /// extensions, ignoring ASCII case.
    pub fn matches_extension(&self, ext: &str) -> bool {
        if self.format.eq_ignore_ascii_case(ext) {
            return true;
        }
        self.extension_list()
            .map(|list| list.split(',').any(|tok| tok.trim().eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl fmt::Debug for FormatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatEntry")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("external", &self.is_external())
            .finish()
    }
}

// ── Registry state ───────────────────────────────────────────────────────────

struct Slot {
    entry:   Arc<FormatEntry>,
    enabled: bool,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    entries: BTreeMap<FormatId, Slot>,
    mru:     MruList,
}

impl RegistryState {
    pub(crate) fn mru(&self) -> &MruList {
        &self.mru
    }

    pub(crate) fn mru_mut(&mut self) -> &mut MruList {
        &mut self.mru
    }

    /// Entry and enabled flag for `id`.
    pub(crate) fn slot(&self, id: FormatId) -> Option<(Arc<FormatEntry>, bool)> {
        self.entries.get(&id).map(|s| (Arc::clone(&s.entry), s.enabled))
    }

    pub(crate) fn find_enabled(&self, pred: impl Fn(&FormatEntry) -> bool) -> Option<Arc<FormatEntry>> {
        self.entries
            .values()
            .filter(|s| s.enabled)
            .find(|s| pred(&s.entry))
            .map(|s| Arc::clone(&s.entry))
    }
}

// ── PluginRegistry ───────────────────────────────────────────────────────────

/// Owns every registered format and the MRU list.
///
/// Can be used directly as a context object, or through the process-wide
/// instance managed by [`crate::library`].
pub struct PluginRegistry {
    state: RecursiveMutex<RegistryState>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { state: RecursiveMutex::default() }
    }

    /// A registry holding the built-in formats in their fixed order.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::plugins::register_builtins(&registry);
        registry
    }

    pub(crate) fn lock(&self) -> ScopedLock<'_, RegistryState> {
        self.state.lock()
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Add a format.
    ///
    /// `init` receives the id the new entry will get (the current entry
    /// count) and builds the plugin.  The effective format name is
    /// `overrides.format`, else the plugin's own.  Fails when `init` is
    /// absent or no format name can be resolved; failures are also reported
    /// through [`output_message`].
    pub fn register<F>(
        &self,
        init:      Option<F>,
        module:    Option<Library>,
        overrides: Registration,
    ) -> Result<FormatId>
    where
        F: FnOnce(FormatId) -> Box<dyn Plugin>,
    {
        let init = init.map(|f| move |id: FormatId| Ok::<_, PluginError>(f(id)));
        self.try_register(init, module, overrides)
    }

    /// [`register`](Self::register) with a fallible `init`.  An `init`
    /// error aborts the registration; `module`, if any, is dropped.
    pub fn try_register<F>(
        &self,
        init:      Option<F>,
        module:    Option<Library>,
        overrides: Registration,
    ) -> Result<FormatId>
    where
        F: FnOnce(FormatId) -> Result<Box<dyn Plugin>>,
    {
        let lock = self.lock();

        let result = (|| -> Result<FormatId> {
            let init = init.ok_or(PluginError::MissingInit)?;
            let id = FormatId(lock.with(|s| s.entries.len()) as i32);
            let plugin = init(id)?;

            let format = match overrides.format {
                Some(f) => f,
                None => plugin.format().map(str::to_owned).ok_or(PluginError::MissingFormatName)?,
            };

            let entry = Arc::new(FormatEntry {
                id,
                plugin,
                format,
                description: overrides.description,
                extension:   overrides.extension,
                regexp:      overrides.regexp,
                module,
            });

            log::debug!(target: "imgplug", "registered format {} as id {}", entry.format(), id);

            lock.with_mut(|s| {
                s.entries.insert(id, Slot { entry, enabled: true });
                s.mru.push(id);
            });
            Ok(id)
        })();

        if let Err(e) = &result {
            output_message(FormatId::UNKNOWN, &e.to_string());
        }
        result
    }

    /// Register a built-in style plugin from a plain init function.
    pub fn register_local(&self, init: InitProc, overrides: Registration) -> Result<FormatId> {
        self.register(Some(init), None, overrides)
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Entry for `id`, enabled or not.
    pub fn find_by_id(&self, id: FormatId) -> Option<Arc<FormatEntry>> {
        self.lock().with(|s| s.slot(id).map(|(entry, _)| entry))
    }

    /// First enabled entry whose format name matches, ignoring ASCII case.
    pub fn find_by_format(&self, format: &str) -> Option<Arc<FormatEntry>> {
        self.lock()
            .with(|s| s.find_enabled(|e| e.format().eq_ignore_ascii_case(format)))
    }

    /// First enabled entry whose plugin reports exactly `mime`.
    pub fn find_by_mime(&self, mime: &str) -> Option<Arc<FormatEntry>> {
        self.lock()
            .with(|s| s.find_enabled(|e| e.mime_type() == Some(mime)))
    }

    /// Resolve a file name (or bare extension) to an enabled format.
    ///
    /// The text after the last `.` (the whole input if there is none) is
    /// matched against each format name, then against each token of its
    /// extension list, in ascending id order.
    pub fn format_from_filename(&self, filename: &str) -> Option<FormatId> {
        let ext = match filename.rfind('.') {
            Some(dot) => &filename[dot + 1..],
            None => filename,
        };
        self.lock()
            .with(|s| s.find_enabled(|e| e.matches_extension(ext)))
            .map(|e| e.id())
    }

    pub fn len(&self) -> usize {
        self.lock().with(|s| s.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().with(|s| s.entries.is_empty())
    }

    /// Snapshot of every entry with its enabled flag, in id order.
    pub fn entries(&self) -> Vec<(Arc<FormatEntry>, bool)> {
        self.lock().with(|s| {
            s.entries
                .values()
                .map(|slot| (Arc::clone(&slot.entry), slot.enabled))
                .collect()
        })
    }

    // ── Per-format accessors ─────────────────────────────────────────────────
    //
    // Unknown ids answer `None` / `false`.  Disabled entries still answer.

    fn with_entry<T>(&self, id: FormatId, f: impl FnOnce(&FormatEntry) -> T) -> Option<T> {
        self.find_by_id(id).map(|e| f(&e))
    }

    pub fn format_name(&self, id: FormatId) -> Option<String> {
        self.with_entry(id, |e| e.format().to_owned())
    }

    pub fn description(&self, id: FormatId) -> Option<String> {
        self.with_entry(id, |e| e.description().map(str::to_owned)).flatten()
    }

    pub fn extension_list(&self, id: FormatId) -> Option<String> {
        self.with_entry(id, |e| e.extension_list().map(str::to_owned)).flatten()
    }

    pub fn regexp(&self, id: FormatId) -> Option<String> {
        self.with_entry(id, |e| e.regexp().map(str::to_owned)).flatten()
    }

    pub fn mime_type(&self, id: FormatId) -> Option<String> {
        self.with_entry(id, |e| e.mime_type().map(str::to_owned)).flatten()
    }

    pub fn supports_reading(&self, id: FormatId) -> bool {
        self.with_entry(id, FormatEntry::supports_reading).unwrap_or(false)
    }

    pub fn supports_writing(&self, id: FormatId) -> bool {
        self.with_entry(id, FormatEntry::supports_writing).unwrap_or(false)
    }

    pub fn supports_export_bpp(&self, id: FormatId, depth: u32) -> bool {
        self.with_entry(id, |e| e.supports_export_bpp(depth)).unwrap_or(false)
    }

    pub fn supports_export_type(&self, id: FormatId, image_type: ImageType) -> bool {
        self.with_entry(id, |e| e.supports_export_type(image_type)).unwrap_or(false)
    }

    pub fn supports_icc_profiles(&self, id: FormatId) -> bool {
        self.with_entry(id, FormatEntry::supports_icc_profiles).unwrap_or(false)
    }

    pub fn supports_no_pixels(&self, id: FormatId) -> bool {
        self.with_entry(id, FormatEntry::supports_no_pixels).unwrap_or(false)
    }

    // ── Enable / disable ─────────────────────────────────────────────────────

    /// Set the enabled flag, returning the previous state.
    pub fn set_enabled(&self, id: FormatId, enabled: bool) -> Result<bool> {
        self.lock().with_mut(|s| match s.entries.get_mut(&id) {
            Some(slot) => Ok(std::mem::replace(&mut slot.enabled, enabled)),
            None => Err(PluginError::UnknownFormat(id)),
        })
    }

    /// False for unknown ids.
    pub fn is_enabled(&self, id: FormatId) -> bool {
        self.lock()
            .with(|s| s.entries.get(&id).map(|slot| slot.enabled).unwrap_or(false))
    }

    // ── MRU ──────────────────────────────────────────────────────────────────

    /// Record a detection hit for `id`; see [`MruList::promote`].
    pub fn update_mru(&self, id: FormatId) {
        self.lock().with_mut(|s| s.mru.promote(id));
    }

    pub fn mru_order(&self) -> Vec<MruItem> {
        self.lock().with(|s| s.mru.as_slice().to_vec())
    }

    /// True when the map and the MRU list hold exactly the same ids, once
    /// each.
    pub fn check_consistency(&self) -> bool {
        self.lock().with(|s| {
            if s.entries.len() != s.mru.len() {
                return false;
            }
            let mut ids: Vec<FormatId> = s.mru.as_slice().iter().map(|i| i.format).collect();
            ids.sort_unstable();
            ids.iter().copied().eq(s.entries.keys().copied())
        })
    }
}
