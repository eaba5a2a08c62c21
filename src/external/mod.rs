//! Frozen C ABI for format plugins loaded from shared libraries.
//!
//! A plugin library exports one symbol:
//!
//! ```c
//! void imgplug_plugin_init(PluginTableV1 *table, int32_t format_id);
//! ```
//!
//! The host passes a zeroed table and the id the format is about to receive.
//! The plugin fills in `abi_version` and whichever procs it implements; an
//! absent proc is a missing capability.
//!
//! # Stability contract
//! - `IMGPLUG_PLUGIN_ABI_VERSION` is monotonically increasing and never
//!   decremented.
//! - New fields are appended at the end of `PluginTableV1` only.
//! - A table whose `abi_version` is newer than the host's is rejected, as is
//!   a table left at version 0.
//!
//! # Memory model
//! Strings returned by the metadata procs are static, NUL-terminated and
//! copied by the host at registration.  Pixel buffers handed back by `load`
//! belong to the plugin and are returned through `release_image` once the
//! host has copied them.  Buffers passed to `save` belong to the host and are
//! read-only for the plugin.
//!
//! # Thread safety
//! Every proc may be called concurrently from several threads on different
//! streams.

use libloading::Library;
use std::ffi::{c_char, c_void, CStr};
use std::fs;
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::bitmap::{Bitmap, ImageType};
use crate::error::{PluginError, Result};
use crate::io_stream::{read_prefix, IoHandle, ReadSeek, WriteSeek};
use crate::message::output_message;
use crate::plugin::{Capabilities, CodecState, LoadFlags, Plugin, SaveFlags};
use crate::registry::{FormatId, PluginRegistry, Registration};

/// ABI version of this header.
pub const IMGPLUG_PLUGIN_ABI_VERSION: u32 = 1;

/// Exported entry point, NUL-terminated for `Library::get`.
pub const ENTRY_SYMBOL: &[u8] = b"imgplug_plugin_init\0";

/// File extension of plugin libraries on the search path.
pub const PLUGIN_EXTENSION: &str = "fip";

/// Search directories relative to the executable.
pub const SEARCH_DIRS: [&str; 2] = ["", "plugins"];

/// Return codes from `load` / `save`.
pub mod rc {
    pub const OK:          i32 = 0;
    /// Input is corrupt or truncated.
    pub const CORRUPT:     i32 = -2;
    /// Codec-internal error.
    pub const INTERNAL:    i32 = -3;
    /// The image cannot be represented in this format.
    pub const UNSUPPORTED: i32 = -4;
}

// ── Wire types ───────────────────────────────────────────────────────────────

/// Stream callbacks handed to the plugin.  `handle` is opaque to it.
#[repr(C)]
pub struct FfiIo {
    pub handle: *mut c_void,
    /// Returns the number of bytes read; 0 at end of stream or on error.
    pub read:   unsafe extern "C" fn(handle: *mut c_void, buf: *mut u8, len: usize) -> usize,
    /// Returns `len` on success, 0 on error.
    pub write:  unsafe extern "C" fn(handle: *mut c_void, buf: *const u8, len: usize) -> usize,
    /// `whence`: 0 = start, 1 = current, 2 = end.  Returns 0 on success.
    pub seek:   unsafe extern "C" fn(handle: *mut c_void, offset: i64, whence: i32) -> i32,
    /// Current position, or -1.
    pub tell:   unsafe extern "C" fn(handle: *mut c_void) -> i64,
}

/// Image crossing the ABI.  `pixels` is null for a header-only image.
#[repr(C)]
pub struct FfiImage {
    pub image_type: u32,
    pub width:      u32,
    pub height:     u32,
    pub bpp:        u32,
    pub pixels:     *mut u8,
    pub pixels_len: usize,
}

impl FfiImage {
    fn empty() -> Self {
        Self { image_type: 0, width: 0, height: 0, bpp: 0, pixels: ptr::null_mut(), pixels_len: 0 }
    }
}

type StrProc = Option<unsafe extern "C" fn() -> *const c_char>;

/// Capability table filled in by `imgplug_plugin_init`.
///
/// `#[repr(C)]` is mandatory.  Do not reorder fields.
#[repr(C)]
pub struct PluginTableV1 {
    pub abi_version: u32,

    pub format_proc:      StrProc,
    pub description_proc: StrProc,
    pub extension_proc:   StrProc,
    pub regexp_proc:      StrProc,
    pub mime_proc:        StrProc,

    /// Non-zero when the stream carries this format's signature.  The host
    /// restores the stream position afterwards.
    pub validate_proc: Option<unsafe extern "C" fn(io: *mut FfiIo) -> i32>,

    /// Decode into `*out`.  On `rc::OK` the host copies the pixels and then
    /// calls `release_image_proc(out)`.
    pub load_proc: Option<
        unsafe extern "C" fn(io: *mut FfiIo, page: i32, flags: i32, out: *mut FfiImage) -> i32,
    >,
    pub save_proc: Option<
        unsafe extern "C" fn(io: *mut FfiIo, image: *const FfiImage, page: i32, flags: i32) -> i32,
    >,
    pub release_image_proc: Option<unsafe extern "C" fn(image: *mut FfiImage)>,

    pub supports_export_bpp_proc:   Option<unsafe extern "C" fn(depth: u32) -> i32>,
    pub supports_export_type_proc:  Option<unsafe extern "C" fn(image_type: u32) -> i32>,
    pub supports_icc_profiles_proc: Option<unsafe extern "C" fn() -> i32>,
    pub supports_no_pixels_proc:    Option<unsafe extern "C" fn() -> i32>,
}

// Safety: the ABI contract declares every proc reentrant and thread-safe.
unsafe impl Send for PluginTableV1 {}
unsafe impl Sync for PluginTableV1 {}

impl PluginTableV1 {
    /// The zeroed table passed to the plugin's init.
    pub fn zeroed() -> Self {
        Self {
            abi_version:                0,
            format_proc:                None,
            description_proc:           None,
            extension_proc:             None,
            regexp_proc:                None,
            mime_proc:                  None,
            validate_proc:              None,
            load_proc:                  None,
            save_proc:                  None,
            release_image_proc:         None,
            supports_export_bpp_proc:   None,
            supports_export_type_proc:  None,
            supports_icc_profiles_proc: None,
            supports_no_pixels_proc:    None,
        }
    }
}

/// Signature of `imgplug_plugin_init`.
pub type PluginInitFn = unsafe extern "C" fn(table: *mut PluginTableV1, format_id: i32);

// ── Host-side stream callbacks ───────────────────────────────────────────────

unsafe fn handle_of<'a>(handle: *mut c_void) -> &'a mut IoHandle<'a> {
    unsafe { &mut *(handle as *mut IoHandle<'a>) }
}

unsafe extern "C" fn io_read(handle: *mut c_void, buf: *mut u8, len: usize) -> usize {
    if buf.is_null() {
        return 0;
    }
    let io = unsafe { handle_of(handle) };
    let out = unsafe { std::slice::from_raw_parts_mut(buf, len) };
    match io {
        IoHandle::Reader(r) => read_prefix(&mut **r, out).unwrap_or(0),
        IoHandle::Writer(_) => 0,
    }
}

unsafe extern "C" fn io_write(handle: *mut c_void, buf: *const u8, len: usize) -> usize {
    if buf.is_null() {
        return 0;
    }
    let io = unsafe { handle_of(handle) };
    let data = unsafe { std::slice::from_raw_parts(buf, len) };
    match io {
        IoHandle::Writer(w) => w.write_all(data).map(|_| len).unwrap_or(0),
        IoHandle::Reader(_) => 0,
    }
}

unsafe extern "C" fn io_seek(handle: *mut c_void, offset: i64, whence: i32) -> i32 {
    let io = unsafe { handle_of(handle) };
    let pos = match whence {
        0 if offset >= 0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match io.seek(pos) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

unsafe extern "C" fn io_tell(handle: *mut c_void) -> i64 {
    let io = unsafe { handle_of(handle) };
    io.tell().map(|p| p as i64).unwrap_or(-1)
}

impl FfiIo {
    /// Callbacks over `io`.  The result must not outlive `io`.
    fn new(io: &mut IoHandle<'_>) -> Self {
        Self {
            handle: io as *mut IoHandle<'_> as *mut c_void,
            read:   io_read,
            write:  io_write,
            seek:   io_seek,
            tell:   io_tell,
        }
    }
}

// ── FfiPlugin ────────────────────────────────────────────────────────────────

/// [`Plugin`] over a table filled in by an external library.
///
/// Must be dropped before the library; `FormatEntry` guarantees this by
/// field order.
pub struct FfiPlugin {
    table:       PluginTableV1,
    format:      Option<String>,
    description: Option<String>,
    extension:   Option<String>,
    regexp:      Option<String>,
    mime:        Option<String>,
}

/// Copy a plugin-owned C string.
///
/// # Safety
/// `hook`, if present, must return null or a valid NUL-terminated string.
unsafe fn owned_string(hook: StrProc) -> Option<String> {
    let f = hook?;
    let p = unsafe { f() };
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
}

fn rc_error(op: &str, code: i32) -> PluginError {
    let what = match code {
        rc::CORRUPT     => "corrupt input",
        rc::INTERNAL    => "internal error",
        rc::UNSUPPORTED => "unsupported image",
        _               => "error",
    };
    PluginError::Codec {
        format:  FormatId::UNKNOWN,
        message: format!("external {op} returned {what} ({code})"),
    }
}

impl FfiPlugin {
    /// Wrap a filled-in table after checking its ABI version.
    ///
    /// # Safety
    /// Every proc in `table` must honour the contract documented on
    /// [`PluginTableV1`] for as long as the returned value lives.
    pub unsafe fn new(table: PluginTableV1) -> Result<Self> {
        if table.abi_version == 0 {
            return Err(PluginError::External("plugin did not fill in its table".into()));
        }
        if table.abi_version > IMGPLUG_PLUGIN_ABI_VERSION {
            return Err(PluginError::External(format!(
                "plugin ABI version {} is newer than host ABI version {}",
                table.abi_version, IMGPLUG_PLUGIN_ABI_VERSION,
            )));
        }
        unsafe {
            Ok(Self {
                format:      owned_string(table.format_proc),
                description: owned_string(table.description_proc),
                extension:   owned_string(table.extension_proc),
                regexp:      owned_string(table.regexp_proc),
                mime:        owned_string(table.mime_proc),
                table,
            })
        }
    }

    fn flag(hook: Option<unsafe extern "C" fn() -> i32>) -> bool {
        hook.map(|f| unsafe { f() } != 0).unwrap_or(false)
    }
}

impl Plugin for FfiPlugin {
    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::NONE;
        if self.table.validate_proc.is_some() {
            caps = caps | Capabilities::VALIDATE;
        }
        if self.table.load_proc.is_some() && self.table.release_image_proc.is_some() {
            caps = caps | Capabilities::LOAD;
        }
        if self.table.save_proc.is_some() {
            caps = caps | Capabilities::SAVE;
        }
        caps
    }

    fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn extension_list(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    fn regexp(&self) -> Option<&str> {
        self.regexp.as_deref()
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> std::io::Result<bool> {
        let Some(f) = self.table.validate_proc else {
            return Ok(false);
        };
        let mut handle = IoHandle::Reader(io);
        let mut ffi = FfiIo::new(&mut handle);
        Ok(unsafe { f(&mut ffi) } != 0)
    }

    fn load(
        &self,
        io:     &mut dyn ReadSeek,
        page:   i32,
        flags:  LoadFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<Bitmap> {
        let (Some(load), Some(release)) = (self.table.load_proc, self.table.release_image_proc) else {
            return Err(PluginError::unsupported(FormatId::UNKNOWN, crate::error::capability::LOAD));
        };

        let mut handle = IoHandle::Reader(io);
        let mut ffi = FfiIo::new(&mut handle);
        let mut img = FfiImage::empty();
        let code = unsafe { load(&mut ffi, page, flags.0, &mut img) };
        if code != rc::OK {
            return Err(rc_error("load", code));
        }

        let image_type = ImageType::from_code(img.image_type);
        let result = if img.pixels.is_null() {
            Ok(Bitmap::header_only(image_type, img.width, img.height, img.bpp))
        } else {
            let pixels = unsafe { std::slice::from_raw_parts(img.pixels, img.pixels_len) }.to_vec();
            Bitmap::from_pixels(image_type, img.width, img.height, img.bpp, pixels).ok_or_else(|| {
                PluginError::invalid(format!(
                    "external load returned {} bytes for a {}x{}x{} image",
                    img.pixels_len, img.width, img.height, img.bpp
                ))
            })
        };
        unsafe { release(&mut img) };
        result
    }

    fn save(
        &self,
        io:     &mut dyn WriteSeek,
        bitmap: &Bitmap,
        page:   i32,
        flags:  SaveFlags,
        _state: Option<&mut CodecState>,
    ) -> Result<()> {
        let Some(save) = self.table.save_proc else {
            return Err(PluginError::unsupported(FormatId::UNKNOWN, crate::error::capability::SAVE));
        };
        let pixels = bitmap.pixels().ok_or(PluginError::HeaderOnly)?;
        let img = FfiImage {
            image_type: bitmap.image_type.code(),
            width:      bitmap.width,
            height:     bitmap.height,
            bpp:        bitmap.bpp,
            pixels:     pixels.as_ptr() as *mut u8,
            pixels_len: pixels.len(),
        };

        let mut handle = IoHandle::Writer(io);
        let mut ffi = FfiIo::new(&mut handle);
        let code = unsafe { save(&mut ffi, &img, page, flags.0) };
        if code != rc::OK {
            return Err(rc_error("save", code));
        }
        if let IoHandle::Writer(w) = &mut handle {
            w.flush()?;
        }
        Ok(())
    }

    fn supports_export_bpp(&self, depth: u32) -> bool {
        self.table
            .supports_export_bpp_proc
            .map(|f| unsafe { f(depth) } != 0)
            .unwrap_or(false)
    }

    fn supports_export_type(&self, image_type: ImageType) -> bool {
        self.table
            .supports_export_type_proc
            .map(|f| unsafe { f(image_type.code()) } != 0)
            .unwrap_or(false)
    }

    fn supports_icc_profiles(&self) -> bool {
        Self::flag(self.table.supports_icc_profiles_proc)
    }

    fn supports_no_pixels(&self) -> bool {
        Self::flag(self.table.supports_no_pixels_proc)
    }
}

/// Run `entry` against a zeroed table and wrap the result.
///
/// # Safety
/// `entry` must follow the `imgplug_plugin_init` contract.
pub unsafe fn plugin_from_init(entry: PluginInitFn, id: FormatId) -> Result<Box<dyn Plugin>> {
    let mut table = PluginTableV1::zeroed();
    unsafe {
        entry(&mut table, id.0);
        Ok(Box::new(FfiPlugin::new(table)?))
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Load one plugin library and register its format.
///
/// On any failure the library is unloaded again and the error is reported
/// through the diagnostic channel.
pub fn register_external_plugin(
    registry:  &PluginRegistry,
    path:      &Path,
    overrides: Registration,
) -> Result<FormatId> {
    log::info!(target: "imgplug", "plugins: loading '{}'", path.display());

    let fail = |message: String| {
        output_message(FormatId::UNKNOWN, &message);
        PluginError::External(message)
    };

    // Safety: loading runs the library's initialisers.  Plugin libraries on
    // the search path are trusted by the application that installed them.
    let lib = unsafe { Library::new(path) }
        .map_err(|e| fail(format!("{}: Library::new failed: {e}", path.display())))?;
    let entry: PluginInitFn = unsafe { lib.get::<PluginInitFn>(ENTRY_SYMBOL) }
        .map(|sym| *sym)
        .map_err(|e| fail(format!("{}: missing imgplug_plugin_init: {e}", path.display())))?;

    // The entry point stays valid while `lib` is alive, and `lib` moves into
    // the registered entry alongside the plugin.
    registry.try_register(
        Some(move |id: FormatId| unsafe { plugin_from_init(entry, id) }),
        Some(lib),
        overrides,
    )
}

fn is_plugin_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(PLUGIN_EXTENSION))
}

/// Scan `dirs` for plugin libraries and register every one that loads.
/// Returns the number registered.  Missing directories are skipped.
pub fn load_from_search_path(registry: &PluginRegistry, dirs: &[PathBuf]) -> usize {
    let mut registered = 0;
    for dir in dirs {
        let rd = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                log::debug!(target: "imgplug", "plugins: skipping '{}': {e}", dir.display());
                continue;
            }
        };

        let mut candidates: Vec<PathBuf> = rd
            .filter_map(|ent| ent.ok().map(|e| e.path()))
            .filter(|p| is_plugin_file(p))
            .collect();
        candidates.sort();

        log::info!(
            target: "imgplug",
            "plugins: found {} candidate(s) in '{}'",
            candidates.len(),
            dir.display()
        );

        for path in candidates {
            match register_external_plugin(registry, &path, Registration::new()) {
                Ok(_) => registered += 1,
                Err(e) => log::warn!(target: "imgplug", "plugins: failed to load '{}': {e}", path.display()),
            }
        }
    }
    registered
}

/// `""` and `"plugins"` relative to the running executable's directory.
pub fn default_search_paths() -> Vec<PathBuf> {
    let base = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    SEARCH_DIRS
        .iter()
        .map(|d| if d.is_empty() { base.clone() } else { base.join(d) })
        .collect()
}
