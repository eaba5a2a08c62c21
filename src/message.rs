//! Diagnostic channel.
//!
//! Every expected failure (bad plugin registration, unopenable file,
//! header-only save, ...) is reported here as well as returned to the caller.
//! Messages always go to the `log` facade; an application can additionally
//! install a callback to route them into its own UI.

use parking_lot::{const_rwlock, RwLock};
use std::sync::Arc;

use crate::registry::FormatId;

type Callback = Arc<dyn Fn(FormatId, &str) + Send + Sync>;

static OUTPUT_MESSAGE: RwLock<Option<Callback>> = const_rwlock(None);

/// Install the process-wide message callback, replacing any previous one.
pub fn set_output_message<F>(callback: F)
where
    F: Fn(FormatId, &str) + Send + Sync + 'static,
{
    *OUTPUT_MESSAGE.write() = Some(Arc::new(callback));
}

pub fn clear_output_message() {
    *OUTPUT_MESSAGE.write() = None;
}

/// Emit a diagnostic attributed to `format` (`FormatId::UNKNOWN` when no
/// format is involved).
pub fn output_message(format: FormatId, message: &str) {
    log::warn!(target: "imgplug", "[{format}] {message}");

    // Clone out so the callback runs without the lock held.
    let callback = OUTPUT_MESSAGE.read().clone();
    if let Some(cb) = callback {
        cb(format, message);
    }
}
