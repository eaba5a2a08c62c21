pub mod bitmap;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod external;
pub mod io_stream;
pub mod library;
pub mod message;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod sync;

pub use bitmap::{Bitmap, ImageType};
pub use error::{PluginError, Result};
pub use io_stream::{IoHandle, ReadSeek, WriteSeek};
pub use library::{deinitialise, initialise, initialise_with, InitOptions};
pub use plugin::{Capabilities, CodecState, LoadFlags, Plugin, SaveFlags};
pub use plugins::fif;
pub use registry::{FormatEntry, FormatId, PluginRegistry, Registration};
