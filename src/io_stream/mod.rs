//! Stream abstraction shared by the detector, the dispatch façade and plugins.
//!
//! Plugins never see a concrete file type.  Anything implementing
//! `Read + Seek` (or `Write + Seek`) can be handed to the registry: files,
//! in-memory cursors, or custom transports.  The traits below are the
//! object-safe forms used across the plugin boundary.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// A readable, seekable byte stream.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// A writable, seekable byte stream.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek + ?Sized> WriteSeek for T {}

/// The stream passed to a plugin's `open` / `close` capabilities.
///
/// Opening happens either around a load (reader) or a save (writer).
pub enum IoHandle<'a> {
    Reader(&'a mut dyn ReadSeek),
    Writer(&'a mut dyn WriteSeek),
}

impl IoHandle<'_> {
    pub fn is_reader(&self) -> bool {
        matches!(self, IoHandle::Reader(_))
    }

    pub fn tell(&mut self) -> io::Result<u64> {
        match self {
            IoHandle::Reader(r) => r.stream_position(),
            IoHandle::Writer(w) => w.stream_position(),
        }
    }

    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            IoHandle::Reader(r) => r.seek(pos),
            IoHandle::Writer(w) => w.seek(pos),
        }
    }
}

/// Read up to `buf.len()` bytes, stopping early only at end of stream.
///
/// Signature checks use this instead of `read_exact` so that a short file is
/// a non-match rather than an error.
pub fn read_prefix<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Run `f` against `stream` and put the stream back where it was, whatever
/// `f` returned.
pub fn with_restored_position<S, T>(
    stream: &mut S,
    f: impl FnOnce(&mut S) -> io::Result<T>,
) -> io::Result<T>
where
    S: Seek + ?Sized,
{
    let start = stream.stream_position()?;
    let result = f(stream);
    stream.seek(SeekFrom::Start(start))?;
    result
}

/// Bytes between the current position and the end of `stream`.  The position
/// is left unchanged.
pub fn remaining<S: Seek + ?Sized>(stream: &mut S) -> io::Result<u64> {
    with_restored_position(stream, |s| {
        let here = s.stream_position()?;
        let end = s.seek(SeekFrom::End(0))?;
        Ok(end.saturating_sub(here))
    })
}
