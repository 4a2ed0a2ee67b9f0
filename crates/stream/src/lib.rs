//! # Stream — layered byte-stream abstraction
//!
//! The common currency of every protocol layer in this workspace: a seekable
//! byte source with explicit partial-read semantics.
//!
//! Framing protocols (such as the `tapeimage` reader) both *consume* a
//! [`ByteStream`] and *implement* it, so layers stack: a protocol wraps an
//! inner stream, translates offsets, and presents the same interface one
//! level up. Because every layer speaks the same [`ReadStatus`] and
//! [`StreamError`] language, back-pressure and protocol anomalies propagate
//! through a stack without translation.
//!
//! ## Read semantics
//!
//! `read` fills as much of the destination as it can and reports how the
//! attempt ended:
//!
//! | Status | Meaning |
//! |---|---|
//! | [`ReadStatus::Complete`]   | the destination was filled |
//! | [`ReadStatus::Incomplete`] | fewer bytes; more may arrive later (blocked or drained source) |
//! | [`ReadStatus::Eof`]        | fewer bytes; no further data exists |
//! | [`ReadStatus::Tainted`]    | the destination was filled, but the source patched a recoverable protocol anomaly along the way |
//!
//! Leaf streams never return `Tainted`; it exists so framing protocols can
//! surface an in-memory corruption patch on every subsequent read without
//! discarding the data.
//!
//! Two leaf streams are provided: [`FileStream`] over a buffered file and
//! [`MemoryStream`] over an owned byte vector.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

/// How a [`ByteStream::read`] attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The destination buffer was completely filled.
    Complete,
    /// Fewer bytes than requested were delivered; the source is temporarily
    /// blocked or drained and more data may be available later.
    Incomplete,
    /// Fewer bytes than requested were delivered and no further data exists.
    Eof,
    /// The destination was filled, but the source observed and patched a
    /// recoverable protocol anomaly. Data is usable; trust is reduced.
    Tainted,
}

/// Errors shared by every stream layer.
///
/// Leaf streams only produce [`Io`](StreamError::Io) and
/// [`Closed`](StreamError::Closed); the remaining variants are raised by
/// framing protocols. Keeping them in one enum is what lets a stacked
/// protocol pass errors from the layer below straight through.
#[derive(Debug, Error)]
pub enum StreamError {
    /// An underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The caller asked for something the interface cannot express.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream ended inside a structure that promised more bytes.
    #[error("unexpected EOF: {0}")]
    UnexpectedEof(String),

    /// A protocol anomaly occurred after recovery had already been spent,
    /// or in a structure where recovery is not implemented.
    #[error("protocol failed recovery: {0}")]
    FailedRecovery(String),

    /// A protocol inconsistency with no reasonable recovery.
    #[error("protocol fatal: {0}")]
    Fatal(String),

    /// An internal operation failed (allocation, broken precondition).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A layer below returned something this layer does not handle.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The stream has been closed.
    #[error("stream is closed")]
    Closed,
}

/// A seekable source of bytes with explicit partial-read reporting.
///
/// Offsets are absolute byte positions within this stream's own coordinate
/// space; a framing protocol implementing the trait presents *logical*
/// offsets and hides whatever headers it skips internally.
///
/// A stream is single-owner and not required to tolerate use after
/// [`close`](ByteStream::close); implementations here return
/// [`StreamError::Closed`].
pub trait ByteStream {
    /// Reads up to `dst.len()` bytes, returning how many bytes were
    /// delivered and how the attempt ended.
    ///
    /// `Complete` and `Tainted` imply the count equals `dst.len()`;
    /// `Incomplete` and `Eof` imply it is smaller.
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError>;

    /// Repositions the stream to an absolute offset.
    fn seek(&mut self, offset: u64) -> Result<(), StreamError>;

    /// Reports the current absolute offset.
    fn tell(&mut self) -> Result<u64, StreamError>;

    /// Closes the stream. Implementations must make this idempotent.
    fn close(&mut self) -> Result<(), StreamError>;
}

/// A [`ByteStream`] over a buffered file.
///
/// Regular files never block, so this stream never returns
/// [`ReadStatus::Incomplete`]; a short read from the OS is retried until the
/// buffer is full or the file ends.
pub struct FileStream {
    file: Option<BufReader<File>>,
}

impl FileStream {
    /// Opens a file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let file = File::open(path)?;
        Ok(Self {
            file: Some(BufReader::new(file)),
        })
    }

    fn inner(&mut self) -> Result<&mut BufReader<File>, StreamError> {
        self.file.as_mut().ok_or(StreamError::Closed)
    }
}

impl ByteStream for FileStream {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError> {
        let file = self.inner()?;
        let mut filled = 0;
        while filled < dst.len() {
            match file.read(&mut dst[filled..]) {
                Ok(0) => return Ok((filled, ReadStatus::Eof)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
        Ok((filled, ReadStatus::Complete))
    }

    fn seek(&mut self, offset: u64) -> Result<(), StreamError> {
        self.inner()?.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        Ok(self.inner()?.stream_position()?)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        // Dropping the handle closes it; subsequent calls are no-ops.
        self.file.take();
        Ok(())
    }
}

/// A [`ByteStream`] over an owned byte vector.
///
/// Suitable for tests and for embedding pre-loaded data. Seeking past the
/// end is permitted (as with a file); reads from there report
/// [`ReadStatus::Eof`] with zero bytes.
#[derive(Debug, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: u64,
    closed: bool,
}

impl MemoryStream {
    /// Creates a stream positioned at the start of `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            closed: false,
        }
    }

    /// Returns the underlying bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        Ok(())
    }
}

impl ByteStream for MemoryStream {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError> {
        self.ensure_open()?;
        let len = self.data.len() as u64;
        let available = len.saturating_sub(self.pos) as usize;
        let n = dst.len().min(available);
        if n > 0 {
            let start = self.pos as usize;
            dst[..n].copy_from_slice(&self.data[start..start + n]);
        }
        self.pos += n as u64;
        if n == dst.len() {
            Ok((n, ReadStatus::Complete))
        } else {
            Ok((n, ReadStatus::Eof))
        }
    }

    fn seek(&mut self, offset: u64) -> Result<(), StreamError> {
        self.ensure_open()?;
        self.pos = offset;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        self.ensure_open()?;
        Ok(self.pos)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.closed = true;
        Ok(())
    }
}
