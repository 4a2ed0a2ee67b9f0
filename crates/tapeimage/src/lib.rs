//! # TapeImage — record-framed stream reader
//!
//! Reads the TapeImage format (TIF): a legacy record-framing container that
//! wraps an arbitrary byte payload in 12-byte headers reminiscent of
//! physical magnetic-tape block markers. The reader hides the framing and
//! presents the payload as one flat byte sequence with reads, seeks, and
//! tells in *logical* (header-free) offsets.
//!
//! ## On-disk layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ HEADER (12 bytes)                                          │
//! │   kind (u32 LE)  0 = record, 1 = file mark                 │
//! │   prev (u32 LE)  physical offset of the previous header    │
//! │   next (u32 LE)  physical offset of the next header        │
//! ├────────────────────────────────────────────────────────────┤
//! │ PAYLOAD (next − header_start − 12 bytes)                   │
//! ├────────────────────────────────────────────────────────────┤
//! │ ... header/payload repeated per record ...                 │
//! ├────────────────────────────────────────────────────────────┤
//! │ FILE MARK (kind = 1, conventionally empty)                 │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! All offsets are absolute within the stream the image starts in; `prev`
//! and `next` are 32-bit, so the format tops out below 4 GiB. End-of-data is
//! a file-mark header — canonically two consecutive file marks at the true
//! end of the medium, though one is enough to stop reads.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stream::{ByteStream, FileStream};
//! use tapeimage::TapeImage;
//!
//! let file = FileStream::open("image.tif").unwrap();
//! let mut tape = TapeImage::open(file).unwrap();
//!
//! let mut buf = [0u8; 4096];
//! let (n, status) = tape.read(&mut buf).unwrap();
//! println!("{} bytes, {:?}", n, status);
//! ```
//!
//! The reader implements [`stream::ByteStream`] itself, so tape images
//! nest: `TapeImage::open(TapeImage::open(inner)?)?` reads an image whose
//! payload is another image.

mod addr;
mod format;
mod head;
mod index;
mod reader;

pub use reader::{OpenError, TapeImage};
pub use stream::{ByteStream, FileStream, MemoryStream, ReadStatus, StreamError};

#[cfg(test)]
mod tests;
