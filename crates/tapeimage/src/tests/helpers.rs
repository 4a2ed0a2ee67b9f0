use std::collections::VecDeque;

use crate::{ByteStream, MemoryStream, ReadStatus, StreamError, TapeImage};

/// Serializes one 12-byte record header.
pub fn header(kind: u32, prev: u32, next: u32) -> [u8; 12] {
    let mut b = [0u8; 12];
    b[0..4].copy_from_slice(&kind.to_le_bytes());
    b[4..8].copy_from_slice(&prev.to_le_bytes());
    b[8..12].copy_from_slice(&next.to_le_bytes());
    b
}

/// Serializes a well-formed tape image that starts at physical offset
/// `zero`, with one record per payload, terminated by `marks` file marks.
pub fn tape_at(zero: u32, payloads: &[&[u8]], marks: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut here = zero;
    // the first record's prev is the stream origin
    let mut prev = zero;

    for p in payloads {
        let next = here + 12 + p.len() as u32;
        out.extend_from_slice(&header(0, prev, next));
        out.extend_from_slice(p);
        prev = here;
        here = next;
    }
    for _ in 0..marks {
        let next = here + 12;
        out.extend_from_slice(&header(1, prev, next));
        prev = here;
        here = next;
    }
    out
}

/// A tape image at origin 0 with a single terminating file mark.
pub fn tape(payloads: &[&[u8]]) -> Vec<u8> {
    tape_at(0, payloads, 1)
}

pub fn open_tape(bytes: Vec<u8>) -> TapeImage<MemoryStream> {
    TapeImage::open(MemoryStream::new(bytes)).expect("tape image must open")
}

/// Caps successive reads to the byte budgets in `caps` (front to back;
/// unlimited once drained), reporting `Incomplete` for reads it cut short.
#[derive(Debug)]
pub struct Throttle<S> {
    inner: S,
    caps: VecDeque<usize>,
}

impl<S> Throttle<S> {
    pub fn new(inner: S, caps: &[usize]) -> Self {
        Self {
            inner,
            caps: caps.iter().copied().collect(),
        }
    }
}

impl<S: ByteStream> ByteStream for Throttle<S> {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError> {
        let cap = self.caps.pop_front().unwrap_or(usize::MAX);
        let n = dst.len().min(cap);
        let (got, status) = self.inner.read(&mut dst[..n])?;
        if got == dst.len() {
            return Ok((got, status));
        }
        if status == ReadStatus::Eof {
            return Ok((got, ReadStatus::Eof));
        }
        Ok((got, ReadStatus::Incomplete))
    }

    fn seek(&mut self, offset: u64) -> Result<(), StreamError> {
        self.inner.seek(offset)
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        self.inner.tell()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.inner.close()
    }
}

/// A stream that cannot report its position.
pub struct NoTell<S>(pub S);

impl<S: ByteStream> ByteStream for NoTell<S> {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError> {
        self.0.read(dst)
    }

    fn seek(&mut self, offset: u64) -> Result<(), StreamError> {
        self.0.seek(offset)
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        Err(StreamError::NotImplemented(
            "position reporting not supported".to_string(),
        ))
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.0.close()
    }
}

/// Reports `Eof` on the read that consumes the last byte, rather than on
/// the following call.
pub struct EagerEof {
    inner: MemoryStream,
    len: u64,
}

impl EagerEof {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            inner: MemoryStream::new(data),
            len,
        }
    }
}

impl ByteStream for EagerEof {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError> {
        let (n, status) = self.inner.read(dst)?;
        if status == ReadStatus::Complete && self.inner.tell()? == self.len {
            return Ok((n, ReadStatus::Eof));
        }
        Ok((n, status))
    }

    fn seek(&mut self, offset: u64) -> Result<(), StreamError> {
        self.inner.seek(offset)
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        self.inner.tell()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.inner.close()
    }
}
