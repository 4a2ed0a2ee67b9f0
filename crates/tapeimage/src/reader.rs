use std::cmp;
use std::fmt;

use stream::{ByteStream, ReadStatus, StreamError};

use crate::addr::AddressMap;
use crate::format::{Header, HEADER_SIZE};
use crate::head::ReadHead;
use crate::index::RecordIndex;

/// Corruption-recovery state. Transitions are monotone: one recoverable
/// anomaly taints the reader, a second fails it for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Clean,
    Tainted,
    Failed,
}

/// Error returned when [`TapeImage::open`] fails.
///
/// Opening adopts the inner stream, so the failure hands it back to the
/// caller rather than dropping it; modeled on [`std::io::IntoInnerError`].
pub struct OpenError<S> {
    stream: S,
    source: StreamError,
}

impl<S> OpenError<S> {
    /// The error that caused `open` to fail.
    pub fn error(&self) -> &StreamError {
        &self.source
    }

    /// Consumes the error, returning the inner stream that was passed to
    /// [`TapeImage::open`].
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Consumes the error, returning the underlying cause.
    pub fn into_error(self) -> StreamError {
        self.source
    }

    /// Consumes the error, returning both the cause and the stream.
    pub fn into_parts(self) -> (StreamError, S) {
        (self.source, self.stream)
    }
}

impl<S> fmt::Debug for OpenError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenError")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl<S> fmt::Display for OpenError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to open tape image: {}", self.source)
    }
}

impl<S> std::error::Error for OpenError<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A streaming reader for the TapeImage format.
///
/// Presents the record payloads as one contiguous byte sequence: reads skip
/// headers transparently, seeks take logical (header-free) offsets, and
/// `tell` reports logical positions. Headers are parsed on demand and kept
/// in an append-only index so backward seeks never re-read them.
///
/// The reader itself implements [`ByteStream`], so tape images may be
/// nested or stacked under further protocol layers.
///
/// # Corruption recovery
///
/// An unknown header type or an inconsistent back-pointer is patched in
/// memory once; from then on every read reports [`ReadStatus::Tainted`]
/// instead of [`ReadStatus::Complete`] (byte counts are unaffected). A
/// second such anomaly, an incomplete header read, or a header with
/// `next <= prev` is unrecoverable.
#[derive(Debug)]
pub struct TapeImage<S: ByteStream> {
    /// Vacated by `close` and `peel`; all other operations keep it.
    inner: Option<S>,
    addr: AddressMap,
    index: RecordIndex,
    current: ReadHead,
    recovery: Recovery,
}

impl<S: ByteStream> TapeImage<S> {
    /// Adopts `inner` and parses the first record header.
    ///
    /// The stream's current position becomes the tape image's origin, so an
    /// image embedded mid-stream works; a stream that cannot report its
    /// position is assumed to start at offset 0.
    ///
    /// # Errors
    ///
    /// On failure the adopted stream rides back inside the [`OpenError`].
    pub fn open(mut inner: S) -> Result<Self, OpenError<S>> {
        let zero = inner.tell().unwrap_or(0);
        let addr = AddressMap::new(zero);
        let mut reader = TapeImage {
            inner: Some(inner),
            addr,
            index: RecordIndex::new(addr),
            current: ReadHead::default(),
            recovery: Recovery::Clean,
        };
        match reader.read_header_from_disk() {
            Ok(()) => Ok(reader),
            Err(source) => match reader.inner.take() {
                Some(stream) => Err(OpenError { stream, source }),
                // the stream is only surrendered by close() and peel()
                None => unreachable!("inner stream surrendered during open"),
            },
        }
    }

    /// True if the reader is positioned on a file mark.
    pub fn eof(&self) -> bool {
        debug_assert!(!self.index.is_empty());
        self.index.get(self.current.pos()).is_file_mark()
    }

    /// Consumes the reader and surrenders the inner stream, for protocol
    /// restacking.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] if the stream was already closed.
    pub fn peel(mut self) -> Result<S, StreamError> {
        self.inner.take().ok_or(StreamError::Closed)
    }

    /// Borrows the inner stream for inspection, or `None` after `close`.
    pub fn peek(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    fn inner_mut(&mut self) -> Result<&mut S, StreamError> {
        self.inner.as_mut().ok_or(StreamError::Closed)
    }

    /// The accumulation loop behind `read`.
    ///
    /// Loop invariant: `current` is either on a record with payload bytes
    /// remaining, or exhausted and positioned so that the next header is the
    /// next thing to consume.
    fn read_body(&mut self, dst: &mut [u8]) -> Result<usize, StreamError> {
        debug_assert!(!self.index.is_empty());
        let mut nread = 0usize;
        let mut wanted = dst.len();

        loop {
            if self.eof() {
                return Ok(nread);
            }

            if self.current.exhausted() {
                self.next_record()?;
                // the next record may be empty, or a file mark: re-check
                continue;
            }

            let to_read = cmp::min(wanted as u64, self.current.bytes_left()) as usize;
            let fp = self.inner.as_mut().ok_or(StreamError::Closed)?;
            let (n, status) = fp.read(&mut dst[nread..nread + to_read])?;
            self.current.advance(n as u64)?;
            nread += n;

            match status {
                // the source is temporarily blocked or drained: surface the
                // partial result instead of buffering it
                ReadStatus::Incomplete => return Ok(nread),
                ReadStatus::Eof => {
                    if !self.current.exhausted() {
                        // the header declared more bytes than the medium holds
                        return Err(StreamError::UnexpectedEof(format!(
                            "tape image: unexpected EOF inside a record - got {} bytes",
                            nread,
                        )));
                    }
                    return Ok(nread);
                }
                ReadStatus::Complete | ReadStatus::Tainted => {
                    if n < to_read {
                        // short delivery without a status explaining it
                        return Ok(nread);
                    }
                }
            }

            if n == wanted {
                return Ok(nread);
            }
            // The full read was performed but more was requested: move on to
            // the next record.
            wanted -= n;
        }
    }

    /// Advances the read head past an exhausted record: repositions onto the
    /// next indexed record, or parses the next header from disk.
    fn next_record(&mut self) -> Result<(), StreamError> {
        if self.current.pos() + 1 == self.index.len() {
            return self.read_header_from_disk();
        }

        let next = self.current.next_record(&self.index);
        let target = next.tell(&self.index);
        self.inner_mut()?.seek(target)?;
        self.current = next;
        Ok(())
    }

    fn read_header_from_disk(&mut self) -> Result<(), StreamError> {
        let fp = self.inner.as_mut().ok_or(StreamError::Closed)?;
        let head = parse_header(fp, &self.index, &self.addr, &mut self.recovery)?;
        self.append(head)
    }

    /// Appends a vetted header and points the read head at its record.
    fn append(&mut self, head: Header) -> Result<(), StreamError> {
        let body_start = match self.index.last() {
            Some(last) => HEADER_SIZE + u64::from(last.next),
            None => HEADER_SIZE + self.addr.base(),
        };
        let remaining = u64::from(head.next).checked_sub(body_start).ok_or_else(|| {
            StreamError::Fatal(format!(
                "file corrupt: header next (= {}) points inside the previous record (payload starts at {})",
                head.next, body_start,
            ))
        })?;
        self.index.append(head)?;
        self.current = ReadHead::new(self.index.len() - 1, remaining);
        Ok(())
    }

    fn seek_with_index(&mut self, n: u64) -> Result<(), StreamError> {
        let pos = self.index.find(n, self.current.pos())?;
        let target = self.addr.physical(n, pos);
        self.inner_mut()?.seek(target)?;
        self.current = ReadHead::new(pos, u64::from(self.index.get(pos).next) - target);
        Ok(())
    }
}

impl<S: ByteStream> ByteStream for TapeImage<S> {
    /// Reads logical bytes, skipping headers.
    ///
    /// The byte count accumulates across record boundaries; the status is
    /// [`ReadStatus::Tainted`] whenever the reader has patched an anomaly,
    /// [`ReadStatus::Eof`] when the read stopped on a file mark, and
    /// [`ReadStatus::Incomplete`] when the inner stream could not deliver
    /// everything yet.
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), StreamError> {
        if self.recovery == Recovery::Failed {
            return Err(StreamError::FailedRecovery(
                "tape image: reader failed recovery, no further reads possible".to_string(),
            ));
        }

        let n = self.read_body(dst)?;
        debug_assert!(n <= dst.len());

        if self.recovery == Recovery::Tainted {
            return Ok((n, ReadStatus::Tainted));
        }
        if n == dst.len() {
            return Ok((n, ReadStatus::Complete));
        }
        if self.eof() {
            return Ok((n, ReadStatus::Eof));
        }
        Ok((n, ReadStatus::Incomplete))
    }

    /// Seeks to a logical offset.
    ///
    /// Offsets beyond the indexed range grow the index by chasing headers.
    /// Seeking past end-of-file is allowed (as with a plain file), but
    /// `tell` is left undefined there and the next read reports EOF.
    fn seek(&mut self, n: u64) -> Result<(), StreamError> {
        debug_assert!(!self.index.is_empty());

        if n > u64::from(u32::MAX) {
            return Err(StreamError::InvalidArgument(
                "seek offset too large: the tape image format does not support files of 4 GiB or more"
                    .to_string(),
            ));
        }

        let last_pos = self.index.len() - 1;
        let covered = self
            .addr
            .logical(u64::from(self.index.get(last_pos).next), last_pos);
        if n <= covered {
            return self.seek_with_index(n);
        }

        // The target is beyond what has been indexed: chase headers and add
        // them to the index as we go.
        loop {
            let last_pos = self.index.len() - 1;
            let last = self.index.get(last_pos);
            let target = self.addr.physical(n, last_pos);

            if target <= u64::from(last.next) {
                self.inner_mut()?.seek(target)?;
                self.current = ReadHead::new(last_pos, u64::from(last.next) - target);
                return Ok(());
            }

            if last.is_file_mark() {
                self.current = ReadHead::new(last_pos, 0);
                return Ok(());
            }

            self.inner_mut()?.seek(u64::from(last.next))?;
            self.read_header_from_disk()?;
        }
    }

    /// Reports the logical position of the read head.
    fn tell(&mut self) -> Result<u64, StreamError> {
        debug_assert!(!self.index.is_empty());
        self.inner.as_ref().ok_or(StreamError::Closed)?;

        #[cfg(debug_assertions)]
        if let Some(fp) = self.inner.as_mut() {
            debug_assert_eq!(self.current.tell(&self.index), fp.tell()?);
        }

        Ok(self
            .addr
            .logical(self.current.tell(&self.index), self.current.pos()))
    }

    /// Closes the inner stream. Subsequent calls are no-ops.
    fn close(&mut self) -> Result<(), StreamError> {
        if let Some(mut fp) = self.inner.take() {
            fp.close()?;
        }
        Ok(())
    }
}

/// Reads and vets the next 12-byte header from `fp`.
///
/// Header reads are atomic: an inner-stream `Incomplete` is not retried or
/// buffered. The returned header has passed the recovery checks and may have
/// been patched in memory (`recovery` reflects that).
fn parse_header<S: ByteStream>(
    fp: &mut S,
    index: &RecordIndex,
    addr: &AddressMap,
    recovery: &mut Recovery,
) -> Result<Header, StreamError> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    let (n, status) = fp.read(&mut buf)?;
    match status {
        ReadStatus::Complete => {}
        ReadStatus::Incomplete => {
            return Err(StreamError::FailedRecovery(
                "tape image: incomplete read of record header, recovery not implemented"
                    .to_string(),
            ))
        }
        ReadStatus::Eof => {
            return Err(StreamError::UnexpectedEof(format!(
                "tape image: unexpected EOF when reading header - got {} bytes",
                n,
            )))
        }
        ReadStatus::Tainted => {
            return Err(StreamError::NotImplemented(
                "tape image: unhandled read status when reading header".to_string(),
            ))
        }
    }

    let mut head = Header::parse(&buf);

    let kind_consistent = head.kind == Header::RECORD || head.kind == Header::FILE_MARK;
    if !kind_consistent {
        // Maybe someone wrote the wrong record type by accident, or uses an
        // extension with more record types. If this is the only anomaly in
        // the file, recover by treating it as a data record.
        if *recovery != Recovery::Clean {
            *recovery = Recovery::Failed;
            return Err(StreamError::FailedRecovery(
                "tape image: unknown header type in recovery, file probably corrupt".to_string(),
            ));
        }
        *recovery = Recovery::Tainted;
        head.kind = Header::RECORD;
    }

    if head.next <= head.prev {
        // It is as likely the previous pointer that is broken as this entire
        // header, so there is no reasonable recovery. Files of 4 GiB and
        // more, which the 32-bit offsets cannot represent, also end up here.
        if !kind_consistent {
            return Err(StreamError::Fatal(format!(
                "file corrupt: header type is not 0 or 1, next (= {}) <= prev (= {}), file might be missing data",
                head.next, head.prev,
            )));
        }
        return Err(StreamError::Fatal(format!(
            "file corrupt: next (= {}) <= prev (= {}), file size might be over 4 GiB",
            head.next, head.prev,
        )));
    }

    if index.len() >= 2 {
        // The back pointer disagrees with this header's predecessor. Patch
        // it under the assumption that the *back pointer* is the wrong one,
        // and only in memory; being sure would mean walking the file
        // back-to-front, which the reader does not do.
        let back2 = index.get(index.len() - 2);
        if head.prev != back2.next {
            if *recovery != Recovery::Clean {
                *recovery = Recovery::Failed;
                return Err(StreamError::FailedRecovery(format!(
                    "file corrupt: header prev (= {}) != next of two records back (= {}), anomaly while in recovery, file might be missing data",
                    head.prev, back2.next,
                )));
            }
            *recovery = Recovery::Tainted;
            head.prev = back2.next;
        }
    } else if *recovery != Recovery::Clean && !index.is_empty() {
        // Exactly two headers so far: the second header's prev must point at
        // the first, whose position is the stream origin.
        if u64::from(head.prev) != addr.base() {
            *recovery = Recovery::Failed;
            return Err(StreamError::FailedRecovery(format!(
                "file corrupt: second header prev (= {}) must point at the stream origin (= {}), anomaly while in recovery, file might be missing data",
                head.prev,
                addr.base(),
            )));
        }
    }

    Ok(head)
}
