use stream::StreamError;

use crate::addr::AddressMap;
use crate::format::Header;

/// Ordered, append-only sequence of parsed headers, in file order.
///
/// Grown lazily as the reader advances or chases headers during a seek.
/// Headers are never mutated after append; recovery patches are applied to a
/// header before it is handed to [`append`](RecordIndex::append).
#[derive(Debug)]
pub(crate) struct RecordIndex {
    headers: Vec<Header>,
    addr: AddressMap,
}

impl RecordIndex {
    pub fn new(addr: AddressMap) -> Self {
        Self {
            headers: Vec::new(),
            addr,
        }
    }

    /// Appends a header that has already passed parsing and recovery checks.
    pub fn append(&mut self, head: Header) -> Result<(), StreamError> {
        self.headers
            .try_reserve(1)
            .map_err(|_| StreamError::Runtime("tape image: unable to store header".to_string()))?;
        self.headers.push(head);
        Ok(())
    }

    pub fn get(&self, pos: usize) -> Header {
        self.headers[pos]
    }

    pub fn last(&self) -> Option<Header> {
        self.headers.last().copied()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Finds the position of the record containing logical offset `n`.
    ///
    /// `hint` is the caller's current position. A real-world access pattern
    /// is many small forward seeks within one record, so the hinted record is
    /// checked before anything else. There are three cases:
    ///
    /// - backwards seek, into a different record
    /// - forward or backwards seek within this record
    /// - forward seek, into a different record
    ///
    /// Past the hint, the lookup runs in two phases. Phase 1 is an
    /// approximating binary search that pretends logical and physical
    /// offsets are the same; since physical >= logical, its result is either
    /// the right record or one before it. Phase 2 is a short linear scan
    /// from there that accounts for the per-record header overhead, which is
    /// only known from an element's *position* in the index.
    ///
    /// The caller must have verified that `n` is covered by the index;
    /// a scan that runs off the end reports a runtime error.
    pub fn find(&self, n: u64, hint: usize) -> Result<usize, StreamError> {
        let end = self.addr.logical(u64::from(self.get(hint).next), hint);
        let in_hint = if hint == 0 {
            n < end
        } else {
            let begin = self.addr.logical(u64::from(self.get(hint - 1).next), hint - 1);
            n > begin && n <= end
        };
        if in_hint {
            return Ok(hint);
        }

        // phase 1
        let lower = self
            .headers
            .partition_point(|h| self.addr.logical(u64::from(h.next), 0) < n);

        // phase 2
        for pos in lower..self.headers.len() {
            if n <= self.addr.logical(u64::from(self.headers[pos].next), pos) {
                return Ok(pos);
            }
        }

        Err(StreamError::Runtime(format!(
            "tape image: offset {} not covered by the record index (last next = {})",
            n,
            self.headers.last().map(|h| h.next).unwrap_or(0),
        )))
    }
}
