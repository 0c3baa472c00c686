//  A rope, deferring concatenation.

use core::{cmp, fmt};

use alloc::{boxed::Box, vec::Vec};

use crate::{error::LoomError, weave::Weave};

/// A rope: a list of chunks, flattened in a single pass on demand.
///
/// Building a string by repeated concatenation copies the prefix over and over, for a total cost quadratic in the
/// number of fragments. A `Cord` instead records each fragment, and only copies them all once, into an exactly
/// sized allocation, when flattened.
///
/// Each chunk is either an owned copy, see `append`, or a reference to memory outliving the `Cord`, see
/// `append_reference`.
#[derive(Clone, Default)]
pub struct Cord<'a> {
    chunks: Vec<Chunk<'a>>,
    //  Sum of the lengths of `chunks`.
    len: usize,
}

impl<'a> Cord<'a> {
    /// Creates a new, empty, `Cord`, without allocating.
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
        }
    }

    /// Returns the total number of bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns an iterator over the chunks, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.chunks.iter().map(Chunk::as_bytes)
    }

    /// Appends a copy of `bytes`.
    ///
    /// Empty appends are ignored. On failure, the `Cord` is left unmodified.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), LoomError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let len = self.grow(bytes.len())?;

        let mut copy = Vec::new();
        copy.try_reserve_exact(bytes.len())?;
        copy.extend_from_slice(bytes);

        self.chunks.push(Chunk::Owned(copy.into_boxed_slice()));
        self.len = len;

        Ok(())
    }

    /// Appends a copy of `string`.
    pub fn append_str(&mut self, string: &str) -> Result<(), LoomError> {
        self.append(string.as_bytes())
    }

    /// Appends a reference to `bytes`, without copying them.
    ///
    /// Empty appends are ignored. On failure, the `Cord` is left unmodified.
    pub fn append_reference(&mut self, bytes: &'a [u8]) -> Result<(), LoomError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let len = self.grow(bytes.len())?;

        self.chunks.push(Chunk::Borrowed(bytes));
        self.len = len;

        Ok(())
    }

    /// Removes all chunks, keeping the capacity of the chunk list.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Flattens the chunks into a single vector.
    ///
    /// #   Complexity
    ///
    /// Exactly `len()` bytes are allocated, once, then each chunk is copied in order.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LoomError> {
        self.flatten(0)
    }

    /// Flattens the chunks into a single, owned, `Weave`.
    ///
    /// #   Complexity
    ///
    /// As `to_bytes`, with one more byte for the NUL terminator.
    pub fn to_weave(&self) -> Result<Weave<'static>, LoomError> {
        Weave::from_vec(self.flatten(1)?)
    }
}

impl fmt::Debug for Cord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Cord")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Displays the flattened bytes, replacing invalid UTF-8 sequences.
///
/// Chunk boundaries may split a UTF-8 sequence, hence the chunks are flattened first.
impl fmt::Display for Cord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let flattened = self.to_weave().map_err(|_| fmt::Error)?;

        fmt::Display::fmt(&flattened, f)
    }
}

//
//  Implementation
//

const MIN_CHUNKS: usize = 4;

#[derive(Clone)]
enum Chunk<'a> {
    Owned(Box<[u8]>),
    Borrowed(&'a [u8]),
}

impl Chunk<'_> {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Borrowed(bytes) => bytes,
        }
    }
}

impl Cord<'_> {
    //  Ensures room for one more chunk of `additional` bytes, returning the new total length.
    //
    //  The chunk list grows by about 1.5x.
    fn grow(&mut self, additional: usize) -> Result<usize, LoomError> {
        let len = self.len.checked_add(additional).ok_or(LoomError::MemoryExhausted)?;

        let (count, capacity) = (self.chunks.len(), self.chunks.capacity());

        if count == capacity {
            let target = cmp::max(MIN_CHUNKS, capacity + capacity / 2);

            self.chunks.try_reserve_exact(target - count)?;
        }

        Ok(len)
    }

    //  Copies all chunks, in order, into a vector with room for `spare` more bytes.
    fn flatten(&self, spare: usize) -> Result<Vec<u8>, LoomError> {
        let capacity = self.len.checked_add(spare).ok_or(LoomError::MemoryExhausted)?;

        let mut result = Vec::new();
        result.try_reserve_exact(capacity)?;

        for chunk in &self.chunks {
            result.extend_from_slice(chunk.as_bytes());
        }

        debug_assert_eq!(self.len, result.len());

        Ok(result)
    }
}

// mod tests
