//  A bump allocator over a list of separately allocated chunks.

use core::{
    alloc::Layout,
    cmp, fmt,
    ptr::{self, NonNull},
    slice, str,
    sync::atomic::{AtomicU32, Ordering},
};

use alloc::{alloc as raw, vec::Vec};

use tracing::{debug, trace};

use crate::error::LoomError;

/// A bump allocator.
///
/// Memory is carved out of chunks, each chunk being allocated separately and never moved nor resized. This means that
/// an allocation never moves once issued, for as long as it is not reclaimed.
///
/// Allocations cannot be freed individually, reclamation only occurs:
///
/// -   When closing a temporary scope without committing it, see `temp_begin` and `temp_end`.
/// -   When resetting the arena, see `reset`.
/// -   When dropping the arena.
pub struct Arena {
    chunks: Vec<Chunk>,
    chunk_size: usize,
    //  Distinguishes the marks of this arena from those of other arenas.
    identity: u32,
    //  Number of currently open marks.
    depth: u32,
    //  Bumped on each reset, invalidating outstanding marks.
    epoch: u32,
}

impl Arena {
    /// The default size of a chunk, in bytes.
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;

    /// Creates a new, empty, arena.
    ///
    /// No memory is allocated until the first allocation. Chunks are at least `chunk_size` bytes, or 1 byte if
    /// `chunk_size` is 0.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = cmp::max(chunk_size, 1);

        Self {
            chunks: Vec::new(),
            chunk_size,
            identity: fresh_identity(),
            depth: 0,
            epoch: 0,
        }
    }

    /// Returns the minimum size of a chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Allocates `n` zero-initialized bytes.
    ///
    /// Bytes reclaimed by `temp_end` or `reset` are zeroed anew before being handed out again.
    ///
    /// If the current chunk has insufficient room left, a new chunk of `max(chunk_size, n)` bytes is linked and becomes
    /// current; the tail of the previous chunk is left unused.
    ///
    /// On failure, the arena is left unmodified.
    pub fn alloc(&mut self, n: usize) -> Result<&mut [u8], LoomError> {
        if n == 0 {
            return Ok(&mut []);
        }

        let fits = self.chunks.last().is_some_and(|chunk| chunk.remaining() >= n);

        if !fits {
            self.link(n)?;
        }

        let chunk = self.chunks.last_mut().ok_or(LoomError::MemoryExhausted)?;

        debug_assert!(chunk.remaining() >= n);

        //  Safety:
        //  -   `n <= chunk.remaining()`, as the chunk was either checked, or freshly allocated with at least `n` bytes.
        let bytes = unsafe { chunk.bump(n) };

        Ok(bytes)
    }

    /// Allocates a copy of `bytes`.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<&mut [u8], LoomError> {
        let copy = self.alloc(bytes.len())?;

        copy.copy_from_slice(bytes);

        Ok(copy)
    }

    /// Allocates a copy of `string`.
    pub fn alloc_str(&mut self, string: &str) -> Result<&mut str, LoomError> {
        let copy = self.alloc_bytes(string.as_bytes())?;

        //  Safety:
        //  -   `copy` is a byte for byte copy of `string`, hence valid UTF-8.
        let copy = unsafe { str::from_utf8_unchecked_mut(copy) };

        Ok(copy)
    }

    /// Opens a temporary scope, returning its `Mark`.
    ///
    /// Marks nest: each must be closed with either `temp_end` or `temp_commit`, innermost first.
    pub fn temp_begin(&mut self) -> Mark {
        self.depth += 1;

        Mark {
            chunks: self.chunks.len(),
            used: self.chunks.last().map_or(0, |chunk| chunk.used),
            identity: self.identity,
            depth: self.depth,
            epoch: self.epoch,
        }
    }

    /// Closes the temporary scope opened by `mark`, reclaiming all allocations performed since.
    ///
    /// All chunks linked since `mark` are freed, and the used offset of the marked chunk is rewound, restoring the exact
    /// state of the arena at the time of `temp_begin`.
    ///
    /// Returns an error, without modifying the arena, if `mark` was opened by another arena, if it is not the innermost
    /// open mark, or if the arena was reset since it was opened.
    pub fn temp_end(&mut self, mark: Mark) -> Result<(), LoomError> {
        self.check(&mark)?;

        let released = self.chunks.len() - mark.chunks;

        self.chunks.truncate(mark.chunks);

        if let Some(chunk) = self.chunks.last_mut() {
            chunk.rewind(mark.used);
        }

        self.depth -= 1;

        trace!(depth = mark.depth, released, "arena scope closed");

        Ok(())
    }

    /// Closes the temporary scope opened by `mark`, keeping all allocations performed since.
    ///
    /// Returns an error, without modifying the arena, under the same conditions as `temp_end`.
    pub fn temp_commit(&mut self, mark: Mark) -> Result<(), LoomError> {
        self.check(&mark)?;

        self.depth -= 1;

        Ok(())
    }

    /// Reclaims all allocations at once.
    ///
    /// All chunks but the first are freed, the first chunk is retained for further allocations. All outstanding marks
    /// are invalidated.
    pub fn reset(&mut self) {
        let released = self.chunks.len().saturating_sub(1);

        self.chunks.truncate(1);

        if let Some(chunk) = self.chunks.first_mut() {
            chunk.rewind(0);
        }

        self.depth = 0;
        self.epoch = self.epoch.wrapping_add(1);

        debug!(released, "arena reset");
    }

    /// Returns the statistics of the arena.
    pub fn stats(&self) -> ArenaStats {
        let allocated = self.chunks.iter().map(|chunk| chunk.used).sum();
        let capacity = self.chunks.iter().map(|chunk| chunk.capacity).sum();

        ArenaStats {
            allocated,
            capacity,
            chunks: self.chunks.len(),
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHUNK_SIZE)
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Arena")
            .field("chunk_size", &self.chunk_size)
            .field("depth", &self.depth)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A snapshot of the position of an `Arena`, opening a temporary scope.
#[must_use = "a temporary scope must be closed with `Arena::temp_end` or `Arena::temp_commit`"]
#[derive(Debug, Eq, PartialEq)]
pub struct Mark {
    chunks: usize,
    used: usize,
    identity: u32,
    depth: u32,
    epoch: u32,
}

/// Statistics of an `Arena`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ArenaStats {
    /// Number of bytes handed out by `alloc`, and not yet reclaimed.
    pub allocated: usize,
    /// Number of bytes held by all chunks.
    pub capacity: usize,
    /// Number of chunks.
    pub chunks: usize,
}

//
//  Implementation
//

const CHUNK_ALIGN: usize = 16;

//  Identities are drawn from a process-wide pool, wrapping around after 2^32 arenas.
//
//  A wrapped identity only weakens the detection of foreign marks, `check` still refuses any mark pointing past the
//  current state of the arena.
fn fresh_identity() -> u32 {
    static POOL: AtomicU32 = AtomicU32::new(0);

    POOL.fetch_add(1, Ordering::Relaxed)
}

impl Arena {
    //  Checks that `mark` is the innermost open mark of this arena, and that it does not point past its current state.
    fn check(&self, mark: &Mark) -> Result<(), LoomError> {
        if mark.identity != self.identity || mark.epoch != self.epoch || mark.depth != self.depth {
            return Err(LoomError::MarkMismatch);
        }

        if mark.chunks > self.chunks.len() {
            return Err(LoomError::MarkMismatch);
        }

        let used = match mark.chunks.checked_sub(1) {
            Some(index) => self.chunks[index].used,
            None => 0,
        };

        if mark.used > used {
            return Err(LoomError::MarkMismatch);
        }

        Ok(())
    }

    //  Links a new chunk able to hold at least `n` bytes.
    fn link(&mut self, n: usize) -> Result<(), LoomError> {
        let capacity = cmp::max(self.chunk_size, n);

        self.chunks.try_reserve(1)?;

        let chunk = Chunk::allocate(capacity)?;

        self.chunks.push(chunk);

        debug!(capacity, chunks = self.chunks.len(), "arena chunk linked");

        Ok(())
    }
}

struct Chunk {
    memory: NonNull<u8>,
    capacity: usize,
    used: usize,
}

impl Chunk {
    //  Allocates a zeroed chunk of `capacity` bytes.
    fn allocate(capacity: usize) -> Result<Self, LoomError> {
        debug_assert!(capacity > 0);

        let layout = Self::layout(capacity)?;

        //  Safety:
        //  -   `layout` has a non-zero size.
        let memory = unsafe { raw::alloc_zeroed(layout) };

        let memory = NonNull::new(memory).ok_or(LoomError::MemoryExhausted)?;

        Ok(Self {
            memory,
            capacity,
            used: 0,
        })
    }

    fn layout(capacity: usize) -> Result<Layout, LoomError> {
        Layout::from_size_align(capacity, CHUNK_ALIGN).map_err(|_| LoomError::MemoryExhausted)
    }

    fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    //  Rewinds the used offset to `used`, zeroing the reclaimed bytes.
    fn rewind(&mut self, used: usize) {
        debug_assert!(used <= self.used);

        let used = cmp::min(used, self.used);

        //  Safety:
        //  -   `used <= self.used <= self.capacity`, hence the range `used..self.used` is within the allocation.
        //  -   The reclaimed bytes are no longer borrowed, as rewinding requires `&mut Arena`.
        unsafe { ptr::write_bytes(self.memory.as_ptr().add(used), 0, self.used - used) };

        self.used = used;
    }

    //  Carves the next `n` bytes out of the chunk.
    //
    //  #   Safety
    //
    //  -   `n` must be less than or equal to `self.remaining()`.
    unsafe fn bump(&mut self, n: usize) -> &mut [u8] {
        debug_assert!(n <= self.remaining());

        //  Safety:
        //  -   `self.used + n <= self.capacity`, hence within the allocation.
        let pointer = unsafe { self.memory.as_ptr().add(self.used) };

        self.used += n;

        //  Safety:
        //  -   `pointer` is valid for reads and writes of `n` bytes, within the allocation.
        //  -   `pointer` points to `n` initialized bytes, as chunks are zeroed on allocation and on rewind.
        //  -   The bytes are not handed out again until rewound, which requires `&mut Arena`, ending the borrow.
        unsafe { slice::from_raw_parts_mut(pointer, n) }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        //  The layout was valid at allocation time, and `capacity` has not changed since.
        let Ok(layout) = Self::layout(self.capacity) else { return };

        //  Safety:
        //  -   `self.memory` was allocated by the global allocator with this `layout`, and not deallocated since.
        unsafe { raw::dealloc(self.memory.as_ptr(), layout) }
    }
}

//  Safety:
//  -   A chunk uniquely owns its memory, and only hands out access to it through `&mut self`.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

// mod tests
