//  Identity of a `Tablet`, and of the strings it interned.

use core::{
    fmt,
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::error::LoomError;

/// A `Generation` uniquely identifies a `Tablet`, unless `new_unchecked` is used to create it.
///
/// Generations are drawn from a process-wide pool and never reused, so that a `Handle` outliving its `Tablet` cannot
/// be mistaken for a `Handle` of a later `Tablet`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Generation(NonZeroU32);

impl Generation {
    /// Creates a new instance, with a guaranteed fresh new generation.
    ///
    /// Only 2^32 - 2 instances can be created by this method during the lifetime of the process, after which it
    /// fails unconditionally.
    pub fn new() -> Result<Self, LoomError> {
        static POOL: AtomicU32 = AtomicU32::new(0);

        let previous = POOL
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current < Self::MAX - 1).then_some(current + 1)
            })
            .map_err(|_| LoomError::GenerationsExhausted)?;

        NonZeroU32::new(previous + 1)
            .map(Self)
            .ok_or(LoomError::GenerationsExhausted)
    }

    /// Creates a new instance with the specified generation.
    ///
    /// This instance can then be used to build a `Tablet`, at the risk and perils of the caller: handles of two
    /// `Tablet` sharing a generation can no longer be told apart.
    ///
    /// #   Panics
    ///
    /// If `n` is `Generation::MAX`.
    pub fn new_unchecked(n: NonZeroU32) -> Self {
        assert!(n.get() < Self::MAX);

        Self(n)
    }

    /// Returns the raw value.
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    //  Values at or above are reserved.
    const MAX: u32 = u32::MAX;
}

/// A `Handle` uniquely identifies an interned slice of bytes.
///
/// #   Tied to the `Tablet` instance.
///
/// A `Handle` is only meaningful for the `Tablet` instance which created it; using it with any other instance is
/// reported as `LoomError::HandleMismatch`.
///
/// Two handles from the same `Tablet` are equal if and only if they denote the same bytes.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Handle {
    offset: Offset,
    generation: Generation,
}

//  Public methods
impl Handle {
    /// Returns the `Generation` of the `Tablet` which created this instance.
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

//  Crate methods
impl Handle {
    /// Creates a new instance.
    pub(crate) fn new(offset: Offset, generation: Generation) -> Self {
        Self { offset, generation }
    }

    /// Returns the offset of the interned bytes within its `Tablet`.
    pub(crate) fn offset(&self) -> Offset {
        self.offset
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Handle")
            .field("offset", &self.offset.0)
            .field("generation", &self.generation.0)
            .finish()
    }
}

/// A `StrHandle` uniquely identifies an interned string.
///
/// #   Tied to the `Tablet` instance.
///
/// A `StrHandle` is only meaningful for the `Tablet` instance which created it.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct StrHandle(Handle);

//  Public methods
impl StrHandle {
    /// Creates an instance from a `Handle`.
    ///
    /// #   Safety
    ///
    /// The `Handle` must denote a proper UTF-8 encoded slice of bytes.
    pub unsafe fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    /// Returns the `Generation` of the `Tablet` which created this instance.
    pub fn generation(&self) -> Generation {
        self.0.generation
    }

    /// Returns as `Handle`.
    pub fn as_handle(&self) -> Handle {
        self.0
    }
}

impl fmt::Debug for StrHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("StrHandle")
            .field("offset", &self.0.offset.0)
            .field("generation", &self.0.generation.0)
            .finish()
    }
}

/// The 1-based index of an interned slice within its `Tablet`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct Offset(pub NonZeroU32);

impl Offset {
    /// Creates the offset of the `index`-th (0-based) interned slice, if representable.
    pub(crate) fn from_index(index: usize) -> Option<Self> {
        let offset = u32::try_from(index).ok()?.checked_add(1)?;

        NonZeroU32::new(offset).map(Self)
    }

    /// Returns the 0-based index of the interned slice.
    pub(crate) fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

// mod tests
