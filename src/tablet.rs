//  Implementation of the `Tablet`.

use core::{fmt, mem, ptr::NonNull, str};

use alloc::vec::Vec;

use tracing::{debug, trace};

use crate::{
    arena::Arena,
    error::LoomError,
    hash::{FxPairHasher, PairHasher},
    id::{Generation, Handle, Offset, StrHandle},
    table::{HashTable, TableBuilder},
    weave::Weave,
};

/// A byte slice and string interner.
///
/// Each distinct slice of bytes is stored exactly once, in an arena owned by the `Tablet`, and identified by a `Handle`.
/// Interning the same bytes twice returns the same `Handle`, hence handles can be compared in O(1) in lieu of the bytes.
///
/// Interned bytes are never moved nor freed until the `Tablet` is dropped.
pub struct Tablet<H = FxPairHasher> {
    table: HashTable<Handle, Canonical, H>,
    //  `entries[handle.offset().index()]` is the canonical copy denoted by `handle`.
    entries: Vec<Canonical>,
    //  Must outlive `table` and `entries`, which point into it.
    arena: Arena,
    generation: Generation,
}

impl<H> Tablet<H> {
    /// Creates a new Tablet, with default configuration.
    ///
    /// This may fail either because the pool of generations is exhausted, or because the initial table cannot be
    /// allocated.
    ///
    /// To customize the Tablet, use the `with()` method instead.
    pub fn new() -> Result<Self, LoomError>
    where
        H: Default,
    {
        Self::with(H::default()).build()
    }

    /// Creates a builder for the Tablet, allowing finer-grained tuning.
    pub fn with(hasher: H) -> TabletBuilder<H> {
        TabletBuilder {
            generation: None,
            hasher,
            capacity: DEFAULT_CAPACITY,
            max_capacity: usize::MAX,
            chunk_size: Arena::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Returns the `Generation` of this instance.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns the number of distinct slices interned.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no slice was interned yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of bytes of memory held, including the arena, the index, and the table.
    pub fn memory(&self) -> usize {
        self.arena.stats().capacity + self.table.memory() + self.entries.capacity() * mem::size_of::<Canonical>()
    }

    /// Gets a previously interned slice of bytes.
    ///
    /// Returns an error if the `handle` is NOT for this instance.
    pub fn get(&self, handle: Handle) -> Result<&[u8], LoomError> {
        if handle.generation() != self.generation {
            return Err(LoomError::HandleMismatch);
        }

        let canonical = self
            .entries
            .get(handle.offset().index())
            .ok_or(LoomError::HandleMismatch)?;

        Ok(canonical.as_ref())
    }

    /// Gets a previously interned string.
    ///
    /// Returns an error if the `handle` is NOT for this instance.
    pub fn get_str(&self, handle: StrHandle) -> Result<&str, LoomError> {
        let bytes = self.get(handle.as_handle())?;

        //  Safety:
        //  -   A `StrHandle` can only be obtained for valid `str`, so `bytes` contains a valid UTF-8 encoded string.
        let string = unsafe { str::from_utf8_unchecked(bytes) };

        Ok(string)
    }

    /// Gets a previously interned slice of bytes, as a read-only `Weave` in `Interned` mode.
    ///
    /// Returns an error if the `handle` is NOT for this instance.
    pub fn weave(&self, handle: Handle) -> Result<Weave<'_>, LoomError> {
        self.get(handle).map(Weave::interned)
    }

    /// Returns an iterator over the interned slices, and their handles, in order of interning.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &[u8])> + '_ {
        let generation = self.generation;

        self.entries.iter().enumerate().filter_map(move |(index, canonical)| {
            let offset = Offset::from_index(index)?;

            Some((Handle::new(offset, generation), canonical.as_ref()))
        })
    }
}

impl<H> Tablet<H>
where
    H: PairHasher,
{
    /// Interns a slice of bytes.
    ///
    /// Returns the `Handle` of the canonical copy of `bytes`, copying them first if never interned before, or an error
    /// if insertion fails. On failure, the `Tablet` is left unmodified.
    pub fn intern(&mut self, bytes: &[u8]) -> Result<Handle, LoomError> {
        if let Some(handle) = self.table.get(bytes) {
            return Ok(*handle);
        }

        let offset = Offset::from_index(self.entries.len()).ok_or(LoomError::TabletExhausted)?;
        let handle = Handle::new(offset, self.generation);

        self.entries.try_reserve(1)?;

        let mark = self.arena.temp_begin();

        let canonical = match self.arena.alloc_bytes(bytes) {
            Ok(copy) => Canonical(NonNull::from(&*copy)),
            Err(error) => {
                self.arena.temp_end(mark)?;
                return Err(error);
            }
        };

        if let Err(error) = self.table.set(canonical, handle, false) {
            self.arena.temp_end(mark)?;
            return Err(error);
        }

        self.arena.temp_commit(mark)?;
        self.entries.push(canonical);

        trace!(offset = offset.0.get(), length = bytes.len(), "interned");

        Ok(handle)
    }

    /// Interns a string.
    ///
    /// Returns the `StrHandle` of the canonical copy of `string`, or an error if insertion fails.
    pub fn intern_str(&mut self, string: &str) -> Result<StrHandle, LoomError> {
        let handle = self.intern(string.as_bytes())?;

        //  Safety:
        //  -   A string was interned.
        let result = unsafe { StrHandle::from_handle(handle) };

        Ok(result)
    }

    /// Returns the `Handle` of `bytes`, if previously interned.
    pub fn lookup(&self, bytes: &[u8]) -> Option<Handle> {
        self.table.get(bytes).copied()
    }

    /// Returns the `StrHandle` of `string`, if previously interned.
    pub fn lookup_str(&self, string: &str) -> Option<StrHandle> {
        let handle = self.lookup(string.as_bytes())?;

        //  Safety:
        //  -   The bytes denoted by `handle` are those of `string`, a valid UTF-8 encoded string.
        Some(unsafe { StrHandle::from_handle(handle) })
    }
}

impl<H> fmt::Debug for Tablet<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{{ generation: {}, arena: {:?}, entries: [", self.generation.get(), self.arena)?;

        for (index, (_, slice)) in self.iter().enumerate() {
            let separator = if index > 0 { ", " } else { "" };

            if let Ok(string) = str::from_utf8(slice) {
                write!(f, "{separator}{string:?}")?;
            } else {
                write!(f, "{separator}{slice:x?}")?;
            }
        }

        write!(f, "] }}")
    }
}

/// A builder for the Tablet.
pub struct TabletBuilder<H> {
    generation: Option<Generation>,
    hasher: H,
    capacity: usize,
    max_capacity: usize,
    chunk_size: usize,
}

impl<H> TabletBuilder<H> {
    /// Sets the generation with which to build the Tablet.
    ///
    /// #   Safety
    ///
    /// The generation is used to tie a `Handle` or `StrHandle` to its matching `Tablet`, the user should ensure that no
    /// `Handle` or `StrHandle` with this `generation` from another `Tablet` are ever used with this instance.
    pub unsafe fn set_generation(&mut self, generation: Generation) -> &mut Self {
        self.generation = Some(generation);
        self
    }

    /// Sets the initial number of slots of the table.
    pub fn set_capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of slots beyond which the table refuses to grow.
    ///
    /// Once reached, interning new slices fails with `LoomError::TableFull`.
    pub fn set_max_capacity(&mut self, capacity: usize) -> &mut Self {
        self.max_capacity = capacity;
        self
    }

    /// Sets the minimum number of bytes of each chunk of the arena.
    pub fn set_chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Attempts to build a Tablet with the current configuration.
    ///
    /// This may fail either because:
    ///
    /// -   No generation was specified, and the pool of generations is exhausted.
    /// -   Or because the table configuration is invalid, or the table cannot be allocated.
    pub fn build(self) -> Result<Tablet<H>, LoomError> {
        let generation = if let Some(generation) = self.generation {
            generation
        } else {
            Generation::new()?
        };

        let table = {
            let mut builder = TableBuilder::new(self.hasher);
            builder.set_capacity(self.capacity).set_max_capacity(self.max_capacity);

            builder.build()?
        };

        let arena = Arena::new(self.chunk_size);

        debug!(generation = generation.get(), capacity = table.capacity(), "tablet built");

        Ok(Tablet {
            table,
            entries: Vec::new(),
            arena,
            generation,
        })
    }
}

#[doc(hidden)]
pub mod compile_tests {

    //  Bad enough it needs to be `pub`, there's really no sense in exposing it any further.
    #![allow(dead_code)]

    /// ```compile_fail,E0277
    /// fn ensure_send<T: Send>() {}
    ///
    /// struct NoSendH(std::rc::Rc<u32>);
    ///
    /// ensure_send::<endor_loom::Tablet<NoSendH>>();
    /// ```
    pub fn tablet_not_send_if_hasher_not_send() {}

    /// ```compile_fail,E0277
    /// fn ensure_sync<T: Sync>() {}
    ///
    /// ensure_sync::<endor_loom::Tablet>();
    /// ```
    pub fn tablet_not_sync() {}
} // mod compile_tests

//
//  Implementation
//

const DEFAULT_CAPACITY: usize = 64;

//  The canonical copy of an interned slice, within the arena of its `Tablet`.
#[derive(Clone, Copy)]
struct Canonical(NonNull<[u8]>);

impl AsRef<[u8]> for Canonical {
    fn as_ref(&self) -> &[u8] {
        //  Safety:
        //  -   The pointer was obtained from a committed allocation of the arena of the `Tablet`, which is neither reset
        //      nor rewound past it, and outlives `self`.
        //  -   The bytes are never mutated after the copy.
        unsafe { self.0.as_ref() }
    }
}

//  Safety:
//  -   `Canonical` is a read-only pointer into the arena of the `Tablet`, which owns it and is moved along with it.
unsafe impl Send for Canonical {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_send<T: Send>() {}

    #[test]
    fn tablet_send() {
        ensure_send::<Tablet>();
    }

    #[test]
    fn intern_round_trip() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let hello = tablet.intern(b"hello").unwrap();
        let world = tablet.intern(b"world").unwrap();

        assert_ne!(hello, world);

        assert_eq!(b"hello", tablet.get(hello).unwrap());
        assert_eq!(b"world", tablet.get(world).unwrap());
    }

    #[test]
    fn intern_empty() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let empty = tablet.intern(b"").unwrap();

        assert_eq!(b"", tablet.get(empty).unwrap());
        assert_eq!(empty, tablet.intern(b"").unwrap());
    }

    #[test]
    fn intern_same_handle() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let first = tablet.intern(b"same").unwrap();
        let second = tablet.intern(&b"same".to_vec()).unwrap();

        assert_eq!(first, second);
        assert_eq!(1, tablet.count());
    }

    #[test]
    fn intern_binary() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let a = tablet.intern(b"a").unwrap();
        let a_nul = tablet.intern(b"a\0").unwrap();

        assert_ne!(a, a_nul);
        assert_eq!(b"a\0", tablet.get(a_nul).unwrap());
    }

    #[test]
    fn intern_count() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        assert!(tablet.is_empty());

        for word in ["a", "b", "a", "c", "b", "a"] {
            tablet.intern(word.as_bytes()).unwrap();
        }

        assert_eq!(3, tablet.count());
    }

    #[test]
    fn intern_many() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let handles: Vec<_> = (0..1_000)
            .map(|i| tablet.intern(format!("word-{i}").as_bytes()).unwrap())
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(format!("word-{i}").as_bytes(), tablet.get(handle).unwrap());
        }
    }

    #[test]
    fn handle_mismatch() {
        let mut one = Tablet::<FxPairHasher>::new().unwrap();
        let mut two = Tablet::<FxPairHasher>::new().unwrap();

        let handle = one.intern(b"one").unwrap();
        two.intern(b"two").unwrap();

        assert_ne!(one.generation(), two.generation());
        assert_eq!(Err(LoomError::HandleMismatch), two.get(handle));
    }

    #[test]
    fn handle_mismatch_shared_generation() {
        let generation = Generation::new().unwrap();

        let mut one = Tablet::with(FxPairHasher::default());
        let mut two = Tablet::with(FxPairHasher::default());

        //  Safety:
        //  -   Deliberately shared, to check bounds.
        unsafe {
            one.set_generation(generation);
            two.set_generation(generation);
        }

        let (mut one, two) = (one.build().unwrap(), two.build().unwrap());

        one.intern(b"a").unwrap();
        let handle = one.intern(b"b").unwrap();

        assert_eq!(Err(LoomError::HandleMismatch), two.get(handle));
    }

    #[test]
    fn intern_str_round_trip() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let handle = tablet.intern_str("Zürich").unwrap();

        assert_eq!("Zürich", tablet.get_str(handle).unwrap());
        assert_eq!(b"Z\xc3\xbcrich", tablet.get(handle.as_handle()).unwrap());
        assert_eq!(tablet.generation(), handle.generation());
    }

    #[test]
    fn lookup_only() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        assert_eq!(None, tablet.lookup(b"absent"));

        let handle = tablet.intern_str("present").unwrap();

        assert_eq!(Some(handle), tablet.lookup_str("present"));
        assert_eq!(Some(handle.as_handle()), tablet.lookup(b"present"));
        assert_eq!(1, tablet.count());
    }

    #[test]
    fn weave_interned() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let handle = tablet.intern(b"woven").unwrap();

        let weave = tablet.weave(handle).unwrap();

        assert_eq!(crate::weave::Mode::Interned, weave.mode());
        assert_eq!(b"woven", weave.as_bytes());
        assert_eq!(tablet.get(handle).unwrap().as_ptr(), weave.as_bytes().as_ptr());
    }

    #[test]
    fn stable_addresses() {
        let mut tablet = Tablet::with(FxPairHasher::default());
        tablet.set_chunk_size(16).set_capacity(4);

        let mut tablet = tablet.build().unwrap();

        let first = tablet.intern(b"first").unwrap();
        let pointer = tablet.get(first).unwrap().as_ptr();

        for i in 0..100 {
            tablet.intern(format!("filler-{i}").as_bytes()).unwrap();
        }

        assert_eq!(pointer, tablet.get(first).unwrap().as_ptr());
    }

    #[test]
    fn full_rolls_back() {
        let mut tablet = Tablet::with(FxPairHasher::default());
        tablet.set_capacity(4).set_max_capacity(4);

        let mut tablet = tablet.build().unwrap();

        tablet.intern(b"a").unwrap();
        tablet.intern(b"b").unwrap();

        let memory = tablet.memory();

        assert_eq!(Err(LoomError::TableFull), tablet.intern(b"c"));

        assert_eq!(2, tablet.count());
        assert_eq!(2, tablet.arena.stats().allocated);
        assert_eq!(None, tablet.lookup(b"c"));
        assert_eq!(memory, tablet.memory());

        //  Already interned slices are still found.
        assert!(tablet.intern(b"a").is_ok());
    }

    #[test]
    fn memory_grows() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let before = tablet.memory();

        tablet.intern(b"memory").unwrap();

        assert!(tablet.memory() > before);
    }

    #[test]
    fn iter_in_order() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        let handles: Vec<_> = ["x", "y", "z"]
            .iter()
            .map(|word| tablet.intern(word.as_bytes()).unwrap())
            .collect();

        let iterated: Vec<_> = tablet.iter().collect();

        assert_eq!(
            vec![(handles[0], &b"x"[..]), (handles[1], &b"y"[..]), (handles[2], &b"z"[..])],
            iterated
        );
    }

    #[test]
    fn debug_entries() {
        let mut tablet = Tablet::<FxPairHasher>::new().unwrap();

        tablet.intern(b"text").unwrap();
        tablet.intern(b"\xff").unwrap();

        let debug = format!("{tablet:?}");

        assert!(debug.ends_with("entries: [\"text\", [ff]] }"), "{debug}");
    }
} // mod tests
