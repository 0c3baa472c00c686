//  A Robin Hood hash table, with a Cuckoo fallback.

use core::{cell::Cell, fmt, iter::FusedIterator, mem, ops::ControlFlow, slice};

use alloc::{boxed::Box, vec::Vec};

use tracing::{debug, trace, warn};

use crate::{
    error::LoomError,
    hash::{Digests, FxPairHasher, PairHasher},
};

/// A hash table mapping byte keys to values.
///
/// #   Design
///
/// The table uses open addressing over a power-of-2 array of slots.
///
/// -   Insertion uses Robin Hood linear probing from the primary home slot of the key: a key travelling further from its
///     home than the resident of a slot steals this slot, and the resident travels on in its stead.
/// -   A key whose probe sequence length (PSL) exceeds `psl_threshold` switches to Cuckoo mode: it restarts probing
///     from its alternate home slot, with a PSL of 0, and may travel at most `cuckoo_limit` slots from there.
/// -   A key exceeding `cuckoo_limit` triggers a resize. Should the resize be impossible, the key is kept in a small
///     overflow area, so that no entry is ever lost.
///
/// Lookups benefit from the Robin Hood ordering: probing stops as soon as a resident is closer to its home than the
/// distance travelled. The Cuckoo window is only probed when at least one entry resides in Cuckoo mode.
///
/// Deletion shifts the following entries backward, so that no tombstone is needed.
///
/// #   Load factor
///
/// The load factor is checked _before_ inserting a new key, and the table grows if inserting it would exceed the
/// configured maximum load factor.
pub struct HashTable<V, K = Box<[u8]>, H = FxPairHasher> {
    slots: Vec<Slot<K, V>>,
    count: usize,
    overflow: Vec<Entry<K, V>>,
    config: TableConfig,
    hasher: H,
    max_psl: u32,
    cuckoo_count: usize,
    resize_count: usize,
    probes: Cell<u64>,
    lookups: Cell<u64>,
}

impl<V, K, H> HashTable<V, K, H>
where
    K: AsRef<[u8]>,
    H: PairHasher,
{
    /// Creates a new table, with default configuration.
    ///
    /// To customize the table, use a `TableBuilder` instead.
    pub fn new() -> Result<Self, LoomError>
    where
        H: Default,
    {
        TableBuilder::new(H::default()).build()
    }

    /// Creates a new table, with room for at least `capacity` slots, and otherwise default configuration.
    pub fn with_capacity(capacity: usize) -> Result<Self, LoomError>
    where
        H: Default,
    {
        let mut builder = TableBuilder::new(H::default());
        builder.set_capacity(capacity);

        builder.build()
    }

    /// Returns a reference to the value associated to `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let digests = self.hasher.digests(key);

        let location = self.locate(key, &digests)?;

        self.entry_at(location).map(|entry| &entry.value)
    }

    /// Returns a mutable reference to the value associated to `key`, if any.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let digests = self.hasher.digests(key);

        let location = self.locate(key, &digests)?;

        self.entry_at_mut(location).map(|entry| &mut entry.value)
    }

    /// Returns whether `key` is present.
    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Associates `value` to `key`.
    ///
    /// If `key` is already present:
    ///
    /// -   If `allow_replace`, the value is replaced, and the previous value is returned. The key itself is kept.
    /// -   Otherwise, `LoomError::KeyExists` is returned, and the table is left untouched.
    ///
    /// If `key` is not present, it is inserted, growing the table as necessary, and `None` is returned.
    ///
    /// Fails with `LoomError::TableFull` if the table cannot grow any further, and with `LoomError::MemoryExhausted`
    /// if growing failed to allocate; in either case the table is left untouched.
    ///
    /// #   Complexity
    ///
    /// Amortized O(1); the call which triggers a resize is O(capacity).
    pub fn set(&mut self, key: K, value: V, allow_replace: bool) -> Result<Option<V>, LoomError> {
        let digests = self.hasher.digests(key.as_ref());

        if let Some(location) = self.locate(key.as_ref(), &digests) {
            if !allow_replace {
                return Err(LoomError::KeyExists);
            }

            if let Some(entry) = self.entry_at_mut(location) {
                return Ok(Some(mem::replace(&mut entry.value, value)));
            }
        }

        let entry = Entry {
            digests,
            psl: 0,
            key,
            value,
        };

        self.insert_new(entry)?;

        Ok(None)
    }

    /// Associates `value` to `key`, replacing any existing value.
    ///
    /// Shorthand for `set(key, value, true)`.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, LoomError> {
        self.set(key, value, true)
    }

    /// Removes `key`, returning its value, if present.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes `key`, returning the stored key and its value, if present.
    pub fn remove_entry(&mut self, key: &[u8]) -> Option<(K, V)> {
        let digests = self.hasher.digests(key);

        let entry = match self.locate(key, &digests)? {
            Location::Slot(index) => self.take_slot(index)?,
            Location::Overflow(index) => self.overflow.swap_remove(index),
        };

        self.count -= 1;

        self.absorb_overflow();

        Some((entry.key, entry.value))
    }

    /// Ensures that `additional` more keys can be inserted without triggering a resize.
    ///
    /// On failure, the table is left untouched.
    pub fn reserve(&mut self, additional: usize) -> Result<(), LoomError> {
        let required = self.count.checked_add(additional).ok_or(LoomError::TableFull)?;

        if self.fits(required, self.capacity()) {
            return Ok(());
        }

        let capacity = self.grown_capacity(required)?;

        self.rebuild(capacity)
    }
}

impl<V, K, H> HashTable<V, K, H> {
    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of bytes used by the slots, excluding any memory owned by keys and values.
    pub fn memory(&self) -> usize {
        self.slots.len() * mem::size_of::<Slot<K, V>>() + self.overflow.len() * mem::size_of::<Entry<K, V>>()
    }

    /// Returns a reference to the pair hasher.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Removes all entries, keeping the capacity.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = Slot::Vacant);
        self.overflow.clear();

        self.count = 0;
        self.cuckoo_count = 0;
    }

    /// Returns an iterator over all entries, in unspecified order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
            overflow: self.overflow.iter(),
        }
    }

    /// Calls `visitor` on each entry, in unspecified order, until it breaks.
    ///
    /// Returns the number of entries visited, including the one on which `visitor` broke, if any.
    pub fn for_each<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        let mut visited = 0;

        for (key, value) in self.iter() {
            visited += 1;

            if visitor(key, value).is_break() {
                break;
            }
        }

        visited
    }

    /// Returns the statistics of the table.
    pub fn stats(&self) -> TableStats {
        let (probes, lookups) = (self.probes.get(), self.lookups.get());

        let average_probes = if lookups == 0 {
            0.0
        } else {
            probes as f64 / lookups as f64
        };

        TableStats {
            count: self.count,
            capacity: self.capacity(),
            max_psl: self.max_psl,
            cuckoo_count: self.cuckoo_count,
            overflow_count: self.overflow.len(),
            resize_count: self.resize_count,
            load_factor: self.count as f64 / self.capacity() as f64,
            average_probes,
        }
    }
}

impl<V, K, H> fmt::Debug for HashTable<V, K, H>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V, K, H> IntoIterator for &'a HashTable<V, K, H> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entries of a `HashTable`.
pub struct Iter<'a, K, V> {
    slots: slice::Iter<'a, Slot<K, V>>,
    overflow: slice::Iter<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.slots
            .by_ref()
            .find_map(Slot::entry)
            .or_else(|| self.overflow.next())
            .map(|entry| (&entry.key, &entry.value))
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// Statistics of a `HashTable`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TableStats {
    /// Number of entries.
    pub count: usize,
    /// Number of slots.
    pub capacity: usize,
    /// Largest PSL ever observed, in either mode.
    pub max_psl: u32,
    /// Number of entries currently residing in Cuckoo mode.
    pub cuckoo_count: usize,
    /// Number of entries currently residing in the overflow area.
    pub overflow_count: usize,
    /// Number of resizes performed.
    pub resize_count: usize,
    /// Ratio of entries to slots.
    pub load_factor: f64,
    /// Average number of slots probed per lookup, since creation.
    pub average_probes: f64,
}

/// A builder for the `HashTable`.
#[derive(Clone, Debug)]
pub struct TableBuilder<H> {
    hasher: H,
    capacity: usize,
    config: TableConfig,
}

impl<H> TableBuilder<H> {
    /// Creates a builder with default configuration, and the specified hasher.
    pub fn new(hasher: H) -> Self {
        Self {
            hasher,
            capacity: MIN_CAPACITY,
            config: TableConfig::default(),
        }
    }

    /// Sets the initial number of slots.
    ///
    /// It is rounded up to the next power of 2, and to at least 4.
    pub fn set_capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Sets the maximum load factor, in percent.
    ///
    /// Valid values are 1 to 95, defaults to 70.
    pub fn set_load_factor(&mut self, percent: u8) -> &mut Self {
        self.config.load_factor = percent;
        self
    }

    /// Sets the factor by which the capacity is multiplied on each resize.
    ///
    /// Must be a power of 2, at least 2, defaults to 2.
    pub fn set_growth_factor(&mut self, factor: usize) -> &mut Self {
        self.config.growth_factor = factor;
        self
    }

    /// Sets the PSL beyond which an entry switches to Cuckoo mode.
    ///
    /// Must be at least 1, defaults to 16.
    pub fn set_psl_threshold(&mut self, threshold: u32) -> &mut Self {
        self.config.psl_threshold = threshold;
        self
    }

    /// Sets the PSL beyond which an entry in Cuckoo mode triggers a resize.
    ///
    /// Must be at least 1, defaults to 16.
    pub fn set_cuckoo_limit(&mut self, limit: u32) -> &mut Self {
        self.config.cuckoo_limit = limit;
        self
    }

    /// Sets the number of slots beyond which the table refuses to grow.
    ///
    /// Defaults to unlimited.
    pub fn set_max_capacity(&mut self, capacity: usize) -> &mut Self {
        self.config.max_capacity = capacity;
        self
    }

    /// Attempts to build a table with the current configuration.
    ///
    /// This may fail either because:
    ///
    /// -   The configuration is invalid.
    /// -   Or because the slots cannot be allocated.
    pub fn build<V, K>(self) -> Result<HashTable<V, K, H>, LoomError> {
        let config = self.config;

        if !(1..=MAX_LOAD_FACTOR).contains(&config.load_factor) {
            return Err(LoomError::InvalidConfiguration("load factor must be within 1..=95"));
        }

        if config.growth_factor < 2 || !config.growth_factor.is_power_of_two() {
            return Err(LoomError::InvalidConfiguration("growth factor must be a power of 2, at least 2"));
        }

        if config.psl_threshold == 0 || config.cuckoo_limit == 0 {
            return Err(LoomError::InvalidConfiguration("probe limits must be at least 1"));
        }

        let capacity = self
            .capacity
            .max(MIN_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(LoomError::InvalidConfiguration("capacity is too large"))?;

        if capacity > config.max_capacity {
            return Err(LoomError::InvalidConfiguration("capacity exceeds maximum capacity"));
        }

        let slots = allocate_slots(capacity)?;

        Ok(HashTable {
            slots,
            count: 0,
            overflow: Vec::new(),
            config,
            hasher: self.hasher,
            max_psl: 0,
            cuckoo_count: 0,
            resize_count: 0,
            probes: Cell::new(0),
            lookups: Cell::new(0),
        })
    }
}

impl<H> Default for TableBuilder<H>
where
    H: Default,
{
    fn default() -> Self {
        Self::new(H::default())
    }
}

//
//  Implementation
//

const MIN_CAPACITY: usize = 4;
const MAX_LOAD_FACTOR: u8 = 95;
//  Number of homeless entries beyond which insertion of new keys is refused.
const OVERFLOW_LIMIT: usize = 4;

#[derive(Clone, Copy, Debug)]
struct TableConfig {
    load_factor: u8,
    growth_factor: usize,
    psl_threshold: u32,
    cuckoo_limit: u32,
    max_capacity: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            load_factor: 70,
            growth_factor: 2,
            psl_threshold: 16,
            cuckoo_limit: 16,
            max_capacity: usize::MAX,
        }
    }
}

//  The mode in which an entry resides, determining which digest its PSL is measured from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Placement {
    Linear,
    Cuckoo,
}

enum Slot<K, V> {
    Vacant,
    Linear(Entry<K, V>),
    Cuckoo(Entry<K, V>),
}

impl<K, V> Slot<K, V> {
    fn new(placement: Placement, entry: Entry<K, V>) -> Self {
        match placement {
            Placement::Linear => Self::Linear(entry),
            Placement::Cuckoo => Self::Cuckoo(entry),
        }
    }

    fn entry(&self) -> Option<&Entry<K, V>> {
        match self {
            Self::Vacant => None,
            Self::Linear(entry) | Self::Cuckoo(entry) => Some(entry),
        }
    }

    fn entry_mut(&mut self) -> Option<&mut Entry<K, V>> {
        match self {
            Self::Vacant => None,
            Self::Linear(entry) | Self::Cuckoo(entry) => Some(entry),
        }
    }

    fn into_entry(self) -> Option<Entry<K, V>> {
        match self {
            Self::Vacant => None,
            Self::Linear(entry) | Self::Cuckoo(entry) => Some(entry),
        }
    }
}

struct Entry<K, V> {
    digests: Digests,
    psl: u32,
    key: K,
    value: V,
}

impl<K, V> Entry<K, V> {
    fn home(&self, placement: Placement) -> usize {
        match placement {
            Placement::Linear => self.digests.primary as usize,
            Placement::Cuckoo => self.digests.alternate as usize,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Location {
    Slot(usize),
    Overflow(usize),
}

fn allocate_slots<K, V>(capacity: usize) -> Result<Vec<Slot<K, V>>, LoomError> {
    let mut slots = Vec::new();

    slots.try_reserve_exact(capacity)?;
    slots.resize_with(capacity, || Slot::Vacant);

    Ok(slots)
}

impl<V, K, H> HashTable<V, K, H>
where
    K: AsRef<[u8]>,
{
    //  Locates `key`: first in Linear mode, then in Cuckoo mode, then in the overflow area.
    fn locate(&self, key: &[u8], digests: &Digests) -> Option<Location> {
        self.lookups.set(self.lookups.get() + 1);

        if let Some(index) = self.probe(key, digests, Placement::Linear) {
            return Some(Location::Slot(index));
        }

        if self.cuckoo_count > 0 {
            if let Some(index) = self.probe(key, digests, Placement::Cuckoo) {
                return Some(Location::Slot(index));
            }
        }

        self.overflow
            .iter()
            .position(|entry| entry.digests == *digests && entry.key.as_ref() == key)
            .map(Location::Overflow)
    }

    //  Probes the window of `placement` for `key`, stopping early on the Robin Hood ordering.
    fn probe(&self, key: &[u8], digests: &Digests, placement: Placement) -> Option<usize> {
        let (home, limit) = match placement {
            Placement::Linear => (digests.primary as usize, self.config.psl_threshold),
            Placement::Cuckoo => (digests.alternate as usize, self.config.cuckoo_limit),
        };

        let mask = self.mask();
        let mut index = home & mask;
        let mut probes = 0;

        let mut result = None;

        for distance in 0..=limit {
            probes += 1;

            let (resident_placement, entry) = match &self.slots[index] {
                Slot::Vacant => break,
                Slot::Linear(entry) => (Placement::Linear, entry),
                Slot::Cuckoo(entry) => (Placement::Cuckoo, entry),
            };

            //  Any entry homed at `home` would have stolen this slot.
            if entry.psl < distance {
                break;
            }

            if resident_placement == placement
                && entry.psl == distance
                && entry.digests == *digests
                && entry.key.as_ref() == key
            {
                result = Some(index);
                break;
            }

            index = (index + 1) & mask;
        }

        self.probes.set(self.probes.get() + probes);

        result
    }
}

impl<V, K, H> HashTable<V, K, H> {
    fn mask(&self) -> usize {
        debug_assert!(self.slots.len().is_power_of_two());

        self.slots.len() - 1
    }

    fn fits(&self, count: usize, capacity: usize) -> bool {
        count.saturating_mul(100) <= capacity.saturating_mul(self.config.load_factor as usize)
    }

    fn entry_at(&self, location: Location) -> Option<&Entry<K, V>> {
        match location {
            Location::Slot(index) => self.slots.get(index)?.entry(),
            Location::Overflow(index) => self.overflow.get(index),
        }
    }

    fn entry_at_mut(&mut self, location: Location) -> Option<&mut Entry<K, V>> {
        match location {
            Location::Slot(index) => self.slots.get_mut(index)?.entry_mut(),
            Location::Overflow(index) => self.overflow.get_mut(index),
        }
    }

    //  Inserts an entry whose key is known to be absent.
    fn insert_new(&mut self, entry: Entry<K, V>) -> Result<(), LoomError> {
        let crowded = !self.fits(self.count + 1, self.capacity());

        if crowded || self.overflow.len() >= OVERFLOW_LIMIT {
            let capacity = self.grown_capacity(self.count + 1)?;

            self.rebuild(capacity)?;
        }

        if self.overflow.len() >= OVERFLOW_LIMIT {
            warn!(count = self.count, capacity = self.capacity(), "overflow area full, refusing insertion");

            return Err(LoomError::TableFull);
        }

        self.overflow.try_reserve(1)?;

        self.count += 1;

        let Err(homeless) = self.place(entry, Placement::Linear) else { return Ok(()) };

        //  The probing window is exhausted: stash the entry, then attempt to make room for it.
        self.overflow.push(homeless);

        let grown = self
            .grown_capacity(self.count)
            .and_then(|capacity| self.rebuild(capacity));

        if let Err(error) = grown {
            warn!(
                %error,
                count = self.count,
                capacity = self.capacity(),
                overflow = self.overflow.len(),
                "could not grow, entry kept in overflow"
            );
        }

        Ok(())
    }

    //  Places `entry` in the slots, Robin Hood style, stealing from the rich.
    //
    //  Returns the entry left homeless, if any, which may not be `entry` itself.
    fn place(&mut self, mut entry: Entry<K, V>, mut placement: Placement) -> Result<(), Entry<K, V>> {
        let mask = self.mask();
        let mut index = entry.home(placement) & mask;

        loop {
            let slot = &mut self.slots[index];

            let steal = match slot.entry() {
                None => true,
                Some(resident) => entry.psl > resident.psl,
            };

            if steal {
                self.max_psl = self.max_psl.max(entry.psl);

                if placement == Placement::Cuckoo {
                    self.cuckoo_count += 1;
                }

                match mem::replace(slot, Slot::new(placement, entry)) {
                    Slot::Vacant => return Ok(()),
                    Slot::Linear(displaced) => (placement, entry) = (Placement::Linear, displaced),
                    Slot::Cuckoo(displaced) => {
                        self.cuckoo_count -= 1;

                        (placement, entry) = (Placement::Cuckoo, displaced);
                    }
                }
            }

            entry.psl += 1;
            index = (index + 1) & mask;

            match placement {
                Placement::Linear if entry.psl > self.config.psl_threshold => {
                    trace!(psl = entry.psl, "switching to cuckoo mode");

                    placement = Placement::Cuckoo;
                    entry.psl = 0;
                    index = entry.home(placement) & mask;
                }
                Placement::Cuckoo if entry.psl > self.config.cuckoo_limit => return Err(entry),
                Placement::Linear | Placement::Cuckoo => (),
            }
        }
    }

    //  Removes the entry at `index`, shifting the following entries backward.
    fn take_slot(&mut self, index: usize) -> Option<Entry<K, V>> {
        let mask = self.mask();

        let removed = mem::replace(&mut self.slots[index], Slot::Vacant);

        if let Slot::Cuckoo(_) = removed {
            self.cuckoo_count -= 1;
        }

        let mut hole = index;

        loop {
            let next = (hole + 1) & mask;

            let shift = self.slots[next].entry().is_some_and(|entry| entry.psl > 0);

            if !shift {
                break;
            }

            let mut moved = mem::replace(&mut self.slots[next], Slot::Vacant);

            if let Some(entry) = moved.entry_mut() {
                entry.psl -= 1;
            }

            self.slots[hole] = moved;
            hole = next;
        }

        removed.into_entry()
    }

    //  Attempts to move the entries of the overflow area back into the slots.
    fn absorb_overflow(&mut self) {
        if self.overflow.is_empty() {
            return;
        }

        let pending = mem::take(&mut self.overflow);

        for mut entry in pending {
            entry.psl = 0;

            if let Err(homeless) = self.place(entry, Placement::Linear) {
                self.overflow.push(homeless);
            }
        }
    }

    //  Computes the capacity after growth, enough to hold `count` entries.
    fn grown_capacity(&self, count: usize) -> Result<usize, LoomError> {
        let mut capacity = self.capacity();

        loop {
            capacity = capacity
                .checked_mul(self.config.growth_factor)
                .filter(|capacity| *capacity <= self.config.max_capacity)
                .ok_or_else(|| {
                    warn!(
                        capacity = self.capacity(),
                        max_capacity = self.config.max_capacity,
                        "maximum capacity reached"
                    );

                    LoomError::TableFull
                })?;

            if self.fits(count, capacity) {
                return Ok(capacity);
            }
        }
    }

    //  Moves all entries into a fresh array of `capacity` slots.
    //
    //  The array is allocated first: on failure, the table is left untouched.
    fn rebuild(&mut self, capacity: usize) -> Result<(), LoomError> {
        debug_assert!(capacity.is_power_of_two());

        let slots = allocate_slots(capacity)?;

        let previous = mem::replace(&mut self.slots, slots);
        let pending = mem::take(&mut self.overflow);

        self.cuckoo_count = 0;
        self.resize_count += 1;

        for mut entry in previous.into_iter().filter_map(Slot::into_entry).chain(pending) {
            entry.psl = 0;

            if let Err(homeless) = self.place(entry, Placement::Linear) {
                self.overflow.push(homeless);
            }
        }

        debug!(
            capacity,
            count = self.count,
            cuckoo = self.cuckoo_count,
            overflow = self.overflow.len(),
            "hash table resized"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Table<V> = HashTable<V>;

    fn key(s: &str) -> Box<[u8]> {
        s.as_bytes().into()
    }

    //  All keys share the same primary home.
    #[derive(Clone, Copy, Debug, Default)]
    struct SamePrimary;

    impl PairHasher for SamePrimary {
        fn digests(&self, bytes: &[u8]) -> Digests {
            let alternate = FxPairHasher::default().digests(bytes).alternate;

            Digests { primary: 0, alternate }
        }
    }

    //  All keys share the same homes, in both modes.
    #[derive(Clone, Copy, Debug, Default)]
    struct SameHomes;

    impl PairHasher for SameHomes {
        fn digests(&self, _: &[u8]) -> Digests {
            Digests {
                primary: 0,
                alternate: 0,
            }
        }
    }

    //  Checks the structural invariants of the table.
    #[track_caller]
    fn assert_invariants<V, K, H>(table: &HashTable<V, K, H>) {
        let mask = table.mask();

        let mut occupied = 0;
        let mut cuckoo = 0;

        for (index, slot) in table.slots.iter().enumerate() {
            let (placement, entry) = match slot {
                Slot::Vacant => continue,
                Slot::Linear(entry) => (Placement::Linear, entry),
                Slot::Cuckoo(entry) => (Placement::Cuckoo, entry),
            };

            occupied += 1;

            let limit = match placement {
                Placement::Linear => table.config.psl_threshold,
                Placement::Cuckoo => {
                    cuckoo += 1;
                    table.config.cuckoo_limit
                }
            };

            assert!(entry.psl <= limit, "{index}: {} > {limit}", entry.psl);
            assert_eq!(entry.home(placement) & mask, index.wrapping_sub(entry.psl as usize) & mask, "{index}");

            //  Robin Hood ordering: the next entry is at most one step further from its home.
            let next = table.slots[(index + 1) & mask].entry();

            if let Some(next) = next {
                assert!(next.psl <= entry.psl + 1, "{index}: {} > {} + 1", next.psl, entry.psl);
            }
        }

        for (index, slot) in table.slots.iter().enumerate() {
            if let (Slot::Vacant, Some(next)) = (slot, table.slots[(index + 1) & mask].entry()) {
                assert_eq!(0, next.psl, "{index}");
            }
        }

        assert_eq!(table.count, occupied + table.overflow.len());
        assert_eq!(table.cuckoo_count, cuckoo);
    }

    fn ensure_send<T: Send>() {}

    #[test]
    fn table_send() {
        ensure_send::<Table<u32>>();
    }

    #[test]
    fn build_default() {
        let table: Table<u32> = HashTable::new().unwrap();

        assert_eq!(0, table.len());
        assert_eq!(MIN_CAPACITY, table.capacity());
    }

    #[test]
    fn build_rounds_capacity() {
        let table: Table<u32> = HashTable::with_capacity(100).unwrap();

        assert_eq!(128, table.capacity());
    }

    #[test]
    fn build_invalid() {
        let invalid = |configure: fn(&mut TableBuilder<FxPairHasher>)| {
            let mut builder = TableBuilder::<FxPairHasher>::default();
            configure(&mut builder);

            builder.build::<u32, Box<[u8]>>().unwrap_err()
        };

        assert!(matches!(invalid(|b| { b.set_load_factor(0); }), LoomError::InvalidConfiguration(_)));
        assert!(matches!(invalid(|b| { b.set_load_factor(96); }), LoomError::InvalidConfiguration(_)));
        assert!(matches!(invalid(|b| { b.set_growth_factor(3); }), LoomError::InvalidConfiguration(_)));
        assert!(matches!(invalid(|b| { b.set_psl_threshold(0); }), LoomError::InvalidConfiguration(_)));
        assert!(matches!(invalid(|b| { b.set_cuckoo_limit(0); }), LoomError::InvalidConfiguration(_)));
        assert!(matches!(
            invalid(|b| {
                b.set_capacity(64).set_max_capacity(32);
            }),
            LoomError::InvalidConfiguration(_)
        ));
    }

    #[test]
    fn set_get() {
        let mut table = Table::new().unwrap();

        assert_eq!(None, table.set(key("one"), 1, false).unwrap());
        assert_eq!(None, table.set(key("two"), 2, false).unwrap());

        assert_eq!(Some(&1), table.get(b"one"));
        assert_eq!(Some(&2), table.get(b"two"));
        assert_eq!(None, table.get(b"three"));

        assert!(table.has(b"one"));
        assert!(!table.has(b"three"));

        assert_invariants(&table);
    }

    #[test]
    fn set_empty_key() {
        let mut table = Table::new().unwrap();

        table.insert(key(""), 0).unwrap();

        assert_eq!(Some(&0), table.get(b""));
    }

    #[test]
    fn set_exists() {
        let mut table = Table::new().unwrap();

        table.set(key("one"), 1, false).unwrap();

        assert_eq!(Err(LoomError::KeyExists), table.set(key("one"), 2, false));
        assert_eq!(Some(&1), table.get(b"one"));
        assert_eq!(1, table.len());
    }

    #[test]
    fn set_replace() {
        let mut table = Table::new().unwrap();

        table.set(key("one"), 1, true).unwrap();

        assert_eq!(Some(1), table.set(key("one"), 11, true).unwrap());
        assert_eq!(Some(&11), table.get(b"one"));
        assert_eq!(1, table.len());
    }

    #[test]
    fn set_resizes_before_threshold() {
        let mut builder = TableBuilder::<FxPairHasher>::default();
        builder.set_capacity(4);

        let mut table: Table<u32> = builder.build().unwrap();

        table.insert(key("a"), 1).unwrap();
        table.insert(key("b"), 2).unwrap();

        assert_eq!(4, table.capacity());
        assert_eq!(0, table.stats().resize_count);

        table.insert(key("c"), 3).unwrap();

        assert_eq!(8, table.capacity());
        assert_eq!(1, table.stats().resize_count);

        assert_eq!(Some(&2), table.get(b"b"));
        assert_eq!(3, table.len());
    }

    #[test]
    fn get_mut_updates() {
        let mut table = Table::new().unwrap();

        table.insert(key("counter"), 0).unwrap();

        *table.get_mut(b"counter").unwrap() += 5;

        assert_eq!(Some(&5), table.get(b"counter"));
        assert_eq!(None, table.get_mut(b"missing"));
    }

    #[test]
    fn remove_shifts_backward() {
        let mut table = Table::new().unwrap();

        let keys: Vec<_> = (0..200).map(|i| format!("key-{i}")).collect();

        for (i, k) in keys.iter().enumerate() {
            table.insert(key(k), i).unwrap();
        }

        for (i, k) in keys.iter().enumerate().step_by(3) {
            assert_eq!(Some(i), table.remove(k.as_bytes()));
            assert_eq!(None, table.remove(k.as_bytes()));
        }

        assert_invariants(&table);

        for (i, k) in keys.iter().enumerate() {
            let expected = if i % 3 == 0 { None } else { Some(&i) };

            assert_eq!(expected, table.get(k.as_bytes()), "{k}");
        }

        assert_eq!(200 - 67, table.len());
    }

    #[test]
    fn remove_entry_returns_key() {
        let mut table = Table::new().unwrap();

        table.insert(key("k"), 'v').unwrap();

        let (k, v) = table.remove_entry(b"k").unwrap();

        assert_eq!(b"k", &*k);
        assert_eq!('v', v);
        assert!(table.is_empty());
    }

    #[test]
    fn cuckoo_fallback() {
        let mut builder = TableBuilder::new(SamePrimary);
        builder.set_capacity(64).set_psl_threshold(2);

        let mut table: HashTable<usize, Box<[u8]>, SamePrimary> = builder.build().unwrap();

        for i in 0..10 {
            table.insert(key(&format!("{i}")), i).unwrap();
        }

        assert_invariants(&table);

        let stats = table.stats();

        assert_eq!(10, stats.count);
        assert_eq!(0, stats.resize_count);

        //  At most 3 entries fit within PSL 2 of slot 0.
        assert!(stats.cuckoo_count >= 7, "{stats:?}");

        for i in 0..10 {
            assert_eq!(Some(&i), table.get(format!("{i}").as_bytes()), "{i}");
        }

        assert_eq!(None, table.get(b"10"));

        for i in (0..10).step_by(2) {
            assert_eq!(Some(i), table.remove(format!("{i}").as_bytes()), "{i}");

            assert_invariants(&table);
        }

        for i in (1..10).step_by(2) {
            assert_eq!(Some(&i), table.get(format!("{i}").as_bytes()), "{i}");
        }
    }

    #[test]
    fn overflow_when_capped() {
        let mut builder = TableBuilder::new(SameHomes);
        builder.set_capacity(64).set_max_capacity(64).set_psl_threshold(2).set_cuckoo_limit(2);

        let mut table: HashTable<usize, Box<[u8]>, SameHomes> = builder.build().unwrap();

        //  3 entries fit in Linear mode, the next 4 are homeless.
        for i in 0..7 {
            table.insert(key(&format!("{i}")), i).unwrap();

            assert_invariants(&table);
        }

        let stats = table.stats();

        assert_eq!(7, stats.count);
        assert_eq!(64, stats.capacity);
        assert_eq!(4, stats.overflow_count);

        assert_eq!(Err(LoomError::TableFull), table.insert(key("7"), 7));
        assert_eq!(7, table.len());

        //  Replacing an existing key still works.
        assert_eq!(Some(6), table.insert(key("6"), 60).unwrap());

        for i in 0..6 {
            assert_eq!(Some(&i), table.get(format!("{i}").as_bytes()), "{i}");
        }

        assert_eq!(Some(&60), table.get(b"6"));

        //  Removing a Linear resident frees a slot for a homeless entry.
        assert_eq!(Some(0), table.remove(b"0"));

        assert_invariants(&table);
        assert_eq!(3, table.stats().overflow_count);

        assert_eq!(None, table.insert(key("7"), 7).unwrap());
        assert_eq!(Some(&7), table.get(b"7"));
    }

    #[test]
    fn full_window_grows() {
        let mut builder = TableBuilder::new(SameHomes);
        builder.set_capacity(16).set_psl_threshold(1).set_cuckoo_limit(1);

        let mut table: HashTable<usize, Box<[u8]>, SameHomes> = builder.build().unwrap();

        table.insert(key("a"), 0).unwrap();
        table.insert(key("b"), 1).unwrap();

        assert_eq!(0, table.stats().resize_count);

        //  No room in either window: the table grows, though it does not help such a pathological hasher.
        table.insert(key("c"), 2).unwrap();

        let stats = table.stats();

        assert_eq!(1, stats.resize_count);
        assert_eq!(32, stats.capacity);
        assert_eq!(1, stats.overflow_count);

        assert_eq!(Some(&2), table.get(b"c"));
        assert_invariants(&table);
    }

    #[test]
    fn load_factor_bounded() {
        let mut table = Table::new().unwrap();

        for i in 0..1000 {
            table.insert(key(&format!("{i}")), i).unwrap();

            let stats = table.stats();

            assert!(stats.count * 100 <= stats.capacity * 70, "{stats:?}");
        }

        assert_invariants(&table);
    }

    #[test]
    fn reserve_ahead() {
        let mut table = Table::new().unwrap();

        table.reserve(100).unwrap();

        let capacity = table.capacity();

        assert!(capacity * 70 >= 100 * 100);

        for i in 0..100 {
            table.insert(key(&format!("{i}")), i).unwrap();
        }

        assert_eq!(capacity, table.capacity());
    }

    #[test]
    fn reserve_capped() {
        let mut builder = TableBuilder::<FxPairHasher>::default();
        builder.set_capacity(8).set_max_capacity(16);

        let mut table: Table<u32> = builder.build().unwrap();

        assert_eq!(Err(LoomError::TableFull), table.reserve(100));
        assert_eq!(8, table.capacity());
    }

    #[test]
    fn for_each_stops_early() {
        let mut table = Table::new().unwrap();

        for i in 0..10 {
            table.insert(key(&format!("{i}")), i).unwrap();
        }

        let mut sum = 0;

        let visited = table.for_each(|_, value| {
            sum += value;
            ControlFlow::Continue(())
        });

        assert_eq!(10, visited);
        assert_eq!(45, sum);

        let visited = table.for_each(|_, _| ControlFlow::Break(()));

        assert_eq!(1, visited);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut table = Table::new().unwrap();

        for i in 0..100 {
            table.insert(key(&format!("{i}")), i).unwrap();
        }

        let capacity = table.capacity();

        table.clear();

        assert!(table.is_empty());
        assert_eq!(capacity, table.capacity());
        assert_eq!(None, table.get(b"1"));
        assert_eq!(0, table.iter().count());
    }

    #[test]
    fn stats_probes() {
        let mut table = Table::new().unwrap();

        assert_eq!(0.0, table.stats().average_probes);

        table.insert(key("a"), 1).unwrap();

        table.get(b"a");
        table.get(b"a");

        let stats = table.stats();

        assert!(stats.average_probes >= 1.0, "{stats:?}");
        assert_eq!(1, stats.count);
    }

    #[test]
    fn values_dropped() {
        use std::rc::Rc;

        let value = Rc::new(());

        {
            let mut table = Table::new().unwrap();

            table.insert(key("a"), Rc::clone(&value)).unwrap();
            table.insert(key("b"), Rc::clone(&value)).unwrap();

            //  The replaced value is handed back.
            let previous = table.insert(key("a"), Rc::clone(&value)).unwrap();
            assert!(previous.is_some());

            drop(previous);

            assert_eq!(3, Rc::strong_count(&value));
        }

        assert_eq!(1, Rc::strong_count(&value));
    }

    #[test]
    fn debug_map() {
        let mut table = Table::new().unwrap();

        table.insert(key("a"), 1).unwrap();

        assert_eq!("{[97]: 1}", format!("{table:?}"));
    }

    #[test]
    fn randomized_invariants() {
        //  A simple xorshift, to keep the test deterministic.
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut builder = TableBuilder::<FxPairHasher>::default();
        builder.set_psl_threshold(2).set_cuckoo_limit(8).set_load_factor(85);

        let mut table: Table<u64> = builder.build().unwrap();
        let mut model = std::collections::HashMap::new();

        for _ in 0..5000 {
            let k = next() % 512;
            let bytes = k.to_le_bytes();

            if next() % 3 == 0 {
                assert_eq!(model.remove(&k), table.remove(&bytes));
            } else {
                assert_eq!(model.insert(k, k * 2), table.insert(bytes.into(), k * 2).unwrap());
            }
        }

        assert_invariants(&table);
        assert_eq!(model.len(), table.len());

        for (k, v) in &model {
            assert_eq!(Some(v), table.get(&k.to_le_bytes()));
        }
    }
} // mod tests
