//  A growable, binary-safe, string buffer.

use core::{
    cmp,
    fmt::{self, Write},
    hash, str,
};

use alloc::vec::Vec;

use memchr::memmem;

use crate::error::LoomError;

/// A growable, binary-safe, string buffer.
///
/// A `Weave` is in one of three modes:
///
/// -   `Owned`: the bytes are owned by the `Weave`, and always followed by a NUL byte, for interoperability.
/// -   `Interned`: the bytes are borrowed from an interning pool, such as a `Tablet`.
/// -   `Static`: the bytes are borrowed from a static source.
///
/// Borrowed modes are read-only views: any mutation first copies the bytes into owned storage, so that the source is
/// never modified. Dropping a borrowed `Weave` frees nothing.
///
/// #   Growth policy
///
/// When owned storage is too small, it grows to fit at least 64 bytes, or else the next power of 2 and at least twice
/// the prior capacity, bounding the total cost of N appends to O(N).
#[derive(Clone)]
pub struct Weave<'a> {
    storage: Storage<'a>,
}

/// The mode of a `Weave`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// The bytes are owned.
    Owned,
    /// The bytes are borrowed from an interning pool.
    Interned,
    /// The bytes are borrowed from a static source.
    Static,
}

impl<'a> Weave<'a> {
    /// The minimum capacity of owned storage.
    pub const MIN_CAPACITY: usize = MIN_CAPACITY;

    /// Creates a new, empty, `Weave`, without allocating.
    pub const fn new() -> Self {
        Self {
            storage: Storage::Owned(Vec::new()),
        }
    }

    /// Creates a new, empty, `Weave` able to hold at least `capacity` bytes without reallocating.
    pub fn with_capacity(capacity: usize) -> Result<Self, LoomError> {
        let mut result = Self::new();

        result.reserve(capacity)?;

        Ok(result)
    }

    /// Creates a new `Weave` holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoomError> {
        let mut result = Self::new();

        result.append(bytes)?;

        Ok(result)
    }

    /// Creates a new `Weave` viewing static `bytes`, without copying.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self {
            storage: Storage::Static(bytes),
        }
    }

    /// Creates a new `Weave` viewing interned `bytes`, without copying.
    pub const fn interned(bytes: &'a [u8]) -> Self {
        Self {
            storage: Storage::Interned(bytes),
        }
    }

    /// Returns the mode.
    pub fn mode(&self) -> Mode {
        match self.storage {
            Storage::Owned(_) => Mode::Owned,
            Storage::Interned(_) => Mode::Interned,
            Storage::Static(_) => Mode::Static,
        }
    }

    /// Returns the number of bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns whether there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bytes which can be held without reallocating.
    ///
    /// A borrowed `Weave` has no spare capacity.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Owned(bytes) => bytes.capacity().saturating_sub(1),
            Storage::Interned(bytes) | Storage::Static(bytes) => bytes.len(),
        }
    }

    /// Returns the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes.split_last().map_or(&[][..], |(_, content)| content),
            Storage::Interned(bytes) | Storage::Static(bytes) => bytes,
        }
    }

    /// Returns the bytes as a string, if valid UTF-8.
    pub fn as_str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(self.as_bytes())
    }

    /// Returns the bytes, followed by a NUL byte.
    ///
    /// A borrowed `Weave` is first copied into owned storage.
    pub fn as_bytes_with_nul(&mut self) -> Result<&[u8], LoomError> {
        let bytes = self.make_room(0)?;

        Ok(&bytes[..])
    }

    /// Copies the bytes into owned storage, if borrowed.
    pub fn into_owned(self) -> Result<Weave<'static>, LoomError> {
        match self.storage {
            Storage::Owned(bytes) => Ok(Weave {
                storage: Storage::Owned(bytes),
            }),
            Storage::Interned(bytes) | Storage::Static(bytes) => Weave::from_bytes(bytes),
        }
    }

    /// Ensures that at least `additional` more bytes can be appended without reallocating.
    pub fn reserve(&mut self, additional: usize) -> Result<(), LoomError> {
        self.make_room(additional).map(|_| ())
    }

    /// Appends `bytes`.
    ///
    /// On failure, the `Weave` is left unmodified.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), LoomError> {
        let storage = self.make_room(bytes.len())?;

        storage.pop();
        storage.extend_from_slice(bytes);
        storage.push(0);

        Ok(())
    }

    /// Appends `string`.
    pub fn append_str(&mut self, string: &str) -> Result<(), LoomError> {
        self.append(string.as_bytes())
    }

    /// Appends a single byte.
    pub fn push(&mut self, byte: u8) -> Result<(), LoomError> {
        self.append(&[byte])
    }

    /// Prepends `bytes`.
    ///
    /// On failure, the `Weave` is left unmodified.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<(), LoomError> {
        let storage = self.make_room(bytes.len())?;

        storage.pop();
        storage.extend_from_slice(bytes);
        storage.rotate_right(bytes.len());
        storage.push(0);

        Ok(())
    }

    /// Removes all bytes, keeping the capacity of owned storage.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Shortens to `length` bytes, if longer.
    pub fn truncate(&mut self, length: usize) {
        if length >= self.len() {
            return;
        }

        match &mut self.storage {
            Storage::Owned(bytes) => {
                bytes.truncate(length);
                bytes.push(0);
            }
            Storage::Interned(bytes) | Storage::Static(bytes) => *bytes = &bytes[..length],
        }
    }

    /// Returns the offset of the first occurrence of `needle`, if any.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        memmem::find(self.as_bytes(), needle)
    }

    /// Returns the offset of the last occurrence of `needle`, if any.
    pub fn rfind(&self, needle: &[u8]) -> Option<usize> {
        memmem::rfind(self.as_bytes(), needle)
    }

    /// Returns whether `needle` occurs.
    pub fn contains(&self, needle: &[u8]) -> bool {
        self.find(needle).is_some()
    }

    /// Returns whether the bytes start with `prefix`.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_bytes().starts_with(prefix)
    }

    /// Returns whether the bytes end with `suffix`.
    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.as_bytes().ends_with(suffix)
    }

    /// Returns the number of non-overlapping occurrences of `needle`.
    ///
    /// An empty `needle` never occurs.
    pub fn count(&self, needle: &[u8]) -> usize {
        occurrences(self.as_bytes(), needle).count()
    }

    /// Returns a copy, in which the first occurrence of `needle`, if any, is replaced by `replacement`.
    ///
    /// The copy is sized exactly to fit. An empty `needle` never occurs.
    pub fn replace(&self, needle: &[u8], replacement: &[u8]) -> Result<Weave<'static>, LoomError> {
        let haystack = self.as_bytes();

        let Some(offset) = occurrences(haystack, needle).next() else { return exact(&[haystack]) };

        let (prefix, suffix) = (&haystack[..offset], &haystack[offset + needle.len()..]);

        exact(&[prefix, replacement, suffix])
    }

    /// Returns a copy, in which every non-overlapping occurrence of `needle` is replaced by `replacement`.
    ///
    /// The copy is sized exactly to fit, and allocated once: a first pass counts the occurrences, a second pass copies.
    /// An empty `needle` never occurs.
    pub fn replace_all(&self, needle: &[u8], replacement: &[u8]) -> Result<Weave<'static>, LoomError> {
        let haystack = self.as_bytes();

        let matches = occurrences(haystack, needle).count();

        let length = (|| {
            let removed = matches.checked_mul(needle.len())?;
            let added = matches.checked_mul(replacement.len())?;

            (haystack.len() - removed).checked_add(added)
        })()
        .ok_or(LoomError::MemoryExhausted)?;

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(length + 1)?;

        let mut start = 0;

        for offset in occurrences(haystack, needle) {
            bytes.extend_from_slice(&haystack[start..offset]);
            bytes.extend_from_slice(replacement);

            start = offset + needle.len();
        }

        bytes.extend_from_slice(&haystack[start..]);

        debug_assert_eq!(length, bytes.len());

        Weave::from_vec(bytes)
    }

    /// Removes leading and trailing whitespace, in place.
    ///
    /// Whitespace is any of space, `\t`, `\n`, `\r`, vertical tab, and form feed.
    pub fn trim(&mut self) {
        self.trim_end();
        self.trim_start();
    }

    /// Removes leading whitespace, in place.
    pub fn trim_start(&mut self) {
        let start = self
            .as_bytes()
            .iter()
            .position(|byte| !is_whitespace(*byte))
            .unwrap_or(self.len());

        if start == 0 {
            return;
        }

        match &mut self.storage {
            Storage::Owned(bytes) => {
                bytes.drain(..start);
            }
            Storage::Interned(bytes) | Storage::Static(bytes) => *bytes = &bytes[start..],
        }
    }

    /// Removes trailing whitespace, in place.
    pub fn trim_end(&mut self) {
        let end = self
            .as_bytes()
            .iter()
            .rposition(|byte| !is_whitespace(*byte))
            .map_or(0, |last| last + 1);

        self.truncate(end);
    }

    /// Splits around each occurrence of `delimiter`.
    ///
    /// Empty fields are preserved: splitting `a,,b` around `,` yields `a`, the empty string, and `b`. An empty
    /// `delimiter` never occurs, yielding a single copy.
    pub fn split(&self, delimiter: &[u8]) -> Result<Vec<Weave<'static>>, LoomError> {
        let haystack = self.as_bytes();

        let fields = occurrences(haystack, delimiter).count() + 1;

        let mut result = Vec::new();
        result.try_reserve_exact(fields)?;

        let mut start = 0;

        for offset in occurrences(haystack, delimiter) {
            result.push(exact(&[&haystack[start..offset]])?);

            start = offset + delimiter.len();
        }

        result.push(exact(&[&haystack[start..]])?);

        Ok(result)
    }

    /// Splits around runs of any of the bytes of `set`.
    ///
    /// The bytes of `set` form a character class, and consecutive delimiters are collapsed: no empty token is ever
    /// produced, including at either end. Splitting `,a;;b,` around `,;` yields `a` and `b`.
    pub fn split_any(&self, set: &[u8]) -> Result<Vec<Weave<'static>>, LoomError> {
        let mut class = [false; 256];

        for byte in set {
            class[*byte as usize] = true;
        }

        let tokens = || {
            self.as_bytes()
                .split(move |byte| class[*byte as usize])
                .filter(|token| !token.is_empty())
        };

        let mut result = Vec::new();
        result.try_reserve_exact(tokens().count())?;

        for token in tokens() {
            result.push(exact(&[token])?);
        }

        Ok(result)
    }
}

impl Default for Weave<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&'static str> for Weave<'_> {
    fn from(string: &'static str) -> Self {
        Self::from_static(string.as_bytes())
    }
}

impl AsRef<[u8]> for Weave<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for Weave<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Weave<'_> {}

impl PartialEq<[u8]> for Weave<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<str> for Weave<'_> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for Weave<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialOrd for Weave<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Weave<'_> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl hash::Hash for Weave<'_> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Weave<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:?}(\"", self.mode())?;

        for chunk in self.as_bytes().utf8_chunks() {
            write!(f, "{}", chunk.valid().escape_debug())?;

            for byte in chunk.invalid() {
                write!(f, "\\x{byte:02x}")?;
            }
        }

        f.write_str("\")")
    }
}

impl fmt::Display for Weave<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        for chunk in self.as_bytes().utf8_chunks() {
            f.write_str(chunk.valid())?;

            if !chunk.invalid().is_empty() {
                f.write_char(char::REPLACEMENT_CHARACTER)?;
            }
        }

        Ok(())
    }
}

//
//  Implementation
//

//  Owned storage is either empty, or NUL terminated; borrowed storage is the exact bytes.
#[derive(Clone)]
enum Storage<'a> {
    Owned(Vec<u8>),
    Interned(&'a [u8]),
    Static(&'a [u8]),
}

impl Weave<'static> {
    //  Takes ownership of `bytes`, appending the NUL terminator.
    //
    //  No reallocation occurs if `bytes` has spare capacity for the terminator.
    pub(crate) fn from_vec(mut bytes: Vec<u8>) -> Result<Self, LoomError> {
        bytes.try_reserve_exact(1)?;
        bytes.push(0);

        Ok(Self {
            storage: Storage::Owned(bytes),
        })
    }
}

impl Weave<'_> {
    //  Ensures owned, NUL terminated, storage with room for `additional` more bytes.
    //
    //  On failure, the `Weave` is left unmodified.
    fn make_room(&mut self, additional: usize) -> Result<&mut Vec<u8>, LoomError> {
        let length = self.len();
        let required = length.checked_add(additional).ok_or(LoomError::MemoryExhausted)?;

        let fits = matches!(&self.storage, Storage::Owned(bytes) if !bytes.is_empty() && required < bytes.capacity());

        if !fits {
            let current = match &self.storage {
                Storage::Owned(bytes) => bytes.capacity().saturating_sub(1),
                Storage::Interned(_) | Storage::Static(_) => 0,
            };

            let capacity = grown_capacity(current, required).ok_or(LoomError::MemoryExhausted)?;
            let total = capacity.checked_add(1).ok_or(LoomError::MemoryExhausted)?;

            match &mut self.storage {
                Storage::Owned(bytes) if bytes.is_empty() => {
                    bytes.try_reserve_exact(total)?;
                    bytes.push(0);
                }
                Storage::Owned(bytes) => bytes.try_reserve_exact(total - bytes.len())?,
                Storage::Interned(borrowed) | Storage::Static(borrowed) => {
                    let mut bytes = Vec::new();
                    bytes.try_reserve_exact(total)?;

                    bytes.extend_from_slice(borrowed);
                    bytes.push(0);

                    self.storage = Storage::Owned(bytes);
                }
            }
        }

        match &mut self.storage {
            Storage::Owned(bytes) => Ok(bytes),
            Storage::Interned(_) | Storage::Static(_) => Err(LoomError::MemoryExhausted),
        }
    }
}

const MIN_CAPACITY: usize = 64;

//  Capacity to grow to, from `current`, to hold at least `required` bytes.
fn grown_capacity(current: usize, required: usize) -> Option<usize> {
    if required <= MIN_CAPACITY {
        return Some(cmp::max(current, MIN_CAPACITY));
    }

    let rounded = required.checked_next_power_of_two()?;

    Some(cmp::max(rounded, current.checked_mul(2)?))
}

//  Copies the catenation of `parts` into an exactly sized owned `Weave`.
fn exact(parts: &[&[u8]]) -> Result<Weave<'static>, LoomError> {
    let length: usize = parts.iter().map(|part| part.len()).sum();

    let mut bytes = Vec::new();
    bytes.try_reserve_exact(length + 1)?;

    for part in parts {
        bytes.extend_from_slice(part);
    }

    Weave::from_vec(bytes)
}

//  Offsets of the non-overlapping occurrences of `needle`, none if `needle` is empty.
fn occurrences<'h>(haystack: &'h [u8], needle: &'h [u8]) -> impl Iterator<Item = usize> + 'h {
    let needle = (!needle.is_empty()).then_some(needle);

    needle
        .into_iter()
        .flat_map(move |needle| memmem::find_iter(haystack, needle))
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

// mod tests
