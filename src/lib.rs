//! Storage building blocks: a hash table, a bump arena, a string interner, and string builders.
//!
//! The crate provides a small core of tightly coupled data-structures, meant to be embedded by higher layers such as
//! configuration parsers or scripting bridges:
//!
//! -   `HashTable`: a byte-keyed hash table, using Robin Hood linear probing with a Cuckoo fallback.
//! -   `Arena`: a bump allocator, with nestable temporary scopes.
//! -   `Tablet`: a byte slice and string interner, built atop the `Arena` and the `HashTable`.
//! -   `Weave`: a growable, binary-safe, string buffer, which may also view interned or static bytes.
//! -   `Cord`: a rope, deferring concatenation until flattened.
//!
//!
//! #   How to use?
//!
//! If you just want to get going, use the `new` methods, and you'll get default configured instances which will be
//! quite fine.
//!
//! You can always tune them later, using the configuration options.
//!
//!
//! #   Configuration options
//!
//! The `HashTable` offers multiple configuration options, available via the `TableBuilder`:
//!
//! -   The hashing algorithm can be tuned, it defaults to a dual-seeded Fx Hash.
//! -   The initial capacity can be tuned, it is always rounded up to a power of 2.
//! -   The maximum load factor, growth factor, and probe sequence limits can be tuned.
//! -   A maximum capacity can be set, beyond which the table refuses to grow.
//!
//! The `Tablet` offers its own configuration options, available via the `TabletBuilder`, such as the chunk size of
//! its arena.
//!
//!
//! #   Limits
//!
//! -   A `Tablet` supports only up to 4 billions unique slices, eg. 2**32 - 1.
//! -   Only 2**32 - 2 `Tablet` can be created with a fresh generation during the lifetime of the process.
//!
//!
//! #   Internals
//!
//! Each slot of the `HashTable` is either vacant, or holds an entry in one of two modes:
//!
//! -   Linear: the entry is placed by Robin Hood linear probing from its primary home, richer entries ceding their
//!     slot to poorer ones, so that probe sequence lengths (PSL) stay short and lookups can stop early.
//! -   Cuckoo: once the PSL of an entry exceeds a threshold, it is instead probed from its alternate home, derived from
//!     an independent digest, bounding the worst-case cost of lookups.
//!
//! Should an entry exhaust both windows, the table grows. Should the table be unable to grow, the entry is kept in a
//! small overflow area so that no entry is ever lost, and further insertions of new keys are refused once it is full.
//!
//! Deletion shifts the following entries of the run backward, hence no tombstone is ever needed.
//!
//! The `Tablet` copies each new slice into its `Arena`, and keys its `HashTable` by that copy. The chunks of the
//! `Arena` are never moved, so that copies are stable for the lifetime of the `Tablet`.

//  Use only core and alloc, guaranteeing no I/O nor threads.
#![cfg_attr(not(test), no_std)]
//  Ensure unsafe operations are duly checked.
#![deny(unsafe_op_in_unsafe_fn)]
//  Ensure proper documentation.
#![deny(missing_docs)]

//  Non-core must be explicitly depended on in no_std.
extern crate alloc;

mod arena;
mod cord;
mod error;
mod hash;
mod id;
mod table;
mod tablet;
mod weave;

pub use arena::{Arena, ArenaStats, Mark};
pub use cord::Cord;
pub use error::LoomError;
pub use hash::{Digests, FxPairHasher, PairHasher};
pub use id::{Generation, Handle, StrHandle};
pub use table::{HashTable, Iter, TableBuilder, TableStats};
pub use tablet::{Tablet, TabletBuilder};
pub use weave::{Mode, Weave};
