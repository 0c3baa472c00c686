//  Two-digest hashing of keys.
//
//  The word mixing step is Fx Hash, used by rustc and Firefox, see `https://github.com/cbreeden/fxhash/blob/master/lib.rs`.
//
//  Fx on its own has weak low bits: the low bits of the result only depend on the low bits of the input words, and the
//  table masks the low bits off to pick a slot. Each digest is therefore run through the MurmurHash3 64-bits
//  finalizer, which folds the high bits back down.

use core::hash::{BuildHasher, Hasher};

/// The pair of digests of a key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Digests {
    /// Digest selecting the home slot of a key, for Robin Hood probing.
    pub primary: u64,
    /// Digest selecting the alternate home slot of a key, once it is displaced into Cuckoo mode.
    pub alternate: u64,
}

/// A deterministic family of hash functions, producing two independent digests per slice of bytes.
pub trait PairHasher {
    /// Computes both digests of `bytes`.
    fn digests(&self, bytes: &[u8]) -> Digests;
}

/// Any pair of `BuildHasher` is a `PairHasher`, the first one providing the primary digest.
///
/// The two hashers should be independent, for example differently seeded, or Cuckoo placement degenerates.
impl<P, A> PairHasher for (P, A)
where
    P: BuildHasher,
    A: BuildHasher,
{
    fn digests(&self, bytes: &[u8]) -> Digests {
        let primary = {
            let mut hasher = self.0.build_hasher();

            hasher.write(bytes);

            hasher.finish()
        };

        let alternate = {
            let mut hasher = self.1.build_hasher();

            hasher.write(bytes);

            hasher.finish()
        };

        Digests { primary, alternate }
    }
}

/// A fast pair hasher, based on Fx Hash.
///
/// Both digests are computed in a single pass over the bytes, each with its own seed.
///
/// This is NOT a cryptographic algorithm, and offers no protection against collision attacks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FxPairHasher {
    primary: u64,
    alternate: u64,
}

impl FxPairHasher {
    /// Creates a new instance, deriving both seeds from `seed`.
    pub const fn new(seed: u64) -> Self {
        let primary = seed;
        let alternate = finalize(seed ^ ALTERNATE_SALT);

        Self { primary, alternate }
    }

    /// Creates a new instance with the exact seeds specified.
    pub const fn with_seeds(primary: u64, alternate: u64) -> Self {
        Self { primary, alternate }
    }

    /// Returns the seeds, primary first.
    pub const fn seeds(&self) -> (u64, u64) {
        (self.primary, self.alternate)
    }
}

impl Default for FxPairHasher {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PairHasher for FxPairHasher {
    #[inline]
    fn digests(&self, bytes: &[u8]) -> Digests {
        let (mut primary, mut alternate) = (self.primary, self.alternate);

        let mut words = bytes.chunks_exact(WORD_BYTES);

        for word in &mut words {
            let mut buffer = [0u8; WORD_BYTES];
            buffer.copy_from_slice(word);

            let word = u64::from_le_bytes(buffer);

            primary = mix(primary, word, PRIMARY_ROTATE);
            alternate = mix(alternate, word, ALTERNATE_ROTATE);
        }

        //  The tail is zero-padded, the length then tells apart "a" from "a\0".
        let tail = words.remainder();

        if !tail.is_empty() {
            let mut buffer = [0u8; WORD_BYTES];
            buffer[..tail.len()].copy_from_slice(tail);

            let word = u64::from_le_bytes(buffer);

            primary = mix(primary, word, PRIMARY_ROTATE);
            alternate = mix(alternate, word, ALTERNATE_ROTATE);
        }

        let length = bytes.len() as u64;

        Digests {
            primary: finalize(mix(primary, length, PRIMARY_ROTATE)),
            alternate: finalize(mix(alternate, length, ALTERNATE_ROTATE)),
        }
    }
}

//
//  Implementation
//

const WORD_BYTES: usize = 8;
const PRIMARY_ROTATE: u32 = 5;
const ALTERNATE_ROTATE: u32 = 23;
const SEED: u64 = 0x51_7c_c1_b7_27_22_0a_95;
const ALTERNATE_SALT: u64 = 0x9e_37_79_b9_7f_4a_7c_15;

#[inline(always)]
const fn mix(hash: u64, word: u64, rotate: u32) -> u64 {
    (hash.rotate_left(rotate) ^ word).wrapping_mul(SEED)
}

//  MurmurHash3 fmix64.
#[inline(always)]
const fn finalize(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff_51_af_d7_ed_55_8c_cd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4_ce_b9_fe_1a_85_ec_53);
    hash ^= hash >> 33;

    hash
}

// mod tests
