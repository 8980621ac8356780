use std::hash::{BuildHasher, Hasher};
use xxhash_rust::xxh3::{xxh3_128, xxh3_64, Xxh3};

#[derive(Default, Clone)]
pub struct Xxh3Hasher(Xxh3);

impl Hasher for Xxh3Hasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0.finish()
    }
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

/// Hash builder for key maps, avoids SipHash on the hot path.
#[derive(Clone, Default)]
pub struct Xxh3Builder;

impl BuildHasher for Xxh3Builder {
    type Hasher = Xxh3Hasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        Xxh3Hasher(Xxh3::new())
    }
}

/// Stable 64-bit hash used to index keys in the spill store.
///
/// Stable across processes and runs, so a persisted store can be reopened.
#[inline]
pub fn key_hash(key: &[u8]) -> u64 {
    xxh3_64(key)
}

/// Two independent 64-bit hashes for double hashing in the bloom filter.
#[inline]
pub fn split_hash(key: &[u8]) -> (u64, u64) {
    let h = xxh3_128(key);
    (h as u64, (h >> 64) as u64)
}
