use crate::database::models::{Fingerprint, FingerprintRecord, HASH_SLOTS};

/// Per-slot Hamming distances between two fingerprints, each in `0..=64`.
pub type Distances = [u32; HASH_SLOTS];

/// Hamming distance between two 64-bit hashes. `count_ones` lowers to a single
/// POPCNT where the target supports it.
#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Compare slot `i` of the query against slot `i` of the candidate, never across slots.
#[inline]
pub fn evaluate(query: &Fingerprint, candidate: &FingerprintRecord) -> Distances {
    compare(&query.hash, &candidate.hash)
}

#[inline]
pub fn compare(a: &[u64; HASH_SLOTS], b: &[u64; HASH_SLOTS]) -> Distances {
    std::array::from_fn(|slot| hamming_distance(a[slot], b[slot]))
}
