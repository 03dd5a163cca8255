//! Bucket-count and bucket-index policies.
//!
//! A [`BucketPolicy`] decides how a cached hash code maps onto a bucket
//! index and which bucket counts the table is allowed to grow (or shrink)
//! to. Two policies are provided:
//!
//! - [`PrimePolicy`] draws bucket counts from a fixed table of primes and
//!   reduces hashes with a modulo. Consecutive integer keys spread
//!   perfectly under it, which is why the integer-keyed aliases in this
//!   crate default to it.
//! - [`MixPolicy`] uses power-of-two bucket counts with a mask, and runs
//!   every hash through a 64-bit avalanche mix first so that masking does
//!   not depend on low-bit entropy alone. It is the default for
//!   everything else.
//!
//! The policy is a type parameter of the tables; it is chosen when the
//! table type is named and never changes at runtime.

/// Bucket counts for [`PrimePolicy`], ascending. Growth picks the first
/// entry >= the requested minimum; requests past the end cap at the last
/// entry.
const PRIMES: [usize; 37] = [
    17,
    29,
    37,
    53,
    67,
    79,
    97,
    131,
    193,
    257,
    389,
    521,
    769,
    1031,
    1543,
    2053,
    3079,
    6151,
    12289,
    24593,
    49157,
    98317,
    196613,
    393241,
    786433,
    1572869,
    3145739,
    6291469,
    12582917,
    25165843,
    50331653,
    100663319,
    201326611,
    402653189,
    805306457,
    1610612741,
    3221225473,
];

/// Strategy for mapping hashes to buckets and rounding bucket counts.
///
/// Implementors are zero-sized marker types; all methods are associated
/// functions so the policy costs nothing to store.
pub trait BucketPolicy {
    /// Post-processes a raw hash code before it is cached in a node.
    ///
    /// Tables call this exactly once per key and store the result, so the
    /// mix never has to be recomputed during lookups or rehashes.
    fn mix(hash: u64) -> u64;

    /// Maps a (mixed) hash onto a bucket index in `0..count`.
    ///
    /// `count` is always a value previously returned by
    /// [`new_bucket_count`](Self::new_bucket_count).
    fn to_bucket(count: usize, hash: u64) -> usize;

    /// Smallest bucket count this policy allows that is `>= min`.
    fn new_bucket_count(min: usize) -> usize;

    /// Largest bucket count this policy allows that is `<= max`.
    fn prev_bucket_count(max: usize) -> usize;
}

/// Prime-modulus bucket policy.
///
/// Bucket counts come from a fixed prime table (17 up to ~2^32); hashes
/// are reduced with `%`. No mixing is applied, so clustered integer keys
/// land in distinct buckets.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimePolicy;

impl BucketPolicy for PrimePolicy {
    #[inline(always)]
    fn mix(hash: u64) -> u64 {
        hash
    }

    #[inline(always)]
    fn to_bucket(count: usize, hash: u64) -> usize {
        (hash % count as u64) as usize
    }

    #[inline]
    fn new_bucket_count(min: usize) -> usize {
        match PRIMES.binary_search(&min) {
            Ok(i) => PRIMES[i],
            Err(i) if i == PRIMES.len() => PRIMES[PRIMES.len() - 1],
            Err(i) => PRIMES[i],
        }
    }

    #[inline]
    fn prev_bucket_count(max: usize) -> usize {
        match PRIMES.binary_search(&max) {
            Ok(i) => PRIMES[i],
            Err(0) => PRIMES[0],
            Err(i) => PRIMES[i - 1],
        }
    }
}

/// Power-of-two mask policy with a 64-bit avalanche mix.
///
/// Bucket counts are powers of two (minimum 4) and hashes are reduced
/// with `hash & (count - 1)`. Because masking only looks at the low bits,
/// [`mix`](BucketPolicy::mix) runs Thomas Wang's 64-bit integer hash over
/// the input first.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixPolicy;

impl BucketPolicy for MixPolicy {
    #[inline(always)]
    fn mix(hash: u64) -> u64 {
        // Thomas Wang's 64-bit mix.
        let mut key = hash;
        key = (!key).wrapping_add(key << 21);
        key ^= key >> 24;
        key = key.wrapping_add(key << 3).wrapping_add(key << 8);
        key ^= key >> 14;
        key = key.wrapping_add(key << 2).wrapping_add(key << 4);
        key ^= key >> 28;
        key = key.wrapping_add(key << 31);
        key
    }

    #[inline(always)]
    fn to_bucket(count: usize, hash: u64) -> usize {
        debug_assert!(count.is_power_of_two());
        (hash as usize) & (count - 1)
    }

    #[inline]
    fn new_bucket_count(min: usize) -> usize {
        if min <= 4 {
            return 4;
        }
        min.checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1))
    }

    #[inline]
    fn prev_bucket_count(max: usize) -> usize {
        if max <= 4 {
            return 4;
        }
        if max.is_power_of_two() {
            max
        } else {
            max.next_power_of_two() >> 1
        }
    }
}
