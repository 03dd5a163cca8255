#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// Allocator plumbing shared by the table engines.
pub mod allocator;

/// A key-value map with unique keys, built on the chained table engine.
pub mod hash_map;

/// A set with unique elements, built on the chained table engine.
pub mod hash_set;

/// A key-value map allowing repeated keys, built on the grouped table
/// engine.
pub mod multi_map;

/// A set allowing repeated elements, built on the grouped table engine.
pub mod multi_set;

/// The grouped table engine backing the multi containers.
pub mod multi_table;

mod node;

/// Bucket count policies and the hash post-mixers paired with them.
pub mod policy;

/// The chained table engine backing the unique-key containers.
pub mod table;

pub use allocator::Global;
pub use allocator::TableAlloc;
pub use hash_map::Entry;
pub use hash_map::HashMap;
pub use hash_set::HashSet;
pub use multi_map::HashMultiMap;
pub use multi_set::HashMultiSet;
pub use multi_table::MultiTable;
pub use policy::BucketPolicy;
pub use policy::MixPolicy;
pub use policy::PrimePolicy;
pub use table::Table;

/// The hasher builder used when none is specified.
#[cfg(feature = "foldhash")]
pub type DefaultHashBuilder = foldhash::fast::RandomState;

/// A placeholder for the unspecified hasher builder.
///
/// Without the `foldhash` feature there is no default hasher; construct
/// containers through `with_hasher` instead.
#[cfg(not(feature = "foldhash"))]
pub enum DefaultHashBuilder {}

/// A [`HashMap`] using prime bucket counts instead of power-of-two ones.
///
/// Prime counts make bucket placement robust against patterned hashes
/// at the cost of a slower index computation.
pub type PrimeHashMap<K, V, S = DefaultHashBuilder> = HashMap<K, V, S, PrimePolicy>;

/// A [`HashSet`] using prime bucket counts instead of power-of-two ones.
pub type PrimeHashSet<T, S = DefaultHashBuilder> = HashSet<T, S, PrimePolicy>;

/// A [`HashMultiMap`] using prime bucket counts instead of power-of-two
/// ones.
pub type PrimeHashMultiMap<K, V, S = DefaultHashBuilder> = HashMultiMap<K, V, S, PrimePolicy>;

/// A [`HashMultiSet`] using prime bucket counts instead of power-of-two
/// ones.
pub type PrimeHashMultiSet<T, S = DefaultHashBuilder> = HashMultiSet<T, S, PrimePolicy>;
