//! A unique-key hash map over the chained table engine.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::ops::Index;

use crate::DefaultHashBuilder;
use crate::policy::BucketPolicy;
use crate::policy::MixPolicy;
use crate::table;
use crate::table::Entry as TableEntry;
use crate::table::Table;

/// A hash map implemented over the chained [`Table`] engine.
///
/// `HashMap<K, V, S, P>` stores key-value pairs where keys implement
/// `Hash + Eq`, hashes them with the builder `S`, and places them in
/// buckets through the [`BucketPolicy`] `P` (the policy's mix step runs
/// on every hash before it reaches the table). Pairs live in stable
/// heap nodes, so references obtained through the entry API survive
/// growth of the map.
///
/// With the default `MixPolicy` the bucket count is a power of two; use
/// [`PrimeHashMap`](crate::PrimeHashMap) for prime-sized tables, which
/// tolerate low-entropy hashes such as identity-hashed integers.
pub struct HashMap<K, V, S = DefaultHashBuilder, P = MixPolicy> {
    table: Table<(K, V), P>,
    hash_builder: S,
}

impl<K, V, S, P> Clone for HashMap<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: Clone,
    P: BucketPolicy,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            hash_builder: self.hash_builder.clone(),
        }
    }

    fn clone_from(&mut self, src: &Self) {
        // Build the replacement hasher before any table state is
        // committed: if the clone panics, `self` is untouched.
        let hash_builder = src.hash_builder.clone();
        self.table.clone_from(&src.table);
        self.hash_builder = hash_builder;
    }
}

impl<K, V, S, P> Debug for HashMap<K, V, S, P>
where
    K: Debug,
    V: Debug,
    P: BucketPolicy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, P> HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    /// Creates an empty map with the given hasher builder.
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// use chain_hash::HashMap;
    ///
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, &str, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty map sized for at least `capacity` elements with
    /// the given hasher builder. Nothing is allocated until the first
    /// insert.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let mut table = Table::new();
        if capacity > 0 {
            table.reserve(capacity);
        }
        Self {
            table,
            hash_builder,
        }
    }

    /// Returns the number of elements in the map.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of elements the map can hold before its next
    /// growth.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Current load factor.
    pub fn load_factor(&self) -> f32 {
        self.table.load_factor()
    }

    /// Load factor above which an insert grows the map.
    pub fn max_load_factor(&self) -> f32 {
        self.table.max_load_factor()
    }

    /// Sets the max load factor (clamped to a small positive minimum);
    /// takes effect on the next insert.
    pub fn set_max_load_factor(&mut self, mlf: f32) {
        self.table.set_max_load_factor(mlf);
    }

    /// Removes all elements, keeping the allocated buckets.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Reserves room for at least `additional` more elements.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(self.table.len() + additional);
    }

    /// Shrinks the bucket array as far as the current length and load
    /// factor allow.
    pub fn shrink_to_fit(&mut self) {
        self.table.rehash(0);
    }

    fn hash_key(&self, key: &K) -> u64 {
        P::mix(self.hash_builder.hash_one(key))
    }

    /// Inserts a key-value pair, returning the previous value for the
    /// key if there was one.
    ///
    /// ```rust
    /// # #[cfg(feature = "foldhash")]
    /// # {
    /// use chain_hash::HashMap;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// assert_eq!(map.insert(1, "a"), None);
    /// assert_eq!(map.insert(1, "b"), Some("a"));
    /// assert_eq!(map.len(), 1);
    /// # }
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.entry(key) {
            Entry::Occupied(mut entry) => Some(entry.insert(value)),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    /// Returns a reference to the value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.hash_key(key);
        self.table
            .find(hash, |(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns the stored key-value pair for `key`.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash = self.hash_key(key);
        self.table
            .find(hash, |(k, _)| k == key)
            .map(|(k, v)| (k, v))
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_key(key);
        self.table
            .find_mut(hash, |(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key` from the map, returning its value.
    ///
    /// ```rust
    /// # #[cfg(feature = "foldhash")]
    /// # {
    /// use chain_hash::HashMap;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// # }
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key` from the map, returning the stored key and value.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let hash = self.hash_key(key);
        self.table.remove(hash, |(k, _)| k == key)
    }

    /// Returns the entry for `key`, for in-place manipulation.
    ///
    /// ```rust
    /// # #[cfg(feature = "foldhash")]
    /// # {
    /// use chain_hash::HashMap;
    ///
    /// let mut map: HashMap<&str, u32> = HashMap::new();
    /// *map.entry("a").or_insert(0) += 1;
    /// *map.entry("a").or_insert(0) += 1;
    /// assert_eq!(map.get(&"a"), Some(&2));
    /// # }
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V, P> {
        let hash = self.hash_key(&key);
        match self.table.entry(hash, |(k, _)| *k == key) {
            TableEntry::Occupied(entry) => Entry::Occupied(OccupiedEntry { entry }),
            TableEntry::Vacant(entry) => Entry::Vacant(VacantEntry { entry, key }),
        }
    }

    /// Keeps only the pairs for which `f` returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        self.table.retain(|pair| {
            let (k, v) = &mut *pair;
            f(k, v)
        });
    }
}

impl<K, V, S, P: BucketPolicy> HashMap<K, V, S, P> {
    /// Iterates the map's key-value pairs.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Iterates the map's pairs with mutable access to the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.table.iter_mut(),
        }
    }

    /// Iterates the map's keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Iterates the map's values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Removes and yields every pair; dropping the iterator removes the
    /// rest.
    pub fn drain(&mut self) -> Drain<'_, K, V, P> {
        Drain {
            inner: self.table.drain(),
        }
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }
}

impl<K, V, S, P> HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    /// Creates an empty map using the default hasher builder.
    ///
    /// ```rust
    /// # #[cfg(feature = "foldhash")]
    /// # {
    /// use chain_hash::HashMap;
    ///
    /// let map: HashMap<i32, &str> = HashMap::new();
    /// assert!(map.is_empty());
    /// # }
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty map sized for at least `capacity` elements
    /// using the default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<K, V, S, P> Default for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, P> PartialEq for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
    P: BucketPolicy,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter()
            .all(|(k, v)| other.get(k).is_some_and(|w| v == w))
    }
}

impl<K, V, S, P> Eq for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
}

impl<K, V, S, P> Index<&K> for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if `key` is not present in the map.
    fn index(&self, key: &K) -> &V {
        match self.get(key) {
            Some(v) => v,
            None => panic!("key not found"),
        }
    }
}

impl<K, V, S, P> Extend<(K, V)> for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        // The lower bound is free; inserting past it falls back to the
        // normal growth path.
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S, P> FromIterator<(K, V)> for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K, V, S, P: BucketPolicy> IntoIterator for HashMap<K, V, S, P> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, P>;

    fn into_iter(self) -> IntoIter<K, V, P> {
        IntoIter {
            inner: self.table.into_iter(),
        }
    }
}

impl<'a, K, V, S, P: BucketPolicy> IntoIterator for &'a HashMap<K, V, S, P> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

/// A view into a single entry of a [`HashMap`], vacant or occupied.
///
/// Constructed by [`HashMap::entry`].
pub enum Entry<'a, K, V, P = MixPolicy> {
    /// The key is present.
    Occupied(OccupiedEntry<'a, K, V, P>),
    /// The key is absent.
    Vacant(VacantEntry<'a, K, V, P>),
}

impl<'a, K, V, P: BucketPolicy> Entry<'a, K, V, P> {
    /// Returns the value, inserting `default` first if the entry is
    /// vacant.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Returns the value, inserting `default()` if the entry is vacant.
    pub fn or_insert_with<F>(self, default: F) -> &'a mut V
    where
        F: FnOnce() -> V,
    {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Mutates the value in place if the entry is occupied.
    pub fn and_modify<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut V),
    {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            Entry::Vacant(entry) => Entry::Vacant(entry),
        }
    }
}

impl<'a, K, V, P: BucketPolicy> Entry<'a, K, V, P>
where
    V: Default,
{
    /// Returns the value, inserting `V::default()` if the entry is
    /// vacant.
    pub fn or_default(self) -> &'a mut V {
        self.or_insert_with(Default::default)
    }
}

/// A view into a vacant entry of a [`HashMap`].
pub struct VacantEntry<'a, K, V, P = MixPolicy> {
    entry: table::VacantEntry<'a, (K, V), P>,
    key: K,
}

impl<'a, K, V, P: BucketPolicy> VacantEntry<'a, K, V, P> {
    /// The key that would be inserted.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Takes ownership of the key.
    pub fn into_key(self) -> K {
        self.key
    }

    /// Inserts the value and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        &mut self.entry.insert((self.key, value)).1
    }
}

/// A view into an occupied entry of a [`HashMap`].
pub struct OccupiedEntry<'a, K, V, P = MixPolicy> {
    entry: table::OccupiedEntry<'a, (K, V), P>,
}

impl<'a, K, V, P: BucketPolicy> OccupiedEntry<'a, K, V, P> {
    /// The stored key.
    pub fn key(&self) -> &K {
        &self.entry.get().0
    }

    /// The stored value.
    pub fn get(&self) -> &V {
        &self.entry.get().1
    }

    /// The stored value, mutably.
    pub fn get_mut(&mut self) -> &mut V {
        &mut self.entry.get_mut().1
    }

    /// Converts the entry into a value reference bound to the map.
    pub fn into_mut(self) -> &'a mut V {
        &mut self.entry.into_mut().1
    }

    /// Replaces the value, returning the old one.
    pub fn insert(&mut self, value: V) -> V {
        core::mem::replace(self.get_mut(), value)
    }

    /// Removes the pair, returning the value.
    pub fn remove(self) -> V {
        self.entry.remove().1
    }

    /// Removes and returns the stored pair.
    pub fn remove_entry(self) -> (K, V) {
        self.entry.remove()
    }
}

/// Iterator over a map's pairs.
pub struct Iter<'a, K, V> {
    inner: table::Iter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

/// Iterator over a map's pairs with mutable values.
pub struct IterMut<'a, K, V> {
    inner: table::IterMut<'a, (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|pair| {
            let (k, v) = &mut *pair;
            (&*k, v)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Iterator over a map's keys.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Iterator over a map's values.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Draining iterator over a map's pairs.
pub struct Drain<'a, K, V, P = MixPolicy> {
    inner: table::Drain<'a, (K, V), P>,
}

impl<K, V, P> Iterator for Drain<'_, K, V, P> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Owning iterator over a map's pairs.
pub struct IntoIter<K, V, P = MixPolicy> {
    inner: table::IntoIter<(K, V), P>,
}

impl<K, V, P> Iterator for IntoIter<K, V, P> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::policy::PrimePolicy;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    type TestMap<K, V> = HashMap<K, V, SipHashBuilder>;

    #[test]
    fn insert_get_remove_round_trip() {
        let mut map: TestMap<i32, String> = HashMap::new();
        assert_eq!(map.insert(1, "hello".to_string()), None);
        assert_eq!(map.get(&1), Some(&"hello".to_string()));
        assert_eq!(
            map.insert(1, "world".to_string()),
            Some("hello".to_string())
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&1), Some("world".to_string()));
        assert!(map.is_empty());
        assert_eq!(map.remove(&1), None);
    }

    #[test]
    fn erase_then_find_misses_and_size_drops() {
        let mut map: TestMap<u32, u32> = HashMap::new();
        for k in 0..100 {
            map.insert(k, k * 3);
        }
        for k in (0..100).step_by(2) {
            assert_eq!(map.remove(&k), Some(k * 3));
        }
        assert_eq!(map.len(), 50);
        for k in 0..100 {
            assert_eq!(map.contains_key(&k), k % 2 == 1, "key {k}");
        }
    }

    #[test]
    fn get_mut_and_iter_mut() {
        let mut map: TestMap<i32, String> = HashMap::new();
        map.insert(1, "hello".to_string());
        if let Some(v) = map.get_mut(&1) {
            v.push_str(" world");
        }
        assert_eq!(map.get(&1), Some(&"hello world".to_string()));
        for (_, v) in map.iter_mut() {
            v.make_ascii_uppercase();
        }
        assert_eq!(map.get(&1), Some(&"HELLO WORLD".to_string()));
    }

    #[test]
    fn entry_api() {
        let mut map: TestMap<&str, u32> = HashMap::new();
        *map.entry("a").or_insert(0) += 1;
        *map.entry("a").or_insert(0) += 1;
        assert_eq!(map.get(&"a"), Some(&2));

        map.entry("b").or_insert_with(|| 10);
        assert_eq!(map.get(&"b"), Some(&10));

        map.entry("a").and_modify(|v| *v *= 5).or_insert(0);
        assert_eq!(map.get(&"a"), Some(&10));
        map.entry("c").and_modify(|v| *v *= 5).or_insert(7);
        assert_eq!(map.get(&"c"), Some(&7));

        let v = map.entry("d").or_default();
        assert_eq!(*v, 0);

        match map.entry("a") {
            Entry::Occupied(e) => {
                assert_eq!(e.key(), &"a");
                assert_eq!(e.remove(), 10);
            }
            Entry::Vacant(_) => panic!("expected occupied"),
        }
        assert!(!map.contains_key(&"a"));
    }

    #[test]
    fn keys_values_and_len() {
        let mut map: TestMap<u32, u32> = HashMap::new();
        for k in 0..10 {
            map.insert(k, k + 100);
        }
        let mut keys: Vec<u32> = map.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
        let mut values: Vec<u32> = map.values().copied().collect();
        values.sort_unstable();
        assert_eq!(values, (100..110).collect::<Vec<_>>());
    }

    #[test]
    fn retain_and_drain() {
        let mut map: TestMap<u32, u32> = HashMap::new();
        for k in 0..20 {
            map.insert(k, k);
        }
        map.retain(|&k, _| k % 2 == 0);
        assert_eq!(map.len(), 10);

        let drained: Vec<(u32, u32)> = map.drain().collect();
        assert_eq!(drained.len(), 10);
        assert!(map.is_empty());
        assert!(drained.iter().all(|&(k, _)| k % 2 == 0));
    }

    #[test]
    fn extend_and_from_iterator() {
        let map: TestMap<u32, u32> = (0..50).map(|k| (k, k * 2)).collect();
        assert_eq!(map.len(), 50);
        assert_eq!(map.get(&49), Some(&98));

        let mut map2: TestMap<u32, u32> = HashMap::new();
        map2.extend((0..10).map(|k| (k, k)));
        assert_eq!(map2.len(), 10);
    }

    #[test]
    fn equality_ignores_order() {
        let a: TestMap<u32, u32> = (0..30).map(|k| (k, k)).collect();
        let b: TestMap<u32, u32> = (0..30).rev().map(|k| (k, k)).collect();
        assert_eq!(a, b);
        let c: TestMap<u32, u32> = (0..30).map(|k| (k, k + 1)).collect();
        assert_ne!(a, c);
    }

    #[test]
    fn index_returns_value() {
        let mut map: TestMap<u32, &str> = HashMap::new();
        map.insert(1, "one");
        assert_eq!(map[&1], "one");
    }

    #[test]
    #[should_panic(expected = "key not found")]
    fn index_missing_key_panics() {
        let map: TestMap<u32, &str> = HashMap::new();
        let _ = map[&1];
    }

    #[test]
    fn clone_and_clone_from() {
        let mut a: TestMap<u32, String> = HashMap::new();
        for k in 0..20 {
            a.insert(k, k.to_string());
        }
        let b = a.clone();
        assert_eq!(a, b);

        let mut c: TestMap<u32, String> = HashMap::new();
        c.insert(999, "gone".to_string());
        c.clone_from(&a);
        assert_eq!(c, a);
        assert!(!c.contains_key(&999));
    }

    #[test]
    fn with_capacity_pre_sizes() {
        let map: TestMap<u32, u32> = HashMap::with_capacity(100);
        assert!(map.capacity() >= 100);
        assert!(map.is_empty());
    }

    #[test]
    fn shrink_to_fit_reduces_buckets() {
        let mut map: TestMap<u32, u32> = HashMap::new();
        for k in 0..1000 {
            map.insert(k, k);
        }
        for k in 0..990 {
            map.remove(&k);
        }
        let before = map.bucket_count();
        map.shrink_to_fit();
        assert!(map.bucket_count() < before);
        for k in 990..1000 {
            assert_eq!(map.get(&k), Some(&k));
        }
    }

    #[test]
    fn prime_policy_map_handles_identity_like_keys() {
        let mut map: HashMap<u32, u32, SipHashBuilder, PrimePolicy> = HashMap::new();
        for k in 0..500u32 {
            map.insert(k, k);
        }
        assert_eq!(map.len(), 500);
        for k in 0..500u32 {
            assert_eq!(map.get(&k), Some(&k));
        }
    }
}
