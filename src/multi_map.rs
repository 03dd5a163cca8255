//! A hash map allowing multiple values per key, over the grouped table
//! engine.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::DefaultHashBuilder;
use crate::multi_table;
use crate::multi_table::MultiTable;
use crate::policy::BucketPolicy;
use crate::policy::MixPolicy;

/// A hash map where a key can be bound to several values at once.
///
/// Entries sharing a key form a contiguous group; iteration yields a
/// group's entries adjacently, in insertion order within the group.
/// Hashing goes through the builder `S` and bucket placement through
/// the [`BucketPolicy`] `P`.
///
/// ```rust
/// # #[cfg(feature = "foldhash")]
/// # {
/// use chain_hash::HashMultiMap;
///
/// let mut map: HashMultiMap<&str, &str> = HashMultiMap::new();
/// map.insert("fruit", "apple");
/// map.insert("fruit", "pear");
/// map.insert("root", "carrot");
///
/// assert_eq!(map.count(&"fruit"), 2);
/// let fruit: Vec<_> = map.get_all(&"fruit").collect();
/// assert_eq!(fruit, [&"apple", &"pear"]);
/// # }
/// ```
pub struct HashMultiMap<K, V, S = DefaultHashBuilder, P = MixPolicy> {
    table: MultiTable<(K, V), P>,
    hash_builder: S,
}

impl<K, V, S, P> Clone for HashMultiMap<K, V, S, P>
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
        // Hasher first; a panic here leaves `self` untouched.
        let hash_builder = src.hash_builder.clone();
        self.table.clone_from(&src.table);
        self.hash_builder = hash_builder;
    }
}

impl<K, V, S, P> Debug for HashMultiMap<K, V, S, P>
where
    K: Debug,
    V: Debug,
    P: BucketPolicy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, P> HashMultiMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    /// Creates an empty map with the given hasher builder.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty map sized for at least `capacity` entries with
    /// the given hasher builder.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let mut table = MultiTable::new();
        if capacity > 0 {
            table.reserve(capacity);
        }
        Self {
            table,
            hash_builder,
        }
    }

    /// Returns the number of entries in the map, counting every value.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of entries the map can hold before its next
    /// growth.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes all entries, keeping the allocated buckets.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Reserves room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(self.table.len() + additional);
    }

    /// Shrinks the bucket array as far as the current length and load
    /// factor allow.
    pub fn shrink_to_fit(&mut self) {
        self.table.rehash(0);
    }

    fn hash_key<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        P::mix(self.hash_builder.hash_one(key))
    }

    /// Inserts `value` under `key`, keeping any values already bound to
    /// it. The new entry lands at the end of the key's group.
    pub fn insert(&mut self, key: K, value: V) -> &mut V {
        let hash = self.hash_key(&key);
        let entry = self
            .table
            .insert(hash, (key, value), |stored, new| stored.0 == new.0);
        &mut entry.1
    }

    /// Returns a reference to one of the values bound to `key`, the one
    /// inserted earliest.
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.hash_key(key);
        self.table.find(hash, |(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterates every value bound to `key`, in insertion order.
    pub fn get_all(&self, key: &K) -> GroupValues<'_, K, V> {
        let hash = self.hash_key(key);
        GroupValues {
            inner: self.table.group(hash, |(k, _)| k == key),
        }
    }

    /// Returns the number of values bound to `key`.
    pub fn count(&self, key: &K) -> usize {
        let hash = self.hash_key(key);
        self.table.count(hash, |(k, _)| k == key)
    }

    /// Returns `true` if at least one value is bound to `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes every value bound to `key`, returning how many were
    /// removed.
    pub fn remove(&mut self, key: &K) -> usize {
        let hash = self.hash_key(key);
        self.table.remove_group(hash, |(k, _)| k == key)
    }

    /// Removes the earliest-inserted value bound to `key` and returns
    /// it; the rest of the group stays.
    pub fn remove_one(&mut self, key: &K) -> Option<V> {
        let hash = self.hash_key(key);
        self.table.remove_one(hash, |(k, _)| k == key).map(|(_, v)| v)
    }

    /// Keeps only the entries for which `f` returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        self.table.retain(|(k, v)| f(k, v));
    }
}

impl<K, V, S, P: BucketPolicy> HashMultiMap<K, V, S, P> {
    /// Iterates the map's entries. Entries with equal keys come out
    /// adjacent.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Iterates the map's entries with mutable access to the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.table.iter_mut(),
        }
    }

    /// Iterates the map's keys, once per entry.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Iterates the map's values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Removes and yields every entry; dropping the iterator removes
    /// the rest.
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

impl<K, V, S, P> HashMultiMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    /// Creates an empty map using the default hasher builder.
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty map sized for at least `capacity` entries using
    /// the default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<K, V, S, P> Default for HashMultiMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, P> PartialEq for HashMultiMap<K, V, S, P>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
    P: BucketPolicy,
{
    /// Two maps are equal when they bind the same keys to the same
    /// multisets of values; order within a group is not compared.
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.table.groups().all(|group| {
            let Some((key, _)) = group.clone().next() else {
                return true;
            };
            let hash = other.hash_key(key);
            let other_group = other.table.group(hash, |(k, _)| k == key);
            multi_table::group_equals(group, other_group, |a, b| a.0 == b.0 && a.1 == b.1)
        })
    }
}

impl<K, V, S, P> Eq for HashMultiMap<K, V, S, P>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
}

impl<K, V, S, P> Extend<(K, V)> for HashMultiMap<K, V, S, P>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S, P> FromIterator<(K, V)> for HashMultiMap<K, V, S, P>
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

impl<K, V, S, P: BucketPolicy> IntoIterator for HashMultiMap<K, V, S, P> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, P>;

    fn into_iter(self) -> IntoIter<K, V, P> {
        IntoIter {
            inner: self.table.into_iter(),
        }
    }
}

impl<'a, K, V, S, P: BucketPolicy> IntoIterator for &'a HashMultiMap<K, V, S, P> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

/// Iterator over a map's entries.
pub struct Iter<'a, K, V> {
    inner: multi_table::Iter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<(&'a K, &'a V)> {
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

/// Iterator over a map's entries with mutable values.
pub struct IterMut<'a, K, V> {
    inner: multi_table::IterMut<'a, (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<(&'a K, &'a mut V)> {
        self.inner.next().map(|(k, v)| (&*k, v))
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

    fn next(&mut self) -> Option<&'a K> {
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

    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Iterator over the values of one key; see [`HashMultiMap::get_all`].
pub struct GroupValues<'a, K, V> {
    inner: multi_table::GroupIter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for GroupValues<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, v)| v)
    }
}

impl<K, V> Clone for GroupValues<'_, K, V> {
    fn clone(&self) -> Self {
        GroupValues {
            inner: self.inner.clone(),
        }
    }
}

/// Draining iterator over a map's entries.
pub struct Drain<'a, K, V, P = MixPolicy> {
    inner: multi_table::Drain<'a, (K, V), P>,
}

impl<K, V, P> Iterator for Drain<'_, K, V, P> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Owning iterator over a map's entries.
pub struct IntoIter<K, V, P = MixPolicy> {
    inner: multi_table::IntoIter<(K, V), P>,
}

impl<K, V, P> Iterator for IntoIter<K, V, P> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

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

    type TestMultiMap<K, V> = HashMultiMap<K, V, SipHashBuilder>;

    #[test]
    fn insert_appends_within_group() {
        let mut map: TestMultiMap<u32, u32> = HashMultiMap::new();
        map.insert(1, 10);
        map.insert(2, 20);
        map.insert(1, 11);
        map.insert(1, 12);

        assert_eq!(map.len(), 4);
        assert_eq!(map.count(&1), 3);
        assert_eq!(map.count(&2), 1);
        assert_eq!(map.count(&3), 0);

        let ones: Vec<u32> = map.get_all(&1).copied().collect();
        assert_eq!(ones, [10, 11, 12]);
        assert_eq!(map.get(&1), Some(&10));
    }

    #[test]
    fn groups_stay_adjacent_under_growth() {
        let mut map: TestMultiMap<u32, u32> = HashMultiMap::new();
        for i in 0..200 {
            map.insert(i % 10, i);
        }
        assert_eq!(map.len(), 200);

        let mut runs = 0;
        let mut last_key = None;
        for (k, _) in map.iter() {
            if last_key != Some(*k) {
                runs += 1;
                last_key = Some(*k);
            }
        }
        assert_eq!(runs, 10);
        for key in 0..10 {
            assert_eq!(map.count(&key), 20);
        }
    }

    #[test]
    fn remove_takes_whole_group() {
        let mut map: TestMultiMap<u32, &str> = HashMultiMap::new();
        map.insert(1, "a");
        map.insert(1, "b");
        map.insert(2, "c");

        assert_eq!(map.remove(&1), 2);
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&2));
        assert_eq!(map.remove(&1), 0);
    }

    #[test]
    fn remove_one_takes_group_front() {
        let mut map: TestMultiMap<u32, u32> = HashMultiMap::new();
        map.insert(1, 10);
        map.insert(1, 11);
        map.insert(1, 12);

        assert_eq!(map.remove_one(&1), Some(10));
        assert_eq!(map.remove_one(&1), Some(11));
        assert_eq!(map.count(&1), 1);
        assert_eq!(map.remove_one(&1), Some(12));
        assert_eq!(map.remove_one(&1), None);
    }

    #[test]
    fn retain_filters_entries() {
        let mut map: TestMultiMap<u32, u32> = HashMultiMap::new();
        for i in 0..30 {
            map.insert(i % 3, i);
        }
        map.retain(|_, v| *v % 2 == 0);
        assert_eq!(map.len(), 15);
        assert!(map.values().all(|v| v % 2 == 0));
    }

    #[test]
    fn equality_compares_value_multisets() {
        let a: TestMultiMap<u32, u32> =
            [(1, 1), (1, 1), (1, 2), (2, 5)].into_iter().collect();
        let b: TestMultiMap<u32, u32> =
            [(2, 5), (1, 2), (1, 1), (1, 1)].into_iter().collect();
        let c: TestMultiMap<u32, u32> =
            [(1, 1), (1, 2), (1, 2), (2, 5)].into_iter().collect();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn clone_preserves_group_order() {
        let mut map: TestMultiMap<u32, u32> = HashMultiMap::new();
        for i in 0..50 {
            map.insert(i % 5, i);
        }
        let copy = map.clone();
        assert_eq!(copy.len(), 50);
        for key in 0..5 {
            let orig: Vec<u32> = map.get_all(&key).copied().collect();
            let cloned: Vec<u32> = copy.get_all(&key).copied().collect();
            assert_eq!(orig, cloned);
        }
    }

    #[test]
    fn drain_and_into_iter_empty_the_map() {
        let mut map: TestMultiMap<u32, u32> = (0..20).map(|i| (i % 4, i)).collect();
        let drained: Vec<(u32, u32)> = map.drain().collect();
        assert_eq!(drained.len(), 20);
        assert!(map.is_empty());

        let map: TestMultiMap<u32, u32> = (0..20).map(|i| (i % 4, i)).collect();
        let mut owned: Vec<(u32, u32)> = map.into_iter().collect();
        owned.sort_unstable();
        assert_eq!(owned.len(), 20);
    }
}
