//! A unique-element hash set over the chained table engine.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::mem;

use crate::DefaultHashBuilder;
use crate::policy::BucketPolicy;
use crate::policy::MixPolicy;
use crate::table;
use crate::table::Entry as TableEntry;
use crate::table::Table;

/// A hash set implemented over the chained [`Table`] engine.
///
/// `HashSet<T, S, P>` stores values implementing `Hash + Eq`, hashed
/// with the builder `S` and placed through the [`BucketPolicy`] `P`.
/// See [`HashMap`](crate::HashMap) for the policy trade-offs.
pub struct HashSet<T, S = DefaultHashBuilder, P = MixPolicy> {
    table: Table<T, P>,
    hash_builder: S,
}

impl<T, S, P> Clone for HashSet<T, S, P>
where
    T: Clone,
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

impl<T, S, P> Debug for HashSet<T, S, P>
where
    T: Debug,
    P: BucketPolicy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S, P> HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    /// Creates an empty set with the given hasher builder.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty set sized for at least `capacity` elements with
    /// the given hasher builder.
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

    /// Returns the number of elements in the set.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of elements the set can hold before its next
    /// growth.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
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

    fn hash_value(&self, value: &T) -> u64 {
        P::mix(self.hash_builder.hash_one(value))
    }

    /// Adds `value` to the set. Returns `true` if it was not already
    /// present.
    ///
    /// ```rust
    /// # #[cfg(feature = "foldhash")]
    /// # {
    /// use chain_hash::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// assert!(set.insert(2));
    /// assert!(!set.insert(2));
    /// assert_eq!(set.len(), 1);
    /// # }
    /// ```
    pub fn insert(&mut self, value: T) -> bool {
        let hash = self.hash_value(&value);
        match self.table.entry(hash, |v| *v == value) {
            TableEntry::Occupied(_) => false,
            TableEntry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    /// Adds `value`, replacing and returning an equal element if one
    /// was present.
    pub fn replace(&mut self, value: T) -> Option<T> {
        let hash = self.hash_value(&value);
        match self.table.entry(hash, |v| *v == value) {
            TableEntry::Occupied(entry) => Some(mem::replace(entry.into_mut(), value)),
            TableEntry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    /// Returns `true` if the set contains `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// Returns a reference to the stored element equal to `value`.
    pub fn get(&self, value: &T) -> Option<&T> {
        let hash = self.hash_value(value);
        self.table.find(hash, |v| v == value)
    }

    /// Removes `value` from the set. Returns `true` if it was present.
    pub fn remove(&mut self, value: &T) -> bool {
        self.take(value).is_some()
    }

    /// Removes and returns the stored element equal to `value`.
    pub fn take(&mut self, value: &T) -> Option<T> {
        let hash = self.hash_value(value);
        self.table.remove(hash, |v| v == value)
    }

    /// Keeps only the elements for which `f` returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&T) -> bool) {
        self.table.retain(|v| f(v));
    }

    /// Returns `true` if `self` and `other` share no elements.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        if self.len() <= other.len() {
            self.iter().all(|v| !other.contains(v))
        } else {
            other.iter().all(|v| !self.contains(v))
        }
    }

    /// Returns `true` if every element of `self` is in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|v| other.contains(v))
    }

    /// Returns `true` if every element of `other` is in `self`.
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }
}

impl<T, S, P: BucketPolicy> HashSet<T, S, P> {
    /// Iterates the set's elements.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Removes and yields every element; dropping the iterator removes
    /// the rest.
    pub fn drain(&mut self) -> Drain<'_, T, P> {
        Drain {
            inner: self.table.drain(),
        }
    }

    /// Returns a reference to the set's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }
}

impl<T, S, P> HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    /// Creates an empty set using the default hasher builder.
    ///
    /// ```rust
    /// # #[cfg(feature = "foldhash")]
    /// # {
    /// use chain_hash::HashSet;
    ///
    /// let set: HashSet<i32> = HashSet::new();
    /// assert!(set.is_empty());
    /// # }
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty set sized for at least `capacity` elements
    /// using the default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<T, S, P> Default for HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S, P> PartialEq for HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(v))
    }
}

impl<T, S, P> Eq for HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
}

impl<T, S, P> Extend<T> for HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for v in iter {
            self.insert(v);
        }
    }
}

impl<T, S, P> FromIterator<T> for HashSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<T, S, P: BucketPolicy> IntoIterator for HashSet<T, S, P> {
    type Item = T;
    type IntoIter = IntoIter<T, P>;

    fn into_iter(self) -> IntoIter<T, P> {
        IntoIter {
            inner: self.table.into_iter(),
        }
    }
}

impl<'a, T, S, P: BucketPolicy> IntoIterator for &'a HashSet<T, S, P> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Iterator over a set's elements.
pub struct Iter<'a, T> {
    inner: table::Iter<'a, T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

/// Draining iterator over a set's elements.
pub struct Drain<'a, T, P = MixPolicy> {
    inner: table::Drain<'a, T, P>,
}

impl<T, P> Iterator for Drain<'_, T, P> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Owning iterator over a set's elements.
pub struct IntoIter<T, P = MixPolicy> {
    inner: table::IntoIter<T, P>,
}

impl<T, P> Iterator for IntoIter<T, P> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
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

    type TestSet<T> = HashSet<T, SipHashBuilder>;

    #[test]
    fn insert_contains_remove() {
        let mut set: TestSet<u32> = HashSet::new();
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert!(set.contains(&1));
        assert!(!set.contains(&2));
        assert!(set.remove(&1));
        assert!(!set.remove(&1));
        assert!(set.is_empty());
    }

    #[test]
    fn take_returns_stored_element() {
        let mut set: TestSet<u32> = HashSet::new();
        set.insert(5);
        assert_eq!(set.take(&5), Some(5));
        assert_eq!(set.take(&5), None);
    }

    #[test]
    fn replace_swaps_equal_element() {
        #[derive(Clone, Copy, Debug)]
        struct Tagged(u32, u32);
        impl core::hash::Hash for Tagged {
            fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
                self.0.hash(state);
            }
        }
        impl PartialEq for Tagged {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }
        impl Eq for Tagged {}

        let mut set: TestSet<Tagged> = HashSet::new();
        assert!(set.replace(Tagged(1, 10)).is_none());
        let old = set.replace(Tagged(1, 20)).unwrap();
        assert_eq!(old.1, 10);
        assert_eq!(set.get(&Tagged(1, 0)).unwrap().1, 20);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn retain_and_drain() {
        let mut set: TestSet<u32> = (0..100).collect();
        set.retain(|v| v % 3 == 0);
        assert_eq!(set.len(), 34);

        let drained: Vec<u32> = set.drain().collect();
        assert_eq!(drained.len(), 34);
        assert!(set.is_empty());
    }

    #[test]
    fn set_relations() {
        let a: TestSet<u32> = (0..10).collect();
        let b: TestSet<u32> = (0..5).collect();
        let c: TestSet<u32> = (20..25).collect();
        assert!(b.is_subset(&a));
        assert!(a.is_superset(&b));
        assert!(!a.is_subset(&b));
        assert!(a.is_disjoint(&c));
        assert!(!a.is_disjoint(&b));
    }

    #[test]
    fn equality_ignores_order() {
        let a: TestSet<u32> = (0..30).collect();
        let b: TestSet<u32> = (0..30).rev().collect();
        assert_eq!(a, b);
        let c: TestSet<u32> = (0..29).collect();
        assert_ne!(a, c);
    }

    #[test]
    fn clone_preserves_contents() {
        let a: TestSet<u32> = (0..50).collect();
        let b = a.clone();
        assert_eq!(a, b);

        let mut c: TestSet<u32> = (100..110).collect();
        c.clone_from(&a);
        assert_eq!(c, a);
    }

    #[test]
    fn into_iter_yields_everything() {
        let set: TestSet<u32> = (0..10).collect();
        let mut values: Vec<u32> = set.into_iter().collect();
        values.sort_unstable();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }
}
