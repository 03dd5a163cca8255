//! A hash set allowing repeated elements, over the grouped table
//! engine.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::DefaultHashBuilder;
use crate::multi_table;
use crate::multi_table::MultiTable;
use crate::policy::BucketPolicy;
use crate::policy::MixPolicy;

/// A hash set that keeps every inserted element, equal ones included.
///
/// Equal elements form a contiguous group and iterate adjacently, in
/// insertion order within the group. Hashing goes through the builder
/// `S` and bucket placement through the [`BucketPolicy`] `P`.
///
/// ```rust
/// # #[cfg(feature = "foldhash")]
/// # {
/// use chain_hash::HashMultiSet;
///
/// let mut set: HashMultiSet<&str> = HashMultiSet::new();
/// set.insert("a");
/// set.insert("b");
/// set.insert("a");
///
/// assert_eq!(set.len(), 3);
/// assert_eq!(set.count(&"a"), 2);
/// # }
/// ```
pub struct HashMultiSet<T, S = DefaultHashBuilder, P = MixPolicy> {
    table: MultiTable<T, P>,
    hash_builder: S,
}

impl<T, S, P> Clone for HashMultiSet<T, S, P>
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

impl<T, S, P> Debug for HashMultiSet<T, S, P>
where
    T: Debug,
    P: BucketPolicy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S, P> HashMultiSet<T, S, P>
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
        let mut table = MultiTable::new();
        if capacity > 0 {
            table.reserve(capacity);
        }
        Self {
            table,
            hash_builder,
        }
    }

    /// Returns the number of elements in the set, repeats included.
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

    /// Adds `value` to the set, keeping any equal elements already
    /// present. The new element lands at the end of its group.
    pub fn insert(&mut self, value: T) {
        let hash = self.hash_value(&value);
        self.table.insert(hash, value, |stored, new| stored == new);
    }

    /// Returns `true` if the set contains at least one element equal to
    /// `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// Returns a reference to the earliest-inserted element equal to
    /// `value`.
    pub fn get(&self, value: &T) -> Option<&T> {
        let hash = self.hash_value(value);
        self.table.find(hash, |v| v == value)
    }

    /// Returns the number of elements equal to `value`.
    pub fn count(&self, value: &T) -> usize {
        let hash = self.hash_value(value);
        self.table.count(hash, |v| v == value)
    }

    /// Iterates the elements equal to `value`, in insertion order.
    pub fn get_all(&self, value: &T) -> GroupIter<'_, T> {
        let hash = self.hash_value(value);
        self.table.group(hash, |v| v == value)
    }

    /// Removes one element equal to `value` and returns it, leaving any
    /// remaining equal elements in place.
    pub fn remove_one(&mut self, value: &T) -> Option<T> {
        let hash = self.hash_value(value);
        self.table.remove_one(hash, |v| v == value)
    }

    /// Removes every element equal to `value`, returning how many were
    /// removed.
    pub fn remove_all(&mut self, value: &T) -> usize {
        let hash = self.hash_value(value);
        self.table.remove_group(hash, |v| v == value)
    }

    /// Keeps only the elements for which `f` returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&T) -> bool) {
        self.table.retain(|v| f(v));
    }
}

impl<T, S, P: BucketPolicy> HashMultiSet<T, S, P> {
    /// Iterates the set's elements. Equal elements come out adjacent.
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

impl<T, S, P> HashMultiSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    /// Creates an empty set using the default hasher builder.
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty set sized for at least `capacity` elements
    /// using the default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<T, S, P> Default for HashMultiSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    P: BucketPolicy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S, P> PartialEq for HashMultiSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
    /// Two sets are equal when every element occurs the same number of
    /// times in both.
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        // Group membership is total equality here, so comparing group
        // lengths is enough.
        self.table.groups().all(|group| {
            let Some(value) = group.clone().next() else {
                return true;
            };
            let hash = other.hash_value(value);
            group.count() == other.table.count(hash, |v| v == value)
        })
    }
}

impl<T, S, P> Eq for HashMultiSet<T, S, P>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: BucketPolicy,
{
}

impl<T, S, P> Extend<T> for HashMultiSet<T, S, P>
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

impl<T, S, P> FromIterator<T> for HashMultiSet<T, S, P>
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

impl<T, S, P: BucketPolicy> IntoIterator for HashMultiSet<T, S, P> {
    type Item = T;
    type IntoIter = IntoIter<T, P>;

    fn into_iter(self) -> IntoIter<T, P> {
        IntoIter {
            inner: self.table.into_iter(),
        }
    }
}

impl<'a, T, S, P: BucketPolicy> IntoIterator for &'a HashMultiSet<T, S, P> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Iterator over one group of equal elements.
pub type GroupIter<'a, T> = multi_table::GroupIter<'a, T>;

/// Iterator over a set's elements.
pub struct Iter<'a, T> {
    inner: multi_table::Iter<'a, T>,
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
    inner: multi_table::Drain<'a, T, P>,
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
    inner: multi_table::IntoIter<T, P>,
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
