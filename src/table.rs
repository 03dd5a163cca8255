//! Unique-key chained hash table engine.
//!
//! [`Table`] stores at most one element per key. Like the wrappers'
//! underlying engines in this crate generally, it never hashes anything
//! itself: every operation receives a pre-mixed hash value and an
//! equality predicate, and the engine only manages buckets, the node
//! chain, and growth. See the crate docs for the chain layout.

use core::alloc::Layout;
use core::cmp;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::ptr::NonNull;

use crate::allocator::Global;
use crate::allocator::TableAlloc;
use crate::node::Buckets;
use crate::node::Node;
use crate::node::NodePool;
use crate::node::Pred;
use crate::policy::BucketPolicy;
use crate::policy::MixPolicy;

/// Smallest max-load-factor the engine accepts; requests below it are
/// clamped so the load threshold can never reach zero.
pub(crate) const MIN_MAX_LOAD_FACTOR: f32 = 1e-3;

/// Bucket-count hint used when none is given.
pub(crate) const DEFAULT_BUCKET_HINT: usize = 11;

/// A separate-chaining hash table holding at most one element per key.
///
/// `Table<T, P, A>` stores values of type `T`, maps hashes to buckets
/// with the [`BucketPolicy`] `P`, and allocates nodes and the bucket
/// array through `A`. Callers provide the hash (already passed through
/// `P::mix`) and an equality predicate with each operation; the wrapper
/// types in this crate do exactly that with a stored `BuildHasher`.
///
/// Elements live in individually allocated nodes that never move once
/// inserted: rehashing relinks the chain but leaves every value at its
/// address.
///
/// ## Example
///
/// ```rust
/// use chain_hash::policy::MixPolicy;
/// use chain_hash::table::Table;
/// use chain_hash::policy::BucketPolicy;
///
/// let mut table: Table<(u64, &str), MixPolicy> = Table::new();
/// let hash = MixPolicy::mix(7);
///
/// table
///     .entry(hash, |&(k, _)| k == 7)
///     .or_insert((7, "seven"));
/// assert_eq!(table.find(hash, |&(k, _)| k == 7), Some(&(7, "seven")));
/// ```
pub struct Table<T, P = MixPolicy, A: TableAlloc = Global> {
    buckets: Option<Buckets<Node<T>>>,
    /// First node of the whole chain; the target of [`Pred::Start`].
    head: Option<NonNull<Node<T>>>,
    size: usize,
    /// Policy-rounded bucket count. Carried even while `buckets` is
    /// unallocated so `rehash` on an empty table stays lazy.
    bucket_count: usize,
    max_load_factor: f32,
    /// `ceil(max_load_factor * bucket_count)` while allocated, else 0.
    max_load: usize,
    alloc: A,
    _policy: PhantomData<P>,
}

// SAFETY: The table owns its nodes exclusively; the raw pointers are
// plain ownership, not sharing.
unsafe impl<T: Send, P, A: TableAlloc + Send> Send for Table<T, P, A> {}
// SAFETY: Shared access only reads through the pointers.
unsafe impl<T: Sync, P, A: TableAlloc + Sync> Sync for Table<T, P, A> {}

impl<T, P: BucketPolicy, A: TableAlloc + Default> Table<T, P, A> {
    /// Creates an empty table with the default bucket-count hint.
    ///
    /// No memory is allocated until the first insert.
    pub fn new() -> Self {
        Self::with_buckets_in(DEFAULT_BUCKET_HINT, A::default())
    }

    /// Creates an empty table sized for at least `hint` buckets once it
    /// allocates.
    pub fn with_buckets(hint: usize) -> Self {
        Self::with_buckets_in(hint, A::default())
    }
}

impl<T, P: BucketPolicy, A: TableAlloc + Default> Default for Table<T, P, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: BucketPolicy, A: TableAlloc> Table<T, P, A> {
    /// Creates an empty table with a bucket-count hint and an explicit
    /// allocator. Nothing is allocated until the first insert.
    pub fn with_buckets_in(hint: usize, alloc: A) -> Self {
        Table {
            buckets: None,
            head: None,
            size: 0,
            bucket_count: P::new_bucket_count(hint),
            max_load_factor: 1.0,
            max_load: 0,
            alloc,
            _policy: PhantomData,
        }
    }

    /// Returns the allocator handle this table allocates from.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Returns the number of elements in the table.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the table contains no elements.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the current bucket count.
    ///
    /// Before the first insert this is the lazily carried, policy-rounded
    /// count the table will allocate with.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Largest bucket count the policy and address space allow.
    pub fn max_bucket_count(&self) -> usize {
        P::prev_bucket_count(Buckets::<Node<T>>::max_count().saturating_sub(1))
    }

    /// Upper bound on the number of elements, derived from the maximum
    /// bucket count and the current max load factor.
    pub fn max_size(&self) -> usize {
        let cap = self.max_bucket_count() as f64;
        (((self.max_load_factor as f64) * cap).ceil() as usize).saturating_sub(1)
    }

    /// Number of elements the table can hold at the current bucket
    /// count without growing.
    pub fn capacity(&self) -> usize {
        ((self.max_load_factor as f64) * self.bucket_count as f64).ceil() as usize
    }

    /// Current load factor, `len / bucket_count`.
    pub fn load_factor(&self) -> f32 {
        debug_assert!(self.bucket_count != 0);
        self.size as f32 / self.bucket_count as f32
    }

    /// Returns the load factor above which an insert triggers growth.
    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Sets the max load factor, clamped to a small positive minimum.
    ///
    /// The new threshold applies from the next insert on; no rehash
    /// happens immediately.
    pub fn set_max_load_factor(&mut self, mlf: f32) {
        self.max_load_factor = mlf.max(MIN_MAX_LOAD_FACTOR);
        self.recalculate_max_load();
    }

    /// Number of elements currently in bucket `index`.
    ///
    /// An out-of-range index holds no elements.
    pub fn bucket_size(&self, index: usize) -> usize {
        if index >= self.bucket_count {
            return 0;
        }
        let mut count = 0;
        let mut cur = self.first_in_bucket(index);
        while let Some(n) = cur {
            // SAFETY: Chain nodes are live while the table is borrowed.
            let node = unsafe { n.as_ref() };
            if self.bucket_index(node.hash) != index {
                break;
            }
            count += 1;
            cur = node.next;
        }
        count
    }

    /// Iterates the elements of bucket `index`.
    ///
    /// The iterator is tied to the current bucket layout: any rehash
    /// redistributes bucket contents, so callers must not keep one across
    /// a mutating operation (the borrow rules enforce this).
    pub fn bucket_iter(&self, index: usize) -> BucketIter<'_, T, P, A> {
        let cur = if index < self.bucket_count {
            self.first_in_bucket(index)
        } else {
            None
        };
        BucketIter {
            table: self,
            bucket: index,
            cur,
        }
    }

    /// Returns a reference to the element matching `hash` and `eq`.
    ///
    /// The walk is bounded to one bucket: it compares cached hashes first
    /// and stops as soon as it crosses into the next bucket's block of
    /// the chain.
    #[inline]
    pub fn find(&self, hash: u64, eq: impl FnMut(&T) -> bool) -> Option<&T> {
        // SAFETY: The node is reachable, hence live for `'self`.
        self.find_node(hash, eq)
            .map(|n| unsafe { &(*n.as_ptr()).value })
    }

    /// Like [`find`](Self::find), returning a mutable reference.
    ///
    /// The parts of the value that determine its hash and equality must
    /// not be modified through the reference.
    #[inline]
    pub fn find_mut(&mut self, hash: u64, eq: impl FnMut(&T) -> bool) -> Option<&mut T> {
        // SAFETY: The node is reachable and we hold `&mut self`.
        self.find_node(hash, eq)
            .map(|n| unsafe { &mut (*n.as_ptr()).value })
    }

    /// Probes for `hash`/`eq` and returns an [`Entry`] for in-place
    /// insertion or modification.
    ///
    /// This is the probe-first insert path: on a duplicate key nothing is
    /// constructed or allocated.
    ///
    /// ```rust
    /// # use chain_hash::policy::{BucketPolicy, MixPolicy};
    /// # use chain_hash::table::{Entry, Table};
    /// let mut table: Table<u64, MixPolicy> = Table::new();
    /// let hash = MixPolicy::mix(3);
    /// match table.entry(hash, |&v| v == 3) {
    ///     Entry::Vacant(e) => {
    ///         e.insert(3);
    ///     }
    ///     Entry::Occupied(_) => unreachable!(),
    /// }
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn entry(&mut self, hash: u64, eq: impl FnMut(&T) -> bool) -> Entry<'_, T, P, A> {
        match self.find_node(hash, eq) {
            Some(node) => Entry::Occupied(OccupiedEntry { table: self, node }),
            None => Entry::Vacant(VacantEntry { table: self, hash }),
        }
    }

    /// Inserts `value`, replacing and returning the previous element that
    /// matched `hash`/`eq`, if any.
    pub fn insert(&mut self, hash: u64, value: T, eq: impl FnMut(&T) -> bool) -> Option<T> {
        match self.entry(hash, eq) {
            Entry::Occupied(e) => {
                // SAFETY: Occupied entries point at a live node.
                let slot = unsafe { &mut (*e.node.as_ptr()).value };
                Some(mem::replace(slot, value))
            }
            Entry::Vacant(e) => {
                e.insert(value);
                None
            }
        }
    }

    /// Removes and returns the element matching `hash`/`eq`.
    ///
    /// This never allocates or calls back into user code other than `eq`,
    /// so a successful match is removed unconditionally.
    pub fn remove(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let bucket_index = self.bucket_index(hash);
        let mut prev = self.buckets.as_ref()?.get(bucket_index)?;
        loop {
            let n = self.next_of(prev)?;
            // SAFETY: Reachable chain node.
            let node = unsafe { n.as_ref() };
            if self.bucket_index(node.hash) != bucket_index {
                return None;
            }
            if node.hash == hash && eq(&node.value) {
                break;
            }
            prev = Pred::Node(n);
        }
        let value = self.delete_node(prev);
        self.fix_bucket(bucket_index, prev);
        Some(value)
    }

    /// Keeps only the elements for which `keep` returns `true`.
    ///
    /// The predicate may mutate the element but must not change whatever
    /// determines its hash.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut T) -> bool) {
        let mut prev = Pred::Start;
        while let Some(n) = self.next_of(prev) {
            // SAFETY: `n` is a reachable node and we hold `&mut self`;
            // the chain is not touched while `keep` runs.
            let (hash, kept) = unsafe {
                let node = &mut *n.as_ptr();
                (node.hash, keep(&mut node.value))
            };
            if kept {
                prev = Pred::Node(n);
            } else {
                let bucket_index = self.bucket_index(hash);
                drop(self.delete_node(prev));
                self.fix_bucket(bucket_index, prev);
            }
        }
    }

    /// Iterates all elements in chain order.
    ///
    /// The order is unspecified but stable while the table is not
    /// mutated; element iterators survive rehashes conceptually because
    /// nodes never move, though the borrow rules already prevent holding
    /// one across a mutation.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            cur: self.head,
            remaining: self.size,
            _marker: PhantomData,
        }
    }

    /// Iterates all elements mutably.
    ///
    /// Hash-determining parts of the values must not be modified.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            cur: self.head,
            remaining: self.size,
            _marker: PhantomData,
        }
    }

    /// Removes and yields every element. Dropping the iterator removes
    /// whatever it has not yielded.
    pub fn drain(&mut self) -> Drain<'_, T, P, A> {
        let cur = self.head.take();
        let remaining = self.size;
        self.size = 0;
        if let Some(b) = self.buckets.as_mut() {
            b.clear();
        }
        Drain {
            table: self,
            cur,
            remaining,
        }
    }

    /// Removes all elements, keeping the bucket array allocated.
    pub fn clear(&mut self) {
        if self.size == 0 {
            return;
        }
        self.free_chain();
        if let Some(b) = self.buckets.as_mut() {
            b.clear();
        }
    }

    /// Rehashes so that the bucket count is at least `min_buckets`
    /// (policy-rounded) and the current load factor constraint holds.
    ///
    /// On an empty table this only reconfigures the lazily carried count
    /// and frees the bucket array; nothing is allocated until the next
    /// insert. Shrinking below what `len` requires is clamped.
    pub fn rehash(&mut self, min_buckets: usize) {
        if self.size == 0 {
            self.delete_buckets();
            self.bucket_count = P::new_bucket_count(min_buckets);
        } else {
            let floor = (self.size as f64 / self.max_load_factor as f64).floor() as usize + 1;
            let wanted = P::new_bucket_count(cmp::max(min_buckets, floor));
            if wanted != self.bucket_count {
                self.rehash_impl(wanted);
            }
        }
    }

    /// Ensures the table can hold at least `capacity` elements without
    /// further growth.
    pub fn reserve(&mut self, capacity: usize) {
        let min_buckets = (capacity as f64 / self.max_load_factor as f64).ceil() as usize;
        self.rehash(min_buckets);
    }

    /// Takes ownership of `other`'s contents.
    ///
    /// When the allocator propagates (or the two allocators compare
    /// equal) the buckets and nodes are transferred wholesale. Otherwise
    /// every element is moved into freshly allocated nodes of `self`'s
    /// allocator, reusing cached hashes, and `other`'s storage is
    /// returned to its own allocator. Either way `other` is left valid
    /// and empty.
    pub fn move_from(&mut self, other: &mut Self) {
        if ptr::eq(self, other) {
            return;
        }
        if A::PROPAGATE_ON_MOVE_FROM || self.alloc == other.alloc {
            self.delete_buckets();
            if A::PROPAGATE_ON_MOVE_FROM {
                self.alloc = other.alloc.clone();
            }
            self.max_load_factor = other.max_load_factor;
            self.max_load = other.max_load;
            self.bucket_count = other.bucket_count;
            self.buckets = other.buckets.take();
            self.head = other.head.take();
            self.size = other.size;
            other.size = 0;
            other.max_load = 0;
            return;
        }

        // Unequal, non-propagating allocators: rebuild element-wise.
        self.max_load_factor = other.max_load_factor;
        self.recalculate_max_load();
        let mut pool = self.recycle_chain();
        if self.buckets.is_none() || other.size >= self.max_load {
            let count = self.min_buckets_for_size(other.size);
            self.create_buckets(count);
        } else {
            self.buckets.as_mut().expect("buckets allocated").clear();
        }

        let other_alloc = other.alloc.clone();
        let mut cur = other.head.take();
        other.size = 0;
        if let Some(b) = other.buckets.as_mut() {
            b.clear();
        }
        // The source keeps its bucket array, so its load ceiling stands.
        other.recalculate_max_load();
        while let Some(n) = cur {
            // SAFETY: `n` came off `other`'s chain, which we now own; the
            // value is moved out exactly once and the storage freed with
            // the allocator it came from.
            unsafe {
                cur = (*n.as_ptr()).next;
                let hash = (*n.as_ptr()).hash;
                let value = ptr::read(&(*n.as_ptr()).value);
                other_alloc.deallocate(n.cast(), Layout::new::<Node<T>>());
                let storage = pool.acquire();
                storage.write(Node {
                    next: None,
                    hash,
                    value,
                });
                self.add_node(storage);
            }
        }
    }

    /// Swaps the contents of two tables.
    ///
    /// With a non-propagating allocator the two handles must compare
    /// equal; swapping distinct pools without propagation would strand
    /// each table's nodes in the other's allocator.
    pub fn swap(&mut self, other: &mut Self) {
        if A::PROPAGATE_ON_SWAP {
            mem::swap(&mut self.alloc, &mut other.alloc);
        } else {
            // Hard check: exchanging storage across distinct pools would
            // free every node through the wrong allocator.
            assert!(
                self.alloc == other.alloc,
                "swap requires equal allocators unless the allocator propagates on swap"
            );
        }
        mem::swap(&mut self.buckets, &mut other.buckets);
        mem::swap(&mut self.head, &mut other.head);
        mem::swap(&mut self.size, &mut other.size);
        mem::swap(&mut self.bucket_count, &mut other.bucket_count);
        mem::swap(&mut self.max_load_factor, &mut other.max_load_factor);
        mem::swap(&mut self.max_load, &mut other.max_load);
    }

    // ---- chain primitives ----

    #[inline(always)]
    fn bucket_index(&self, hash: u64) -> usize {
        P::to_bucket(self.bucket_count, hash)
    }

    /// Node a predecessor link points at.
    #[inline(always)]
    fn next_of(&self, pred: Pred<Node<T>>) -> Option<NonNull<Node<T>>> {
        match pred {
            Pred::Start => self.head,
            // SAFETY: Predecessor links always reference live chain nodes.
            Pred::Node(p) => unsafe { (*p.as_ptr()).next },
        }
    }

    #[inline(always)]
    fn set_next_of(&mut self, pred: Pred<Node<T>>, next: Option<NonNull<Node<T>>>) {
        match pred {
            Pred::Start => self.head = next,
            // SAFETY: Predecessor links always reference live chain nodes.
            Pred::Node(p) => unsafe { (*p.as_ptr()).next = next },
        }
    }

    fn first_in_bucket(&self, index: usize) -> Option<NonNull<Node<T>>> {
        if self.size == 0 {
            return None;
        }
        let pred = self.buckets.as_ref()?.get(index)?;
        self.next_of(pred)
    }

    fn find_node(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<NonNull<Node<T>>> {
        let bucket_index = self.bucket_index(hash);
        let mut cur = self.first_in_bucket(bucket_index);
        while let Some(n) = cur {
            // SAFETY: Reachable chain node.
            let node = unsafe { n.as_ref() };
            if node.hash == hash {
                if eq(&node.value) {
                    return Some(n);
                }
            } else if self.bucket_index(node.hash) != bucket_index {
                return None;
            }
            cur = node.next;
        }
        None
    }

    fn new_node(&mut self, hash: u64, value: T) -> NonNull<Node<T>> {
        let storage: NonNull<Node<T>> = self.alloc.allocate(Layout::new::<Node<T>>()).cast();
        // SAFETY: Freshly allocated, properly laid out storage.
        unsafe {
            storage.write(Node {
                next: None,
                hash,
                value,
            });
        }
        storage
    }

    /// Links `n` in front of its bucket. The node's hash must already be
    /// set and `reserve_for_insert` must have been called.
    fn add_node(&mut self, n: NonNull<Node<T>>) {
        // SAFETY: `n` is a fully initialized, not-yet-linked node.
        let hash = unsafe { (*n.as_ptr()).hash };
        let bucket_index = self.bucket_index(hash);
        let cached = self
            .buckets
            .as_ref()
            .expect("add_node requires allocated buckets")
            .get(bucket_index);
        match cached {
            None => {
                // Empty bucket: push the node to the chain front and let
                // the old head's bucket re-point at the new node.
                if let Some(old_head) = self.head {
                    // SAFETY: The head is a live node.
                    let head_bucket = self.bucket_index(unsafe { (*old_head.as_ptr()).hash });
                    self.buckets
                        .as_mut()
                        .expect("buckets allocated")
                        .set(head_bucket, Some(Pred::Node(n)));
                }
                self.buckets
                    .as_mut()
                    .expect("buckets allocated")
                    .set(bucket_index, Some(Pred::Start));
                // SAFETY: `n` is exclusively ours until linked.
                unsafe {
                    (*n.as_ptr()).next = self.head;
                }
                self.head = Some(n);
            }
            Some(pred) => {
                // Non-empty: splice between the bucket's predecessor and
                // its current first node.
                let first = self.next_of(pred);
                // SAFETY: `n` is exclusively ours until linked.
                unsafe {
                    (*n.as_ptr()).next = first;
                }
                self.set_next_of(pred, Some(n));
            }
        }
        self.size += 1;
    }

    /// Unlinks and destroys the node after `pred`, returning its value.
    fn delete_node(&mut self, pred: Pred<Node<T>>) -> T {
        let n = self.next_of(pred).expect("delete_node at end of chain");
        // SAFETY: `n` is reachable; after the relink nothing references
        // it, so reading the value out and freeing the storage is sound.
        unsafe {
            self.set_next_of(pred, (*n.as_ptr()).next);
            let value = ptr::read(&(*n.as_ptr()).value);
            self.free_node_storage(n);
            self.size -= 1;
            value
        }
    }

    /// Repairs bucket entries after the node following `pred` was
    /// removed: the next node's bucket must re-cache its predecessor, and
    /// `bucket_index` must be marked empty if `pred` was its cached
    /// entry's last use.
    fn fix_bucket(&mut self, bucket_index: usize, pred: Pred<Node<T>>) {
        if let Some(end) = self.next_of(pred) {
            // SAFETY: Reachable chain node.
            let end_bucket = self.bucket_index(unsafe { (*end.as_ptr()).hash });
            if end_bucket == bucket_index {
                return;
            }
            self.buckets
                .as_mut()
                .expect("buckets allocated")
                .set(end_bucket, Some(pred));
        }
        let buckets = self.buckets.as_mut().expect("buckets allocated");
        if buckets.get(bucket_index) == Some(pred) {
            buckets.set(bucket_index, None);
        }
    }

    // ---- growth ----

    fn recalculate_max_load(&mut self) {
        self.max_load = if self.buckets.is_some() {
            ((self.max_load_factor as f64) * self.bucket_count as f64).ceil() as usize
        } else {
            0
        };
    }

    /// Smallest policy-rounded bucket count satisfying
    /// `size < max_load_factor * count`.
    fn min_buckets_for_size(&self, size: usize) -> usize {
        debug_assert!(self.max_load_factor >= MIN_MAX_LOAD_FACTOR);
        let floor = (size as f64 / self.max_load_factor as f64).floor() as usize;
        P::new_bucket_count(floor + 1)
    }

    /// Replaces the bucket array with a fresh, empty one of `count`
    /// entries. The chain is untouched; callers relink or repopulate.
    fn create_buckets(&mut self, count: usize) {
        let new = Buckets::allocate(&self.alloc, count);
        if let Some(mut old) = self.buckets.take() {
            // SAFETY: `old` came from this table's allocator.
            unsafe {
                old.deallocate(&self.alloc);
            }
        }
        self.buckets = Some(new);
        self.bucket_count = count;
        self.recalculate_max_load();
    }

    /// Makes room for a table of `new_size` elements, allocating buckets
    /// lazily on the first insert and growing by at least 1.5x otherwise.
    fn reserve_for_insert(&mut self, new_size: usize) {
        if self.buckets.is_none() {
            let count = cmp::max(self.bucket_count, self.min_buckets_for_size(new_size));
            self.create_buckets(count);
        } else if new_size > self.max_load {
            let grown = cmp::max(new_size, self.size + (self.size >> 1));
            let count = self.min_buckets_for_size(grown);
            if count != self.bucket_count {
                self.rehash_impl(count);
            }
        }
    }

    /// Allocates a new bucket array and relinks every node into it.
    ///
    /// Nodes are never reallocated; only chain links and bucket entries
    /// change. The relink pass reads cached hashes exclusively, so it
    /// cannot unwind.
    fn rehash_impl(&mut self, count: usize) {
        self.create_buckets(count);
        let mut prev = Pred::Start;
        while let Some(n) = self.next_of(prev) {
            // SAFETY: Reachable chain node.
            let hash = unsafe { (*n.as_ptr()).hash };
            let bucket_index = self.bucket_index(hash);
            let cached = self
                .buckets
                .as_ref()
                .expect("buckets allocated")
                .get(bucket_index);
            match cached {
                None => {
                    self.buckets
                        .as_mut()
                        .expect("buckets allocated")
                        .set(bucket_index, Some(prev));
                    prev = Pred::Node(n);
                }
                Some(bucket_pred) => {
                    // Move `n` to the front of its bucket; `prev` keeps
                    // its position and re-examines the node now after it.
                    // SAFETY: All three links reference live nodes.
                    unsafe {
                        self.set_next_of(prev, (*n.as_ptr()).next);
                        (*n.as_ptr()).next = self.next_of(bucket_pred);
                    }
                    self.set_next_of(bucket_pred, Some(n));
                }
            }
        }
    }

    // ---- teardown / bulk rebuild ----

    /// Frees every chain node, leaving bucket entries stale.
    fn free_chain(&mut self) {
        let mut cur = self.head.take();
        while let Some(n) = cur {
            // SAFETY: Exclusive ownership of the chain; each node is
            // destroyed exactly once.
            unsafe {
                cur = (*n.as_ptr()).next;
                ptr::drop_in_place(&mut (*n.as_ptr()).value);
                self.free_node_storage(n);
            }
        }
        self.size = 0;
    }

    /// Frees all nodes and the bucket array, returning to the lazy
    /// (unallocated) state.
    fn delete_buckets(&mut self) {
        self.free_chain();
        if let Some(mut b) = self.buckets.take() {
            // SAFETY: The array came from this table's allocator.
            unsafe {
                b.deallocate(&self.alloc);
            }
        }
        self.max_load = 0;
    }

    /// Tears the chain down into a [`NodePool`], dropping values but
    /// keeping node storage for reuse.
    fn recycle_chain(&mut self) -> NodePool<Node<T>, A> {
        let mut pool = NodePool::new(self.alloc.clone());
        let mut cur = self.head.take();
        while let Some(n) = cur {
            // SAFETY: Exclusive ownership; value dropped before the
            // storage is pooled.
            unsafe {
                cur = (*n.as_ptr()).next;
                ptr::drop_in_place(&mut (*n.as_ptr()).value);
                pool.reclaim(n);
            }
        }
        self.size = 0;
        pool
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        use alloc::collections::BTreeSet;

        let Some(buckets) = self.buckets.as_ref() else {
            assert_eq!(self.size, 0, "nodes reachable without buckets");
            assert!(self.head.is_none());
            assert_eq!(self.max_load, 0);
            return;
        };
        assert_eq!(buckets.count(), self.bucket_count);
        assert!(self.size <= self.max_load, "load factor exceeded");

        let mut counted = 0;
        let mut seen_buckets = BTreeSet::new();
        let mut prev = Pred::Start;
        let mut current_bucket = None;
        while let Some(n) = self.next_of(prev) {
            let node = unsafe { n.as_ref() };
            let bi = self.bucket_index(node.hash);
            if current_bucket != Some(bi) {
                assert!(
                    seen_buckets.insert(bi),
                    "bucket {bi} split across the chain"
                );
                assert_eq!(
                    buckets.get(bi),
                    Some(prev),
                    "bucket {bi} predecessor entry is stale"
                );
                current_bucket = Some(bi);
            }
            counted += 1;
            prev = Pred::Node(n);
        }
        assert_eq!(counted, self.size, "size counter out of sync");
        for i in 0..buckets.count() {
            if !seen_buckets.contains(&i) {
                assert!(buckets.get(i).is_none(), "empty bucket {i} has an entry");
            }
        }
    }
}

// No policy bound: the draining iterators only free storage, and their
// `Drop` impls cannot require more than the struct declares.
impl<T, P, A: TableAlloc> Table<T, P, A> {
    /// Frees node storage whose value has already been moved out.
    ///
    /// # Safety
    ///
    /// `n` must be an unlinked node from this table's allocator with no
    /// live value.
    unsafe fn free_node_storage(&self, n: NonNull<Node<T>>) {
        // SAFETY: Per the function contract.
        unsafe {
            self.alloc.deallocate(n.cast(), Layout::new::<Node<T>>());
        }
    }
}

impl<T, P, A: TableAlloc> Drop for Table<T, P, A> {
    fn drop(&mut self) {
        let mut cur = self.head.take();
        while let Some(n) = cur {
            // SAFETY: Exclusive ownership of the chain at drop time.
            unsafe {
                cur = (*n.as_ptr()).next;
                ptr::drop_in_place(&mut (*n.as_ptr()).value);
                self.alloc.deallocate(n.cast(), Layout::new::<Node<T>>());
            }
        }
        if let Some(mut b) = self.buckets.take() {
            // SAFETY: The array came from this table's allocator.
            unsafe {
                b.deallocate(&self.alloc);
            }
        }
    }
}

impl<T: Clone, P: BucketPolicy, A: TableAlloc> Clone for Table<T, P, A> {
    fn clone(&self) -> Self {
        let mut new = Table::with_buckets_in(1, self.alloc.clone());
        new.max_load_factor = self.max_load_factor;
        // An empty source still carries its bucket-count hint.
        new.bucket_count = if self.size == 0 {
            self.bucket_count
        } else {
            self.min_buckets_for_size(self.size)
        };
        if self.size > 0 {
            let count = new.bucket_count;
            new.create_buckets(count);
            let mut cur = self.head;
            while let Some(n) = cur {
                // SAFETY: Source nodes are live for the borrow.
                let node = unsafe { n.as_ref() };
                let value = node.value.clone();
                let fresh = new.new_node(node.hash, value);
                new.add_node(fresh);
                cur = node.next;
            }
        }
        new
    }

    /// Clone-assignment that recycles the destination's node storage.
    ///
    /// Old values are dropped and their nodes pooled before the copy, so
    /// an equal-sized assignment allocates nothing; a panicking value
    /// clone leaves the table valid with the elements copied so far.
    fn clone_from(&mut self, src: &Self) {
        if ptr::eq(self, src) {
            return;
        }
        if A::PROPAGATE_ON_CLONE_FROM && self.alloc != src.alloc {
            // Everything owned so far must go back to the old allocator
            // before the handle is replaced.
            self.delete_buckets();
            self.alloc = src.alloc.clone();
            self.max_load_factor = src.max_load_factor;
            self.bucket_count = src.min_buckets_for_size(src.size);
            if src.size > 0 {
                let count = self.bucket_count;
                self.create_buckets(count);
                let mut pool = NodePool::new(self.alloc.clone());
                self.copy_nodes_from(src, &mut pool);
            }
            return;
        }
        if A::PROPAGATE_ON_CLONE_FROM {
            self.alloc = src.alloc.clone();
        }
        self.max_load_factor = src.max_load_factor;
        self.recalculate_max_load();
        if self.size == 0 && src.size == 0 {
            return;
        }
        let mut pool = self.recycle_chain();
        if self.buckets.is_none() || src.size >= self.max_load {
            let count = self.min_buckets_for_size(src.size);
            self.create_buckets(count);
        } else {
            self.buckets.as_mut().expect("buckets allocated").clear();
        }
        self.copy_nodes_from(src, &mut pool);
    }
}

impl<T: Clone, P: BucketPolicy, A: TableAlloc> Table<T, P, A> {
    fn copy_nodes_from(&mut self, src: &Self, pool: &mut NodePool<Node<T>, A>) {
        let mut cur = src.head;
        while let Some(n) = cur {
            // SAFETY: Source nodes are live for the borrow.
            let node = unsafe { n.as_ref() };
            let value = node.value.clone();
            let storage = pool.acquire();
            // SAFETY: `storage` is uninitialized node memory from our
            // allocator.
            unsafe {
                storage.write(Node {
                    next: None,
                    hash: node.hash,
                    value,
                });
            }
            self.add_node(storage);
            cur = node.next;
        }
    }
}

impl<T: Debug, P: BucketPolicy, A: TableAlloc> Debug for Table<T, P, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Table")
            .field("len", &self.size)
            .field("bucket_count", &self.bucket_count)
            .field("allocated", &self.buckets.is_some())
            .field("max_load", &self.max_load)
            .field("elements", &DebugElements(self))
            .finish()
    }
}

struct DebugElements<'a, T, P, A: TableAlloc>(&'a Table<T, P, A>);

impl<T: Debug, P: BucketPolicy, A: TableAlloc> Debug for DebugElements<'_, T, P, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// A view into a single element slot of a [`Table`], occupied or vacant.
pub enum Entry<'a, T, P, A: TableAlloc = Global> {
    /// The probe found a matching element.
    Occupied(OccupiedEntry<'a, T, P, A>),
    /// No element matched; inserting through this entry reuses the
    /// already computed hash.
    Vacant(VacantEntry<'a, T, P, A>),
}

impl<'a, T, P: BucketPolicy, A: TableAlloc> Entry<'a, T, P, A> {
    /// Returns the matching element, inserting `default` first if absent.
    pub fn or_insert(self, default: T) -> &'a mut T {
        match self {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(default),
        }
    }

    /// Returns the matching element, inserting `default()` if absent.
    pub fn or_insert_with(self, default: impl FnOnce() -> T) -> &'a mut T {
        match self {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(default()),
        }
    }
}

/// An occupied [`Entry`].
pub struct OccupiedEntry<'a, T, P, A: TableAlloc = Global> {
    table: &'a mut Table<T, P, A>,
    node: NonNull<Node<T>>,
}

impl<'a, T, P: BucketPolicy, A: TableAlloc> OccupiedEntry<'a, T, P, A> {
    /// Returns a reference to the element.
    pub fn get(&self) -> &T {
        // SAFETY: The entry borrows the table; the node stays live.
        unsafe { &(*self.node.as_ptr()).value }
    }

    /// Returns a mutable reference to the element.
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: Exclusive borrow of the table.
        unsafe { &mut (*self.node.as_ptr()).value }
    }

    /// Converts the entry into a mutable reference bound to the table.
    pub fn into_mut(self) -> &'a mut T {
        // SAFETY: Exclusive borrow of the table for `'a`.
        unsafe { &mut (*self.node.as_ptr()).value }
    }

    /// Removes the element and returns it.
    pub fn remove(self) -> T {
        // SAFETY: The node is reachable while the entry exists.
        let hash = unsafe { (*self.node.as_ptr()).hash };
        let bucket_index = self.table.bucket_index(hash);
        let mut prev = self
            .table
            .buckets
            .as_ref()
            .expect("occupied entry in unallocated table")
            .get(bucket_index)
            .expect("occupied entry in empty bucket");
        while self.table.next_of(prev) != Some(self.node) {
            let n = self
                .table
                .next_of(prev)
                .expect("occupied entry not on its bucket chain");
            prev = Pred::Node(n);
        }
        let value = self.table.delete_node(prev);
        self.table.fix_bucket(bucket_index, prev);
        value
    }
}

/// A vacant [`Entry`].
pub struct VacantEntry<'a, T, P, A: TableAlloc = Global> {
    table: &'a mut Table<T, P, A>,
    hash: u64,
}

impl<'a, T, P: BucketPolicy, A: TableAlloc> VacantEntry<'a, T, P, A> {
    /// The hash this entry was probed with.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Inserts `value` and returns a reference to it.
    ///
    /// Growth happens before the node is linked; if the table cannot
    /// grow, nothing is inserted.
    pub fn insert(self, value: T) -> &'a mut T {
        self.table.reserve_for_insert(self.table.size + 1);
        let node = self.table.new_node(self.hash, value);
        self.table.add_node(node);
        // SAFETY: The node was just linked; the table is borrowed
        // exclusively for `'a`.
        unsafe { &mut (*node.as_ptr()).value }
    }
}

/// Immutable chain-order iterator over a [`Table`].
pub struct Iter<'a, T> {
    cur: Option<NonNull<Node<T>>>,
    remaining: usize,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let n = self.cur?;
        // SAFETY: The iterator borrows the table; nodes stay live.
        let node = unsafe { &*n.as_ptr() };
        self.cur = node.next;
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Iter {
            cur: self.cur,
            remaining: self.remaining,
            _marker: PhantomData,
        }
    }
}

/// Mutable chain-order iterator over a [`Table`].
pub struct IterMut<'a, T> {
    cur: Option<NonNull<Node<T>>>,
    remaining: usize,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<&'a mut T> {
        let n = self.cur?;
        // SAFETY: Exclusive borrow of the table; each node is yielded at
        // most once.
        let node = unsafe { &mut *n.as_ptr() };
        self.cur = node.next;
        self.remaining -= 1;
        Some(&mut node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}

/// Iterator over one bucket of a [`Table`]; see
/// [`bucket_iter`](Table::bucket_iter).
pub struct BucketIter<'a, T, P, A: TableAlloc = Global> {
    table: &'a Table<T, P, A>,
    bucket: usize,
    cur: Option<NonNull<Node<T>>>,
}

impl<'a, T, P: BucketPolicy, A: TableAlloc> Iterator for BucketIter<'a, T, P, A> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let n = self.cur?;
        // SAFETY: The iterator borrows the table; nodes stay live.
        let node = unsafe { &*n.as_ptr() };
        if self.table.bucket_index(node.hash) != self.bucket {
            self.cur = None;
            return None;
        }
        self.cur = node.next;
        Some(&node.value)
    }
}

/// Draining iterator returned by [`Table::drain`].
pub struct Drain<'a, T, P, A: TableAlloc = Global> {
    table: &'a mut Table<T, P, A>,
    cur: Option<NonNull<Node<T>>>,
    remaining: usize,
}

impl<T, P, A: TableAlloc> Iterator for Drain<'_, T, P, A> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let n = self.cur?;
        // SAFETY: The drained chain is owned by the iterator; each node
        // is read out and freed exactly once.
        unsafe {
            self.cur = (*n.as_ptr()).next;
            let value = ptr::read(&(*n.as_ptr()).value);
            self.table.free_node_storage(n);
            self.remaining -= 1;
            Some(value)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T, P, A: TableAlloc> ExactSizeIterator for Drain<'_, T, P, A> {}

impl<T, P, A: TableAlloc> Drop for Drain<'_, T, P, A> {
    fn drop(&mut self) {
        while self.next().is_some() {}
    }
}

/// Consuming chain-order iterator.
pub struct IntoIter<T, P, A: TableAlloc = Global> {
    table: Table<T, P, A>,
}

impl<T, P, A: TableAlloc> Iterator for IntoIter<T, P, A> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let n = self.table.head?;
        // SAFETY: The iterator owns the table; popping the head keeps the
        // chain and size consistent for the table's drop glue.
        unsafe {
            self.table.head = (*n.as_ptr()).next;
            let value = ptr::read(&(*n.as_ptr()).value);
            self.table.free_node_storage(n);
            self.table.size -= 1;
            Some(value)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.table.size, Some(self.table.size))
    }
}

impl<T, P, A: TableAlloc> ExactSizeIterator for IntoIter<T, P, A> {}

impl<T, P, A: TableAlloc> IntoIterator for Table<T, P, A> {
    type Item = T;
    type IntoIter = IntoIter<T, P, A>;

    fn into_iter(self) -> IntoIter<T, P, A> {
        IntoIter { table: self }
    }
}

impl<'a, T, P: BucketPolicy, A: TableAlloc> IntoIterator for &'a Table<T, P, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
