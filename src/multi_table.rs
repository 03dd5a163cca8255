//! Grouped chained hash table engine for equal-key multisets.
//!
//! [`MultiTable`] stores any number of elements per key. Equal-key
//! elements form a *group*: a contiguous run of chain nodes threaded by
//! a second `group_prev` ring, so lookups skip whole groups, a full
//! group is erased in one splice, and counting a group never compares
//! keys. Like [`Table`](crate::table::Table), the engine receives
//! pre-mixed hashes and equality closures from its callers and never
//! hashes anything itself.

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
use crate::node::GroupedNode;
use crate::node::NodePool;
use crate::node::Pred;
use crate::policy::BucketPolicy;
use crate::policy::MixPolicy;
use crate::table::DEFAULT_BUCKET_HINT;
use crate::table::MIN_MAX_LOAD_FACTOR;

/// A separate-chaining hash table holding any number of elements per
/// key.
///
/// Equal keys stay adjacent: inserting an element whose key is already
/// present appends it to that key's group, and the group's elements keep
/// their insertion order. Callers provide the policy-mixed hash and an
/// equality predicate with each operation.
///
/// ## Example
///
/// ```rust
/// use chain_hash::policy::BucketPolicy;
/// use chain_hash::policy::MixPolicy;
/// use chain_hash::multi_table::MultiTable;
///
/// let mut table: MultiTable<(u64, &str), MixPolicy> = MultiTable::new();
/// let hash = MixPolicy::mix(1);
/// table.insert(hash, (1, "a"), |&(k, _), _| k == 1);
/// table.insert(hash, (1, "b"), |&(k, _), _| k == 1);
///
/// assert_eq!(table.count(hash, |&(k, _)| k == 1), 2);
/// let values: Vec<&str> = table.group(hash, |&(k, _)| k == 1).map(|&(_, v)| v).collect();
/// assert_eq!(values, ["a", "b"]);
/// ```
pub struct MultiTable<T, P = MixPolicy, A: TableAlloc = Global> {
    buckets: Option<Buckets<GroupedNode<T>>>,
    head: Option<NonNull<GroupedNode<T>>>,
    size: usize,
    bucket_count: usize,
    max_load_factor: f32,
    max_load: usize,
    alloc: A,
    _policy: PhantomData<P>,
}

// SAFETY: The table owns its nodes exclusively; the raw pointers are
// plain ownership, not sharing.
unsafe impl<T: Send, P, A: TableAlloc + Send> Send for MultiTable<T, P, A> {}
// SAFETY: Shared access only reads through the pointers.
unsafe impl<T: Sync, P, A: TableAlloc + Sync> Sync for MultiTable<T, P, A> {}

impl<T, P: BucketPolicy, A: TableAlloc + Default> MultiTable<T, P, A> {
    /// Creates an empty table with the default bucket-count hint.
    pub fn new() -> Self {
        Self::with_buckets_in(DEFAULT_BUCKET_HINT, A::default())
    }

    /// Creates an empty table sized for at least `hint` buckets once it
    /// allocates.
    pub fn with_buckets(hint: usize) -> Self {
        Self::with_buckets_in(hint, A::default())
    }
}

impl<T, P: BucketPolicy, A: TableAlloc + Default> Default for MultiTable<T, P, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: BucketPolicy, A: TableAlloc> MultiTable<T, P, A> {
    /// Creates an empty table with a bucket-count hint and an explicit
    /// allocator. Nothing is allocated until the first insert.
    pub fn with_buckets_in(hint: usize, alloc: A) -> Self {
        MultiTable {
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

    /// Returns the number of elements (not groups) in the table.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the table contains no elements.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the current bucket count.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Largest bucket count the policy and address space allow.
    pub fn max_bucket_count(&self) -> usize {
        P::prev_bucket_count(Buckets::<GroupedNode<T>>::max_count().saturating_sub(1))
    }

    /// Upper bound on the number of elements.
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

    /// Returns the first element of the group matching `hash`/`eq`.
    #[inline]
    pub fn find(&self, hash: u64, eq: impl FnMut(&T) -> bool) -> Option<&T> {
        // SAFETY: The node is reachable, hence live for `'self`.
        self.find_group(hash, eq)
            .map(|n| unsafe { &(*n.as_ptr()).value })
    }

    /// Number of elements in the group matching `hash`/`eq`.
    ///
    /// Counting walks the group ring, so it touches each group member
    /// once and never calls `eq` beyond the group lookup.
    pub fn count(&self, hash: u64, eq: impl FnMut(&T) -> bool) -> usize {
        let Some(first) = self.find_group(hash, eq) else {
            return 0;
        };
        let mut count = 0;
        let mut it = first;
        loop {
            // SAFETY: Group rings only reference live chain nodes.
            it = unsafe { (*it.as_ptr()).group_prev };
            count += 1;
            if it == first {
                return count;
            }
        }
    }

    /// Iterates the group matching `hash`/`eq` in insertion order.
    ///
    /// The iterator is empty when no element matches.
    pub fn group(&self, hash: u64, eq: impl FnMut(&T) -> bool) -> GroupIter<'_, T> {
        match self.find_group(hash, eq) {
            Some(first) => GroupIter {
                cur: Some(first),
                end: Self::next_group(first),
                _marker: PhantomData,
            },
            None => GroupIter {
                cur: None,
                end: None,
                _marker: PhantomData,
            },
        }
    }

    /// Iterates the table one group at a time, yielding a [`GroupIter`]
    /// per group in chain order.
    pub fn groups(&self) -> Groups<'_, T> {
        Groups {
            cur: self.head,
            _marker: PhantomData,
        }
    }

    /// Inserts `value` into the group matching `hash`/`eq`, appending at
    /// the group's end; a new group is started when nothing matches.
    /// `eq` receives a stored element first and the new value second.
    /// Returns a reference to the inserted element.
    pub fn insert(&mut self, hash: u64, value: T, mut eq: impl FnMut(&T, &T) -> bool) -> &mut T {
        // Rehashing relinks but never moves nodes, so a position found
        // before the growth check stays valid.
        let pos = self.find_group(hash, |stored| eq(stored, &value));
        self.reserve_for_insert(self.size + 1);
        let node = self.new_node(hash, value);
        self.add_node(node, pos);
        // SAFETY: Just linked; the table is borrowed exclusively.
        unsafe { &mut (*node.as_ptr()).value }
    }

    /// Removes one element matching `hash`/`eq` and returns it.
    ///
    /// When several elements match, the one closest to its group's front
    /// is taken; the rest of the group is untouched.
    pub fn remove_one(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
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
                Self::split_single(n);
                let value = self.delete_node(prev);
                self.fix_bucket(bucket_index, prev);
                return Some(value);
            }
            prev = Pred::Node(n);
        }
    }

    /// Removes the whole group matching `hash`/`eq`, returning how many
    /// elements were erased.
    ///
    /// This never allocates or calls back into user code other than `eq`.
    pub fn remove_group(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> usize {
        if self.size == 0 {
            return 0;
        }
        let bucket_index = self.bucket_index(hash);
        let Some(bucket_pred) = self.buckets.as_ref().and_then(|b| b.get(bucket_index)) else {
            return 0;
        };
        let mut prev = bucket_pred;
        let first = loop {
            let Some(n) = self.next_of(prev) else {
                return 0;
            };
            // SAFETY: Reachable chain node; the walk only visits group
            // firsts, so `group_prev` is the group's last node.
            let node = unsafe { n.as_ref() };
            if self.bucket_index(node.hash) != bucket_index {
                return 0;
            }
            if node.hash == hash && eq(&node.value) {
                break n;
            }
            prev = Pred::Node(node.group_prev);
        };
        // SAFETY: `first` heads its group; its ring points at the last
        // member, whose successor bounds the group.
        let end = unsafe { (*(*first.as_ptr()).group_prev.as_ptr()).next };
        let mut removed = 0;
        while self.next_of(prev) != end {
            drop(self.delete_node(prev));
            removed += 1;
        }
        self.fix_bucket(bucket_index, prev);
        removed
    }

    /// Keeps only the elements for which `keep` returns `true`.
    ///
    /// The predicate may mutate the element but must not change whatever
    /// determines its hash or key equality. Rejected elements are
    /// detached from their group ring individually, so a group may be
    /// trimmed at its front, middle, or end, or vanish entirely.
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
                Self::split_single(n);
                drop(self.delete_node(prev));
                self.fix_bucket(bucket_index, prev);
            }
        }
    }

    /// Iterates all elements in chain order; groups come out contiguous
    /// and in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            cur: self.head,
            remaining: self.size,
            _marker: PhantomData,
        }
    }

    /// Iterates all elements mutably. Hash- and equality-determining
    /// parts of the values must not be modified.
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
    /// On an empty table only the lazily carried count changes.
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

    /// Takes ownership of `other`'s contents; see
    /// [`Table::move_from`](crate::table::Table::move_from) for the
    /// allocator rules. Groups survive the transfer intact.
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

        // Unequal, non-propagating allocators: rebuild group by group.
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
        while let Some(first) = cur {
            // SAFETY: The nodes came off `other`'s chain, which we now
            // own; each value is moved out exactly once and the storage
            // freed with the allocator it came from. The group end is
            // read before the group's first node is freed.
            unsafe {
                let group_end = Self::next_group(first);
                let mut member = (*first.as_ptr()).next;
                let hash = (*first.as_ptr()).hash;
                let value = ptr::read(&(*first.as_ptr()).value);
                other_alloc.deallocate(first.cast(), Layout::new::<GroupedNode<T>>());
                let pos = pool.acquire();
                Self::init_node(pos, hash, value);
                self.add_node(pos, None);
                while member != group_end {
                    let n = member.expect("group ends before its ring closes");
                    member = (*n.as_ptr()).next;
                    let value = ptr::read(&(*n.as_ptr()).value);
                    other_alloc.deallocate(n.cast(), Layout::new::<GroupedNode<T>>());
                    let storage = pool.acquire();
                    Self::init_node(storage, hash, value);
                    self.add_node(storage, Some(pos));
                }
                cur = group_end;
            }
        }
    }

    /// Swaps the contents of two tables. With a non-propagating
    /// allocator the two handles must compare equal.
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

    #[inline(always)]
    fn next_of(&self, pred: Pred<GroupedNode<T>>) -> Option<NonNull<GroupedNode<T>>> {
        match pred {
            Pred::Start => self.head,
            // SAFETY: Predecessor links always reference live chain nodes.
            Pred::Node(p) => unsafe { (*p.as_ptr()).next },
        }
    }

    #[inline(always)]
    fn set_next_of(&mut self, pred: Pred<GroupedNode<T>>, next: Option<NonNull<GroupedNode<T>>>) {
        match pred {
            Pred::Start => self.head = next,
            // SAFETY: Predecessor links always reference live chain nodes.
            Pred::Node(p) => unsafe { (*p.as_ptr()).next = next },
        }
    }

    /// First node past `first`'s group. `first` must head its group.
    #[inline(always)]
    fn next_group(first: NonNull<GroupedNode<T>>) -> Option<NonNull<GroupedNode<T>>> {
        // SAFETY: A group first's ring points at the group's last node.
        unsafe { (*(*first.as_ptr()).group_prev.as_ptr()).next }
    }

    fn first_in_bucket(&self, index: usize) -> Option<NonNull<GroupedNode<T>>> {
        if self.size == 0 {
            return None;
        }
        let pred = self.buckets.as_ref()?.get(index)?;
        self.next_of(pred)
    }

    /// Finds the first node of the group matching `hash`/`eq`, skipping
    /// a whole group per step.
    fn find_group(
        &self,
        hash: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<NonNull<GroupedNode<T>>> {
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
            cur = Self::next_group(n);
        }
        None
    }

    fn new_node(&mut self, hash: u64, value: T) -> NonNull<GroupedNode<T>> {
        let storage: NonNull<GroupedNode<T>> =
            self.alloc.allocate(Layout::new::<GroupedNode<T>>()).cast();
        // SAFETY: Freshly allocated, properly laid out storage.
        unsafe {
            Self::init_node(storage, hash, value);
        }
        storage
    }

    /// Writes a singleton node into `storage` (its ring points at
    /// itself).
    ///
    /// # Safety
    ///
    /// `storage` must be writable memory of `GroupedNode<T>`'s layout.
    unsafe fn init_node(storage: NonNull<GroupedNode<T>>, hash: u64, value: T) {
        // SAFETY: Per the function contract.
        unsafe {
            storage.write(GroupedNode {
                next: None,
                group_prev: storage,
                hash,
                value,
            });
        }
    }

    /// Links `n` into the table. With `pos` set, `n` joins `pos`'s group
    /// at its end; otherwise `n` starts a new group at the front of its
    /// bucket. `reserve_for_insert` must have been called.
    fn add_node(&mut self, n: NonNull<GroupedNode<T>>, pos: Option<NonNull<GroupedNode<T>>>) {
        // SAFETY: `n` is fully initialized and not yet linked.
        let hash = unsafe { (*n.as_ptr()).hash };
        let bucket_index = self.bucket_index(hash);
        match pos {
            Some(pos) => {
                Self::add_to_node_group(n, pos);
                // Appending at the group's end may land between two
                // buckets' blocks; the following bucket then caches `n`
                // as its new predecessor.
                // SAFETY: `n` was just linked; its successor is live.
                if let Some(next) = unsafe { (*n.as_ptr()).next } {
                    let next_bucket = self.bucket_index(unsafe { (*next.as_ptr()).hash });
                    if next_bucket != bucket_index {
                        self.buckets
                            .as_mut()
                            .expect("buckets allocated")
                            .set(next_bucket, Some(Pred::Node(n)));
                    }
                }
            }
            None => {
                let cached = self
                    .buckets
                    .as_ref()
                    .expect("add_node requires allocated buckets")
                    .get(bucket_index);
                match cached {
                    None => {
                        if let Some(old_head) = self.head {
                            // SAFETY: The head is a live node.
                            let head_bucket =
                                self.bucket_index(unsafe { (*old_head.as_ptr()).hash });
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
                        let first = self.next_of(pred);
                        // SAFETY: `n` is exclusively ours until linked.
                        unsafe {
                            (*n.as_ptr()).next = first;
                        }
                        self.set_next_of(pred, Some(n));
                    }
                }
            }
        }
        self.size += 1;
    }

    /// Appends `n` to the end of `pos`'s group, updating the ring. `pos`
    /// must head its group.
    fn add_to_node_group(n: NonNull<GroupedNode<T>>, pos: NonNull<GroupedNode<T>>) {
        // SAFETY: `pos` heads a live group; `n` is unlinked and
        // exclusively ours. The four writes splice `n` after the group's
        // last node and make it the ring's new last.
        unsafe {
            let last = (*pos.as_ptr()).group_prev;
            (*n.as_ptr()).next = (*last.as_ptr()).next;
            (*n.as_ptr()).group_prev = last;
            (*last.as_ptr()).next = Some(n);
            (*pos.as_ptr()).group_prev = n;
        }
    }

    /// Detaches `n` from its group ring without touching the chain.
    ///
    /// Afterwards `n` is a singleton and both halves of its former group
    /// have consistent rings, so `n` can be spliced out of the chain.
    fn split_single(n: NonNull<GroupedNode<T>>) {
        // SAFETY: All ring pointers reference live nodes of `n`'s group
        // or adjacent groups; the walks terminate because every ring is
        // finite and anchored at its group first.
        unsafe {
            let in_group_prev = {
                let prev = (*n.as_ptr()).group_prev;
                (*prev.as_ptr()).next == Some(n)
            };
            if let Some(j) = (*n.as_ptr()).next {
                // Walk back from the successor to its group first,
                // stopping early if that group turns out to be `n`'s own.
                let mut first = j;
                while first != n {
                    let prev = (*first.as_ptr()).group_prev;
                    if (*prev.as_ptr()).next != Some(first) {
                        break;
                    }
                    first = prev;
                }
                mem::swap(
                    &mut (*first.as_ptr()).group_prev,
                    &mut (*j.as_ptr()).group_prev,
                );
                if first == n {
                    return;
                }
            }
            if in_group_prev {
                let mut first = (*n.as_ptr()).group_prev;
                loop {
                    let prev = (*first.as_ptr()).group_prev;
                    if (*prev.as_ptr()).next != Some(first) {
                        break;
                    }
                    first = prev;
                }
                mem::swap(
                    &mut (*first.as_ptr()).group_prev,
                    &mut (*n.as_ptr()).group_prev,
                );
            }
        }
    }

    /// Unlinks and destroys the node after `pred`, returning its value.
    /// The node's group ring must already exclude it.
    fn delete_node(&mut self, pred: Pred<GroupedNode<T>>) -> T {
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

    fn fix_bucket(&mut self, bucket_index: usize, pred: Pred<GroupedNode<T>>) {
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

    fn min_buckets_for_size(&self, size: usize) -> usize {
        debug_assert!(self.max_load_factor >= MIN_MAX_LOAD_FACTOR);
        let floor = (size as f64 / self.max_load_factor as f64).floor() as usize;
        P::new_bucket_count(floor + 1)
    }

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

    /// Allocates a new bucket array and relinks the chain a whole group
    /// at a time, so groups stay contiguous. Reads cached hashes only.
    fn rehash_impl(&mut self, count: usize) {
        self.create_buckets(count);
        let mut prev = Pred::Start;
        while let Some(first) = self.next_of(prev) {
            // SAFETY: `first` heads the next unplaced group; its ring
            // points at the group's last node.
            let last = unsafe { (*first.as_ptr()).group_prev };
            let hash = unsafe { (*last.as_ptr()).hash };
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
                    prev = Pred::Node(last);
                }
                Some(bucket_pred) => {
                    // Move the whole group to the front of its bucket;
                    // `prev` keeps its position.
                    // SAFETY: All links reference live nodes; the moved
                    // group is disjoint from the already placed block.
                    unsafe {
                        let next = (*last.as_ptr()).next;
                        (*last.as_ptr()).next = self.next_of(bucket_pred);
                        self.set_next_of(bucket_pred, Some(first));
                        self.set_next_of(prev, next);
                    }
                }
            }
        }
    }

    // ---- teardown / bulk rebuild ----

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

    fn recycle_chain(&mut self) -> NodePool<GroupedNode<T>, A> {
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
        use alloc::vec::Vec;

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

            // Group firsts: the ring runs backwards over exactly the
            // chain nodes that follow, all with the same hash.
            let is_first = unsafe { (*node.group_prev.as_ptr()).next != Some(n) };
            assert!(is_first, "chain walk must land on group firsts");
            let mut members = Vec::new();
            let mut cur = Some(n);
            let end = Self::next_group(n);
            while cur != end {
                let c = cur.expect("group ends before its ring closes");
                let cn = unsafe { c.as_ref() };
                assert_eq!(cn.hash, node.hash, "mixed hashes inside a group");
                members.push(c);
                cur = cn.next;
            }
            let mut ring = node.group_prev;
            for expect in members.iter().rev() {
                assert_eq!(ring, *expect, "group ring out of order");
                ring = unsafe { (*ring.as_ptr()).group_prev };
            }
            assert_eq!(ring, node.group_prev, "group ring does not close");
            counted += members.len();
            prev = Pred::Node(node.group_prev);
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
impl<T, P, A: TableAlloc> MultiTable<T, P, A> {
    /// Frees node storage whose value has already been moved out.
    ///
    /// # Safety
    ///
    /// `n` must be an unlinked node from this table's allocator with no
    /// live value.
    unsafe fn free_node_storage(&self, n: NonNull<GroupedNode<T>>) {
        // SAFETY: Per the function contract.
        unsafe {
            self.alloc.deallocate(n.cast(), Layout::new::<GroupedNode<T>>());
        }
    }
}

impl<T, P, A: TableAlloc> Drop for MultiTable<T, P, A> {
    fn drop(&mut self) {
        let mut cur = self.head.take();
        while let Some(n) = cur {
            // SAFETY: Exclusive ownership of the chain at drop time.
            unsafe {
                cur = (*n.as_ptr()).next;
                ptr::drop_in_place(&mut (*n.as_ptr()).value);
                self.alloc
                    .deallocate(n.cast(), Layout::new::<GroupedNode<T>>());
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

impl<T: Clone, P: BucketPolicy, A: TableAlloc> Clone for MultiTable<T, P, A> {
    fn clone(&self) -> Self {
        let mut new = MultiTable::with_buckets_in(1, self.alloc.clone());
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
            let mut pool = NodePool::new(new.alloc.clone());
            new.copy_groups_from(self, &mut pool);
        }
        new
    }

    /// Clone-assignment that recycles the destination's node storage;
    /// see [`Table::clone_from`](crate::table::Table::clone_from).
    fn clone_from(&mut self, src: &Self) {
        if ptr::eq(self, src) {
            return;
        }
        if A::PROPAGATE_ON_CLONE_FROM && self.alloc != src.alloc {
            self.delete_buckets();
            self.alloc = src.alloc.clone();
            self.max_load_factor = src.max_load_factor;
            self.bucket_count = src.min_buckets_for_size(src.size);
            if src.size > 0 {
                let count = self.bucket_count;
                self.create_buckets(count);
                let mut pool = NodePool::new(self.alloc.clone());
                self.copy_groups_from(src, &mut pool);
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
        self.copy_groups_from(src, &mut pool);
    }
}

impl<T: Clone, P: BucketPolicy, A: TableAlloc> MultiTable<T, P, A> {
    /// Copies `src` group by group: the first member of each group is
    /// placed as a fresh group, the rest are appended to it, so group
    /// structure and insertion order carry over.
    fn copy_groups_from(&mut self, src: &Self, pool: &mut NodePool<GroupedNode<T>, A>) {
        let mut cur = src.head;
        while let Some(first) = cur {
            // SAFETY: Source nodes are live for the borrow.
            let group_end = Self::next_group(first);
            let hash = unsafe { (*first.as_ptr()).hash };
            let value = unsafe { (*first.as_ptr()).value.clone() };
            let storage = pool.acquire();
            // SAFETY: Uninitialized node memory from our allocator.
            unsafe {
                Self::init_node(storage, hash, value);
            }
            self.add_node(storage, None);
            let pos = storage;
            cur = unsafe { (*first.as_ptr()).next };
            while cur != group_end {
                let n = cur.expect("group ends before its ring closes");
                // SAFETY: Source nodes are live for the borrow.
                let value = unsafe { (*n.as_ptr()).value.clone() };
                let member = pool.acquire();
                // SAFETY: Uninitialized node memory from our allocator.
                unsafe {
                    Self::init_node(member, hash, value);
                }
                self.add_node(member, Some(pos));
                cur = unsafe { (*n.as_ptr()).next };
            }
        }
    }
}

impl<T: Debug, P: BucketPolicy, A: TableAlloc> Debug for MultiTable<T, P, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MultiTable")
            .field("len", &self.size)
            .field("bucket_count", &self.bucket_count)
            .field("allocated", &self.buckets.is_some())
            .field("max_load", &self.max_load)
            .field("elements", &DebugElements(self))
            .finish()
    }
}

struct DebugElements<'a, T, P, A: TableAlloc>(&'a MultiTable<T, P, A>);

impl<T: Debug, P: BucketPolicy, A: TableAlloc> Debug for DebugElements<'_, T, P, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// Immutable chain-order iterator over a [`MultiTable`].
pub struct Iter<'a, T> {
    cur: Option<NonNull<GroupedNode<T>>>,
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

/// Mutable chain-order iterator over a [`MultiTable`].
pub struct IterMut<'a, T> {
    cur: Option<NonNull<GroupedNode<T>>>,
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

/// Iterator over one equal-key group, in insertion order.
pub struct GroupIter<'a, T> {
    cur: Option<NonNull<GroupedNode<T>>>,
    end: Option<NonNull<GroupedNode<T>>>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for GroupIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.cur == self.end {
            return None;
        }
        let n = self.cur?;
        // SAFETY: The iterator borrows the table; nodes stay live.
        let node = unsafe { &*n.as_ptr() };
        self.cur = node.next;
        Some(&node.value)
    }
}

impl<T> Clone for GroupIter<'_, T> {
    fn clone(&self) -> Self {
        GroupIter {
            cur: self.cur,
            end: self.end,
            _marker: PhantomData,
        }
    }
}

/// Iterator over a table's groups; see [`MultiTable::groups`].
pub struct Groups<'a, T> {
    cur: Option<NonNull<GroupedNode<T>>>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Groups<'a, T> {
    type Item = GroupIter<'a, T>;

    fn next(&mut self) -> Option<GroupIter<'a, T>> {
        let first = self.cur?;
        // SAFETY: A group first's ring points at the group's last node.
        let end = unsafe { (*(*first.as_ptr()).group_prev.as_ptr()).next };
        self.cur = end;
        Some(GroupIter {
            cur: Some(first),
            end,
            _marker: PhantomData,
        })
    }
}

/// Iterator over one bucket of a [`MultiTable`].
pub struct BucketIter<'a, T, P, A: TableAlloc = Global> {
    table: &'a MultiTable<T, P, A>,
    bucket: usize,
    cur: Option<NonNull<GroupedNode<T>>>,
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

/// Draining iterator returned by [`MultiTable::drain`].
pub struct Drain<'a, T, P, A: TableAlloc = Global> {
    table: &'a mut MultiTable<T, P, A>,
    cur: Option<NonNull<GroupedNode<T>>>,
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
    table: MultiTable<T, P, A>,
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

impl<T, P, A: TableAlloc> IntoIterator for MultiTable<T, P, A> {
    type Item = T;
    type IntoIter = IntoIter<T, P, A>;

    fn into_iter(self) -> IntoIter<T, P, A> {
        IntoIter { table: self }
    }
}

impl<'a, T, P: BucketPolicy, A: TableAlloc> IntoIterator for &'a MultiTable<T, P, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Order-insensitive equality of two equal-key groups.
///
/// Compares the common prefix first, so groups built in the same order
/// match in one pass. On a mismatch it falls back to duplicate counting
/// over the diverged suffixes: every distinct value must occur the same
/// number of times on both sides.
pub(crate) fn group_equals<'a, T: 'a>(
    g1: GroupIter<'a, T>,
    g2: GroupIter<'a, T>,
    eq: impl Fn(&T, &T) -> bool,
) -> bool {
    let mut rest1 = g1;
    let mut rest2 = g2;
    loop {
        let Some(a) = rest1.clone().next() else {
            return rest2.next().is_none();
        };
        let Some(b) = rest2.clone().next() else {
            return false;
        };
        if !eq(a, b) {
            break;
        }
        rest1.next();
        rest2.next();
    }

    let suffix1: alloc::vec::Vec<&T> = rest1.collect();
    let suffix2: alloc::vec::Vec<&T> = rest2.collect();
    if suffix1.len() != suffix2.len() {
        return false;
    }
    let occurrences = |hay: &[&T], v: &T| hay.iter().copied().filter(|&u| eq(u, v)).count();
    for (i, &v) in suffix1.iter().enumerate() {
        // A value already handled earlier in the suffix was counted with
        // its first occurrence.
        if suffix1[..i].iter().copied().any(|u| eq(u, v)) {
            continue;
        }
        let in2 = occurrences(&suffix2, v);
        if in2 == 0 || in2 != occurrences(&suffix1[i..], v) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::allocator::testing::CountingAlloc;
    use crate::policy::MixPolicy;
    use crate::policy::PrimePolicy;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn hash_u64(&self, key: u64) -> u64 {
            let mut h = SipHasher::new_with_keys(self.k0, self.k1);
            h.write_u64(key);
            MixPolicy::mix(h.finish())
        }
    }

    fn populated(
        state: &HashState,
        groups: &[(u64, usize)],
    ) -> MultiTable<(u64, usize), MixPolicy> {
        let mut table = MultiTable::new();
        for &(key, len) in groups {
            let hash = state.hash_u64(key);
            for i in 0..len {
                table.insert(hash, (key, i), |&(k, _), _| k == key);
            }
        }
        table.check_invariants();
        table
    }

    #[test]
    fn groups_keep_insertion_order() {
        let state = HashState::default();
        let table = populated(&state, &[(1, 3), (2, 1), (3, 4)]);
        assert_eq!(table.len(), 8);

        let hash = state.hash_u64(3);
        let members: Vec<usize> = table.group(hash, |&(k, _)| k == 3).map(|&(_, i)| i).collect();
        assert_eq!(members, [0, 1, 2, 3]);
        assert_eq!(table.count(hash, |&(k, _)| k == 3), 4);
        assert_eq!(table.find(hash, |&(k, _)| k == 3), Some(&(3, 0)));
    }

    #[test]
    fn missing_group_is_empty() {
        let state = HashState::default();
        let table = populated(&state, &[(1, 2)]);
        let hash = state.hash_u64(9);
        assert_eq!(table.count(hash, |&(k, _)| k == 9), 0);
        assert!(table.find(hash, |&(k, _)| k == 9).is_none());
        assert_eq!(table.group(hash, |&(k, _)| k == 9).count(), 0);
    }

    #[test]
    fn colliding_keys_stay_separate_groups() {
        // Same hash, different keys: the lookup walk must skip over the
        // other key's whole group.
        let mut table: MultiTable<(u64, usize), MixPolicy> = MultiTable::new();
        for i in 0..5 {
            table.insert(7, (1, i), |&(k, _), _| k == 1);
        }
        for i in 0..3 {
            table.insert(7, (2, i), |&(k, _), _| k == 2);
        }
        table.check_invariants();
        assert_eq!(table.count(7, |&(k, _)| k == 1), 5);
        assert_eq!(table.count(7, |&(k, _)| k == 2), 3);
        assert_eq!(table.remove_group(7, |&(k, _)| k == 1), 5);
        table.check_invariants();
        assert_eq!(table.count(7, |&(k, _)| k == 2), 3);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn remove_group_erases_all_members() {
        let state = HashState::default();
        let mut table = populated(&state, &[(1, 3), (2, 4), (3, 2)]);
        let hash = state.hash_u64(2);
        assert_eq!(table.remove_group(hash, |&(k, _)| k == 2), 4);
        table.check_invariants();
        assert_eq!(table.len(), 5);
        assert_eq!(table.count(hash, |&(k, _)| k == 2), 0);
        assert_eq!(table.remove_group(hash, |&(k, _)| k == 2), 0);
    }

    #[test]
    fn remove_one_takes_the_group_front() {
        let state = HashState::default();
        let mut table = populated(&state, &[(5, 3)]);
        let hash = state.hash_u64(5);
        assert_eq!(table.remove_one(hash, |&(k, _)| k == 5), Some((5, 0)));
        table.check_invariants();
        assert_eq!(table.count(hash, |&(k, _)| k == 5), 2);
        let members: Vec<usize> = table.group(hash, |&(k, _)| k == 5).map(|&(_, i)| i).collect();
        assert_eq!(members, [1, 2]);
    }

    #[test]
    fn remove_one_can_target_a_middle_member() {
        let state = HashState::default();
        let mut table = populated(&state, &[(5, 4)]);
        let hash = state.hash_u64(5);
        assert_eq!(
            table.remove_one(hash, |&(k, i)| k == 5 && i == 2),
            Some((5, 2))
        );
        table.check_invariants();
        let members: Vec<usize> = table.group(hash, |&(k, _)| k == 5).map(|&(_, i)| i).collect();
        assert_eq!(members, [0, 1, 3]);
    }

    #[test]
    fn retain_splits_groups_at_every_position() {
        let state = HashState::default();
        // front, middle, end, singleton, whole group
        let mut table = populated(&state, &[(1, 3), (2, 3), (3, 3), (4, 1), (5, 2)]);
        table.retain(|&mut (k, i)| match k {
            1 => i != 0,
            2 => i != 1,
            3 => i != 2,
            4 => false,
            5 => false,
            _ => unreachable!(),
        });
        table.check_invariants();
        assert_eq!(table.len(), 6);
        for (key, expect) in [(1u64, [1, 2]), (2, [0, 2]), (3, [0, 1])] {
            let hash = state.hash_u64(key);
            let members: Vec<usize> = table
                .group(hash, |&(k, _)| k == key)
                .map(|&(_, i)| i)
                .collect();
            assert_eq!(members, expect, "group {key}");
        }
        assert_eq!(table.count(state.hash_u64(4), |&(k, _)| k == 4), 0);
        assert_eq!(table.count(state.hash_u64(5), |&(k, _)| k == 5), 0);
    }

    #[test]
    fn groups_survive_rehash_contiguously() {
        let state = HashState::default();
        let mut table: MultiTable<(u64, usize), MixPolicy> = MultiTable::new();
        for key in 0..200u64 {
            let hash = state.hash_u64(key);
            for i in 0..(key as usize % 4 + 1) {
                table.insert(hash, (key, i), |&(k, _), _| k == key);
            }
        }
        table.check_invariants();
        table.rehash(table.bucket_count() * 4);
        table.check_invariants();
        for key in 0..200u64 {
            let hash = state.hash_u64(key);
            let members: Vec<usize> = table
                .group(hash, |&(k, _)| k == key)
                .map(|&(_, i)| i)
                .collect();
            let expect: Vec<usize> = (0..(key as usize % 4 + 1)).collect();
            assert_eq!(members, expect, "group {key} after rehash");
        }
    }

    #[test]
    fn load_factor_counts_elements_not_groups() {
        let state = HashState::default();
        let mut table: MultiTable<(u64, usize), MixPolicy> = MultiTable::new();
        let hash = state.hash_u64(1);
        for i in 0..500 {
            table.insert(hash, (1, i), |&(k, _), _| k == 1);
            let bound =
                (table.max_load_factor() as f64 * table.bucket_count() as f64).ceil() as usize;
            assert!(table.len() <= bound);
        }
        assert_eq!(table.count(hash, |&(k, _)| k == 1), 500);
    }

    #[test]
    fn prime_policy_growth_thresholds() {
        let mut table: MultiTable<u64, PrimePolicy> = MultiTable::new();
        assert_eq!(table.bucket_count(), 17);
        for k in 1..=20u64 {
            table.insert(k, k, |&v, _| v == k);
            match table.len() {
                l if l <= 17 => assert_eq!(table.bucket_count(), 17, "at len {l}"),
                l => assert_eq!(table.bucket_count(), 29, "at len {l}"),
            }
        }
        table.check_invariants();
    }

    #[test]
    fn groups_iterator_covers_every_group_once() {
        let state = HashState::default();
        let table = populated(&state, &[(1, 2), (2, 3), (3, 1)]);
        let mut keys = Vec::new();
        let mut total = 0;
        for g in table.groups() {
            let members: Vec<(u64, usize)> = g.copied().collect();
            assert!(!members.is_empty());
            let key = members[0].0;
            assert!(members.iter().all(|&(k, _)| k == key), "mixed group");
            keys.push(key);
            total += members.len();
        }
        keys.sort_unstable();
        assert_eq!(keys, [1, 2, 3]);
        assert_eq!(total, table.len());
    }

    #[test]
    fn clone_preserves_group_structure() {
        let state = HashState::default();
        let table = populated(&state, &[(1, 3), (2, 2)]);
        let copy = table.clone();
        copy.check_invariants();
        assert_eq!(copy.len(), 5);
        for key in [1u64, 2] {
            let hash = state.hash_u64(key);
            let a: Vec<(u64, usize)> = table.group(hash, |&(k, _)| k == key).copied().collect();
            let b: Vec<(u64, usize)> = copy.group(hash, |&(k, _)| k == key).copied().collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn clone_from_recycles_node_storage() {
        let state = HashState::default();
        let alloc = CountingAlloc::new();
        let mut dst: MultiTable<(u64, usize), MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, alloc.clone());
        let mut src: MultiTable<(u64, usize), MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, alloc.clone());
        for key in 0..8u64 {
            let hash = state.hash_u64(key);
            for i in 0..3 {
                dst.insert(hash, (key, i), |&(k, _), _| k == key);
                src.insert(hash, (key + 100, i), |&(k, _), _| k == key + 100);
            }
        }
        let live_before = alloc.live();
        dst.clone_from(&src);
        dst.check_invariants();
        assert_eq!(
            alloc.live(),
            live_before,
            "equal-size clone_from should reuse every node"
        );
        for key in 0..8u64 {
            let hash = state.hash_u64(key);
            assert_eq!(dst.count(hash, |&(k, _)| k == key + 100), 3);
        }
    }

    #[test]
    fn move_from_equal_allocators_steals_storage() {
        let state = HashState::default();
        let alloc = CountingAlloc::new();
        let mut src: MultiTable<(u64, usize), MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, alloc.clone());
        for key in 0..8u64 {
            let hash = state.hash_u64(key);
            for i in 0..2 {
                src.insert(hash, (key, i), |&(k, _), _| k == key);
            }
        }
        let live_before = alloc.live();
        let mut dst: MultiTable<(u64, usize), MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, alloc.clone());
        dst.move_from(&mut src);
        assert_eq!(alloc.live(), live_before, "no reallocation expected");
        assert!(src.is_empty());
        src.check_invariants();
        dst.check_invariants();
        assert_eq!(dst.len(), 16);
    }

    #[test]
    fn move_from_unequal_allocators_rebuilds_groups() {
        let state = HashState::default();
        let pool_a = CountingAlloc::new();
        let pool_b = CountingAlloc::new();
        let mut src: MultiTable<(u64, usize), MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, pool_a.clone());
        for key in 0..8u64 {
            let hash = state.hash_u64(key);
            for i in 0..3 {
                src.insert(hash, (key, i), |&(k, _), _| k == key);
            }
        }
        let mut dst: MultiTable<(u64, usize), MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, pool_b.clone());
        dst.move_from(&mut src);
        assert!(src.is_empty(), "source stays valid and empty");
        src.check_invariants();
        dst.check_invariants();
        assert_eq!(dst.len(), 24);
        assert_eq!(
            pool_a.live(),
            1,
            "source nodes freed to their own pool; only its bucket array remains"
        );
        assert_eq!(pool_b.live(), 25, "destination rebuilt from its own pool");
        for key in 0..8u64 {
            let hash = state.hash_u64(key);
            let members: Vec<usize> = dst
                .group(hash, |&(k, _)| k == key)
                .map(|&(_, i)| i)
                .collect();
            assert_eq!(members, [0, 1, 2], "group {key} order after move");
        }
        // The source keeps a usable bucket array; a fresh insert must not
        // trigger a spurious rehash.
        let before = src.bucket_count();
        let hash = state.hash_u64(1000);
        src.insert(hash, (1000, 0), |&(k, _), _| k == 1000);
        assert_eq!(src.bucket_count(), before);
        src.check_invariants();
        drop(src);
        assert_eq!(pool_a.live(), 0, "source storage freed to its own pool");
        drop(dst);
        assert_eq!(pool_b.live(), 0);
    }

    #[test]
    #[should_panic(expected = "swap requires equal allocators")]
    fn swap_across_distinct_pools_panics() {
        let mut a: MultiTable<u64, MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, CountingAlloc::new());
        let mut b: MultiTable<u64, MixPolicy, CountingAlloc> =
            MultiTable::with_buckets_in(11, CountingAlloc::new());
        a.swap(&mut b);
    }

    #[test]
    fn bucket_queries_tolerate_out_of_range_indices() {
        let state = HashState::default();
        let table = populated(&state, &[(1, 4), (2, 4)]);
        let past_end = table.bucket_count() + 100;
        assert_eq!(table.bucket_size(past_end), 0);
        assert_eq!(table.bucket_iter(past_end).count(), 0);
        assert_eq!(table.bucket_size(usize::MAX), 0);
    }

    #[test]
    fn clone_of_empty_table_keeps_bucket_hint() {
        let table: MultiTable<u64, MixPolicy> = MultiTable::with_buckets(100);
        let copy = table.clone();
        assert_eq!(copy.bucket_count(), table.bucket_count());
        assert!(copy.is_empty());
    }

    #[test]
    fn drain_and_clear() {
        let state = HashState::default();
        let mut table = populated(&state, &[(1, 2), (2, 2)]);
        let drained: Vec<(u64, usize)> = table.drain().collect();
        assert_eq!(drained.len(), 4);
        assert!(table.is_empty());
        table.check_invariants();

        let hash = state.hash_u64(1);
        table.insert(hash, (1, 0), |&(k, _), _| k == 1);
        let count = table.bucket_count();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.bucket_count(), count);
    }

    #[test]
    fn drop_frees_everything() {
        let state = HashState::default();
        let alloc = CountingAlloc::new();
        {
            let mut table: MultiTable<String, MixPolicy, CountingAlloc> =
                MultiTable::with_buckets_in(11, alloc.clone());
            for key in 0..20u64 {
                let hash = state.hash_u64(key);
                for _ in 0..2 {
                    table.insert(hash, key.to_string(), |v: &String, new: &String| v == new);
                }
            }
            assert!(alloc.live() > 0);
        }
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn insert_many_groups_keeps_invariants() {
        let state = HashState::default();
        let mut table: MultiTable<(u64, usize), MixPolicy> = MultiTable::new();
        for key in 0..2_000u64 {
            let hash = state.hash_u64(key);
            for i in 0..(key as usize % 3 + 1) {
                table.insert(hash, (key, i), |&(k, _), _| k == key);
            }
        }
        table.check_invariants();
        for key in 0..2_000u64 {
            let hash = state.hash_u64(key);
            assert_eq!(
                table.count(hash, |&(k, _)| k == key),
                key as usize % 3 + 1,
                "group {key}"
            );
        }
    }
}
