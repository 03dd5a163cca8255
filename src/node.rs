//! Node storage, predecessor links, and the bucket array.
//!
//! Both engines store their elements in individually allocated nodes
//! threaded onto one global singly-linked chain. A bucket does not point
//! at its first node; it points at the node *preceding* its first node,
//! so unlinking and front-insertion never have to rewrite more than one
//! `next` slot. The predecessor of the very first node in the chain is
//! the chain head slot itself, which [`Pred::Start`] stands for; no
//! sentinel node is ever allocated.

use core::alloc::Layout;
use core::ptr::NonNull;

use alloc::vec::Vec;

use crate::allocator::TableAlloc;

/// Predecessor link: where a node's incoming `next` slot lives.
///
/// `Start` is the table's chain head slot; `Node(p)` is the `next` slot
/// of node `p`. Exactly one `Pred` (materialized or not) exists per
/// reachable node.
pub(crate) enum Pred<N> {
    Start,
    Node(NonNull<N>),
}

impl<N> Clone for Pred<N> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for Pred<N> {}

impl<N> PartialEq for Pred<N> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Pred::Start, Pred::Start) => true,
            (Pred::Node(a), Pred::Node(b)) => a == b,
            _ => false,
        }
    }
}

impl<N> core::fmt::Debug for Pred<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Pred::Start => f.write_str("Start"),
            Pred::Node(p) => write!(f, "Node({p:p})"),
        }
    }
}

/// Chain node of the unique-key engine.
pub(crate) struct Node<T> {
    pub(crate) next: Option<NonNull<Node<T>>>,
    /// Cached post-mix hash of the value's key.
    pub(crate) hash: u64,
    pub(crate) value: T,
}

/// Chain node of the grouped engine.
///
/// `group_prev` threads the equal-key group: the group's first node
/// points at its last node, every other node points at the node inserted
/// immediately before it, and a singleton points at itself. A node `n` is
/// its group's first exactly when `n.group_prev.next != n`.
pub(crate) struct GroupedNode<T> {
    pub(crate) next: Option<NonNull<GroupedNode<T>>>,
    pub(crate) group_prev: NonNull<GroupedNode<T>>,
    pub(crate) hash: u64,
    pub(crate) value: T,
}

/// Heap-allocated array of bucket entries.
///
/// Entry `i` caches the predecessor link of bucket `i`'s first node, or
/// `None` when the bucket is empty. The array is allocated through the
/// table's [`TableAlloc`] and freed by the table's drop glue; `Buckets`
/// itself has no drop glue so tables can replace it freely during
/// rehash.
pub(crate) struct Buckets<N> {
    ptr: NonNull<Option<Pred<N>>>,
    count: usize,
}

impl<N> Buckets<N> {
    fn layout(count: usize) -> Layout {
        Layout::array::<Option<Pred<N>>>(count).expect("bucket array size overflow")
    }

    /// Allocates `count` empty bucket entries from `alloc`.
    pub(crate) fn allocate<A: TableAlloc>(alloc: &A, count: usize) -> Self {
        debug_assert!(count > 0);
        let ptr: NonNull<Option<Pred<N>>> = alloc.allocate(Self::layout(count)).cast();
        // SAFETY: Freshly allocated array of `count` entries; Option<Pred>
        // is not Drop, plain writes initialize it.
        unsafe {
            for i in 0..count {
                ptr.add(i).write(None);
            }
        }
        Buckets { ptr, count }
    }

    /// Frees the array. The `Buckets` value must not be used afterwards.
    ///
    /// # Safety
    ///
    /// `alloc` must compare equal to the allocator the array came from.
    pub(crate) unsafe fn deallocate<A: TableAlloc>(&mut self, alloc: &A) {
        // SAFETY: `ptr` was obtained from `allocate` with this layout.
        unsafe {
            alloc.deallocate(self.ptr.cast(), Self::layout(self.count));
        }
    }

    #[inline(always)]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub(crate) fn get(&self, index: usize) -> Option<Pred<N>> {
        debug_assert!(index < self.count);
        // SAFETY: Index is within the allocated entry count.
        unsafe { self.ptr.add(index).read() }
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, index: usize, pred: Option<Pred<N>>) {
        debug_assert!(index < self.count);
        // SAFETY: Index is within the allocated entry count.
        unsafe {
            self.ptr.add(index).write(pred);
        }
    }

    /// Resets every entry to empty without touching the chain.
    pub(crate) fn clear(&mut self) {
        for i in 0..self.count {
            // SAFETY: Index is within the allocated entry count.
            unsafe {
                self.ptr.add(i).write(None);
            }
        }
    }

    /// Largest entry count a bucket array can hold.
    pub(crate) fn max_count() -> usize {
        (isize::MAX as usize) / size_of::<Option<Pred<N>>>()
    }
}

/// Spare node storage kept alive across a bulk reconstruction.
///
/// Assignment paths (`clone_from`, element-wise `move_from`) tear the
/// destination's old chain down node by node and push the emptied
/// storage here instead of freeing it, then pull it back out as the new
/// elements are built. Whatever is still pooled when the pool drops
/// (because the source was smaller, or a value constructor panicked
/// mid-assignment) is returned to the allocator, so nothing leaks on
/// unwind.
pub(crate) struct NodePool<N, A: TableAlloc> {
    alloc: A,
    spare: Vec<NonNull<N>>,
}

impl<N, A: TableAlloc> NodePool<N, A> {
    pub(crate) fn new(alloc: A) -> Self {
        NodePool {
            alloc,
            spare: Vec::new(),
        }
    }

    /// Accepts node storage whose value has already been moved out or
    /// dropped.
    ///
    /// # Safety
    ///
    /// `node` must be a live allocation of `N`'s layout from the pool's
    /// allocator, with no live value inside, and must not be used by the
    /// caller afterwards.
    pub(crate) unsafe fn reclaim(&mut self, node: NonNull<N>) {
        self.spare.push(node);
    }

    /// Hands out uninitialized node storage, reusing a reclaimed node if
    /// one is available.
    pub(crate) fn acquire(&mut self) -> NonNull<N> {
        match self.spare.pop() {
            Some(p) => p,
            None => self.alloc.allocate(Layout::new::<N>()).cast(),
        }
    }
}

impl<N, A: TableAlloc> Drop for NodePool<N, A> {
    fn drop(&mut self) {
        for p in self.spare.drain(..) {
            // SAFETY: Every pooled pointer is an unused node-layout block
            // from `alloc`.
            unsafe {
                self.alloc.deallocate(p.cast(), Layout::new::<N>());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Global;
    use crate::allocator::testing::CountingAlloc;

    #[test]
    fn buckets_start_empty() {
        let mut b: Buckets<Node<u32>> = Buckets::allocate(&Global, 17);
        assert_eq!(b.count(), 17);
        for i in 0..17 {
            assert!(b.get(i).is_none());
        }
        // SAFETY: Same allocator the array came from.
        unsafe { b.deallocate(&Global) };
    }

    #[test]
    fn buckets_round_trip_entries() {
        let mut b: Buckets<Node<u32>> = Buckets::allocate(&Global, 8);
        b.set(3, Some(Pred::Start));
        assert_eq!(b.get(3), Some(Pred::Start));
        b.clear();
        assert!(b.get(3).is_none());
        // SAFETY: Same allocator the array came from.
        unsafe { b.deallocate(&Global) };
    }

    #[test]
    fn pool_reuses_and_frees() {
        let alloc = CountingAlloc::new();
        {
            let mut pool: NodePool<Node<u64>, _> = NodePool::new(alloc.clone());
            let a = pool.acquire();
            let b = pool.acquire();
            assert_eq!(alloc.live(), 2);
            // SAFETY: No values were written into `a`/`b`.
            unsafe {
                pool.reclaim(a);
                pool.reclaim(b);
            }
            let c = pool.acquire();
            assert_eq!(alloc.live(), 2, "acquire after reclaim must not allocate");
            // SAFETY: `c` holds no value.
            unsafe { pool.reclaim(c) };
        }
        assert_eq!(alloc.live(), 0, "pool drop returns spare storage");
    }

    #[test]
    fn pred_equality_is_positional() {
        let mut n = Node {
            next: None,
            hash: 0,
            value: 1u32,
        };
        let p = NonNull::from(&mut n);
        assert_eq!(Pred::<Node<u32>>::Start, Pred::Start);
        assert_eq!(Pred::Node(p), Pred::Node(p));
        assert_ne!(Pred::Node(p), Pred::Start);
    }
}
