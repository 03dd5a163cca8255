//! Pluggable allocation for nodes and bucket arrays.
//!
//! The tables allocate two kinds of storage: individual nodes and the
//! bucket array. Both go through a [`TableAlloc`], which is a deliberately
//! small stand-in for an allocator handle: it can allocate, deallocate,
//! be cloned, and be compared for equality. Equality is what drives the
//! container semantics: two tables whose allocators compare equal may
//! exchange node storage wholesale (`move_from`, `swap`), while unequal
//! allocators force element-wise reconstruction.
//!
//! How an allocator handle travels during `clone_from`, `move_from` and
//! `swap` is declared up front with the three `PROPAGATE_ON_*` consts
//! rather than detected from the type.

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::ptr::NonNull;

/// Allocator handle used by the tables.
///
/// # Safety
///
/// `allocate` must return a pointer valid for reads and writes of
/// `layout.size()` bytes at `layout.align()` alignment, and that pointer
/// must stay valid until passed to `deallocate` on this allocator or on
/// one that compares equal to it. `deallocate` must accept exactly the
/// layout the block was allocated with. Clones of a handle must compare
/// equal to the original and manage the same pool.
pub unsafe trait TableAlloc: Clone + PartialEq {
    /// Whether `clone_from` replaces the destination's allocator with a
    /// clone of the source's.
    const PROPAGATE_ON_CLONE_FROM: bool = false;
    /// Whether `move_from` transfers the source's allocator into the
    /// destination.
    const PROPAGATE_ON_MOVE_FROM: bool = true;
    /// Whether `swap` exchanges the two allocator handles. When `false`,
    /// swapping tables with unequal allocators is a contract violation.
    const PROPAGATE_ON_SWAP: bool = false;

    /// Allocates a block for `layout`. Never returns null; allocation
    /// failure diverges through [`handle_alloc_error`].
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// Returns a block previously obtained from [`allocate`](Self::allocate)
    /// with the same layout.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a live block allocated with `layout` by this
    /// allocator or one equal to it, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global allocator. All `Global` handles compare equal, so node
/// storage moves freely between tables using it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

// SAFETY: Delegates to the global allocator; all handles share one pool.
unsafe impl TableAlloc for Global {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() != 0);
        // SAFETY: layout has non-zero size; null is routed to
        // handle_alloc_error.
        unsafe {
            let raw = alloc::alloc::alloc(layout);
            if raw.is_null() {
                handle_alloc_error(layout);
            }
            NonNull::new_unchecked(raw)
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees `ptr` was allocated with `layout` via
        // the global allocator.
        unsafe {
            alloc::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}


#[cfg(test)]
mod tests {
    use core::alloc::Layout;

    use super::*;

    #[test]
    fn global_round_trip() {
        let layout = Layout::new::<[u64; 4]>();
        let ptr = Global.allocate(layout);
        // SAFETY: Freshly allocated block of `layout`.
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, layout.size());
            Global.deallocate(ptr, layout);
        }
    }

    #[test]
    fn counting_alloc_tracks_live_blocks() {
        let a = testing::CountingAlloc::new();
        let layout = Layout::new::<u64>();
        let p = a.allocate(layout);
        assert_eq!(a.live(), 1);
        // SAFETY: `p` came from `a` with `layout`.
        unsafe { a.deallocate(p, layout) };
        assert_eq!(a.live(), 0);
    }

    #[test]
    fn pool_identity() {
        let a = testing::CountingAlloc::new();
        let b = a.clone();
        let c = testing::CountingAlloc::new();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
