//! # Kernel Global Allocator
//!
//! Routes Rust's allocation hooks into the bucket heap.
//!
//! Heap payloads are aligned to [`HEADER_SIZE`]. Stricter layouts are
//! served by over-allocating and storing the heap's own pointer in the word
//! just below the aligned address handed out:
//!
//! ```text
//! raw ─┬─ padding ─┬─ [raw] ─┬─ aligned payload ─┐
//!      │           │  usize  │ layout.size()     │
//! ```

use crate::memory::{KernelMemory, memory};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use kernel_alloc::heap::HEADER_SIZE;
use kernel_alloc::phys_mapper::IdentityMapper;
use kernel_vmem::PhysMapper;

/// The kernel's global allocator.
///
/// Allocation failure is reported as null, as `GlobalAlloc` requires.
pub struct KernelAllocator<M: PhysMapper + 'static = IdentityMapper> {
    memory: fn() -> &'static KernelMemory<M>,
}

impl KernelAllocator {
    /// Allocates from the global context.
    #[must_use]
    pub const fn new() -> Self {
        Self { memory }
    }
}

impl Default for KernelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PhysMapper + 'static> KernelAllocator<M> {
    /// Allocates from the context `memory` returns.
    #[must_use]
    pub const fn with_context(memory: fn() -> &'static KernelMemory<M>) -> Self {
        Self { memory }
    }
}

/// The installed global allocator instance.
#[cfg(target_os = "none")]
#[global_allocator]
static GLOBAL_ALLOCATOR: KernelAllocator = KernelAllocator::new();

impl<M: PhysMapper + Copy> KernelMemory<M> {
    /// Heap allocation honouring `layout`'s alignment, null on failure.
    #[must_use]
    pub fn allocate_layout(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= HEADER_SIZE {
            return self.allocate(layout.size()).map_or(ptr::null_mut(), |p| p.as_ptr());
        }

        let Some(size) = layout.size().checked_add(layout.align()) else {
            return ptr::null_mut();
        };
        let Ok(raw) = self.allocate(size) else {
            return ptr::null_mut();
        };
        let raw = raw.as_ptr();
        let pad = (raw as usize + size_of::<*mut u8>()).next_multiple_of(layout.align()) - raw as usize;
        unsafe {
            let aligned = raw.add(pad);
            aligned.cast::<*mut u8>().sub(1).write(raw);
            aligned
        }
    }

    /// Returns a block from [`KernelMemory::allocate_layout`].
    ///
    /// # Safety
    /// `ptr` must come from `allocate_layout` with the same `layout`, or be
    /// null.
    pub unsafe fn free_layout(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        if layout.align() <= HEADER_SIZE {
            self.free(ptr);
        } else {
            let raw = unsafe { ptr.cast::<*mut u8>().sub(1).read() };
            self.free(raw);
        }
    }
}

unsafe impl<M: PhysMapper + Copy + 'static> GlobalAlloc for KernelAllocator<M> {
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        (self.memory)().allocate_layout(layout)
    }

    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` and `layout` must match a prior allocation.
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { (self.memory)().free_layout(ptr, layout) }
    }
}
