//! Host memory standing in for physical RAM.

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::boxed::Box;

/// Zeroed host allocation mapped at physical address 0.
pub struct HostMemory {
    base: *mut u8,
    layout: Layout,
}

// Only handed out as raw addresses; callers serialize access like real RAM.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    /// `bytes` of zeroed memory, 16 KiB-aligned like an L1 table.
    ///
    /// # Panics
    /// If the host allocation fails.
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        let layout = Layout::from_size_align(bytes, 16 * 1024).expect("host layout");
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "host allocation failed");
        Self { base, layout }
    }

    /// Never frees the buffer; for contexts that live in statics.
    #[must_use]
    pub fn leak(self) -> &'static Self {
        Box::leak(Box::new(self))
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

impl PhysMapper for HostMemory {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        assert!(pa.as_usize() < self.layout.size(), "{pa} outside host memory");
        unsafe { self.base.add(pa.as_usize()) }
    }

    fn ptr_to_phys(&self, ptr: *const u8) -> PhysicalAddress {
        let offset = ptr as usize - self.base as usize;
        PhysicalAddress::new(u32::try_from(offset).expect("offset fits 32 bits"))
    }
}
