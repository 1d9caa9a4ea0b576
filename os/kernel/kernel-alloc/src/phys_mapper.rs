//! # Identity [`PhysMapper`]
//!
//! The kernel runs with every RAM section mapped onto itself, before and
//! after the MMU is switched on, so reaching a physical address is a cast.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::IdentityMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let pa = PhysicalAddress::new(0x0030_0000);
//! let ptr = IdentityMapper.phys_to_ptr(pa);
//! assert_eq!(ptr as usize, 0x0030_0000);
//! assert_eq!(IdentityMapper.ptr_to_phys(ptr), pa);
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for an identity-mapped kernel.
///
/// # Safety
/// Only meaningful where virtual equals physical for the referenced range,
/// i.e. on the target before any non-identity mapping is installed.
#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        core::ptr::with_exposed_provenance_mut(pa.as_usize())
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn ptr_to_phys(&self, ptr: *const u8) -> PhysicalAddress {
        PhysicalAddress::new(ptr.expose_provenance() as u32)
    }
}
