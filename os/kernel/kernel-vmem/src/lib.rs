//! # Virtual Memory Support
//!
//! Data model for the ARMv7-A **short-descriptor** translation table format
//! as used by the kernel with `TTBCR.N = 0` (all of the 4 GiB space is
//! translated through TTBR0).
//!
//! ## What you get
//! - A 16 KiB-aligned first-level [`TranslationTable`] with 4096 entries.
//! - A 1 KiB-aligned second-level [`CoarseTable`] with 256 entries.
//! - Typed descriptors: [`SectionDescriptor`], [`CoarseTableDescriptor`],
//!   [`SmallPageDescriptor`], decoded through [`L1Entry`].
//! - [`AccessPermission`], [`MemoryType`] and [`Domain`].
//! - The [`PhysMapper`] seam to reach tables by physical address.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒20 | 19‒12 | 11‒0   |
//! |  L1   |  L2   | Offset |
//! ```
//!
//! ```text
//!  TTBR0 → L1 entry ─┬─ 0b10 Section ─────────────► 1 MiB physical section
//!                    ├─ 0b01 Coarse → L2 entry ───► 4 KiB small page
//!                    └─ 0b00 Fault
//! ```
//!
//! Every L1 descriptor names one of sixteen domains. Whether its access
//! permission bits are checked at all is decided by that domain's field in
//! DACR ([`kernel_registers::dacr::Dacr`]): `Client` checks them, `Manager`
//! ignores them, `NoAccess` faults regardless.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod descriptor;
mod domain;
mod table;

pub use crate::descriptor::{
    AccessPermission, CoarseTableDescriptor, L1Entry, MemoryType, SectionDescriptor,
    SmallPageDescriptor,
};
pub use crate::domain::Domain;
pub use crate::table::{CoarseTable, TranslationTable};
pub use kernel_registers::dacr::{Dacr, DomainAccess};

use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses to usable pointers in the current address
/// space.
///
/// The kernel runs identity mapped, so the production mapper is a cast.
/// Tests back "physical memory" with a host buffer and add its base.
///
/// # Safety
/// - `pa` must be mapped writable for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Pointer to the byte at physical address `pa`.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Reverse of [`PhysMapper::phys_to_ptr`] for pointers it handed out.
    fn ptr_to_phys(&self, ptr: *const u8) -> PhysicalAddress;

    /// Convert a physical address to a mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        (**self).phys_to_ptr(pa)
    }

    #[inline]
    fn ptr_to_phys(&self, ptr: *const u8) -> PhysicalAddress {
        (**self).ptr_to_phys(ptr)
    }
}
