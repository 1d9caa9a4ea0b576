//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses used by the ARMv7
//! short-descriptor MMU and the physical frame allocator.
//!
//! ## Overview
//!
//! | Type | Description |
//! |----------|-------------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | Physical RAM, GPU memory or the peripheral window. |
//! | [`VirtualAddress`] | An address translated by the MMU. |
//!
//! Two granules are modelled through the [`PageSize`] marker trait:
//!
//! - [`Size4K`]: 4 KiB small pages and physical frames
//! - [`Size1M`]: 1 MiB sections
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x3F20_1018);
//! assert_eq!(va.l1_index(), 0x3F2);
//! assert_eq!(va.l2_index(), 0x01);
//! assert_eq!(va.offset::<Size4K>(), 0x018);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use page_size::{PageSize, Size1M, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_round_trips_through_base() {
        let pa = PhysicalAddress::new(0x0030_1234);
        assert_eq!(pa.frame(), 0x301);
        assert_eq!(PhysicalAddress::from_frame(pa.frame()).as_u32(), 0x0030_1000);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x12000);
        assert_eq!(a.align_up::<Size4K>().as_u32(), 0x13000);
        assert_eq!(a.align_up::<Size1M>().as_u32(), 0x0010_0000);
        assert_eq!(a.offset::<Size4K>(), 0x345);
        assert!(MemoryAddress::new(0x0010_0000).is_aligned::<Size1M>());
        assert!(!a.is_aligned::<Size4K>());
    }

    #[test]
    fn align_up_saturates_at_top_of_address_space() {
        let a = MemoryAddress::new(0xFFFF_FF01);
        assert_eq!(a.align_up::<Size1M>().as_u32(), 0xFFF0_0000);
    }

    #[test]
    fn virtual_address_indices() {
        let va = VirtualAddress::new(0x0040_5123);
        assert_eq!(va.l1_index(), 4);
        assert_eq!(va.l2_index(), 5);
        assert_eq!(va.identity().as_u32(), 0x0040_5123);
    }

    #[test]
    fn formatting() {
        let pa = PhysicalAddress::new(0x3F00_0000);
        assert_eq!(format!("{pa:?}"), "PA(0x3F000000)");
        assert_eq!(format!("{pa}"), "0x3F000000");
        assert_eq!(format!("{:?}", Size1M), "1M");
    }
}
