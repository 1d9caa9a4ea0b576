#[cfg(all(feature = "asm", target_arch = "arm"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// TTBCR, Translation Table Base Control Register (`c2, c0, 2`).
///
/// With `N = 0` every virtual address is translated through TTBR0 and the
/// first-level table is the full 16 KiB, 4096-entry table.
#[bitfield(u32)]
pub struct Ttbcr {
    /// Bits 0–2, N: width of the TTBR0 region boundary.
    #[bits(3)]
    pub n: u8,

    /// Bit 3: Reserved.
    #[bits(default = false)]
    _reserved_3: bool,

    /// Bit 4, PD0: disable table walks through TTBR0 on a TLB miss.
    pub pd0: bool,

    /// Bit 5, PD1: disable table walks through TTBR1 on a TLB miss.
    pub pd1: bool,

    /// Bits 6–30: Reserved.
    #[bits(25, default = 0)]
    _reserved_6_30: u32,

    /// Bit 31, EAE: use the long-descriptor (LPAE) format.
    pub eae: bool,
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl LoadRegisterUnsafe for Ttbcr {
    unsafe fn load_unsafe() -> Self {
        let ttbcr: u32;
        unsafe {
            core::arch::asm!("mrc p15, 0, {}, c2, c0, 2", out(reg) ttbcr, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(ttbcr)
    }
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl StoreRegisterUnsafe for Ttbcr {
    unsafe fn store_unsafe(self) {
        let ttbcr = self.into_bits();
        unsafe {
            core::arch::asm!("mcr p15, 0, {}, c2, c0, 2", in(reg) ttbcr, options(nostack, preserves_flags));
        }
    }
}
