#[cfg(all(feature = "asm", target_arch = "arm"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// TTBR0, Translation Table Base Register 0 (`c2, c0, 0`), `TTBCR.N = 0`.
///
/// Holds the physical base of the 16 KiB-aligned first-level table and the
/// cacheability attributes used for table walks.
#[bitfield(u32)]
pub struct Ttbr0 {
    /// Bit 0, C / IRGN\[1\]: inner cacheable table walks.
    pub c_inner_cacheable: bool,

    /// Bit 1, S: table walks to shareable memory.
    pub s_shareable: bool,

    /// Bit 2, IMP: implementation defined.
    pub imp: bool,

    /// Bits 3–4, RGN: outer cacheability of table walks.
    #[bits(2)]
    pub rgn_outer: u8,

    /// Bit 5, NOS: inner (0) or outer (1) shareable.
    pub nos: bool,

    /// Bit 6: IRGN\[0\] (Multiprocessing Extensions).
    pub irgn0: bool,

    /// Bits 7–13: Reserved while `TTBCR.N = 0`.
    #[bits(7, default = 0)]
    _reserved_7_13: u8,

    /// Bits 14–31: Translation table base >> 14.
    #[bits(18)]
    table_base_16k: u32,
}

impl Ttbr0 {
    /// Points TTBR0 at a first-level table with non-cacheable walks.
    ///
    /// `table` must be 16 KiB-aligned.
    #[must_use]
    pub const fn from_table(table: PhysicalAddress) -> Self {
        debug_assert!(table.as_u32() & 0x3FFF == 0, "L1 table must be 16K-aligned");
        Self::new().with_table_base_16k(table.as_u32() >> 14)
    }

    /// Physical base of the first-level table.
    #[must_use]
    pub const fn table(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.table_base_16k() << 14)
    }
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl LoadRegisterUnsafe for Ttbr0 {
    unsafe fn load_unsafe() -> Self {
        let ttbr0: u32;
        unsafe {
            core::arch::asm!("mrc p15, 0, {}, c2, c0, 0", out(reg) ttbr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(ttbr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl StoreRegisterUnsafe for Ttbr0 {
    unsafe fn store_unsafe(self) {
        let ttbr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mcr p15, 0, {}, c2, c0, 0", in(reg) ttbr0, options(nostack, preserves_flags));
        }
    }
}
