#[cfg(all(feature = "asm", target_arch = "arm"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// SCTLR, System Control Register (`c1, c0, 0`), ARMv7-A.
///
/// Several reserved bits read as one and must be written back unchanged, so
/// this register is only ever updated read-modify-write.
#[bitfield(u32)]
pub struct Sctlr {
    /// Bit 0, M: MMU enable for PL1&0 translation.
    pub m_mmu_enable: bool,

    /// Bit 1, A: strict alignment checking.
    pub a_alignment_check: bool,

    /// Bit 2, C: data and unified caches enable.
    pub c_cache_enable: bool,

    /// Bits 3–4: Reserved (RAO/SBOP on ARMv7).
    #[bits(2)]
    _reserved_3_4: u8,

    /// Bit 5, CP15BEN: CP15 barrier operations enable.
    pub cp15ben: bool,

    /// Bits 6–9: Reserved.
    #[bits(4)]
    _reserved_6_9: u8,

    /// Bit 10, SW: SWP/SWPB enable.
    pub sw_swp_enable: bool,

    /// Bit 11, Z: branch prediction enable.
    pub z_branch_prediction: bool,

    /// Bit 12, I: instruction cache enable.
    pub i_icache_enable: bool,

    /// Bit 13, V: high exception vectors (`0xFFFF_0000`).
    pub v_high_vectors: bool,

    /// Bit 14, RR: round-robin cache replacement.
    pub rr_round_robin: bool,

    /// Bits 15–18: Reserved.
    #[bits(4)]
    _reserved_15_18: u8,

    /// Bit 19, WXN: writable implies execute-never.
    pub wxn: bool,

    /// Bit 20, UWXN: unprivileged writable implies PL1 execute-never.
    pub uwxn: bool,

    /// Bit 21, FI: fast interrupts configuration.
    pub fi_fast_interrupts: bool,

    /// Bits 22–23: Reserved (RAO on ARMv7).
    #[bits(2)]
    _reserved_22_23: u8,

    /// Bit 24, VE: interrupt vectors enable.
    pub ve_vectored_interrupts: bool,

    /// Bit 25, EE: exception endianness.
    pub ee_exception_endianness: bool,

    /// Bit 26: Reserved.
    _reserved_26: bool,

    /// Bit 27, NMFI: non-maskable FIQ.
    pub nmfi: bool,

    /// Bit 28, TRE: TEX remap enable.
    pub tre_tex_remap: bool,

    /// Bit 29, AFE: access flag enable.
    pub afe_access_flag: bool,

    /// Bit 30, TE: thumb exception enable.
    pub te_thumb_exceptions: bool,

    /// Bit 31: Reserved.
    _reserved_31: bool,
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl LoadRegisterUnsafe for Sctlr {
    unsafe fn load_unsafe() -> Self {
        let sctlr: u32;
        unsafe {
            core::arch::asm!("mrc p15, 0, {}, c1, c0, 0", out(reg) sctlr, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(sctlr)
    }
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl StoreRegisterUnsafe for Sctlr {
    unsafe fn store_unsafe(self) {
        let sctlr = self.into_bits();
        unsafe {
            core::arch::asm!("mcr p15, 0, {}, c1, c0, 0", in(reg) sctlr, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabling_the_mmu_preserves_reserved_bits() {
        // Typical reset value on a Cortex-A7: RAO bits 4, 3, 22, 23 set.
        let reset = Sctlr::from_bits(0x00C5_0078);
        let enabled = reset.with_m_mmu_enable(true);
        assert_eq!(enabled.into_bits(), 0x00C5_0079);
        assert!(!reset.m_mmu_enable());
    }
}
