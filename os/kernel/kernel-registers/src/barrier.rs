//! Barriers and TLB maintenance around translation table changes.

/// Data Synchronization Barrier, full system.
///
/// Completes all outstanding explicit memory accesses, including the
/// descriptor writes a table walk is about to observe.
#[inline]
pub fn dsb() {
    unsafe { core::arch::asm!("dsb sy", options(nostack, preserves_flags)) }
}

/// Instruction Synchronization Barrier.
///
/// Flushes the pipeline so instructions after it are fetched with the
/// current translation and control register state.
#[inline]
pub fn isb() {
    unsafe { core::arch::asm!("isb sy", options(nostack, preserves_flags)) }
}

/// Invalidates the entire unified TLB (`TLBIALL`).
///
/// # Safety
/// Privileged; must be followed by [`dsb`] and [`isb`] before relying on the
/// new translations.
#[inline]
pub unsafe fn invalidate_tlb_all() {
    unsafe {
        core::arch::asm!(
            "mcr p15, 0, {zero}, c8, c7, 0",
            zero = in(reg) 0u32,
            options(nostack, preserves_flags)
        );
    }
}
