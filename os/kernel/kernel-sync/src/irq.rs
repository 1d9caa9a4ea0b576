//! IRQ masking for ARMv7-A (`cpsid i` / `cpsie i`).
//!
//! On any other architecture the functions compile to nothing and report
//! interrupts as disabled, so host tests can exercise the locking paths.

/// CPSR bit 7: IRQs masked.
const CPSR_I: u32 = 1 << 7;

/// Masks IRQs on the current core (`cpsid i`).
///
/// # Platform
///
/// ARMv7-A in a privileged mode; a no-op elsewhere.
#[inline]
pub fn disable_interrupts() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("cpsid i", options(nomem, nostack, preserves_flags));
    }
}

/// Unmasks IRQs on the current core (`cpsie i`).
///
/// # Platform
///
/// ARMv7-A in a privileged mode; a no-op elsewhere.
#[inline]
pub fn enable_interrupts() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("cpsie i", options(nomem, nostack, preserves_flags));
    }
}

/// Returns the current `CPSR` value.
#[inline]
#[must_use]
pub fn cpsr() -> u32 {
    #[cfg(target_arch = "arm")]
    {
        let r: u32;
        unsafe { core::arch::asm!("mrs {}, cpsr", out(reg) r, options(nomem, nostack, preserves_flags)) }
        r
    }
    #[cfg(not(target_arch = "arm"))]
    {
        CPSR_I
    }
}

/// Whether IRQs are currently unmasked on this core.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    cpsr() & CPSR_I == 0
}

/// RAII guard that masks IRQs on creation and restores them on drop.
///
/// IRQs are unmasked on drop **only** if they were unmasked when the guard
/// was created, so guards nest.
///
/// ```no_run
/// use kernel_sync::IrqGuard;
///
/// {
///     let _g = IrqGuard::new();
///     // no IRQ handler runs on this core here
/// }
/// ```
pub struct IrqGuard {
    /// Whether IRQs were unmasked when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}
