#[cfg(all(feature = "asm", target_arch = "arm"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Access policy of one memory domain.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[repr(u8)]
pub enum DomainAccess {
    /// Any access generates a domain fault.
    #[default]
    NoAccess = 0b00,
    /// Accesses are checked against the descriptor's AP bits.
    Client = 0b01,
    /// Architecturally reserved; behaves as `NoAccess` here.
    Reserved = 0b10,
    /// Accesses are never checked; AP bits are ignored.
    Manager = 0b11,
}

impl DomainAccess {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0b00 => Self::NoAccess,
            0b01 => Self::Client,
            0b10 => Self::Reserved,
            _ => Self::Manager,
        }
    }
}

/// DACR: Domain Access Control Register (`c3, c0, 0`).
///
/// Sixteen 2-bit fields, one per domain. Every descriptor names a domain, and
/// the domain's field decides whether the descriptor's permissions apply at
/// all. Out of reset every domain is [`DomainAccess::NoAccess`].
#[bitfield(u32)]
pub struct Dacr {
    /// Domain 0 (kernel image and low memory).
    #[bits(2)]
    pub d0: DomainAccess,
    /// Domain 1 (heap and allocatable RAM).
    #[bits(2)]
    pub d1: DomainAccess,
    /// Domain 2 (beyond physical memory).
    #[bits(2)]
    pub d2: DomainAccess,
    #[bits(2)]
    pub d3: DomainAccess,
    #[bits(2)]
    pub d4: DomainAccess,
    #[bits(2)]
    pub d5: DomainAccess,
    #[bits(2)]
    pub d6: DomainAccess,
    #[bits(2)]
    pub d7: DomainAccess,
    #[bits(2)]
    pub d8: DomainAccess,
    #[bits(2)]
    pub d9: DomainAccess,
    #[bits(2)]
    pub d10: DomainAccess,
    #[bits(2)]
    pub d11: DomainAccess,
    #[bits(2)]
    pub d12: DomainAccess,
    #[bits(2)]
    pub d13: DomainAccess,
    #[bits(2)]
    pub d14: DomainAccess,
    #[bits(2)]
    pub d15: DomainAccess,
}

impl Dacr {
    /// Number of domains.
    pub const DOMAINS: u8 = 16;

    /// The access policy of `domain` (taken modulo 16).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn domain(self, domain: u8) -> DomainAccess {
        let shift = (domain % Self::DOMAINS) as u32 * 2;
        DomainAccess::from_bits((self.into_bits() >> shift) as u8)
    }

    /// Replaces the 2-bit field of `domain` and leaves every other field untouched.
    #[inline]
    #[must_use]
    pub const fn with_domain(self, domain: u8, access: DomainAccess) -> Self {
        let shift = (domain % Self::DOMAINS) as u32 * 2;
        let cleared = self.into_bits() & !(0b11 << shift);
        Self::from_bits(cleared | ((access.into_bits() as u32) << shift))
    }
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl LoadRegisterUnsafe for Dacr {
    unsafe fn load_unsafe() -> Self {
        let dacr: u32;
        unsafe {
            core::arch::asm!("mrc p15, 0, {}, c3, c0, 0", out(reg) dacr, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(dacr)
    }
}

#[cfg(all(feature = "asm", target_arch = "arm"))]
impl StoreRegisterUnsafe for Dacr {
    unsafe fn store_unsafe(self) {
        let dacr = self.into_bits();
        unsafe {
            core::arch::asm!("mcr p15, 0, {}, c3, c0, 0", in(reg) dacr, options(nostack, preserves_flags));
        }
    }
}
