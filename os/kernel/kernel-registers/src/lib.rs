//! # Typed ARMv7 CP15 Registers
//!
//! The system control coprocessor registers the memory subsystem touches,
//! modelled with `bitfield-struct`. Actual `mrc`/`mcr` access is compiled
//! only with the `asm` feature on `target_arch = "arm"`; elsewhere the types
//! are plain values, which is what the host-side tests use.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "asm", target_arch = "arm"))]
pub mod barrier;

#[cfg(feature = "dacr")]
pub mod dacr;

#[cfg(feature = "sctlr")]
pub mod sctlr;

#[cfg(feature = "ttbcr")]
pub mod ttbcr;

#[cfg(feature = "ttbr0")]
pub mod ttbr0;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// CP15 accesses are privileged and fault outside PL1.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// CP15 accesses are privileged and fault outside PL1; writing translation
    /// control registers changes how every subsequent access is resolved.
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// # Safety
    /// It is generally safe to load this register even from user mode.
    fn load() -> Self;
}

pub trait StoreRegister {
    /// # Safety
    /// It is generally safe to store this register even from user mode.
    fn store(self);
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

impl<T> StoreRegisterUnsafe for T
where
    T: StoreRegister,
{
    #[inline]
    unsafe fn store_unsafe(self) {
        <Self as StoreRegister>::store(self);
    }
}
