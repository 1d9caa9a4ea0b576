//! # Kernel synchronization primitives
//!
//! The allocators themselves are plain `&mut self` state machines; these
//! primitives make their process-wide instances safe to share between cores
//! and interrupt handlers.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
