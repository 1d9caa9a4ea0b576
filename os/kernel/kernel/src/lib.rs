//! # Kernel Memory Context
//!
//! Owns the process-wide frame allocator, heap and address space, and wires
//! the heap into Rust's allocation hooks.
//!
//! Boot calls [`init_memory`] once, single-core and before anything
//! allocates:
//!
//! 1. the frame table is painted from the firmware memory split,
//! 2. the heap claims its arena,
//! 3. the identity map is written and the MMU switched on.
//!
//! Any failure there is a kernel panic. If something allocates before boot
//! got that far, the context comes up with the default split and layout,
//! without translation.
//!
//! Every allocator sits behind its own [`kernel_sync::SpinLock`], taken with
//! IRQs masked. Locks nest heap, then address space, then frames.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod allocator;
pub mod memory;
mod panic;
pub mod tracing;

pub use allocator::KernelAllocator;
pub use memory::{KernelMemory, MemoryInitError, init_memory, memory, try_init_memory};
