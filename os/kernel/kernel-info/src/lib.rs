//! # Board Configuration and Firmware Interface
//!
//! This crate is the single source of truth for where things live in physical
//! memory on the Raspberry Pi class boards the kernel targets, and for how the
//! kernel learns the ARM/GPU memory split from the firmware.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for every fixed region the kernel occupies before
//! the frame allocator runs, bundled into [`memory::MemoryLayout`] so the
//! allocators can be driven by an injected layout in tests:
//!
//! ```text
//! Physical Address Space (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ Reserved (vectors, ATAGs)       │
//! 0x0000_8000 ├─────────────────────────────────┤ KERNEL_START
//!             │ Kernel image (max 1 MiB)        │
//! 0x0010_8000 ├─────────────────────────────────┤ KERNEL_STACK_START
//!             │ Kernel stack (128 KiB)          │
//! 0x0012_8000 ├─────────────────────────────────┤ ABORT_STACK_START
//!             │ Abort stacks (32 KiB per core)  │
//!             ├─────────────────────────────────┤ IRQ_STACK_START
//!             │ IRQ stacks (32 KiB per core)    │
//! 0x0020_0000 ├─────────────────────────────────┤ FRAME_TABLE_START
//!             │ Frame table (1 byte per frame)  │
//! 0x0030_0000 ├─────────────────────────────────┤ HEAP_START
//!             │ Allocatable RAM                 │
//!   gpu.base  ├─────────────────────────────────┤
//!             │ GPU memory                      │
//!   IO_BASE   ├─────────────────────────────────┤
//!             │ Peripherals (16 MiB)            │
//!             └─────────────────────────────────┘
//! ```
//!
//! ### Firmware Split ([`firmware`])
//! The [`firmware::MemorySplitSource`] trait abstracts the mailbox property
//! query returning the ARM-visible and GPU-visible memory regions.
//!
//! ## Features
//!
//! * `bcm2835`: Raspberry Pi 1 with peripherals at `0x2000_0000` and one core.
//!   Without it the layout targets BCM2836/7 (peripherals at `0x3F00_0000`,
//!   four cores).

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod firmware;
pub mod memory;
