//! # Kernel Memory Management
//!
//! The three allocators the kernel runs on, as plain state machines. None of
//! them locks; the `kernel` crate owns the process-wide instances and
//! serializes access to them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Address Space Mapper ([`vmm`])               │
//! │    • 16 KiB L1 table of 1 MiB identity sections     │
//! │    • Domains 0/1/2 as DACR clients                  │
//! │    • Coarse L2 tables for 4 KiB refinements         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ PageTable frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Kernel Heap ([`heap`])                 │
//! │    • 19 size classes, 32 B to 64 MiB                │
//! │    • LIFO free list per class                       │
//! │    • Arena claimed lazily as KernelHeap frames      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ one contiguous run
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Physical Frame Allocator ([`frame_alloc`])   │
//! │    • One tag byte per 4 KiB frame ([`frame_table`]) │
//! │    • First-fit scan from a cursor                   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Physical memory is reached through a [`kernel_vmem::PhysMapper`]. The
//! kernel uses [`phys_mapper::IdentityMapper`]; tests hand in host buffers.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────────┐
//!             │ Reserved, kernel image,      │
//!             │ kernel/abort/IRQ stacks      │
//! 0x0020_0000 ├──────────────────────────────┤
//!             │ Frame table (1 MiB)          │
//! 0x0030_0000 ├──────────────────────────────┤ ◄ managed window
//!             │ Free frames                  │
//!   gpu.base  ├──────────────────────────────┤ ◄ end of ARM memory
//!             │ Video memory                 │
//!             └──────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::FrameAllocator;
//! use kernel_alloc::frame_table::FrameTag;
//!
//! let mut storage = [0u8; 1000];
//! let mut frames = FrameAllocator::new(&mut storage, 0..1000).unwrap();
//! let run = frames.allocate(3, FrameTag::Allocated).unwrap();
//! assert_eq!(frames.free_frames(), 997);
//! frames.free(run, 3);
//! assert_eq!(frames.tag(0), FrameTag::Dirty);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "test-support", not(any(test, doctest))))]
extern crate std;

pub mod frame_alloc;
pub mod frame_table;
pub mod heap;
pub mod phys_mapper;
pub mod vmm;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
