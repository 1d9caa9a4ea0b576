//! # Memory Layout

use core::ops::Range;
use kernel_memory_addresses::{PhysicalAddress, Size4K};

/// Size of a physical frame and of a small page.
pub const PAGE_SIZE: u32 = 4096;

/// Size of a first-level section mapping.
pub const SECTION_SIZE: u32 = 1024 * 1024;

/// Number of CPU cores, each owning one abort and one IRQ stack.
#[cfg(not(feature = "bcm2835"))]
pub const CORES: u32 = 4;

/// Number of CPU cores, each owning one abort and one IRQ stack.
#[cfg(feature = "bcm2835")]
pub const CORES: u32 = 1;

/// Where the firmware loads the kernel image.
pub const KERNEL_START: u32 = 0x8000;

/// Largest kernel image the layout leaves room for.
pub const KERNEL_MAX_SIZE: u32 = 1024 * 1024;

pub const KERNEL_END: u32 = KERNEL_START + KERNEL_MAX_SIZE;

pub const KERNEL_STACK_SIZE: u32 = 128 * 1024;
pub const KERNEL_STACK_START: u32 = KERNEL_END;
pub const KERNEL_STACK_END: u32 = KERNEL_STACK_START + KERNEL_STACK_SIZE;

/// Per-core size of the abort and IRQ mode stacks.
pub const EXCEPTION_STACK_SIZE: u32 = 32 * 1024;

pub const ABORT_STACK_START: u32 = KERNEL_STACK_END;
pub const ABORT_STACK_END: u32 = ABORT_STACK_START + EXCEPTION_STACK_SIZE * CORES;
pub const IRQ_STACK_START: u32 = ABORT_STACK_END;
pub const IRQ_STACK_END: u32 = IRQ_STACK_START + EXCEPTION_STACK_SIZE * CORES;

/// Number of frame table entries; one per 4 KiB frame of the 4 GiB space.
pub const FRAME_TABLE_ENTRIES: usize = 1 << 20;

/// Physical home of the frame table. It never moves and is never freed.
pub const FRAME_TABLE_START: u32 = 0x0020_0000;

#[allow(clippy::cast_possible_truncation)]
pub const FRAME_TABLE_END: u32 = FRAME_TABLE_START + FRAME_TABLE_ENTRIES as u32;

/// Start of allocatable RAM; everything below is painted at boot.
pub const HEAP_START: u32 = FRAME_TABLE_END;

/// Size of the kernel heap arena carved from the frame allocator.
pub const KERNEL_HEAP_SIZE: usize = 64 * 1024 * 1024;

/// Base of the peripheral (MMIO) window.
#[cfg(not(feature = "bcm2835"))]
pub const IO_BASE: u32 = 0x3F00_0000;

/// Base of the peripheral (MMIO) window.
#[cfg(feature = "bcm2835")]
pub const IO_BASE: u32 = 0x2000_0000;

pub const IO_SIZE: u32 = 16 * 1024 * 1024;
pub const IO_END: u32 = IO_BASE + IO_SIZE;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(EXCEPTION_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(IRQ_STACK_END <= FRAME_TABLE_START);
    assert!(HEAP_START.is_multiple_of(SECTION_SIZE));
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(PAGE_SIZE as usize));
    assert!(IO_BASE.is_multiple_of(SECTION_SIZE));
};

/// A half-open physical address range `[start, end)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PhysicalRange {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl PhysicalRange {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
        }
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end.as_u32().saturating_sub(self.start.as_u32())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u32() >= self.start.as_u32() && pa.as_u32() < self.end.as_u32()
    }

    /// Frame indices touched by this range; a partial last frame counts.
    #[must_use]
    pub const fn frames(&self) -> Range<usize> {
        self.start.frame()..self.end.align_up::<Size4K>().frame()
    }
}

/// The fixed regions the frame allocator paints at boot and the heap size it
/// reserves afterwards.
///
/// [`MemoryLayout::RASPBERRY_PI`] is the production layout; tests construct
/// smaller ones.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    /// Start of allocatable RAM. `[0, heap_start)` is reserved.
    pub heap_start: PhysicalAddress,
    pub frame_table: PhysicalRange,
    pub kernel_image: PhysicalRange,
    pub kernel_stack: PhysicalRange,
    pub abort_stacks: PhysicalRange,
    pub irq_stacks: PhysicalRange,
    pub mmio: PhysicalRange,
    /// Bytes reserved for the kernel heap arena.
    pub heap_size: usize,
}

impl MemoryLayout {
    pub const RASPBERRY_PI: Self = Self {
        heap_start: PhysicalAddress::new(HEAP_START),
        frame_table: PhysicalRange::new(FRAME_TABLE_START, FRAME_TABLE_END),
        kernel_image: PhysicalRange::new(KERNEL_START, KERNEL_END),
        kernel_stack: PhysicalRange::new(KERNEL_STACK_START, KERNEL_STACK_END),
        abort_stacks: PhysicalRange::new(ABORT_STACK_START, ABORT_STACK_END),
        irq_stacks: PhysicalRange::new(IRQ_STACK_START, IRQ_STACK_END),
        mmio: PhysicalRange::new(IO_BASE, IO_END),
        heap_size: KERNEL_HEAP_SIZE,
    };

    /// First frame index the frame allocator manages.
    #[must_use]
    pub const fn first_free_frame(&self) -> usize {
        self.heap_start.frame()
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::RASPBERRY_PI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stacks_follow_the_kernel_image() {
        let l = MemoryLayout::RASPBERRY_PI;
        assert_eq!(l.kernel_image.end, l.kernel_stack.start);
        assert_eq!(l.kernel_stack.end, l.abort_stacks.start);
        assert_eq!(l.abort_stacks.end, l.irq_stacks.start);
        assert_eq!(l.frame_table.end, l.heap_start);
    }

    #[test]
    fn frame_table_covers_the_address_space() {
        let l = MemoryLayout::RASPBERRY_PI;
        assert_eq!(l.frame_table.len() as usize, FRAME_TABLE_ENTRIES);
        assert_eq!(l.first_free_frame(), 0x300);
    }

    #[test]
    fn range_frames_round_partial_frames_up() {
        let r = PhysicalRange::new(0x1000, 0x2001);
        assert_eq!(r.frames(), 1..3);
        assert!(r.contains(PhysicalAddress::new(0x2000)));
        assert!(!r.contains(PhysicalAddress::new(0x2001)));
        assert!(PhysicalRange::new(0x10, 0x10).is_empty());
    }
}
