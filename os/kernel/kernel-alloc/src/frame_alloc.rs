//! # Physical Frame Allocator
//!
//! First-fit allocator over the [`FrameTable`]. It manages the window of
//! frames between the end of the fixed boot regions (`HEAP_START`) and the
//! end of ARM memory; everything else in the table is informational.
//!
//! The search cursor is only a hint. A scan that starts at a stale cursor
//! wraps around to the start of the window once before giving up.

use crate::frame_table::{FrameTable, FrameTag};
use core::fmt::{self, Write};
use core::ops::Range;
use kernel_info::firmware::MemorySplitSource;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::PhysicalAddress;

/// Frames per row in [`FrameAllocator::print`].
const GRID_COLUMNS: usize = 64;

/// Hands out physically contiguous frame runs.
///
/// Implemented by [`FrameAllocator`]; the heap and the address space mapper
/// only see this trait.
pub trait FrameAlloc {
    /// Claims `count` contiguous frames and tags them `tag`.
    ///
    /// # Errors
    /// See [`FrameAllocError`].
    fn allocate(&mut self, count: usize, tag: FrameTag) -> Result<PhysicalAddress, FrameAllocError>;

    /// Like [`FrameAlloc::allocate`], with the first frame index a multiple of
    /// `alignment` frames.
    ///
    /// # Errors
    /// See [`FrameAllocError`].
    fn allocate_aligned(
        &mut self,
        count: usize,
        alignment: usize,
        tag: FrameTag,
    ) -> Result<PhysicalAddress, FrameAllocError>;

    /// Returns `count` frames starting at `address`.
    fn free(&mut self, address: PhysicalAddress, count: usize);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("cannot allocate zero frames")]
    ZeroCount,
    #[error("frames cannot be allocated as {0}")]
    AvailableTag(FrameTag),
    #[error("frame alignment must be non-zero")]
    InvalidAlignment,
    #[error("no run of {requested} free frames ({free} free in total)")]
    OutOfFrames { requested: usize, free: usize },
    #[error("ARM memory ends at 0x{arm_end:X}, at or below the heap start {heap_start}")]
    MemoryTooSmall {
        arm_end: u64,
        heap_start: PhysicalAddress,
    },
    #[error("frame table holds {available} entries, {required} required")]
    TableTooSmall { required: usize, available: usize },
}

/// The physical memory manager.
pub struct FrameAllocator<'t> {
    table: FrameTable<'t>,
    window: Range<usize>,
    free: usize,
    cursor: usize,
}

impl<'t> FrameAllocator<'t> {
    /// Builds the allocator from the firmware memory split.
    ///
    /// `storage` becomes the frame table; on hardware it is the 1 MiB at
    /// `FRAME_TABLE_START`. It must have an entry for every frame of ARM
    /// memory. The split source is asked once for the ARM region, then once
    /// for the GPU region.
    ///
    /// # Errors
    /// [`FrameAllocError::MemoryTooSmall`] if ARM memory ends at or below the
    /// heap start, [`FrameAllocError::TableTooSmall`] if `storage` is short.
    pub fn initialize(
        storage: &'t mut [u8],
        split: &mut impl MemorySplitSource,
        layout: &MemoryLayout,
    ) -> Result<Self, FrameAllocError> {
        let arm = split.arm_memory();
        let gpu = split.gpu_memory();

        let first = layout.first_free_frame();
        let arm_end = frame_of(arm.end());
        if arm_end <= first {
            return Err(FrameAllocError::MemoryTooSmall {
                arm_end: arm.end(),
                heap_start: layout.heap_start,
            });
        }
        if storage.len() < arm_end {
            return Err(FrameAllocError::TableTooSmall {
                required: arm_end,
                available: storage.len(),
            });
        }

        let mut table = FrameTable::new(storage);
        table.paint(0..table.len(), FrameTag::Invalid);
        table.paint(0..first, FrameTag::Reserved);
        table.paint(layout.frame_table.frames(), FrameTag::FrameTable);
        table.paint(layout.kernel_image.frames(), FrameTag::Kernel);
        table.paint(layout.kernel_stack.frames(), FrameTag::KernelStack);
        table.paint(layout.abort_stacks.frames(), FrameTag::AbortStack);
        table.paint(layout.irq_stacks.frames(), FrameTag::IrqStack);
        table.paint(first..arm_end, FrameTag::Free);
        table.paint(gpu.base.frame()..frame_of(gpu.end()), FrameTag::Video);
        table.paint(layout.mmio.frames(), FrameTag::MmioIo);

        let window = first..arm_end;
        let free = table.count_available(window.clone());
        log::info!(
            "frames: ARM {arm:?}, GPU {gpu:?}, managing {} frames from {}, {free} free",
            window.len(),
            PhysicalAddress::from_frame(first),
        );

        Ok(Self {
            table,
            cursor: window.start,
            window,
            free,
        })
    }

    /// Manages `window` of a table whose frames are all fresh: the window is
    /// tagged `Free`, everything else `Invalid`.
    ///
    /// # Errors
    /// [`FrameAllocError::TableTooSmall`] if the window does not fit `storage`.
    pub fn new(storage: &'t mut [u8], window: Range<usize>) -> Result<Self, FrameAllocError> {
        if storage.len() < window.end {
            return Err(FrameAllocError::TableTooSmall {
                required: window.end,
                available: storage.len(),
            });
        }
        let mut table = FrameTable::new(storage);
        table.paint(0..table.len(), FrameTag::Invalid);
        table.paint(window.clone(), FrameTag::Free);
        Ok(Self {
            table,
            cursor: window.start,
            free: window.len(),
            window,
        })
    }

    /// Number of frames in the managed window.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.window.len()
    }

    /// Number of `Free` or `Dirty` frames in the managed window.
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free
    }

    #[must_use]
    pub fn tag(&self, index: usize) -> FrameTag {
        self.table.get(index)
    }

    /// Frame indices the allocator hands out.
    #[must_use]
    pub fn window(&self) -> Range<usize> {
        self.window.clone()
    }

    #[must_use]
    pub const fn table(&self) -> &FrameTable<'t> {
        &self.table
    }

    fn check_request(&self, count: usize, tag: FrameTag) -> Result<(), FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::ZeroCount);
        }
        if tag.is_available() {
            return Err(FrameAllocError::AvailableTag(tag));
        }
        if count > self.free {
            return Err(self.out_of_frames(count));
        }
        Ok(())
    }

    const fn out_of_frames(&self, requested: usize) -> FrameAllocError {
        FrameAllocError::OutOfFrames {
            requested,
            free: self.free,
        }
    }

    /// First run of `count` available frames at or after `from` whose start
    /// is a multiple of `alignment`. Also reports whether a run of available
    /// frames too short for the request was passed over.
    fn find_run(&self, from: usize, count: usize, alignment: usize) -> Option<(usize, bool)> {
        let mut start = from.checked_next_multiple_of(alignment)?;
        let mut skipped = false;
        loop {
            let end = start.checked_add(count)?;
            if end > self.window.end {
                return None;
            }
            match (start..end).find(|&i| !self.table.get(i).is_available()) {
                None => return Some((start, skipped)),
                Some(taken) => {
                    skipped |= taken > start;
                    start = (taken + 1).checked_next_multiple_of(alignment)?;
                }
            }
        }
    }

    fn claim(&mut self, start: usize, count: usize, tag: FrameTag) -> PhysicalAddress {
        self.table.paint(start..start + count, tag);
        self.free -= count;
        let pa = PhysicalAddress::from_frame(start);
        log::trace!("frames: {count} x {tag} at {pa}");
        pa
    }

    /// Claims the first run of `count` available frames, scanning from the
    /// cursor and wrapping to the window start once.
    ///
    /// # Errors
    /// `ZeroCount`, `AvailableTag` for `Free`/`Dirty`, `OutOfFrames`.
    pub fn allocate(&mut self, count: usize, tag: FrameTag) -> Result<PhysicalAddress, FrameAllocError> {
        self.check_request(count, tag)?;

        let from = self.cursor.clamp(self.window.start, self.window.end);
        if let Some((start, skipped)) = self.find_run(from, count, 1) {
            // A skipped gap may fit a later, smaller request.
            if !skipped {
                self.cursor = start + count;
            }
            return Ok(self.claim(start, count, tag));
        }

        if from > self.window.start
            && let Some((start, _)) = self.find_run(self.window.start, count, 1)
        {
            return Ok(self.claim(start, count, tag));
        }

        Err(self.out_of_frames(count))
    }

    /// Claims `count` frames starting at a frame index that is a multiple of
    /// `alignment`. The cursor is left alone.
    ///
    /// # Errors
    /// As [`FrameAllocator::allocate`], plus `InvalidAlignment` for zero.
    pub fn allocate_aligned(
        &mut self,
        count: usize,
        alignment: usize,
        tag: FrameTag,
    ) -> Result<PhysicalAddress, FrameAllocError> {
        if alignment == 0 {
            return Err(FrameAllocError::InvalidAlignment);
        }
        self.check_request(count, tag)?;

        let from = self.cursor.clamp(self.window.start, self.window.end);
        let found = self
            .find_run(from, count, alignment)
            .or_else(|| self.find_run(self.window.start, count, alignment));
        match found {
            Some((start, _)) => Ok(self.claim(start, count, tag)),
            None => Err(self.out_of_frames(count)),
        }
    }

    /// Returns `count` frames starting at `address` as `Dirty`.
    ///
    /// Runs that are empty or leave the managed window are ignored. Frames
    /// that are already available are left as they are.
    pub fn free(&mut self, address: PhysicalAddress, count: usize) {
        let first = address.frame();
        let inside = first >= self.window.start
            && first
                .checked_add(count)
                .is_some_and(|end| end <= self.window.end);
        if count == 0 || !inside {
            log::debug!("frames: ignoring free of {count} frames at {address}");
            return;
        }

        let mut released = 0;
        for i in first..first + count {
            if !self.table.get(i).is_available() {
                self.table.set(i, FrameTag::Dirty);
                released += 1;
            }
        }
        self.free += released;
        self.cursor = self.cursor.min(first);
        log::trace!("frames: released {released} of {count} at {address}");
    }

    /// Run-length listing of the whole table.
    ///
    /// # Errors
    /// Only those of `out`.
    pub fn print_map(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "Start       End         Frames      Description")?;
        for (frames, tag) in self.table.runs() {
            let start = (frames.start as u64) << 12;
            let end = ((frames.end as u64) << 12) - 1;
            writeln!(out, "0x{start:08X}  0x{end:08X}  {:<10}  {tag}", frames.len())?;
        }
        Ok(())
    }

    /// Glyph grid of the managed window, one glyph per frame.
    ///
    /// # Errors
    /// Only those of `out`.
    pub fn print(&self, out: &mut impl Write) -> fmt::Result {
        for row in self.window.clone().step_by(GRID_COLUMNS) {
            write!(out, "{} ", PhysicalAddress::from_frame(row))?;
            for i in row..(row + GRID_COLUMNS).min(self.window.end) {
                out.write_char(self.table.get(i).symbol())?;
            }
            out.write_char('\n')?;
        }
        writeln!(out, "{}/{} frames free", self.free, self.total_frames())
    }
}

impl FrameAlloc for FrameAllocator<'_> {
    fn allocate(&mut self, count: usize, tag: FrameTag) -> Result<PhysicalAddress, FrameAllocError> {
        Self::allocate(self, count, tag)
    }

    fn allocate_aligned(
        &mut self,
        count: usize,
        alignment: usize,
        tag: FrameTag,
    ) -> Result<PhysicalAddress, FrameAllocError> {
        Self::allocate_aligned(self, count, alignment, tag)
    }

    fn free(&mut self, address: PhysicalAddress, count: usize) {
        Self::free(self, address, count);
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_of(address: u64) -> usize {
    (address >> 12) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::firmware::{FixedMemorySplit, MemoryRegion};
    use kernel_info::memory::{FRAME_TABLE_ENTRIES, HEAP_START, IO_BASE};

    fn assert_conserved(pmm: &FrameAllocator<'_>) {
        let available = pmm.table().count_available(pmm.window());
        assert_eq!(pmm.free_frames(), available);
    }

    #[test]
    fn thousand_frame_scenario() {
        let mut storage = vec![0u8; 1000];
        let mut pmm = FrameAllocator::new(&mut storage, 0..1000).unwrap();
        assert_eq!(pmm.total_frames(), 1000);
        assert_eq!(pmm.free_frames(), 1000);

        let pa = pmm.allocate(3, FrameTag::Allocated).unwrap();
        assert_eq!(pa, PhysicalAddress::zero());
        assert_eq!(pmm.free_frames(), 997);
        assert!((0..3).all(|i| pmm.tag(i) == FrameTag::Allocated));

        assert!(matches!(
            pmm.allocate(1000, FrameTag::Allocated),
            Err(FrameAllocError::OutOfFrames { requested: 1000, free: 997 })
        ));

        pmm.free(pa, 3);
        assert_eq!(pmm.free_frames(), 1000);
        assert!((0..3).all(|i| pmm.tag(i) == FrameTag::Dirty));
        assert_conserved(&pmm);
    }

    #[test]
    fn rejects_contract_violations() {
        let mut storage = vec![0u8; 16];
        let mut pmm = FrameAllocator::new(&mut storage, 0..16).unwrap();
        assert_eq!(pmm.allocate(0, FrameTag::Allocated), Err(FrameAllocError::ZeroCount));
        assert_eq!(
            pmm.allocate(1, FrameTag::Dirty),
            Err(FrameAllocError::AvailableTag(FrameTag::Dirty))
        );
        assert_eq!(
            pmm.allocate_aligned(1, 0, FrameTag::PageTable),
            Err(FrameAllocError::InvalidAlignment)
        );
        assert_eq!(pmm.free_frames(), 16);
    }

    #[test]
    fn runs_never_overlap() {
        let mut storage = vec![0u8; 64];
        let mut pmm = FrameAllocator::new(&mut storage, 0..64).unwrap();
        let a = pmm.allocate(10, FrameTag::Allocated).unwrap().frame();
        let b = pmm.allocate(10, FrameTag::KernelHeap).unwrap().frame();
        assert!(a + 10 <= b || b + 10 <= a);
        assert_conserved(&pmm);
    }

    #[test]
    fn skipped_gap_keeps_cursor() {
        let mut storage = vec![0u8; 32];
        let mut pmm = FrameAllocator::new(&mut storage, 0..32).unwrap();
        let a = pmm.allocate(2, FrameTag::Allocated).unwrap();
        let _b = pmm.allocate(4, FrameTag::Allocated).unwrap();
        pmm.free(a, 2);

        // Frames 0..2 are too short for three; the run lands after b.
        let c = pmm.allocate(3, FrameTag::Allocated).unwrap();
        assert_eq!(c.frame(), 6);

        // The cursor stayed at the gap, so a single frame fills it.
        let d = pmm.allocate(1, FrameTag::Allocated).unwrap();
        assert_eq!(d.frame(), 0);
        assert_conserved(&pmm);
    }

    #[test]
    fn stale_cursor_wraps_around() {
        let mut storage = vec![0u8; 8];
        let mut pmm = FrameAllocator::new(&mut storage, 0..8).unwrap();
        let a = pmm.allocate(4, FrameTag::Allocated).unwrap();
        let _b = pmm.allocate(4, FrameTag::Allocated).unwrap();
        assert_eq!(pmm.free_frames(), 0);

        // Freed below the cursor: the cursor follows. Force it stale again.
        pmm.free(a, 4);
        pmm.cursor = 8;
        let c = pmm.allocate(4, FrameTag::Allocated).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn aligned_allocation_honours_alignment() {
        let mut storage = vec![0u8; 64];
        let mut pmm = FrameAllocator::new(&mut storage, 0..64).unwrap();
        pmm.allocate(1, FrameTag::Allocated).unwrap();
        let cursor = pmm.cursor;

        let table = pmm.allocate_aligned(4, 4, FrameTag::PageTable).unwrap();
        assert_eq!(table.frame() % 4, 0);
        assert_eq!(table.frame(), 4);
        assert_eq!(pmm.cursor, cursor);
        assert!((4..8).all(|i| pmm.tag(i) == FrameTag::PageTable));
        assert_conserved(&pmm);
    }

    #[test]
    fn odd_frees_are_ignored() {
        let mut storage = vec![0u8; 32];
        let mut pmm = FrameAllocator::new(&mut storage, 8..32).unwrap();
        let a = pmm.allocate(2, FrameTag::Allocated).unwrap();
        assert_eq!(a.frame(), 8);

        pmm.free(a, 0);
        pmm.free(PhysicalAddress::from_frame(4), 2);
        pmm.free(PhysicalAddress::from_frame(30), 4);
        assert_eq!(pmm.free_frames(), 22);
        assert_eq!(pmm.tag(4), FrameTag::Invalid);

        pmm.free(a, 2);
        pmm.free(a, 2);
        assert_eq!(pmm.free_frames(), 24);
        assert_conserved(&pmm);
    }

    #[test]
    fn initialize_paints_the_boot_layout() {
        let mut storage = vec![0u8; FRAME_TABLE_ENTRIES];
        let mut split = FixedMemorySplit::default();
        let pmm = FrameAllocator::initialize(&mut storage, &mut split, &MemoryLayout::RASPBERRY_PI)
            .unwrap();

        let first = (HEAP_START >> 12) as usize;
        let arm_end = 0x4000_0000 >> 12;
        assert_eq!(pmm.window(), first..arm_end);
        assert_eq!(pmm.tag(0), FrameTag::Reserved);
        assert_eq!(pmm.tag(8), FrameTag::Kernel);
        assert_eq!(pmm.tag(0x200), FrameTag::FrameTable);
        assert_eq!(pmm.tag(first), FrameTag::Free);
        assert_eq!(pmm.tag(arm_end), FrameTag::Video);
        assert_eq!(pmm.tag((IO_BASE >> 12) as usize), FrameTag::MmioIo);
        assert_eq!(pmm.tag(FRAME_TABLE_ENTRIES - 1), FrameTag::Invalid);

        // The peripheral window sits inside ARM memory on this split.
        let io = MemoryLayout::RASPBERRY_PI.mmio.frames();
        assert_eq!(pmm.free_frames(), arm_end - first - io.len());
        assert_conserved(&pmm);
    }

    #[test]
    fn initialize_queries_arm_then_gpu_once() {
        struct Recording(Vec<&'static str>);
        impl MemorySplitSource for Recording {
            fn arm_memory(&mut self) -> MemoryRegion {
                self.0.push("arm");
                MemoryRegion::new(0, 0x0100_0000)
            }
            fn gpu_memory(&mut self) -> MemoryRegion {
                self.0.push("gpu");
                MemoryRegion::new(0x0100_0000, 0x0010_0000)
            }
        }

        let mut storage = vec![0u8; FRAME_TABLE_ENTRIES];
        let mut split = Recording(Vec::new());
        let pmm = FrameAllocator::initialize(&mut storage, &mut split, &MemoryLayout::RASPBERRY_PI)
            .unwrap();
        assert_eq!(split.0, ["arm", "gpu"]);
        assert_eq!(pmm.total_frames(), (0x0100_0000 - HEAP_START as usize) >> 12);
    }

    #[test]
    fn initialize_rejects_tiny_memory() {
        let mut storage = vec![0u8; FRAME_TABLE_ENTRIES];
        let mut split = FixedMemorySplit::new(
            MemoryRegion::new(0, HEAP_START),
            MemoryRegion::new(HEAP_START, 0x0010_0000),
        );
        let err = FrameAllocator::initialize(&mut storage, &mut split, &MemoryLayout::RASPBERRY_PI);
        assert!(matches!(err, Err(FrameAllocError::MemoryTooSmall { .. })));
    }

    #[test]
    fn initialize_rejects_short_table() {
        let mut storage = vec![0u8; 1024];
        let mut split = FixedMemorySplit::default();
        let err = FrameAllocator::initialize(&mut storage, &mut split, &MemoryLayout::RASPBERRY_PI);
        assert!(matches!(err, Err(FrameAllocError::TableTooSmall { .. })));
    }

    #[test]
    fn print_map_lists_runs() {
        let mut storage = vec![0u8; 16];
        let mut pmm = FrameAllocator::new(&mut storage, 4..16).unwrap();
        pmm.allocate(2, FrameTag::KernelHeap).unwrap();

        let mut out = String::new();
        pmm.print_map(&mut out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("0x00000000  0x00003FFF  4 "));
        assert!(lines[2].ends_with("Kernel heap"));
        assert!(lines[3].starts_with("0x00006000  0x0000FFFF  10"));
    }

    #[test]
    fn print_draws_grid_and_footer() {
        let mut storage = vec![0u8; 80];
        let mut pmm = FrameAllocator::new(&mut storage, 0..80).unwrap();
        pmm.allocate(1, FrameTag::PageTable).unwrap();

        let mut out = String::new();
        pmm.print(&mut out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(&format!("P{}", ".".repeat(63))));
        assert!(lines[1].ends_with(&".".repeat(16)));
        assert_eq!(lines[2], "79/80 frames free");
    }
}
