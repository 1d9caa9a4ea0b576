//! The process-wide [`KernelMemory`] context.

use core::fmt::{self, Write};
use core::ptr::NonNull;
use kernel_alloc::frame_alloc::{FrameAlloc, FrameAllocError, FrameAllocator};
use kernel_alloc::frame_table::FrameTag;
use kernel_alloc::heap::{Heap, HeapError};
use kernel_alloc::phys_mapper::IdentityMapper;
use kernel_alloc::vmm::{AddressSpace, MmuControl, VmmError};
use kernel_info::firmware::{FixedMemorySplit, MemorySplitSource};
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{SpinLock, SyncOnceCell};
use kernel_vmem::PhysMapper;

static MEMORY: SyncOnceCell<KernelMemory> = SyncOnceCell::new();

#[derive(Debug, thiserror::Error)]
pub enum MemoryInitError {
    #[error("frame allocator: {0}")]
    Frames(#[from] FrameAllocError),
    #[error("heap: {0}")]
    Heap(#[from] HeapError),
    #[error("address space: {0}")]
    AddressSpace(#[from] VmmError),
    #[error("memory is already initialized")]
    AlreadyInitialized,
}

/// Frame allocator, heap and address space behind their locks.
pub struct KernelMemory<M: PhysMapper = IdentityMapper> {
    mapper: M,
    heap: SpinLock<Heap>,
    space: SpinLock<Option<AddressSpace<M>>>,
    frames: SpinLock<FrameAllocator<'static>>,
}

/// [`FrameAlloc`] that takes the frame lock per call, so the heap only
/// touches it when it claims its arena.
struct LockedFrames<'a>(&'a SpinLock<FrameAllocator<'static>>);

impl FrameAlloc for LockedFrames<'_> {
    fn allocate(&mut self, count: usize, tag: FrameTag) -> Result<PhysicalAddress, FrameAllocError> {
        self.0.lock_irq().allocate(count, tag)
    }

    fn allocate_aligned(
        &mut self,
        count: usize,
        alignment: usize,
        tag: FrameTag,
    ) -> Result<PhysicalAddress, FrameAllocError> {
        self.0.lock_irq().allocate_aligned(count, alignment, tag)
    }

    fn free(&mut self, address: PhysicalAddress, count: usize) {
        self.0.lock_irq().free(address, count);
    }
}

impl<M: PhysMapper + Copy> KernelMemory<M> {
    pub const fn new(frames: FrameAllocator<'static>, heap: Heap, mapper: M) -> Self {
        Self {
            mapper,
            heap: SpinLock::new(heap),
            space: SpinLock::new(None),
            frames: SpinLock::new(frames),
        }
    }

    /// Paints the frame table in place at `layout.frame_table` and sets up
    /// an empty heap of `layout.heap_size`.
    ///
    /// # Errors
    /// See [`FrameAllocator::initialize`].
    ///
    /// # Safety
    /// The frame table range must be reachable through `mapper` and used by
    /// nothing else for the rest of the kernel's life.
    pub unsafe fn boot(
        mapper: M,
        split: &mut impl MemorySplitSource,
        layout: &MemoryLayout,
    ) -> Result<Self, FrameAllocError> {
        let ptr = mapper.phys_to_ptr(layout.frame_table.start);
        let len = layout.frame_table.len() as usize;
        let storage = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
        let frames = FrameAllocator::initialize(storage, split, layout)?;
        Ok(Self::new(frames, Heap::new(layout.heap_size), mapper))
    }

    /// Claims the heap arena now rather than on the first allocation.
    ///
    /// # Errors
    /// See [`Heap::bootstrap`].
    pub fn bootstrap_heap(&self) -> Result<(), HeapError> {
        let mut heap = self.heap.lock_irq();
        heap.bootstrap(&mut LockedFrames(&self.frames), &self.mapper)
    }

    /// Builds the identity map and switches translation on.
    ///
    /// # Errors
    /// See [`AddressSpace::initialize`].
    ///
    /// # Safety
    /// See [`AddressSpace::initialize`].
    pub unsafe fn enable_translation(
        &self,
        mmu: &mut impl MmuControl,
        split: &mut impl MemorySplitSource,
        layout: &MemoryLayout,
    ) -> Result<(), VmmError> {
        let mut space = self.space.lock_irq();
        let mut frames = self.frames.lock_irq();
        let built = unsafe { AddressSpace::initialize(&mut *frames, self.mapper, mmu, split, layout) }?;
        *space = Some(built);
        Ok(())
    }

    /// # Errors
    /// See [`FrameAllocator::allocate`].
    pub fn allocate_frames(&self, count: usize, tag: FrameTag) -> Result<PhysicalAddress, FrameAllocError> {
        self.frames.lock_irq().allocate(count, tag)
    }

    /// # Errors
    /// See [`FrameAllocator::allocate_aligned`].
    pub fn allocate_frames_aligned(
        &self,
        count: usize,
        alignment: usize,
        tag: FrameTag,
    ) -> Result<PhysicalAddress, FrameAllocError> {
        self.frames.lock_irq().allocate_aligned(count, alignment, tag)
    }

    pub fn free_frames(&self, address: PhysicalAddress, count: usize) {
        self.frames.lock_irq().free(address, count);
    }

    /// # Errors
    /// See [`Heap::allocate`].
    ///
    /// # Panics
    /// If the heap arena cannot be claimed.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let mut heap = self.heap.lock_irq();
        heap.allocate(size, &mut LockedFrames(&self.frames), &self.mapper)
    }

    pub fn free(&self, ptr: *mut u8) {
        self.heap.lock_irq().free(ptr);
    }

    pub fn with_frames<R>(&self, f: impl FnOnce(&mut FrameAllocator<'static>) -> R) -> R {
        self.frames.with_lock_irq(f)
    }

    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        self.heap.with_lock_irq(f)
    }

    /// Runs `f` on the active address space, if translation was enabled.
    pub fn with_address_space<R>(
        &self,
        f: impl FnOnce(&mut AddressSpace<M>, &mut FrameAllocator<'static>) -> R,
    ) -> Option<R> {
        let mut space = self.space.lock_irq();
        let space = space.as_mut()?;
        let mut frames = self.frames.lock_irq();
        Some(f(space, &mut frames))
    }

    /// Frame map, frame grid and heap buckets.
    ///
    /// # Errors
    /// Only those of `out`.
    pub fn print(&self, out: &mut impl Write) -> fmt::Result {
        let heap = self.heap.lock_irq();
        let frames = self.frames.lock_irq();
        frames.print_map(out)?;
        frames.print(out)?;
        heap.print(out)
    }
}

/// Brings up the global context. Must be the first thing that touches
/// memory management.
///
/// # Safety
/// Single-core, at PL1, with the frame table range, heap frames and the
/// running image identity mapped (i.e. before translation is on).
///
/// # Panics
/// On any failure; the kernel cannot continue without memory.
pub unsafe fn init_memory(
    split: &mut impl MemorySplitSource,
    layout: &MemoryLayout,
    mmu: &mut impl MmuControl,
) -> &'static KernelMemory {
    match unsafe { try_init_memory(split, layout, mmu) } {
        Ok(memory) => memory,
        Err(e) => panic!("kernel panic: memory init failed: {e}"),
    }
}

/// [`init_memory`], with the failure handed back.
///
/// # Errors
/// [`MemoryInitError::AlreadyInitialized`] if the context exists, without
/// touching it; otherwise the first failing step.
///
/// # Safety
/// See [`init_memory`].
pub unsafe fn try_init_memory(
    split: &mut impl MemorySplitSource,
    layout: &MemoryLayout,
    mmu: &mut impl MmuControl,
) -> Result<&'static KernelMemory, MemoryInitError> {
    if MEMORY.get().is_some() {
        return Err(MemoryInitError::AlreadyInitialized);
    }

    let memory = unsafe { KernelMemory::boot(IdentityMapper, split, layout) }?;
    memory.bootstrap_heap()?;
    MEMORY
        .set(memory)
        .map_err(|_| MemoryInitError::AlreadyInitialized)?;
    let memory = MEMORY.get().ok_or(MemoryInitError::AlreadyInitialized)?;

    unsafe { memory.enable_translation(mmu, split, layout) }?;
    Ok(memory)
}

/// The global context, brought up with defaults on first use if boot has
/// not called [`init_memory`].
///
/// # Panics
/// If the default bring-up fails, or off-target where there is no identity
/// mapped physical memory to bring up.
pub fn memory() -> &'static KernelMemory {
    MEMORY.get_or_init(|| {
        assert!(
            cfg!(target_os = "none"),
            "kernel panic: memory used before init_memory"
        );
        log::warn!("memory: used before init_memory, assuming the default split");
        let mut split = FixedMemorySplit::default();
        match unsafe { KernelMemory::boot(IdentityMapper, &mut split, &MemoryLayout::RASPBERRY_PI) } {
            Ok(memory) => memory,
            Err(e) => panic!("kernel panic: memory init failed: {e}"),
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kernel_alloc::vmm::PageAttributes;
    use kernel_info::firmware::MemoryRegion;
    use kernel_memory_addresses::VirtualAddress;
    use kernel_registers::dacr::Dacr;
    use kernel_registers::sctlr::Sctlr;
    use kernel_registers::ttbcr::Ttbcr;
    use kernel_registers::ttbr0::Ttbr0;
    use kernel_alloc::test_support::HostMemory;

    const MIB: usize = 1 << 20;

    /// Leaked host memory standing in for RAM at physical 0.
    pub type Host = &'static HostMemory;

    /// Registers that accept everything.
    #[derive(Default)]
    pub struct NullMmu {
        dacr: Dacr,
        sctlr: Sctlr,
    }

    unsafe impl MmuControl for NullMmu {
        fn dacr(&mut self) -> Dacr {
            self.dacr
        }
        fn set_dacr(&mut self, dacr: Dacr) {
            self.dacr = dacr;
        }
        fn set_ttbcr(&mut self, _: Ttbcr) {}
        fn set_ttbr0(&mut self, _: Ttbr0) {}
        fn sctlr(&mut self) -> Sctlr {
            self.sctlr
        }
        fn set_sctlr(&mut self, sctlr: Sctlr) {
            self.sctlr = sctlr;
        }
        fn data_sync_barrier(&mut self) {}
        fn instruction_sync_barrier(&mut self) {}
        fn invalidate_tlb(&mut self) {}
    }

    /// 96 MiB of ARM memory and 16 MiB of GPU memory above it.
    pub fn small_board() -> FixedMemorySplit {
        FixedMemorySplit::new(
            MemoryRegion::new(0, 96 * MIB as u32),
            MemoryRegion::new(96 * MIB as u32, 16 * MIB as u32),
        )
    }

    /// A booted context over fresh host memory.
    pub fn booted() -> KernelMemory<Host> {
        let host = HostMemory::new(96 * MIB).leak();
        let mut split = small_board();
        let memory = unsafe { KernelMemory::boot(host, &mut split, &MemoryLayout::RASPBERRY_PI) }.unwrap();
        memory.bootstrap_heap().unwrap();
        memory
    }

    #[test]
    fn boot_paints_the_table_in_place() {
        let mut split = FixedMemorySplit::new(
            MemoryRegion::new(0, 8 * MIB as u32),
            MemoryRegion::new(8 * MIB as u32, MIB as u32),
        );
        let host = HostMemory::new(8 * MIB).leak();
        let memory =
            unsafe { KernelMemory::boot(host, &mut split, &MemoryLayout::RASPBERRY_PI) }.unwrap();
        let byte = unsafe { *memory.mapper.phys_to_ptr(PhysicalAddress::new(0x0020_0000 + 0x300)) };
        assert_ne!(byte, 0);
        memory.with_frames(|f| {
            assert_eq!(f.tag(0x300), FrameTag::Free);
            assert_eq!(f.total_frames(), (8 * MIB - 3 * MIB) / 4096);
        });
    }

    #[test]
    fn heap_arena_comes_from_heap_frames() {
        let memory = booted();
        let arena = memory.with_heap(|h| h.arena()).unwrap();
        assert_eq!(arena.start, PhysicalAddress::new(0x0030_0000));
        assert_eq!(arena.size, 64 * MIB);
        memory.with_frames(|f| {
            assert_eq!(f.tag(0x300), FrameTag::KernelHeap);
            assert_eq!(f.tag(0x300 + 64 * 256 - 1), FrameTag::KernelHeap);
            assert_eq!(f.tag(0x300 + 64 * 256), FrameTag::Free);
        });
    }

    #[test]
    fn heap_and_frames_through_the_context() {
        let memory = booted();
        let p = memory.allocate(100).unwrap();
        memory.free(p.as_ptr());
        assert_eq!(memory.allocate(90).unwrap(), p);

        let free = memory.with_frames(|f| f.free_frames());
        let run = memory.allocate_frames(2, FrameTag::Allocated).unwrap();
        let aligned = memory.allocate_frames_aligned(4, 4, FrameTag::PageTable).unwrap();
        assert_eq!(aligned.frame() % 4, 0);
        memory.free_frames(run, 2);
        memory.free_frames(aligned, 4);
        assert_eq!(memory.with_frames(|f| f.free_frames()), free);
    }

    #[test]
    fn translation_is_optional_until_enabled() {
        let memory = booted();
        assert!(memory.with_address_space(|_, _| ()).is_none());

        let mut mmu = NullMmu::default();
        unsafe {
            memory
                .enable_translation(&mut mmu, &mut small_board(), &MemoryLayout::RASPBERRY_PI)
                .unwrap();
        }
        assert!(mmu.sctlr.m_mmu_enable());

        let va = VirtualAddress::new(0x0800_0000);
        let mapped = memory.with_address_space(|space, frames| {
            space.map_small_pages(frames, va, PhysicalAddress::new(0x0500_0000), 1, PageAttributes::RAM)?;
            Ok::<_, VmmError>(space.translate(va))
        });
        assert_eq!(mapped, Some(Ok(Some(PhysicalAddress::new(0x0500_0000)))));
    }

    #[test]
    fn print_covers_frames_and_heap() {
        let memory = booted();
        memory.allocate(10).unwrap();
        let mut out = String::new();
        memory.print(&mut out).unwrap();
        assert!(out.starts_with("Start       End"));
        assert!(out.contains("Kernel heap"));
        assert!(out.contains("frames free"));
        assert!(out.contains("   32 B   1"));
    }
}
