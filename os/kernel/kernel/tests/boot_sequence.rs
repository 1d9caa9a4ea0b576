use kernel::KernelMemory;
use kernel_alloc::frame_table::FrameTag;
use kernel_alloc::test_support::HostMemory;
use kernel_alloc::vmm::MmuControl;
use kernel_info::firmware::{FixedMemorySplit, MemoryRegion};
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::dacr::Dacr;
use kernel_registers::sctlr::Sctlr;
use kernel_registers::ttbcr::Ttbcr;
use kernel_registers::ttbr0::Ttbr0;
use kernel_vmem::{AccessPermission, DomainAccess, L1Entry};

const MIB: u32 = 1 << 20;

fn ram(size: u32) -> &'static HostMemory {
    HostMemory::new(size as usize).leak()
}

#[derive(Default)]
struct Mmu {
    dacr: Dacr,
    ttbr0: Option<Ttbr0>,
    sctlr: Sctlr,
}

unsafe impl MmuControl for Mmu {
    fn dacr(&mut self) -> Dacr {
        self.dacr
    }
    fn set_dacr(&mut self, dacr: Dacr) {
        self.dacr = dacr;
    }
    fn set_ttbcr(&mut self, ttbcr: Ttbcr) {
        assert_eq!(ttbcr.n(), 0);
    }
    fn set_ttbr0(&mut self, ttbr0: Ttbr0) {
        self.ttbr0 = Some(ttbr0);
    }
    fn sctlr(&mut self) -> Sctlr {
        self.sctlr
    }
    fn set_sctlr(&mut self, sctlr: Sctlr) {
        assert!(self.ttbr0.is_some(), "MMU enabled before TTBR0 was set");
        self.sctlr = sctlr;
    }
    fn data_sync_barrier(&mut self) {}
    fn instruction_sync_barrier(&mut self) {}
    fn invalidate_tlb(&mut self) {}
}

fn board() -> FixedMemorySplit {
    FixedMemorySplit::new(
        MemoryRegion::new(0, 16 * MIB),
        MemoryRegion::new(16 * MIB, 4 * MIB),
    )
}

fn layout() -> MemoryLayout {
    MemoryLayout {
        heap_size: MIB as usize,
        ..MemoryLayout::RASPBERRY_PI
    }
}

#[test]
fn boot_brings_up_frames_heap_and_translation() {
    let ram = ram(16 * MIB);
    let memory = unsafe { KernelMemory::boot(ram, &mut board(), &layout()) }.unwrap();
    memory.bootstrap_heap().unwrap();

    let mut mmu = Mmu::default();
    unsafe { memory.enable_translation(&mut mmu, &mut board(), &layout()) }.unwrap();
    assert!(mmu.sctlr.m_mmu_enable());
    assert_eq!(mmu.dacr.domain(1), DomainAccess::Client);

    let root = mmu.ttbr0.unwrap().table();
    memory.with_frames(|frames| {
        assert_eq!(frames.tag(0x300), FrameTag::KernelHeap);
        assert_eq!(frames.tag(root.frame()), FrameTag::PageTable);
        assert_eq!(root.frame() % 4, 0);
    });

    let beyond = memory
        .with_address_space(|space, _| space.section(20))
        .unwrap();
    assert!(matches!(beyond, L1Entry::Section(s) if s.access() == AccessPermission::NoAccess));

    let va = VirtualAddress::new(0x0040_1234);
    let pa = memory.with_address_space(|space, _| space.translate(va)).unwrap();
    assert_eq!(pa, Some(PhysicalAddress::new(0x0040_1234)));
}

#[test]
fn frames_are_conserved_through_exhaustion() {
    let ram = ram(16 * MIB);
    let memory = unsafe { KernelMemory::boot(ram, &mut board(), &layout()) }.unwrap();
    let total = memory.with_frames(|f| f.free_frames());

    let mut runs = Vec::new();
    while let Ok(pa) = memory.allocate_frames(7, FrameTag::Allocated) {
        runs.push(pa);
    }
    let left = memory.with_frames(|f| f.free_frames());
    assert_eq!(left, total - runs.len() * 7);
    assert!(left < 7);

    for pa in runs.iter().rev() {
        memory.free_frames(*pa, 7);
    }
    memory.with_frames(|f| {
        assert_eq!(f.free_frames(), total);
        assert_eq!(f.tag(0x300), FrameTag::Dirty);
    });
}

#[test]
fn heap_survives_a_burst_of_mixed_sizes() {
    let ram = ram(16 * MIB);
    let memory = unsafe { KernelMemory::boot(ram, &mut board(), &layout()) }.unwrap();

    let sizes = [8usize, 40, 200, 1000, 3000];
    let blocks: Vec<_> = (0..50)
        .map(|i| {
            let size = sizes[i % sizes.len()];
            (memory.allocate(size).unwrap(), size)
        })
        .collect();
    for (p, _) in &blocks {
        memory.free(p.as_ptr());
    }
    let used = memory.with_heap(|h| h.arena().unwrap().used);

    // The same mix again comes entirely from the free lists.
    for i in 0..50 {
        memory.allocate(sizes[i % sizes.len()]).unwrap();
    }
    assert_eq!(memory.with_heap(|h| h.arena().unwrap().used), used);
    let handed_out: usize = memory.with_heap(|h| h.bucket_stats().map(|s| s.count).sum());
    assert_eq!(handed_out, 100);
}
