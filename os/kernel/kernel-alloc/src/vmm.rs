//! # Address Space Mapper
//!
//! Builds the kernel's flat identity map out of 1 MiB sections and switches
//! the MMU on:
//!
//! ```text
//!  0 ─────────── HEAP_START ────────────── backed end ─────────── 4 GiB
//!  │ domain 0, RW/RO │ domain 1, RW/RO        │ domain 2, no access │
//!  │ normal memory   │ normal, MMIO as device │ execute-never       │
//! ```
//!
//! All three domains are DACR clients, so the per-section access bits are
//! enforced and a stray pointer past RAM faults instead of reading garbage.
//! Individual 1 MiB slots can later be refined into 4 KiB pages through a
//! coarse second-level table.

use crate::frame_alloc::{FrameAlloc, FrameAllocError};
use crate::frame_table::FrameTag;
use core::fmt::{self, Write};
use kernel_info::firmware::{MemoryRegion, MemorySplitSource};
use kernel_info::memory::{MemoryLayout, PAGE_SIZE, SECTION_SIZE};
use kernel_memory_addresses::{PhysicalAddress, Size1M, Size4K, VirtualAddress};
use kernel_registers::sctlr::Sctlr;
use kernel_registers::ttbcr::Ttbcr;
use kernel_registers::ttbr0::Ttbr0;
use kernel_vmem::{
    AccessPermission, CoarseTable, CoarseTableDescriptor, Dacr, Domain, DomainAccess, L1Entry,
    MemoryType, PhysMapper, SectionDescriptor, SmallPageDescriptor, TranslationTable,
};

#[cfg(target_arch = "arm")]
pub use cp15::Cp15;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of frames for translation tables: {0}")]
    OutOfFrames(#[from] FrameAllocError),
    #[error("{va} and {pa} must both be 4 KiB-aligned")]
    Unaligned {
        va: VirtualAddress,
        pa: PhysicalAddress,
    },
    #[error("the L1 slot of {0} holds an entry that cannot be split")]
    SectionConflict(VirtualAddress),
    #[error("mapping runs past the end of the address space")]
    AddressOverflow,
}

/// The CPU side of translation: CP15 registers, barriers, TLB maintenance.
///
/// # Safety
/// Implementors must perform the register accesses they claim to. Holding
/// an implementation is taken as proof of running at PL1.
pub unsafe trait MmuControl {
    fn dacr(&mut self) -> Dacr;
    fn set_dacr(&mut self, dacr: Dacr);
    fn set_ttbcr(&mut self, ttbcr: Ttbcr);
    fn set_ttbr0(&mut self, ttbr0: Ttbr0);
    fn sctlr(&mut self) -> Sctlr;
    fn set_sctlr(&mut self, sctlr: Sctlr);
    fn data_sync_barrier(&mut self);
    fn instruction_sync_barrier(&mut self);
    fn invalidate_tlb(&mut self);
}

/// Read-modify-write of one domain's DACR field.
pub fn set_domain_permission(mmu: &mut impl MmuControl, domain: Domain, access: DomainAccess) {
    let dacr = mmu.dacr().with_domain(domain.as_u8(), access);
    mmu.set_dacr(dacr);
}

/// Attributes of a section or page mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageAttributes {
    pub domain: Domain,
    pub access: AccessPermission,
    pub memory: MemoryType,
    pub execute_never: bool,
}

impl PageAttributes {
    /// Low memory holding the kernel image, stacks and frame table.
    pub const KERNEL: Self = Self {
        domain: Domain::KERNEL,
        access: AccessPermission::KernelRwUserRo,
        memory: MemoryType::NormalWriteBack,
        execute_never: false,
    };

    /// RAM above the kernel.
    pub const RAM: Self = Self {
        domain: Domain::HEAP,
        ..Self::KERNEL
    };

    /// Peripheral registers.
    pub const DEVICE: Self = Self {
        domain: Domain::HEAP,
        access: AccessPermission::KernelRw,
        memory: MemoryType::Device,
        execute_never: true,
    };

    /// Addresses no RAM or device answers to.
    pub const UNBACKED: Self = Self {
        domain: Domain::UNBACKED,
        access: AccessPermission::NoAccess,
        memory: MemoryType::StronglyOrdered,
        execute_never: true,
    };

    #[must_use]
    pub const fn section(self, base: PhysicalAddress) -> SectionDescriptor {
        SectionDescriptor::section(base, self.domain, self.access, self.memory)
            .with_execute_never(self.execute_never)
    }

    #[must_use]
    pub const fn page(self, base: PhysicalAddress) -> SmallPageDescriptor {
        SmallPageDescriptor::page(base, self.access, self.memory).with_execute_never(self.execute_never)
    }
}

/// A first-level translation table and the mapper to reach it.
pub struct AddressSpace<M: PhysMapper> {
    root: PhysicalAddress,
    mapper: M,
}

impl<M: PhysMapper> AddressSpace<M> {
    /// Allocates an empty L1 table: every entry faults.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`] if no 16 KiB-aligned run is left.
    pub fn new(frames: &mut impl FrameAlloc, mapper: M) -> Result<Self, VmmError> {
        let root = frames.allocate_aligned(
            TranslationTable::FRAMES,
            TranslationTable::FRAMES,
            FrameTag::PageTable,
        )?;
        let mut space = Self { root, mapper };
        space.l1_mut().zero();
        Ok(space)
    }

    /// Builds the boot identity map and enables the MMU.
    ///
    /// The split source is queried for the ARM region, then the GPU region.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`] if the L1 table cannot be allocated; the
    /// MMU is not touched in that case.
    ///
    /// # Safety
    /// Must run at PL1 with `mapper` matching the current translation, and
    /// the code, stack and data in use must lie in RAM named by the split.
    pub unsafe fn initialize(
        frames: &mut impl FrameAlloc,
        mapper: M,
        mmu: &mut impl MmuControl,
        split: &mut impl MemorySplitSource,
        layout: &MemoryLayout,
    ) -> Result<Self, VmmError> {
        let mut space = Self::new(frames, mapper)?;

        for domain in [Domain::KERNEL, Domain::HEAP, Domain::UNBACKED] {
            set_domain_permission(mmu, domain, DomainAccess::Client);
        }

        let arm = split.arm_memory();
        let gpu = split.gpu_memory();
        space.identity_map(arm, gpu, layout);
        unsafe { space.activate(mmu) };

        log::info!("vmm: L1 table at {}, MMU on", space.root);
        Ok(space)
    }

    /// Writes all 4096 identity section descriptors.
    pub fn identity_map(&mut self, arm: MemoryRegion, gpu: MemoryRegion, layout: &MemoryLayout) {
        let kernel_end = u64::from(layout.heap_start.align_up::<Size1M>().as_u32());
        let backed_end = backed_end(arm, gpu);
        let mmio = u64::from(layout.mmio.start.as_u32())..u64::from(layout.mmio.end.as_u32());
        let section = u64::from(SECTION_SIZE);

        let table = self.l1_mut();
        for index in 0..TranslationTable::ENTRIES {
            let start = index as u64 * section;
            let attrs = if start < mmio.end && start + section > mmio.start {
                PageAttributes::DEVICE
            } else if start < kernel_end {
                PageAttributes::KERNEL
            } else if start < backed_end {
                PageAttributes::RAM
            } else {
                PageAttributes::UNBACKED
            };
            #[allow(clippy::cast_possible_truncation)]
            table.set_section(index, attrs.section(PhysicalAddress::new(start as u32)));
        }
        log::debug!("vmm: identity map, backed up to 0x{backed_end:X}");
    }

    /// Points TTBR0 at this table and turns translation on.
    ///
    /// # Safety
    /// The table must map the currently executing code and data to where
    /// they are now.
    pub unsafe fn activate(&self, mmu: &mut impl MmuControl) {
        mmu.data_sync_barrier();
        mmu.invalidate_tlb();
        mmu.set_ttbcr(Ttbcr::new());
        mmu.set_ttbr0(Ttbr0::from_table(self.root));
        mmu.data_sync_barrier();
        mmu.instruction_sync_barrier();
        let sctlr = mmu.sctlr().with_m_mmu_enable(true);
        mmu.set_sctlr(sctlr);
        mmu.instruction_sync_barrier();
    }

    /// Makes descriptor changes to a live table visible.
    pub fn flush(&self, mmu: &mut impl MmuControl) {
        mmu.data_sync_barrier();
        mmu.invalidate_tlb();
        mmu.data_sync_barrier();
        mmu.instruction_sync_barrier();
    }

    /// Physical address of the L1 table.
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// The decoded L1 entry covering the 1 MiB at `index`.
    #[must_use]
    pub fn section(&self, index: usize) -> L1Entry {
        self.l1().entry(index)
    }

    /// Walks the tables for `va`, ignoring permissions.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.l1().entry(va.l1_index()) {
            L1Entry::Section(s) => Some(s.base() + va.offset::<Size1M>()),
            L1Entry::Coarse(c) => {
                let l2: &CoarseTable = unsafe { self.mapper.phys_to_mut(c.table_base()) };
                l2.page(va.l2_index())
                    .map(|p| p.base() + va.offset::<Size4K>())
            }
            L1Entry::Fault | L1Entry::Unsupported(_) => None,
        }
    }

    /// Maps `count` 4 KiB pages from `va` to `pa`.
    ///
    /// Empty slots get a fresh coarse table in `attrs.domain`. A slot mapped
    /// by a section is split first: the new table repeats the section's
    /// mapping page by page, then the requested pages replace their slice.
    /// On a live table, follow with [`AddressSpace::flush`].
    ///
    /// # Errors
    /// `Unaligned`, `AddressOverflow`, `SectionConflict` for supersections,
    /// `OutOfFrames` when a coarse table cannot be allocated. Pages before
    /// the failing one stay mapped.
    pub fn map_small_pages(
        &mut self,
        frames: &mut impl FrameAlloc,
        va: VirtualAddress,
        pa: PhysicalAddress,
        count: usize,
        attrs: PageAttributes,
    ) -> Result<(), VmmError> {
        if !va.is_aligned::<Size4K>() || !pa.is_aligned::<Size4K>() {
            return Err(VmmError::Unaligned { va, pa });
        }
        let len = u64::try_from(count).map_err(|_| VmmError::AddressOverflow)? * u64::from(PAGE_SIZE);
        if u64::from(va.as_u32()) + len > 1 << 32 || u64::from(pa.as_u32()) + len > 1 << 32 {
            return Err(VmmError::AddressOverflow);
        }

        for page in 0..count {
            #[allow(clippy::cast_possible_truncation)]
            let offset = (page as u32) << 12;
            let va = va + offset;
            let l2 = self.coarse_table_for(frames, va, attrs.domain)?;
            l2.set_page(va.l2_index(), attrs.page(pa + offset));
        }
        log::trace!("vmm: {count} pages {va} -> {pa}");
        Ok(())
    }

    fn coarse_table_for(
        &mut self,
        frames: &mut impl FrameAlloc,
        va: VirtualAddress,
        domain: Domain,
    ) -> Result<&mut CoarseTable, VmmError> {
        let index = va.l1_index();
        let base = match self.l1().entry(index) {
            L1Entry::Coarse(c) => c.table_base(),
            L1Entry::Fault => {
                let base = self.new_coarse_table(frames)?;
                self.l1_mut()
                    .set_coarse(index, CoarseTableDescriptor::table(base, domain));
                base
            }
            L1Entry::Section(section) => {
                let base = self.new_coarse_table(frames)?;
                let l2: &mut CoarseTable = unsafe { self.mapper.phys_to_mut(base) };
                for slot in 0..CoarseTable::ENTRIES {
                    l2.set_page(slot, SmallPageDescriptor::from_section(section, slot));
                }
                let coarse = CoarseTableDescriptor::table(base, Domain::KERNEL)
                    .with_domain(section.domain());
                self.l1_mut().set_coarse(index, coarse);
                log::debug!("vmm: split section {index:#x} into pages");
                base
            }
            L1Entry::Unsupported(_) => return Err(VmmError::SectionConflict(va)),
        };
        Ok(unsafe { self.mapper.phys_to_mut(base) })
    }

    fn new_coarse_table(&mut self, frames: &mut impl FrameAlloc) -> Result<PhysicalAddress, VmmError> {
        let base = frames.allocate(1, FrameTag::PageTable)?;
        let l2: &mut CoarseTable = unsafe { self.mapper.phys_to_mut(base) };
        l2.zero();
        Ok(base)
    }

    /// DACR and the L1 table, with runs of like sections folded.
    ///
    /// # Errors
    /// Only those of `out`.
    pub fn print_l1(&self, dacr: Dacr, out: &mut impl Write) -> fmt::Result {
        write!(out, "DACR 0x{:08X}:", dacr.into_bits())?;
        for domain in [Domain::KERNEL, Domain::HEAP, Domain::UNBACKED] {
            write!(out, " {domain:?} {:?}", dacr.domain(domain.as_u8()))?;
        }
        writeln!(out)?;

        let l1 = self.l1();
        let mut index = 0;
        while index < TranslationTable::ENTRIES {
            let first = l1.entry(index);
            let mut end = index + 1;
            while end < TranslationTable::ENTRIES && continues(first, index, l1.entry(end), end) {
                end += 1;
            }
            let start = index as u64 * u64::from(SECTION_SIZE);
            let last = end as u64 * u64::from(SECTION_SIZE) - 1;
            writeln!(out, "0x{start:08X}  0x{last:08X}  {:<4}  {first:?}", end - index)?;
            index = end;
        }
        Ok(())
    }

    fn l1(&self) -> &TranslationTable {
        unsafe { self.mapper.phys_to_mut(self.root) }
    }

    fn l1_mut(&mut self) -> &mut TranslationTable {
        unsafe { self.mapper.phys_to_mut(self.root) }
    }
}

/// First section boundary past the memory the firmware reported.
fn backed_end(arm: MemoryRegion, gpu: MemoryRegion) -> u64 {
    let end = if arm.base > gpu.base { arm.end() } else { gpu.end() };
    end.next_multiple_of(u64::from(SECTION_SIZE))
}

/// Whether `entry` at `index` extends the run started by `first` at `start`:
/// faults follow faults, sections follow sections with the same attributes
/// and a base advanced in step.
fn continues(first: L1Entry, start: usize, entry: L1Entry, index: usize) -> bool {
    match (first, entry) {
        (L1Entry::Fault, L1Entry::Fault) => true,
        (L1Entry::Section(a), L1Entry::Section(b)) => {
            let step = (index - start) << 20;
            a.attributes() == b.attributes()
                && b.base().as_usize().wrapping_sub(a.base().as_usize()) == step
        }
        _ => false,
    }
}

#[cfg(target_arch = "arm")]
mod cp15 {
    use super::MmuControl;
    use kernel_registers::barrier;
    use kernel_registers::sctlr::Sctlr;
    use kernel_registers::ttbcr::Ttbcr;
    use kernel_registers::ttbr0::Ttbr0;
    use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
    use kernel_vmem::Dacr;

    /// The running core's system control coprocessor.
    pub struct Cp15 {
        _private: (),
    }

    impl Cp15 {
        /// # Safety
        /// The caller must be executing at PL1.
        #[must_use]
        pub const unsafe fn new() -> Self {
            Self { _private: () }
        }
    }

    unsafe impl MmuControl for Cp15 {
        fn dacr(&mut self) -> Dacr {
            unsafe { Dacr::load_unsafe() }
        }

        fn set_dacr(&mut self, dacr: Dacr) {
            unsafe { dacr.store_unsafe() }
        }

        fn set_ttbcr(&mut self, ttbcr: Ttbcr) {
            unsafe { ttbcr.store_unsafe() }
        }

        fn set_ttbr0(&mut self, ttbr0: Ttbr0) {
            unsafe { ttbr0.store_unsafe() }
        }

        fn sctlr(&mut self) -> Sctlr {
            unsafe { Sctlr::load_unsafe() }
        }

        fn set_sctlr(&mut self, sctlr: Sctlr) {
            unsafe { sctlr.store_unsafe() }
        }

        fn data_sync_barrier(&mut self) {
            barrier::dsb();
        }

        fn instruction_sync_barrier(&mut self) {
            barrier::isb();
        }

        fn invalidate_tlb(&mut self) {
            unsafe { barrier::invalidate_tlb_all() }
        }
    }
}
