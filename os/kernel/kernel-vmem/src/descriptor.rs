//! # Short-Descriptor Entries
//!
//! | L1 bits 1:0 | Meaning |
//! |-------------|---------|
//! | `0b00` | Fault; any access aborts |
//! | `0b01` | Pointer to a coarse (L2) table |
//! | `0b10` | 1 MiB section (bit 18 = 0) or 16 MiB supersection (bit 18 = 1) |
//! | `0b11` | Section with PXN; treated as unsupported here |
//!
//! Memory attributes are encoded by `TEX[2:0]`, `C` and `B` with TEX remap
//! disabled (`SCTLR.TRE = 0`).

use crate::Domain;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size1M, Size4K};

/// `AP[1:0]` with `AP[2] = 0`: privileged vs. unprivileged access.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum AccessPermission {
    /// No access at any privilege level.
    NoAccess = 0b00,
    /// Kernel read/write, user none.
    KernelRw = 0b01,
    /// Kernel read/write, user read-only.
    KernelRwUserRo = 0b10,
    /// Kernel and user read/write.
    KernelRwUserRw = 0b11,
}

impl AccessPermission {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0b00 => Self::NoAccess,
            0b01 => Self::KernelRw,
            0b10 => Self::KernelRwUserRo,
            _ => Self::KernelRwUserRw,
        }
    }
}

/// Memory region attributes (`TEX`, `C`, `B`).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MemoryType {
    /// `TEX=000 C=0 B=0`: every access in program order, uncached.
    StronglyOrdered,
    /// `TEX=000 C=0 B=1`: shareable device memory for peripherals.
    Device,
    /// `TEX=001 C=0 B=0`: normal memory, not cached.
    NormalNonCacheable,
    /// `TEX=001 C=1 B=1`: normal memory, write-back write-allocate.
    NormalWriteBack,
    /// Any other combination, kept verbatim.
    Other { tex: u8, c: bool, b: bool },
}

impl MemoryType {
    #[must_use]
    pub const fn tex_c_b(self) -> (u8, bool, bool) {
        match self {
            Self::StronglyOrdered => (0b000, false, false),
            Self::Device => (0b000, false, true),
            Self::NormalNonCacheable => (0b001, false, false),
            Self::NormalWriteBack => (0b001, true, true),
            Self::Other { tex, c, b } => (tex & 0b111, c, b),
        }
    }

    #[must_use]
    pub const fn from_tex_c_b(tex: u8, c: bool, b: bool) -> Self {
        match (tex & 0b111, c, b) {
            (0b000, false, false) => Self::StronglyOrdered,
            (0b000, false, true) => Self::Device,
            (0b001, false, false) => Self::NormalNonCacheable,
            (0b001, true, true) => Self::NormalWriteBack,
            (tex, c, b) => Self::Other { tex, c, b },
        }
    }
}

/// First-level section descriptor mapping 1 MiB.
///
/// ### Bit layout
///
/// | Bits  | Field | Meaning |
/// |-------|-------|---------|
/// | 1:0   | type  | `0b10` |
/// | 2     | B     | bufferable |
/// | 3     | C     | cacheable |
/// | 4     | XN    | execute-never |
/// | 8:5   | domain | DACR field index |
/// | 9     | IMP   | implementation defined |
/// | 11:10 | AP    | access permission |
/// | 14:12 | TEX   | type extension |
/// | 15    | AP\[2\] | read-only modifier |
/// | 16    | S     | shareable |
/// | 17    | nG    | not global |
/// | 18    | 0     | section (not supersection) |
/// | 19    | NS    | non-secure |
/// | 31:20 | base  | physical section base |
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct SectionDescriptor {
    /// Descriptor type; `0b10` for a section.
    #[bits(2, default = 0b10)]
    pub descriptor_type: u8,
    pub bufferable: bool,
    pub cacheable: bool,
    pub execute_never: bool,
    #[bits(4)]
    pub domain: u8,
    pub imp: bool,
    #[bits(2)]
    pub access: AccessPermission,
    #[bits(3)]
    pub tex: u8,
    /// `AP[2]`; turns the `AP[1:0]` grants read-only.
    pub apx: bool,
    pub shareable: bool,
    pub not_global: bool,
    #[bits(default = false)]
    _supersection: bool,
    pub non_secure: bool,
    #[bits(12)]
    base_1m: u16,
}

impl SectionDescriptor {
    /// A section mapping `base`, which must be 1 MiB-aligned.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn section(
        base: PhysicalAddress,
        domain: Domain,
        access: AccessPermission,
        memory: MemoryType,
    ) -> Self {
        debug_assert!(base.is_aligned::<Size1M>(), "section base must be 1M-aligned");
        let (tex, c, b) = memory.tex_c_b();
        Self::new()
            .with_base_1m((base.as_u32() >> Size1M::SHIFT) as u16)
            .with_domain(domain.as_u8())
            .with_access(access)
            .with_tex(tex)
            .with_cacheable(c)
            .with_bufferable(b)
    }

    /// The section for L1 slot `index` mapped onto itself.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn identity(
        index: usize,
        domain: Domain,
        access: AccessPermission,
        memory: MemoryType,
    ) -> Self {
        Self::section(
            PhysicalAddress::new((index as u32) << Size1M::SHIFT),
            domain,
            access,
            memory,
        )
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new((self.base_1m() as u32) << Size1M::SHIFT)
    }

    #[must_use]
    pub const fn memory_type(&self) -> MemoryType {
        MemoryType::from_tex_c_b(self.tex(), self.cacheable(), self.bufferable())
    }

    /// The same attributes with the base address cleared.
    #[must_use]
    pub const fn attributes(&self) -> Self {
        self.with_base_1m(0)
    }
}

/// First-level descriptor pointing at a 1 KiB-aligned coarse table.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct CoarseTableDescriptor {
    /// Descriptor type; `0b01` for a coarse table.
    #[bits(2, default = 0b01)]
    pub descriptor_type: u8,
    /// Privileged execute-never (with the PXN extension).
    pub pxn: bool,
    pub non_secure: bool,
    #[bits(default = false)]
    _sbz: bool,
    #[bits(4)]
    pub domain: u8,
    pub imp: bool,
    #[bits(22)]
    base_1k: u32,
}

impl CoarseTableDescriptor {
    /// Points at the L2 table at `table`, which must be 1 KiB-aligned.
    #[must_use]
    pub const fn table(table: PhysicalAddress, domain: Domain) -> Self {
        debug_assert!(table.as_u32() & 0x3FF == 0, "coarse table must be 1K-aligned");
        Self::new()
            .with_base_1k(table.as_u32() >> 10)
            .with_domain(domain.as_u8())
    }

    #[must_use]
    pub const fn table_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base_1k() << 10)
    }
}

/// Second-level small page descriptor mapping 4 KiB.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct SmallPageDescriptor {
    pub execute_never: bool,
    /// Always set; distinguishes a small page from a fault or large page.
    #[bits(default = true)]
    pub small_page: bool,
    pub bufferable: bool,
    pub cacheable: bool,
    #[bits(2)]
    pub access: AccessPermission,
    #[bits(3)]
    pub tex: u8,
    pub apx: bool,
    pub shareable: bool,
    pub not_global: bool,
    #[bits(20)]
    base_4k: u32,
}

impl SmallPageDescriptor {
    /// A page mapping `base`, which must be 4 KiB-aligned.
    #[must_use]
    pub const fn page(base: PhysicalAddress, access: AccessPermission, memory: MemoryType) -> Self {
        debug_assert!(base.is_aligned::<Size4K>(), "page base must be 4K-aligned");
        let (tex, c, b) = memory.tex_c_b();
        Self::new()
            .with_base_4k(base.as_u32() >> Size4K::SHIFT)
            .with_access(access)
            .with_tex(tex)
            .with_cacheable(c)
            .with_bufferable(b)
    }

    /// The 4 KiB slice `slot` (0..256) of `section`, with its attributes.
    #[must_use]
    pub const fn from_section(section: SectionDescriptor, slot: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let base = PhysicalAddress::new(section.base().as_u32() + ((slot as u32) << Size4K::SHIFT));
        Self::page(base, section.access(), section.memory_type())
            .with_execute_never(section.execute_never())
            .with_apx(section.apx())
            .with_shareable(section.shareable())
            .with_not_global(section.not_global())
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base_4k() << Size4K::SHIFT)
    }

    #[must_use]
    pub const fn memory_type(&self) -> MemoryType {
        MemoryType::from_tex_c_b(self.tex(), self.cacheable(), self.bufferable())
    }
}

/// A decoded first-level entry.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum L1Entry {
    Fault,
    Coarse(CoarseTableDescriptor),
    Section(SectionDescriptor),
    /// Supersections and PXN sections; never written by the kernel.
    Unsupported(u32),
}

impl L1Entry {
    #[must_use]
    pub const fn decode(raw: u32) -> Self {
        match raw & 0b11 {
            0b00 => Self::Fault,
            0b01 => Self::Coarse(CoarseTableDescriptor::from_bits(raw)),
            0b10 if raw & (1 << 18) == 0 => Self::Section(SectionDescriptor::from_bits(raw)),
            _ => Self::Unsupported(raw),
        }
    }

    #[must_use]
    pub const fn into_bits(self) -> u32 {
        match self {
            Self::Fault => 0,
            Self::Coarse(c) => c.into_bits(),
            Self::Section(s) => s.into_bits(),
            Self::Unsupported(raw) => raw,
        }
    }
}

impl fmt::Debug for L1Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fault => f.write_str("Fault"),
            Self::Coarse(c) => write!(f, "Coarse({:?} D{})", c.table_base(), c.domain()),
            Self::Section(s) => write!(
                f,
                "Section({:?} D{} {:?} {:?}{})",
                s.base(),
                s.domain(),
                s.access(),
                s.memory_type(),
                if s.execute_never() { " XN" } else { "" }
            ),
            Self::Unsupported(raw) => write!(f, "Unsupported(0x{raw:08X})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_encoding_matches_the_architecture() {
        // RW/RO, domain 1, strongly ordered, base 0x003: the value the
        // classic identity map uses for the heap megabytes.
        let s = SectionDescriptor::identity(
            3,
            Domain::HEAP,
            AccessPermission::KernelRwUserRo,
            MemoryType::StronglyOrdered,
        );
        assert_eq!(s.into_bits(), 0x0030_0000 | (0b10 << 10) | (1 << 5) | 0b10);
        assert_eq!(L1Entry::decode(s.into_bits()), L1Entry::Section(s));
    }

    #[test]
    fn normal_memory_sets_tex_c_b() {
        let s = SectionDescriptor::identity(
            0,
            Domain::KERNEL,
            AccessPermission::KernelRw,
            MemoryType::NormalWriteBack,
        );
        assert_eq!(s.tex(), 0b001);
        assert!(s.cacheable() && s.bufferable());
        assert_eq!(s.memory_type(), MemoryType::NormalWriteBack);
    }

    #[test]
    fn coarse_descriptor_keeps_table_base() {
        let c = CoarseTableDescriptor::table(PhysicalAddress::new(0x0031_0400), Domain::HEAP);
        assert_eq!(c.into_bits() & 0b11, 0b01);
        assert_eq!(c.table_base().as_u32(), 0x0031_0400);
        assert_eq!(L1Entry::decode(c.into_bits()), L1Entry::Coarse(c));
    }

    #[test]
    fn splitting_a_section_preserves_attributes() {
        let s = SectionDescriptor::identity(
            0x3F0,
            Domain::HEAP,
            AccessPermission::KernelRw,
            MemoryType::Device,
        )
        .with_execute_never(true);
        let p = SmallPageDescriptor::from_section(s, 0x20);
        assert_eq!(p.base().as_u32(), 0x3F02_0000);
        assert!(p.small_page());
        assert!(p.execute_never());
        assert_eq!(p.access(), AccessPermission::KernelRw);
        assert_eq!(p.memory_type(), MemoryType::Device);
    }

    #[test]
    fn unsupported_and_fault_decode() {
        assert_eq!(L1Entry::decode(0), L1Entry::Fault);
        assert!(matches!(L1Entry::decode(0b11), L1Entry::Unsupported(3)));
        assert!(matches!(
            L1Entry::decode((1 << 18) | 0b10),
            L1Entry::Unsupported(_)
        ));
    }
}
