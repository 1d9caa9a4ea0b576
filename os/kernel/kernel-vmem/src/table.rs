//! # Translation Tables
//!
//! Both tables are plain arrays of raw descriptors; typed access goes
//! through [`L1Entry`] and [`SmallPageDescriptor`]. Nothing here touches
//! TTBR0 or the TLB: callers that modify an active table must perform the
//! required maintenance themselves.

use crate::{CoarseTableDescriptor, L1Entry, SectionDescriptor, SmallPageDescriptor};

/// First-level table: 4096 entries, one per MiB, 16 KiB-aligned.
#[doc(alias = "L1")]
#[repr(C, align(16384))]
pub struct TranslationTable {
    entries: [u32; TranslationTable::ENTRIES],
}

impl TranslationTable {
    pub const ENTRIES: usize = 4096;
    /// Size in bytes; also the required alignment.
    pub const SIZE: usize = Self::ENTRIES * 4;
    pub const ALIGN: usize = 16 * 1024;
    /// Frames occupied by one table.
    pub const FRAMES: usize = Self::SIZE / 4096;

    /// Sets every entry to a fault descriptor.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(0);
    }

    #[inline]
    #[must_use]
    pub const fn raw(&self, index: usize) -> u32 {
        self.entries[index]
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, index: usize) -> L1Entry {
        L1Entry::decode(self.entries[index])
    }

    #[inline]
    pub const fn set_section(&mut self, index: usize, section: SectionDescriptor) {
        self.entries[index] = section.into_bits();
    }

    #[inline]
    pub const fn set_coarse(&mut self, index: usize, coarse: CoarseTableDescriptor) {
        self.entries[index] = coarse.into_bits();
    }

    #[inline]
    pub const fn set_fault(&mut self, index: usize) {
        self.entries[index] = 0;
    }

    /// Iterates `(index, entry)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, L1Entry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, raw)| (i, L1Entry::decode(*raw)))
    }
}

/// Second-level coarse table: 256 entries, one per 4 KiB, 1 KiB-aligned.
#[doc(alias = "L2")]
#[repr(C, align(1024))]
pub struct CoarseTable {
    entries: [u32; CoarseTable::ENTRIES],
}

impl CoarseTable {
    pub const ENTRIES: usize = 256;
    pub const SIZE: usize = Self::ENTRIES * 4;

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(0);
    }

    #[inline]
    #[must_use]
    pub const fn raw(&self, index: usize) -> u32 {
        self.entries[index]
    }

    /// The small page at `index`, or `None` for fault and large-page entries.
    #[inline]
    #[must_use]
    pub const fn page(&self, index: usize) -> Option<SmallPageDescriptor> {
        let raw = self.entries[index];
        if raw & 0b10 == 0 {
            None
        } else {
            Some(SmallPageDescriptor::from_bits(raw))
        }
    }

    #[inline]
    pub const fn set_page(&mut self, index: usize, page: SmallPageDescriptor) {
        self.entries[index] = page.into_bits();
    }

    #[inline]
    pub const fn set_fault(&mut self, index: usize) {
        self.entries[index] = 0;
    }
}

const _: () = {
    assert!(size_of::<TranslationTable>() == TranslationTable::SIZE);
    assert!(align_of::<TranslationTable>() == TranslationTable::ALIGN);
    assert!(size_of::<CoarseTable>() == CoarseTable::SIZE);
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessPermission, Domain, MemoryType};
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn coarse_page_round_trip() {
        let mut t = Box::new(CoarseTable {
            entries: [0xFFFF_FFFF; CoarseTable::ENTRIES],
        });
        t.zero();
        assert!(t.page(7).is_none());
        let p = SmallPageDescriptor::page(
            PhysicalAddress::new(0x0040_7000),
            AccessPermission::KernelRw,
            MemoryType::NormalWriteBack,
        );
        t.set_page(7, p);
        assert_eq!(t.page(7), Some(p));
        t.set_fault(7);
        assert_eq!(t.raw(7), 0);
    }

    #[test]
    fn l1_iter_decodes_every_entry() {
        let mut t = Box::new(TranslationTable {
            entries: [0; TranslationTable::ENTRIES],
        });
        t.set_section(
            1,
            SectionDescriptor::identity(1, Domain::KERNEL, AccessPermission::KernelRw, MemoryType::Device),
        );
        t.set_coarse(2, CoarseTableDescriptor::table(PhysicalAddress::new(0x8000), Domain::HEAP));
        let kinds: Vec<_> = t.iter().take(3).map(|(_, e)| e).collect();
        assert_eq!(kinds[0], L1Entry::Fault);
        assert!(matches!(kinds[1], L1Entry::Section(_)));
        assert!(matches!(kinds[2], L1Entry::Coarse(_)));
        assert_eq!(t.iter().count(), TranslationTable::ENTRIES);
    }
}
