//! # Frame Table
//!
//! One byte per 4 KiB physical frame, indexed by `address / 4096`. The
//! table covers the full 32-bit physical space whether or not RAM backs it;
//! frames past the firmware-reported RAM stay [`FrameTag::Invalid`].
//!
//! The byte encoding is private: the low bit marks frames the allocator may
//! hand out, the upper bits hold the tag ordinal. Bytes that do not decode
//! read back as [`FrameTag::Invalid`].

use core::fmt;
use core::ops::Range;

/// What a physical frame is currently used for.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FrameTag {
    /// Available and known to be zeroed.
    Free,
    /// Available, contents undefined (previously allocated).
    Dirty,
    /// Low memory below the managed window.
    Reserved,
    /// The kernel image.
    Kernel,
    /// The boot core's SVC stack.
    KernelStack,
    /// Per-core abort mode stacks.
    AbortStack,
    /// Per-core IRQ mode stacks.
    IrqStack,
    /// The frame table itself.
    FrameTable,
    /// Generic allocation through the frame allocator.
    Allocated,
    /// The kernel heap arena.
    KernelHeap,
    /// Memory owned by the GPU.
    Video,
    /// Translation tables.
    PageTable,
    /// Not backed by RAM.
    Invalid,
    /// The peripheral window.
    MmioIo,
}

impl FrameTag {
    /// Every tag, in encoding order.
    pub const ALL: [Self; 14] = [
        Self::Free,
        Self::Dirty,
        Self::Kernel,
        Self::Reserved,
        Self::KernelStack,
        Self::AbortStack,
        Self::IrqStack,
        Self::FrameTable,
        Self::Allocated,
        Self::KernelHeap,
        Self::Video,
        Self::PageTable,
        Self::Invalid,
        Self::MmioIo,
    ];

    /// Whether the frame allocator may hand this frame out.
    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Free | Self::Dirty)
    }

    const fn ordinal(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Dirty => 1,
            Self::Kernel => 2,
            Self::Reserved => 3,
            Self::KernelStack => 4,
            Self::AbortStack => 5,
            Self::IrqStack => 6,
            Self::FrameTable => 7,
            Self::Allocated => 8,
            Self::KernelHeap => 9,
            Self::Video => 10,
            Self::PageTable => 11,
            Self::Invalid => 12,
            Self::MmioIo => 13,
        }
    }

    #[inline]
    const fn encode(self) -> u8 {
        (self.ordinal() << 1) | self.is_available() as u8
    }

    #[inline]
    const fn decode(byte: u8) -> Self {
        let ordinal = (byte >> 1) as usize;
        if ordinal >= Self::ALL.len() {
            return Self::Invalid;
        }
        let tag = Self::ALL[ordinal];
        if tag.is_available() == (byte & 1 == 1) {
            tag
        } else {
            Self::Invalid
        }
    }

    /// Human-readable description for the frame map.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Dirty => "Free (dirty)",
            Self::Reserved => "Reserved",
            Self::Kernel => "Kernel image",
            Self::KernelStack => "Kernel stack",
            Self::AbortStack => "Abort stack",
            Self::IrqStack => "IRQ stack",
            Self::FrameTable => "Frame table",
            Self::Allocated => "Allocated",
            Self::KernelHeap => "Kernel heap",
            Self::Video => "Video memory",
            Self::PageTable => "Page table",
            Self::Invalid => "Invalid",
            Self::MmioIo => "Memory-mapped I/O",
        }
    }

    /// One-character glyph for the frame grid.
    #[must_use]
    pub const fn symbol(self) -> char {
        match self {
            Self::Free | Self::Dirty => '.',
            Self::Reserved => '-',
            Self::Kernel => 'K',
            Self::KernelStack => '1',
            Self::AbortStack => '2',
            Self::IrqStack => '3',
            Self::FrameTable => 'T',
            Self::Allocated => 'A',
            Self::KernelHeap => 'H',
            Self::Video => 'V',
            Self::PageTable => 'P',
            Self::Invalid => 'x',
            Self::MmioIo => 'I',
        }
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte-per-frame tag storage.
///
/// Readable by anyone holding a reference; only the frame allocator in
/// this crate writes it.
pub struct FrameTable<'t> {
    entries: &'t mut [u8],
}

impl<'t> FrameTable<'t> {
    pub(crate) const fn new(entries: &'t mut [u8]) -> Self {
        Self { entries }
    }

    /// Number of frames the table describes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The tag of frame `index`; frames past the table are `Invalid`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> FrameTag {
        self.entries
            .get(index)
            .map_or(FrameTag::Invalid, |b| FrameTag::decode(*b))
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize, tag: FrameTag) {
        if let Some(b) = self.entries.get_mut(index) {
            *b = tag.encode();
        }
    }

    /// Tags every frame of `range` that lies inside the table.
    pub(crate) fn paint(&mut self, range: Range<usize>, tag: FrameTag) {
        let end = range.end.min(self.entries.len());
        let start = range.start.min(end);
        self.entries[start..end].fill(tag.encode());
    }

    /// Number of available frames in `range`.
    #[must_use]
    pub fn count_available(&self, range: Range<usize>) -> usize {
        range.filter(|&i| self.get(i).is_available()).count()
    }

    /// Maximal runs of equal tags over the whole table.
    pub fn runs(&self) -> Runs<'_, 't> {
        Runs {
            table: self,
            next: 0,
        }
    }
}

/// Iterator over `(frames, tag)` runs, see [`FrameTable::runs`].
pub struct Runs<'a, 't> {
    table: &'a FrameTable<'t>,
    next: usize,
}

impl Iterator for Runs<'_, '_> {
    type Item = (Range<usize>, FrameTag);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next;
        if start >= self.table.len() {
            return None;
        }
        let tag = self.table.get(start);
        let mut end = start + 1;
        while end < self.table.len() && self.table.get(end) == tag {
            end += 1;
        }
        self.next = end;
        Some((start..end, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_free_and_dirty_are_available() {
        let available: Vec<_> = FrameTag::ALL
            .iter()
            .filter(|t| t.is_available())
            .collect();
        assert_eq!(available, [&FrameTag::Free, &FrameTag::Dirty]);
    }

    #[test]
    fn every_tag_survives_the_table() {
        let mut bytes = [0u8; FrameTag::ALL.len()];
        let mut t = FrameTable::new(&mut bytes);
        for (i, tag) in FrameTag::ALL.iter().enumerate() {
            t.set(i, *tag);
        }
        for (i, tag) in FrameTag::ALL.iter().enumerate() {
            assert_eq!(t.get(i), *tag);
        }
    }

    #[test]
    fn garbage_and_out_of_range_read_as_invalid() {
        // 0xFF: ordinal out of range; 0x05: Kernel ordinal with the available bit.
        let mut bytes = [0xFF, 0x05];
        let t = FrameTable::new(&mut bytes);
        assert_eq!(t.get(0), FrameTag::Invalid);
        assert_eq!(t.get(1), FrameTag::Invalid);
        assert_eq!(t.get(2), FrameTag::Invalid);
    }

    #[test]
    fn paint_clamps_and_runs_coalesce() {
        let mut bytes = [0u8; 8];
        let mut t = FrameTable::new(&mut bytes);
        t.paint(0..8, FrameTag::Invalid);
        t.paint(2..5, FrameTag::Kernel);
        t.paint(6..100, FrameTag::Free);
        let runs: Vec<_> = t.runs().collect();
        assert_eq!(
            runs,
            [
                (0..2, FrameTag::Invalid),
                (2..5, FrameTag::Kernel),
                (5..6, FrameTag::Invalid),
                (6..8, FrameTag::Free),
            ]
        );
        assert_eq!(t.count_available(0..8), 2);
    }

    #[test]
    fn names_and_symbols() {
        assert_eq!(FrameTag::Dirty.symbol(), '.');
        assert_eq!(FrameTag::PageTable.symbol(), 'P');
        assert_eq!(FrameTag::MmioIo.to_string(), "Memory-mapped I/O");
    }
}
