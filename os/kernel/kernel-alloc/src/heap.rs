//! # Kernel Heap
//!
//! Size-class allocator over one contiguous arena of `KernelHeap` frames.
//!
//! ```text
//!  start                          offset                 end
//!  ├─[hdr|32 B]─[hdr|1 KiB  ]─[hdr|32 B]─┼───── unused ───────┤
//!        ▲                        ▲
//!        └── bucket 0 free list ──┘      (LIFO, link in the payload)
//! ```
//!
//! Every block starts with an 8-byte header carrying a signature and its
//! bucket index. Blocks are carved from the arena once and afterwards only
//! move between the caller and their bucket's free list; the arena is never
//! compacted and blocks never change bucket.

use crate::frame_alloc::{FrameAlloc, FrameAllocError};
use crate::frame_table::FrameTag;
use core::fmt::{self, Write};
use core::ptr::NonNull;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// Marks a live heap block header.
pub const SIGNATURE: u16 = 0x5353;

/// Bytes in front of every payload. Payloads are aligned to this.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Bucket sizes in bytes, header included, followed by the sentinel.
pub const BUCKET_SIZES: [usize; BUCKETS + 1] = [
    32,
    64,
    96,
    128,
    256,
    512,
    1 << 10,
    4 << 10,
    16 << 10,
    64 << 10,
    128 << 10,
    256 << 10,
    512 << 10,
    1 << 20,
    2 << 20,
    4 << 20,
    16 << 20,
    32 << 20,
    64 << 20,
    usize::MAX,
];

/// Number of real buckets.
pub const BUCKETS: usize = 19;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("no bucket holds {0} bytes")]
    Oversized(usize),
    #[error("arena exhausted for a {bucket_size} byte block")]
    Exhausted { bucket_size: usize },
    #[error("heap arena unavailable: {0}")]
    Bootstrap(#[from] FrameAllocError),
    #[error("heap arena at {0} has no usable mapping")]
    Unmapped(PhysicalAddress),
}

#[repr(C, align(8))]
struct BlockHeader {
    signature: u16,
    bucket: u16,
}

/// A block inside the arena, addressed by its header.
///
/// All pointer arithmetic between headers and payloads happens here.
#[derive(Copy, Clone, Eq, PartialEq)]
struct BlockHandle(NonNull<BlockHeader>);

impl BlockHandle {
    /// Writes a fresh header at `block`.
    ///
    /// # Safety
    /// `block` must be 8-aligned and point to at least one bucket's worth of
    /// writable arena memory not in use.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn carve(block: NonNull<u8>, bucket: usize) -> Self {
        let header = block.cast::<BlockHeader>();
        unsafe {
            header.write(BlockHeader {
                signature: SIGNATURE,
                bucket: bucket as u16,
            });
        }
        Self(header)
    }

    /// Recovers the block behind a payload pointer handed out earlier, or
    /// `None` if the pointer cannot belong to `arena`.
    ///
    /// # Safety
    /// If `payload` lies inside the carved part of `arena`, the memory in
    /// front of it must be readable.
    unsafe fn from_payload(payload: NonNull<u8>, arena: &Arena) -> Option<Self> {
        let addr = payload.as_ptr() as usize;
        let start = arena.start.as_ptr() as usize;
        if addr < start + HEADER_SIZE || addr >= start + arena.offset {
            return None;
        }
        let header = unsafe { payload.sub(HEADER_SIZE) }.cast::<BlockHeader>();
        if !header.is_aligned() {
            return None;
        }
        let block = Self(header);
        let BlockHeader { signature, bucket } = unsafe { header.read() };
        (signature == SIGNATURE && usize::from(bucket) < BUCKETS).then_some(block)
    }

    fn bucket(self) -> usize {
        usize::from(unsafe { self.0.as_ref() }.bucket)
    }

    fn payload(self) -> NonNull<u8> {
        unsafe { self.0.cast::<u8>().add(HEADER_SIZE) }
    }

    /// The free-list link stored in the payload.
    ///
    /// # Safety
    /// The block must be on a free list.
    unsafe fn next_free(self) -> Option<Self> {
        let link = self.payload().cast::<Option<Self>>();
        unsafe { link.read() }
    }

    /// # Safety
    /// The block must be owned by the heap, not by a caller.
    unsafe fn set_next_free(self, next: Option<Self>) {
        let link = self.payload().cast::<Option<Self>>();
        unsafe { link.write(next) }
    }
}

struct Arena {
    phys: PhysicalAddress,
    start: NonNull<u8>,
    offset: usize,
    size: usize,
}

impl Arena {
    fn claim(
        size: usize,
        frames: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<Self, HeapError> {
        let count = size.div_ceil(PAGE_SIZE as usize);
        let phys = frames.allocate(count, FrameTag::KernelHeap)?;
        let Some(start) = NonNull::new(mapper.phys_to_ptr(phys)) else {
            frames.free(phys, count);
            return Err(HeapError::Unmapped(phys));
        };

        log::info!("heap: {count} frames at {phys}");
        Ok(Self {
            phys,
            start,
            offset: 0,
            size: count * PAGE_SIZE as usize,
        })
    }
}

/// Usage of the arena, in bytes relative to its start.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArenaInfo {
    pub start: PhysicalAddress,
    pub used: usize,
    pub size: usize,
}

#[derive(Copy, Clone)]
struct Bucket {
    free: Option<BlockHandle>,
    count: usize,
    peak: usize,
}

/// Allocation history of one bucket.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BucketStats {
    pub size: usize,
    /// Blocks handed out; frees do not lower it.
    pub count: usize,
    pub peak: usize,
}

/// The kernel heap.
///
/// The arena is taken from the frame allocator on first use, or eagerly
/// through [`Heap::bootstrap`].
pub struct Heap {
    arena: Option<Arena>,
    arena_size: usize,
    buckets: [Bucket; BUCKETS],
}

// Safety: the arena and the free lists are only reached through `&mut Heap`.
unsafe impl Send for Heap {}

impl Heap {
    /// An empty heap that will claim `arena_size` bytes of frames.
    #[must_use]
    pub const fn new(arena_size: usize) -> Self {
        Self {
            arena: None,
            arena_size,
            buckets: [Bucket {
                free: None,
                count: 0,
                peak: 0,
            }; BUCKETS],
        }
    }

    /// Index of the smallest bucket that fits `size` payload bytes.
    #[must_use]
    pub fn bucket_for(size: usize) -> Option<usize> {
        let needed = size.checked_add(HEADER_SIZE)?;
        BUCKET_SIZES[..BUCKETS].iter().position(|&b| b >= needed)
    }

    /// Claims the arena if it is not there yet.
    ///
    /// # Errors
    /// [`HeapError::Bootstrap`] if the frames are not available,
    /// [`HeapError::Unmapped`] if the mapper yields no pointer for them.
    pub fn bootstrap(
        &mut self,
        frames: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<(), HeapError> {
        if self.arena.is_none() {
            self.arena = Some(Arena::claim(self.arena_size, frames, mapper)?);
        }
        Ok(())
    }

    /// Returns at least `size` bytes, aligned to [`HEADER_SIZE`].
    ///
    /// # Errors
    /// [`HeapError::Oversized`] if no bucket fits, [`HeapError::Exhausted`]
    /// if the bucket is empty and the arena cannot fit another block.
    ///
    /// # Panics
    /// If the arena has to be claimed and cannot be. The kernel has no heap
    /// to fall back to.
    pub fn allocate(
        &mut self,
        size: usize,
        frames: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<NonNull<u8>, HeapError> {
        let bucket = Self::bucket_for(size).ok_or(HeapError::Oversized(size))?;

        let arena = match &mut self.arena {
            Some(arena) => arena,
            none => match Arena::claim(self.arena_size, frames, mapper) {
                Ok(arena) => none.insert(arena),
                Err(e) => panic!("kernel panic: cannot set up the heap: {e}"),
            },
        };

        let slot = &mut self.buckets[bucket];
        let block = if let Some(block) = slot.free {
            slot.free = unsafe { block.next_free() };
            block
        } else {
            let bucket_size = BUCKET_SIZES[bucket];
            if arena.size - arena.offset < bucket_size {
                log::warn!("heap: arena exhausted, {size} bytes requested");
                return Err(HeapError::Exhausted { bucket_size });
            }
            let at = unsafe { arena.start.add(arena.offset) };
            arena.offset += bucket_size;
            unsafe { BlockHandle::carve(at, bucket) }
        };

        slot.count += 1;
        slot.peak = slot.peak.max(slot.count);
        log::trace!("heap: {size} bytes from bucket {bucket}");
        Ok(block.payload())
    }

    /// Returns a block to its bucket.
    ///
    /// Null pointers and pointers that do not carry a valid header inside the
    /// arena are ignored.
    pub fn free(&mut self, ptr: *mut u8) {
        let (Some(payload), Some(arena)) = (NonNull::new(ptr), self.arena.as_ref()) else {
            return;
        };
        let Some(block) = (unsafe { BlockHandle::from_payload(payload, arena) }) else {
            log::debug!("heap: ignoring free of {ptr:p}");
            return;
        };

        let slot = &mut self.buckets[block.bucket()];
        unsafe { block.set_next_free(slot.free) };
        slot.free = Some(block);
    }

    #[must_use]
    pub fn arena(&self) -> Option<ArenaInfo> {
        self.arena.as_ref().map(|a| ArenaInfo {
            start: a.phys,
            used: a.offset,
            size: a.size,
        })
    }

    pub fn bucket_stats(&self) -> impl Iterator<Item = BucketStats> + '_ {
        self.buckets.iter().zip(BUCKET_SIZES).map(|(b, size)| BucketStats {
            size,
            count: b.count,
            peak: b.peak,
        })
    }

    /// Table of every bucket that was ever used.
    ///
    /// # Errors
    /// Only those of `out`.
    pub fn print(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "Size      Count     Peak")?;
        for stats in self.bucket_stats().filter(|s| s.peak > 0) {
            let (value, unit) = scaled(stats.size);
            writeln!(out, "{value:>5} {unit:<2}  {:<8}  {}", stats.count, stats.peak)?;
        }
        Ok(())
    }
}

const fn scaled(bytes: usize) -> (usize, &'static str) {
    if bytes >= 1 << 20 {
        (bytes >> 20, "MB")
    } else if bytes >= 1 << 10 {
        (bytes >> 10, "KB")
    } else {
        (bytes, "B")
    }
}
