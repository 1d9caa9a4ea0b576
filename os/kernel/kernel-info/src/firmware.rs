//! # Firmware Memory Split
//!
//! On the Raspberry Pi the VideoCore firmware owns the RAM split between the
//! ARM cores and the GPU. The kernel learns it through two mailbox property
//! tags (`0x0001_0005` ARM memory, `0x0001_0006` VC memory), each answering
//! with a `{ base, size }` pair. The mailbox protocol lives elsewhere; this
//! module only defines what the frame allocator consumes.

use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// A `{ base, size }` pair as reported by the firmware.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct MemoryRegion {
    pub base: PhysicalAddress,
    pub size: u32,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u32, size: u32) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            size,
        }
    }

    /// Exclusive end address. Widened so a region touching 4 GiB does not wrap.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u32() as u64 + self.size as u64
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:08X}..0x{:09X})", self.base.as_u32(), self.end())
    }
}

/// Synchronous source of the firmware-reported memory split.
///
/// The frame allocator queries each region exactly once during
/// initialization, ARM first.
pub trait MemorySplitSource {
    /// Memory visible to the ARM cores.
    fn arm_memory(&mut self) -> MemoryRegion;

    /// Memory reserved for the GPU.
    fn gpu_memory(&mut self) -> MemoryRegion;
}

/// A split known ahead of time.
///
/// The default matches a 1 GiB board with 16 MiB handed to the GPU, which is
/// also what the kernel assumes when it boots without a mailbox driver.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FixedMemorySplit {
    pub arm: MemoryRegion,
    pub gpu: MemoryRegion,
}

impl FixedMemorySplit {
    pub const DEFAULT_ARM: MemoryRegion = MemoryRegion::new(0, 0x4000_0000);
    pub const DEFAULT_GPU: MemoryRegion = MemoryRegion::new(0x4000_0000, 16 * 1024 * 1024);

    #[must_use]
    pub const fn new(arm: MemoryRegion, gpu: MemoryRegion) -> Self {
        Self { arm, gpu }
    }
}

impl Default for FixedMemorySplit {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ARM, Self::DEFAULT_GPU)
    }
}

impl MemorySplitSource for FixedMemorySplit {
    fn arm_memory(&mut self) -> MemoryRegion {
        self.arm
    }

    fn gpu_memory(&mut self) -> MemoryRegion {
        self.gpu
    }
}

impl<T: MemorySplitSource + ?Sized> MemorySplitSource for &mut T {
    fn arm_memory(&mut self) -> MemoryRegion {
        (**self).arm_memory()
    }

    fn gpu_memory(&mut self) -> MemoryRegion {
        (**self).gpu_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_split_is_one_gib_arm_plus_gpu() {
        let mut s = FixedMemorySplit::default();
        assert_eq!(s.arm_memory().end(), 0x4000_0000);
        assert_eq!(s.gpu_memory().base.as_u32(), 0x4000_0000);
        assert_eq!(s.gpu_memory().size, 16 * 1024 * 1024);
    }

    #[test]
    fn end_does_not_wrap() {
        let r = MemoryRegion::new(0xC000_0000, 0x4000_0000);
        assert_eq!(r.end(), 0x1_0000_0000);
        assert_eq!(format!("{r:?}"), "[0xC0000000..0x100000000)");
    }
}
