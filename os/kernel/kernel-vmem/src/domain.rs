use core::fmt;

/// One of the sixteen memory domains a first-level descriptor can name.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Domain(u8);

impl Domain {
    /// Kernel image, stacks, frame table and everything below the heap.
    pub const KERNEL: Self = Self(0);
    /// Heap and the rest of physically backed memory, including MMIO.
    pub const HEAP: Self = Self(1);
    /// Address space with nothing behind it.
    pub const UNBACKED: Self = Self(2);

    /// Returns `None` for indices past 15.
    #[inline]
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if index < 16 { Some(Self(index)) } else { None }
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sixteen_domains() {
        assert_eq!(Domain::new(15).map(Domain::as_u8), Some(15));
        assert!(Domain::new(16).is_none());
        assert_eq!(format!("{:?}", Domain::UNBACKED), "D2");
    }
}
