//! First-fit extent allocator over a fixed range.

/// A half-open range `[offset, offset + len)` inside the managed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: usize,
    pub len: usize,
}

impl Extent {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    const fn overlaps(&self, other: &Extent) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Outcome of returning an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    Freed,
    /// The extent leaves the managed range.
    OutOfRange,
    /// Part of the extent is already free.
    Overlap,
}

/// First-fit allocator handing out granule-aligned extents of
/// `[0, size)`.
///
/// Free extents are kept sorted by offset and coalesced with their
/// neighbours on every free.
pub struct ExtentAllocator {
    size: usize,
    order: u32,
    free: Vec<Extent>,
}

impl ExtentAllocator {
    /// Creates an allocator over `size` bytes with `1 << order` byte
    /// granules. A trailing partial granule is never handed out.
    pub fn new(size: usize, order: u32) -> Self {
        let granule = 1usize << order;
        let size = size & !(granule - 1);
        let mut free = Vec::new();
        if size > 0 {
            free.push(Extent::new(0, size));
        }
        Self { size, order, free }
    }

    pub const fn granule(&self) -> usize {
        1 << self.order
    }

    /// Usable bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|e| e.len).sum()
    }

    pub fn largest_free(&self) -> usize {
        self.free.iter().map(|e| e.len).max().unwrap_or(0)
    }

    fn round_up(&self, size: usize) -> Option<usize> {
        let granule = self.granule();
        size.checked_add(granule - 1).map(|s| s & !(granule - 1))
    }

    /// Takes the first free extent that fits `size` rounded up to a granule.
    pub fn allocate(&mut self, size: usize) -> Option<Extent> {
        if size == 0 {
            return None;
        }
        let len = self.round_up(size)?;
        let idx = self.free.iter().position(|e| e.len >= len)?;
        let hole = &mut self.free[idx];
        let extent = Extent::new(hole.offset, len);
        if hole.len == len {
            self.free.remove(idx);
        } else {
            hole.offset += len;
            hole.len -= len;
        }
        Some(extent)
    }

    /// Returns `extent` to the pool. `extent.len` is rounded up the same way
    /// [`allocate`](Self::allocate) rounds requests.
    pub fn free(&mut self, extent: Extent) -> FreeOutcome {
        let Some(len) = self.round_up(extent.len) else {
            return FreeOutcome::OutOfRange;
        };
        let extent = Extent::new(extent.offset, len);
        if len == 0
            || extent.offset % self.granule() != 0
            || extent.offset.checked_add(len).is_none_or(|end| end > self.size)
        {
            return FreeOutcome::OutOfRange;
        }

        let idx = self.free.partition_point(|e| e.offset < extent.offset);
        let prev_overlaps = idx > 0 && self.free[idx - 1].overlaps(&extent);
        let next_overlaps = idx < self.free.len() && self.free[idx].overlaps(&extent);
        if prev_overlaps || next_overlaps {
            return FreeOutcome::Overlap;
        }

        self.free.insert(idx, extent);
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            self.free[idx].len += self.free[idx + 1].len;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            self.free[idx - 1].len += self.free[idx].len;
            self.free.remove(idx);
        }
        FreeOutcome::Freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rounds_to_granule_and_fits_first() {
        let mut a = ExtentAllocator::new(0x10_000, 12);
        let x = a.allocate(1).unwrap();
        assert_eq!(x, Extent::new(0, 0x1000));
        let y = a.allocate(0x1001).unwrap();
        assert_eq!(y, Extent::new(0x1000, 0x2000));
        assert_eq!(a.free(x), FreeOutcome::Freed);
        // the hole at 0 is reused first
        assert_eq!(a.allocate(0x800).unwrap().offset, 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut a = ExtentAllocator::new(0x3F000, 12);
        assert!(a.allocate(0x3F000).is_some());
        assert!(a.allocate(1).is_none());
        assert_eq!(a.free_bytes(), 0);
        assert!(a.allocate(0).is_none());
    }

    #[test]
    fn trailing_partial_granule_is_unused() {
        let a = ExtentAllocator::new(0x2800, 12);
        assert_eq!(a.size(), 0x2000);
        assert_eq!(a.largest_free(), 0x2000);
    }

    #[test]
    fn free_coalesces_neighbours() {
        let mut a = ExtentAllocator::new(0x4000, 12);
        let e: Vec<_> = (0..4).map(|_| a.allocate(0x1000).unwrap()).collect();
        assert_eq!(a.free(e[0]), FreeOutcome::Freed);
        assert_eq!(a.free(e[2]), FreeOutcome::Freed);
        assert_eq!(a.largest_free(), 0x1000);
        assert_eq!(a.free(e[1]), FreeOutcome::Freed);
        assert_eq!(a.largest_free(), 0x3000);
        assert_eq!(a.free(e[3]), FreeOutcome::Freed);
        assert_eq!(a.largest_free(), 0x4000);
    }

    #[test]
    fn double_and_bogus_frees_are_rejected() {
        let mut a = ExtentAllocator::new(0x4000, 12);
        let x = a.allocate(0x2000).unwrap();
        assert_eq!(a.free(x), FreeOutcome::Freed);
        assert_eq!(a.free(x), FreeOutcome::Overlap);
        assert_eq!(a.free(Extent::new(0x3000, 0x2000)), FreeOutcome::OutOfRange);
        assert_eq!(a.free(Extent::new(0x800, 0x1000)), FreeOutcome::OutOfRange);
        assert_eq!(a.free_bytes(), 0x4000);
    }

    proptest! {
        #[test]
        fn live_extents_never_overlap(ops in prop::collection::vec((any::<bool>(), 1usize..0x5000), 1..64)) {
            let mut a = ExtentAllocator::new(0x20_000, 12);
            let mut live: Vec<Extent> = Vec::new();
            for (alloc, n) in ops {
                if alloc || live.is_empty() {
                    if let Some(e) = a.allocate(n) {
                        prop_assert!(e.end() <= a.size());
                        prop_assert_eq!(e.offset % a.granule(), 0);
                        prop_assert!(e.len >= n);
                        for other in &live {
                            prop_assert!(!e.overlaps(other));
                        }
                        live.push(e);
                    }
                } else {
                    let e = live.remove(n % live.len());
                    prop_assert_eq!(a.free(e), FreeOutcome::Freed);
                }
                let used: usize = live.iter().map(|e| e.len).sum();
                prop_assert_eq!(used + a.free_bytes(), a.size());
            }
        }
    }
}
