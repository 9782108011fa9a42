use std::collections::BTreeSet;

/// Hands out small integer ids, recycling freed ones. The lowest free id is
/// always chosen, so ids are dense and reused rather than monotonic.
///
/// Used for replicated-object network ids and for blocking-RPC callback ids.
#[derive(Debug)]
pub struct IdAllocator {
    first: u32,
    next: u32,
    recycled: BTreeSet<u32>,
}

impl IdAllocator {
    /// Create an allocator whose first handed-out id is `first`.
    pub fn new(first: u32) -> Self {
        Self {
            first,
            next: first,
            recycled: BTreeSet::new(),
        }
    }

    /// Claim the lowest free id.
    pub fn allocate(&mut self) -> u32 {
        if let Some(id) = self.recycled.iter().next().copied() {
            self.recycled.remove(&id);
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    /// Return an id to the free set. Freeing an id that was never allocated
    /// (or freeing twice) is ignored.
    pub fn free(&mut self, id: u32) {
        if id >= self.first && id < self.next {
            self.recycled.insert(id);
        }
    }

    /// Claim a specific id so it will not be handed out. Returns false if it
    /// is already live.
    pub fn reserve(&mut self, id: u32) -> bool {
        if id < self.first {
            return false;
        }
        if id < self.next {
            return self.recycled.remove(&id);
        }
        for skipped in self.next..id {
            self.recycled.insert(skipped);
        }
        self.next = id + 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_id() {
        let mut gen = IdAllocator::new(1);
        assert_eq!(gen.allocate(), 1);
        assert_eq!(gen.allocate(), 2);
        assert_eq!(gen.allocate(), 3);
        gen.free(2);
        assert_eq!(gen.allocate(), 2);
        assert_eq!(gen.allocate(), 4);
    }

    #[test]
    fn reserve_skips_id() {
        let mut gen = IdAllocator::new(1);
        assert!(gen.reserve(3));
        assert_eq!(gen.allocate(), 1);
        assert_eq!(gen.allocate(), 2);
        assert_eq!(gen.allocate(), 4);
        assert!(!gen.reserve(3));
    }

    #[test]
    fn double_free_is_ignored() {
        let mut gen = IdAllocator::new(1);
        let id = gen.allocate();
        gen.free(id);
        gen.free(id);
        assert_eq!(gen.allocate(), id);
        assert_eq!(gen.allocate(), 2);
    }
}
