use std::collections::HashSet;

/// Program counter values the timeline stops at when continuing.
#[derive(Clone, Debug, Default)]
pub struct BreakpointSet {
    addrs: HashSet<u64>,
}

impl BreakpointSet {
    /// Adding an address that is already present is a no-op.
    pub fn add(&mut self, addr: u64) {
        self.addrs.insert(addr);
    }

    /// Removing an absent address is a no-op.
    pub fn remove(&mut self, addr: u64) {
        self.addrs.remove(&addr);
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.addrs.contains(&addr)
    }

    pub fn clear(&mut self) {
        self.addrs.clear();
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_are_idempotent() {
        let mut bps = BreakpointSet::default();
        bps.add(0x104);
        bps.add(0x104);
        assert!(bps.contains(0x104));
        assert_eq!(1, bps.len());

        bps.remove(0x200);
        assert_eq!(1, bps.len());

        bps.remove(0x104);
        bps.remove(0x104);
        assert!(!bps.contains(0x104));
        assert!(bps.is_empty());
    }
}
