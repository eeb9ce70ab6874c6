use std::collections::BTreeSet;

use log::debug;

/// Datapaths currently in the operational state, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct DatapathRegistry {
    datapaths: BTreeSet<u64>,
}

impl DatapathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already registered.
    pub fn register(&mut self, datapath_id: u64) -> bool {
        let added = self.datapaths.insert(datapath_id);
        if added {
            debug!("register datapath: {:016x}", datapath_id);
        }
        added
    }

    /// Returns false when the id was not registered.
    pub fn unregister(&mut self, datapath_id: u64) -> bool {
        let removed = self.datapaths.remove(&datapath_id);
        if removed {
            debug!("unregister datapath: {:016x}", datapath_id);
        }
        removed
    }

    pub fn contains(&self, datapath_id: u64) -> bool {
        self.datapaths.contains(&datapath_id)
    }

    /// Registered ids in ascending order.
    pub fn snapshot(&self) -> Vec<u64> {
        self.datapaths.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.datapaths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapaths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut registry = DatapathRegistry::new();
        assert!(registry.register(3));
        assert!(!registry.register(3));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_absent_is_a_no_op() {
        let mut registry = DatapathRegistry::new();
        assert!(!registry.unregister(9));
        registry.register(9);
        assert!(registry.unregister(9));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted() {
        let mut registry = DatapathRegistry::new();
        for id in [6, 1, 4] {
            registry.register(id);
        }
        assert_eq!(registry.snapshot(), vec![1, 4, 6]);
        assert!(registry.contains(4));
        assert!(!registry.contains(2));
    }
}
