use std::collections::{HashMap, VecDeque};

use granite_primitives::SectorId;

/// FIFO cache of decoded sectors, shielding hot reads (allocation entries,
/// index blocks, small rows) from hitting the file.
///
/// Writers keep the cache coherent by updating or dropping entries as part
/// of applying their mutation; eviction is in first-insertion order.
pub(crate) struct SectorCache {
    capacity: usize,
    map: HashMap<i32, CachedSector>,
    queue: VecDeque<i32>,
}

#[derive(Clone)]
pub(crate) struct CachedSector {
    pub(crate) status: u8,
    pub(crate) next: SectorId,
    pub(crate) payload: Vec<u8>,
}

impl SectorCache {
    pub(crate) fn new(capacity: usize) -> SectorCache {
        SectorCache {
            capacity,
            map: HashMap::with_capacity(capacity),
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn get(&self, id: SectorId) -> Option<CachedSector> {
        self.map.get(&id.0).cloned()
    }

    pub(crate) fn put(&mut self, id: SectorId, status: u8, next: SectorId, payload: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(id.0, CachedSector { status, next, payload }).is_none() {
            self.queue.push_back(id.0);
        }
        while self.map.len() > self.capacity {
            let Some(victim) = self.queue.pop_front() else {
                break;
            };
            self.map.remove(&victim);
        }
    }

    pub(crate) fn patch_next(&mut self, id: SectorId, next: SectorId) {
        if let Some(entry) = self.map.get_mut(&id.0) {
            entry.next = next;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_eviction() {
        let mut cache = SectorCache::new(2);
        cache.put(SectorId(0), 1, SectorId::NIL, vec![0]);
        cache.put(SectorId(1), 1, SectorId::NIL, vec![1]);
        cache.put(SectorId(2), 1, SectorId::NIL, vec![2]);

        assert!(cache.get(SectorId(0)).is_none(), "oldest entry is evicted first");
        assert!(cache.get(SectorId(1)).is_some());
        assert!(cache.get(SectorId(2)).is_some());
    }

    #[test]
    fn writes_keep_entries_coherent() {
        let mut cache = SectorCache::new(4);
        cache.put(SectorId(0), 1, SectorId::NIL, vec![7]);
        cache.patch_next(SectorId(0), SectorId(3));
        assert_eq!(cache.get(SectorId(0)).unwrap().next, SectorId(3));

        // Re-inserting an existing key does not duplicate its queue slot.
        cache.put(SectorId(1), 1, SectorId::NIL, vec![1]);
        cache.put(SectorId(1), 1, SectorId::NIL, vec![2]);
        assert_eq!(cache.get(SectorId(1)).unwrap().payload, vec![2]);
    }
}
