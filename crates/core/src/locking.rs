use std::collections::HashMap;
use std::sync::Arc;

use granite_primitives::TableId;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

/// Engine-wide mode. `Exclusive` drains all shared holders before it is
/// granted and blocks new shared entries while held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
struct LockRecord {
    serial: u64,
    access: AccessType,
}

#[derive(Default)]
struct LockState {
    shared_count: usize,
    exclusive: bool,
    exclusive_waiters: usize,
    queues: HashMap<TableId, Vec<LockRecord>>,
    next_serial: u64,
}

/// The two-level lock mechanism: a shared/exclusive engine mode, and
/// per-table FIFO read/write queues.
///
/// All locks taken by one `lock_tables` call are enqueued in a single
/// critical section, which makes the cross-table queue order consistent and
/// keeps multi-table acquisition deadlock-free.
#[derive(Clone, Default)]
pub struct LockingMechanism {
    state: Arc<(Mutex<LockState>, Condvar)>,
}

impl LockingMechanism {
    pub fn new() -> LockingMechanism {
        LockingMechanism::default()
    }

    /// Enter `mode`, blocking until it can be granted.
    pub fn set_mode(&self, mode: LockMode) {
        let (lock, cond) = &*self.state;
        let mut state = lock.lock();
        match mode {
            LockMode::Shared => {
                while state.exclusive || state.exclusive_waiters > 0 {
                    cond.wait(&mut state);
                }
                state.shared_count += 1;
            }
            LockMode::Exclusive => {
                state.exclusive_waiters += 1;
                while state.exclusive || state.shared_count > 0 {
                    cond.wait(&mut state);
                }
                state.exclusive_waiters -= 1;
                state.exclusive = true;
            }
        }
    }

    /// Leave `mode`.
    ///
    /// # Panics
    ///
    /// Panics when leaving a mode that is not held: dropping the shared
    /// count below zero or finishing exclusive mode twice is a programming
    /// error.
    pub fn finish_mode(&self, mode: LockMode) {
        let (lock, cond) = &*self.state;
        let mut state = lock.lock();
        match mode {
            LockMode::Shared => {
                assert!(state.shared_count > 0, "finish_mode(Shared) below zero");
                state.shared_count -= 1;
            }
            LockMode::Exclusive => {
                assert!(state.exclusive, "finish_mode(Exclusive) while not exclusive");
                state.exclusive = false;
            }
        }
        cond.notify_all();
    }

    /// Atomically enqueue locks for every table in `write_set` and
    /// `read_set`, then block until all of them are grantable. A write lock
    /// must reach the head of its queue; a read lock waits only for write
    /// locks ahead of it.
    pub fn lock_tables(&self, write_set: &[TableId], read_set: &[TableId]) -> LockHandle {
        let (lock, cond) = &*self.state;
        let mut locks = Vec::with_capacity(write_set.len() + read_set.len());
        {
            let mut state = lock.lock();
            state.next_serial += 1;
            let serial = state.next_serial;
            for &table in write_set {
                state.queues.entry(table).or_default().push(LockRecord {
                    serial,
                    access: AccessType::Write,
                });
                locks.push((table, AccessType::Write, serial));
            }
            for &table in read_set {
                state.queues.entry(table).or_default().push(LockRecord {
                    serial,
                    access: AccessType::Read,
                });
                locks.push((table, AccessType::Read, serial));
            }

            // Wait for every lock of this call.
            loop {
                let all_granted = locks
                    .iter()
                    .all(|&(table, access, serial)| Self::grantable(&state, table, access, serial));
                if all_granted {
                    break;
                }
                cond.wait(&mut state);
            }
        }
        debug!("lock handle granted for {} write, {} read tables", write_set.len(), read_set.len());
        LockHandle {
            mechanism: self.clone(),
            locks,
            released: false,
        }
    }

    fn grantable(state: &LockState, table: TableId, access: AccessType, serial: u64) -> bool {
        let queue = match state.queues.get(&table) {
            Some(q) => q,
            None => return false,
        };
        match access {
            AccessType::Write => queue.first().is_some_and(|r| r.serial == serial),
            AccessType::Read => {
                for record in queue {
                    // An earlier record of the same call grants the read
                    // too (its write lock subsumes it).
                    if record.serial == serial {
                        return true;
                    }
                    if record.access == AccessType::Write {
                        return false;
                    }
                }
                false
            }
        }
    }

    fn release(&self, locks: &[(TableId, AccessType, u64)]) {
        let (lock, cond) = &*self.state;
        let mut state = lock.lock();
        // LIFO over the handle's own locks.
        for &(table, access, serial) in locks.iter().rev() {
            if let Some(queue) = state.queues.get_mut(&table) {
                if let Some(pos) = queue.iter().position(|r| r.serial == serial && r.access == access) {
                    queue.remove(pos);
                }
                if queue.is_empty() {
                    state.queues.remove(&table);
                }
            }
        }
        cond.notify_all();
    }
}

/// Every lock granted by one `lock_tables` call. Must be released on every
/// control path; must not cross threads while other handles of the same
/// thread exist on the same tables.
pub struct LockHandle {
    mechanism: LockingMechanism,
    locks: Vec<(TableId, AccessType, u64)>,
    released: bool,
}

impl LockHandle {
    /// Release every lock of this handle, in reverse acquisition order.
    pub fn unlock_all(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.mechanism.release(&self.locks);
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!("lock handle dropped without unlock_all; releasing");
            self.release_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_holders_block_exclusive() {
        let locking = LockingMechanism::new();
        locking.set_mode(LockMode::Shared);
        locking.set_mode(LockMode::Shared);

        let locking_ = locking.clone();
        let entered = Arc::new(AtomicUsize::new(0));
        let entered_ = entered.clone();
        let waiter = thread::spawn(move || {
            locking_.set_mode(LockMode::Exclusive);
            entered_.store(1, Ordering::SeqCst);
            locking_.finish_mode(LockMode::Exclusive);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(entered.load(Ordering::SeqCst), 0, "exclusive must wait for shared holders");

        locking.finish_mode(LockMode::Shared);
        locking.finish_mode(LockMode::Shared);
        waiter.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn finishing_shared_below_zero_panics() {
        LockingMechanism::new().finish_mode(LockMode::Shared);
    }

    #[test]
    fn readers_share_a_table() {
        let locking = LockingMechanism::new();
        let a = locking.lock_tables(&[], &[TableId(1)]);
        let b = locking.lock_tables(&[], &[TableId(1)]);
        a.unlock_all();
        b.unlock_all();
    }

    #[test]
    fn writer_waits_for_queue_head() {
        let locking = LockingMechanism::new();
        let reader = locking.lock_tables(&[], &[TableId(1)]);

        let locking_ = locking.clone();
        let wrote = Arc::new(AtomicUsize::new(0));
        let wrote_ = wrote.clone();
        let writer = thread::spawn(move || {
            let handle = locking_.lock_tables(&[TableId(1)], &[]);
            wrote_.store(1, Ordering::SeqCst);
            handle.unlock_all();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(wrote.load(Ordering::SeqCst), 0, "writer must wait behind the reader");
        reader.unlock_all();
        writer.join().unwrap();
        assert_eq!(wrote.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multi_table_acquisition_is_atomic() {
        let locking = LockingMechanism::new();
        let t1 = TableId(1);
        let t2 = TableId(2);

        // Two threads locking {t1, t2} in opposite orders cannot deadlock
        // because each call enqueues into both queues atomically.
        let mut handles = Vec::new();
        for flip in [false, true] {
            let locking_ = locking.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let handle = if flip {
                        locking_.lock_tables(&[t2, t1], &[])
                    } else {
                        locking_.lock_tables(&[t1, t2], &[])
                    };
                    handle.unlock_all();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
