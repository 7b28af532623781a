use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use granite_primitives::SectorId;
use log::debug;
use parking_lot::Mutex;

use crate::block_list::{Block, BlockIntList, BlockRef, DEFAULT_BLOCK_ENTRIES};
use crate::error::{Result, StoreError};
use crate::sector::{FixedSectorStore, OpenOptions as SectorOptions};

const HEADER_MAGIC: u32 = 0x0011_D5E7;

/// An immutable snapshot of every ordered index list of one table: the
/// master index at list 0 plus one list per indexed column.
///
/// Snapshots share blocks with the committed state; mutating a snapshot
/// copies blocks on write, so readers on other snapshots are unaffected.
/// Committing a snapshot back through [`IndexSetStore::commit_index_set`]
/// writes only the blocks the snapshot dirtied.
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndexSet {
    lists: Vec<BlockIntList>,
}

impl SnapshotIndexSet {
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn index(&self, i: usize) -> &BlockIntList {
        &self.lists[i]
    }

    pub fn index_mut(&mut self, i: usize) -> &mut BlockIntList {
        &mut self.lists[i]
    }

    /// Grow the set to `n` lists, appending empty ones.
    pub fn ensure_list_count(&mut self, n: usize, block_entries: usize) {
        while self.lists.len() < n {
            self.lists.push(BlockIntList::new(block_entries));
        }
    }
}

/// Options for opening an [`IndexSetStore`].
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
    block_entries: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            block_entries: DEFAULT_BLOCK_ENTRIES,
        }
    }
}

impl OpenOptions {
    /// Row indices per persisted block. Only consulted at creation; an
    /// existing file keeps the block size in its header.
    pub fn block_entries(&mut self, n: usize) -> &mut Self {
        self.block_entries = n;
        self
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<(IndexSetStore, bool)> {
        let path = path.as_ref();
        let (store, recovered) = SectorOptions::default()
            .sector_size(self.block_entries * 4)
            .open(path)?;

        let reserved = store.reserved_buffer();
        let magic = u32::from_be_bytes(reserved[0..4].try_into().unwrap());

        let (block_entries, master, directory_head, live_sectors) = if magic == HEADER_MAGIC {
            let block_entries = u32::from_be_bytes(reserved[4..8].try_into().unwrap()) as usize;
            let directory_head = SectorId(i32::from_be_bytes(reserved[8..12].try_into().unwrap()));
            let (master, live) = load_directory(&store, directory_head, block_entries)?;
            (block_entries, master, directory_head, live)
        } else {
            (self.block_entries, SnapshotIndexSet::default(), SectorId::NIL, HashSet::new())
        };

        Ok((
            IndexSetStore {
                store,
                block_entries,
                state: Mutex::new(State {
                    master,
                    directory_head,
                    live_sectors,
                }),
            },
            recovered,
        ))
    }
}

struct State {
    master: SnapshotIndexSet,
    directory_head: SectorId,
    live_sectors: HashSet<i32>,
}

/// Persistent store of the ordered index lists of one table (`<table>.iid`).
///
/// Blocks live in the sectors of an underlying [`FixedSectorStore`]; a
/// directory chain maps lists to their blocks, and the store's reserved
/// header points at the current directory. A commit writes dirty blocks and
/// a fresh directory, swaps the header pointer, then frees the sectors no
/// snapshot can reach any more. Snapshot reads never block commits.
pub struct IndexSetStore {
    store: FixedSectorStore,
    block_entries: usize,
    state: Mutex<State>,
}

impl IndexSetStore {
    pub fn options() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<(IndexSetStore, bool)> {
        OpenOptions::default().open(path)
    }

    pub fn block_entries(&self) -> usize {
        self.block_entries
    }

    /// The committed state as an immutable snapshot.
    pub fn snapshot_index_set(&self) -> SnapshotIndexSet {
        self.state.lock().master.clone()
    }

    /// A fresh snapshot grown to `n` lists.
    pub fn snapshot_with_lists(&self, n: usize) -> SnapshotIndexSet {
        let mut set = self.snapshot_index_set();
        set.ensure_list_count(n, self.block_entries);
        set
    }

    /// Atomically replace the committed lists with `set`, rewriting only
    /// the blocks the snapshot changed. Commits serialize on the store's
    /// internal lock; snapshots taken before this call keep reading their
    /// own blocks.
    pub fn commit_index_set(&self, mut set: SnapshotIndexSet) -> Result<()> {
        let mut state = self.state.lock();

        let mut new_live = HashSet::new();
        let mut dirty = 0usize;
        for list in &mut set.lists {
            for bref in &mut list.blocks {
                let sector = match bref.sector {
                    Some(s) => s,
                    None => {
                        let mut payload = Vec::with_capacity(bref.block.data.len() * 4);
                        for v in &bref.block.data {
                            payload.extend_from_slice(&v.to_be_bytes());
                        }
                        let s = self.store.add_sector(&payload)?;
                        bref.sector = Some(s);
                        dirty += 1;
                        s
                    }
                };
                new_live.insert(sector.0);
            }
        }

        // Directory: {list_count:u32, per list: block_count:u32,
        // per block: sector:i32 entry_count:u32}.
        let mut dir = Vec::new();
        dir.extend_from_slice(&(set.lists.len() as u32).to_be_bytes());
        for list in &set.lists {
            dir.extend_from_slice(&(list.blocks.len() as u32).to_be_bytes());
            for bref in &list.blocks {
                dir.extend_from_slice(&bref.sector.unwrap().0.to_be_bytes());
                dir.extend_from_slice(&(bref.block.data.len() as u32).to_be_bytes());
            }
        }
        let dir_head = self.store.write_across(&dir)?;
        for s in chain_sectors(&self.store, dir_head)? {
            new_live.insert(s.0);
        }

        let mut reserved = vec![0u8; 12];
        reserved[0..4].copy_from_slice(&HEADER_MAGIC.to_be_bytes());
        reserved[4..8].copy_from_slice(&(self.block_entries as u32).to_be_bytes());
        reserved[8..12].copy_from_slice(&dir_head.0.to_be_bytes());
        self.store.write_reserved_buffer(&reserved)?;

        // Everything reachable only through the old directory is garbage.
        let stale: Vec<i32> = state.live_sectors.difference(&new_live).copied().collect();
        for s in &stale {
            self.store.delete_sector(SectorId(*s))?;
        }
        debug!(
            "index set committed: {dirty} blocks written, {} sectors freed",
            stale.len()
        );

        state.master = set;
        state.directory_head = dir_head;
        state.live_sectors = new_live;
        self.store.synch()
    }

    pub fn synch(&self) -> Result<()> {
        self.store.synch()
    }

    pub fn hard_synch(&self) -> Result<()> {
        self.store.hard_synch()
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    /// Delete the backing file (and its journal).
    pub fn delete_files(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        for p in [path.to_owned(), journal_sibling(path)] {
            if p.exists() {
                std::fs::remove_file(p)?;
            }
        }
        Ok(())
    }
}

fn journal_sibling(path: &Path) -> std::path::PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(format!("{ext}.sjf")),
        None => path.with_extension("sjf"),
    }
}

fn chain_sectors(store: &FixedSectorStore, head: SectorId) -> Result<Vec<SectorId>> {
    let mut out = Vec::new();
    let mut current = head;
    while !current.is_nil() {
        out.push(current);
        let (_, next, _) = store.sector_meta(current)?;
        current = next;
    }
    Ok(out)
}

fn load_directory(
    store: &FixedSectorStore,
    head: SectorId,
    block_entries: usize,
) -> Result<(SnapshotIndexSet, HashSet<i32>)> {
    let mut live = HashSet::new();
    if head.is_nil() {
        return Ok((SnapshotIndexSet::default(), live));
    }
    for s in chain_sectors(store, head)? {
        live.insert(s.0);
    }

    let dir = store.read_across(head)?;
    let mut cursor = 0usize;
    let mut take = |n: usize| -> Result<&[u8]> {
        if dir.len() - cursor < n {
            return Err(StoreError::Corrupt("index directory truncated".into()));
        }
        let out = &dir[cursor..cursor + n];
        cursor += n;
        Ok(out)
    };

    let list_count = u32::from_be_bytes(take(4)?.try_into().unwrap()) as usize;
    let mut lists = Vec::with_capacity(list_count);
    for _ in 0..list_count {
        let block_count = u32::from_be_bytes(take(4)?.try_into().unwrap()) as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let sector = SectorId(i32::from_be_bytes(take(4)?.try_into().unwrap()));
            let count = u32::from_be_bytes(take(4)?.try_into().unwrap()) as usize;
            let payload = store.get_sector(sector)?;
            if payload.len() < count * 4 {
                return Err(StoreError::Corrupt(format!(
                    "index block at sector {sector} holds {} bytes, directory says {count} entries",
                    payload.len()
                )));
            }
            let data = payload[..count * 4]
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
                .collect();
            live.insert(sector.0);
            blocks.push(BlockRef {
                block: Arc::new(Block { data }),
                sector: Some(sector),
            });
        }
        lists.push(BlockIntList::from_blocks(blocks, block_entries));
    }

    Ok((SnapshotIndexSet { lists }, live))
}
