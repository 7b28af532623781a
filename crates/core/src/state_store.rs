use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use granite_primitives::{CommitId, TableId};
use log::debug;

use crate::error::{DBError, Result};
use granite_store::StoreError;

#[cfg(target_family = "unix")]
use std::os::unix::fs::FileExt;
#[cfg(target_family = "windows")]
use std::os::windows::fs::FileExt;

pub const STATE_MAGIC: u32 = 0x0BAC_8001;

// Header: {magic:u32, reserved:u32, table_id:i64, visible_ptr:i64,
// deleted_ptr:i64, commit_id:i64}. The list a pointer addresses is an
// appended blob; swapping the pointers in one write makes a state mutation
// atomic.
const HEADER_LEN: u64 = 40;

/// One table known to the state store: its id and the file-name stem of its
/// backing stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub id: TableId,
    pub resource_name: String,
}

/// Persistent record of the conglomerate's table universe: the visible
/// table list, the deleted (pending file removal) list, the next table id
/// and the last commit id.
pub struct StateStore {
    path: PathBuf,
    file: File,
    next_table_id: u64,
    visible_ptr: u64,
    deleted_ptr: u64,
    commit_id: CommitId,
    visible: Vec<TableEntry>,
    deleted: Vec<TableEntry>,
}

fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    #[cfg(target_family = "unix")]
    {
        file.read_exact_at(buf, offset)
    }
    #[cfg(target_family = "windows")]
    {
        let mut done = 0;
        while done < buf.len() {
            let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            done += n;
        }
        Ok(())
    }
}

fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    #[cfg(target_family = "unix")]
    {
        file.write_all_at(buf, offset)
    }
    #[cfg(target_family = "windows")]
    {
        let mut done = 0;
        while done < buf.len() {
            let n = file.seek_write(&buf[done..], offset + done as u64)?;
            done += n;
        }
        Ok(())
    }
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<StateStore> {
        let path = path.as_ref().to_owned();
        let exists = path.exists() && fs::metadata(&path)?.len() >= HEADER_LEN;
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("could not open state store: {}", path.display()))?;

        if !exists {
            let mut head = [0u8; HEADER_LEN as usize];
            head[0..4].copy_from_slice(&STATE_MAGIC.to_be_bytes());
            // reserved stays zero; table_id starts at 1, pointers at 0
            head[8..16].copy_from_slice(&1i64.to_be_bytes());
            write_at(&file, &head, 0)?;
            file.sync_all()?;
            return Ok(StateStore {
                path,
                file,
                next_table_id: 1,
                visible_ptr: 0,
                deleted_ptr: 0,
                commit_id: CommitId(0),
                visible: Vec::new(),
                deleted: Vec::new(),
            });
        }

        let mut head = [0u8; HEADER_LEN as usize];
        read_at(&file, &mut head, 0)?;
        let magic = u32::from_be_bytes(head[0..4].try_into().unwrap());
        if magic != STATE_MAGIC {
            return Err(DBError::Store(StoreError::BadMagic { path, found: magic }));
        }
        let next_table_id = i64::from_be_bytes(head[8..16].try_into().unwrap()) as u64;
        let visible_ptr = i64::from_be_bytes(head[16..24].try_into().unwrap()) as u64;
        let deleted_ptr = i64::from_be_bytes(head[24..32].try_into().unwrap()) as u64;
        let commit_id = CommitId(i64::from_be_bytes(head[32..40].try_into().unwrap()) as u64);

        let visible = read_list(&file, visible_ptr)?;
        let deleted = read_list(&file, deleted_ptr)?;
        debug!(
            "state store {} holds {} visible and {} deleted tables at commit {commit_id}",
            path.display(),
            visible.len(),
            deleted.len()
        );

        Ok(StateStore {
            path,
            file,
            next_table_id,
            visible_ptr,
            deleted_ptr,
            commit_id,
            visible: Vec::new(),
            deleted: Vec::new(),
        }
        .with_lists(visible, deleted))
    }

    fn with_lists(mut self, visible: Vec<TableEntry>, deleted: Vec<TableEntry>) -> StateStore {
        self.visible = visible;
        self.deleted = deleted;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit_id(&self) -> CommitId {
        self.commit_id
    }

    pub fn visible_tables(&self) -> &[TableEntry] {
        &self.visible
    }

    pub fn deleted_tables(&self) -> &[TableEntry] {
        &self.deleted
    }

    /// Claim the next table id, persisting the increment immediately.
    pub fn next_table_id(&mut self) -> Result<TableId> {
        let id = self.next_table_id;
        self.next_table_id += 1;
        self.write_header()?;
        Ok(TableId(id as u32))
    }

    /// Persist a new state: both lists are appended as fresh blobs and the
    /// header pointers and commit id are swapped in a single write.
    pub fn commit(&mut self, visible: Vec<TableEntry>, deleted: Vec<TableEntry>, commit_id: CommitId) -> Result<()> {
        let end = self.file.metadata()?.len().max(HEADER_LEN);
        let visible_blob = encode_list(&visible);
        let deleted_blob = encode_list(&deleted);
        let visible_ptr = end;
        let deleted_ptr = end + visible_blob.len() as u64;
        write_at(&self.file, &visible_blob, visible_ptr)?;
        write_at(&self.file, &deleted_blob, deleted_ptr)?;
        self.file.sync_data()?;

        self.visible_ptr = visible_ptr;
        self.deleted_ptr = deleted_ptr;
        self.commit_id = commit_id;
        self.write_header()?;
        self.file.sync_data()?;

        self.visible = visible;
        self.deleted = deleted;
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let mut buf = [0u8; 32];
        buf[0..8].copy_from_slice(&(self.next_table_id as i64).to_be_bytes());
        buf[8..16].copy_from_slice(&(self.visible_ptr as i64).to_be_bytes());
        buf[16..24].copy_from_slice(&(self.deleted_ptr as i64).to_be_bytes());
        buf[24..32].copy_from_slice(&(self.commit_id.0 as i64).to_be_bytes());
        write_at(&self.file, &buf, 8)?;
        Ok(())
    }

    pub fn synch(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

fn encode_list(entries: &[TableEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.id.0.to_be_bytes());
        out.extend_from_slice(&(entry.resource_name.len() as u16).to_be_bytes());
        out.extend_from_slice(entry.resource_name.as_bytes());
    }
    out
}

fn read_list(file: &File, ptr: u64) -> Result<Vec<TableEntry>> {
    if ptr == 0 {
        return Ok(Vec::new());
    }
    let mut count_buf = [0u8; 4];
    read_at(file, &mut count_buf, ptr)?;
    let count = u32::from_be_bytes(count_buf) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut offset = ptr + 4;
    for _ in 0..count {
        let mut fixed = [0u8; 6];
        read_at(file, &mut fixed, offset)?;
        let id = TableId(u32::from_be_bytes(fixed[0..4].try_into().unwrap()));
        let name_len = u16::from_be_bytes(fixed[4..6].try_into().unwrap()) as usize;
        let mut name = vec![0u8; name_len];
        read_at(file, &mut name, offset + 6)?;
        offset += 6 + name_len as u64;
        entries.push(TableEntry {
            id,
            resource_name: String::from_utf8(name)
                .map_err(|e| DBError::Store(StoreError::Corrupt(format!("state store list name: {e}"))))?,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry(id: u32, name: &str) -> TableEntry {
        TableEntry {
            id: TableId(id),
            resource_name: name.to_owned(),
        }
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("granite.sf");
        {
            let mut state = StateStore::open(&path).unwrap();
            assert_eq!(state.next_table_id().unwrap(), TableId(1));
            assert_eq!(state.next_table_id().unwrap(), TableId(2));
            state
                .commit(
                    vec![entry(1, "t_00000001"), entry(2, "t_00000002")],
                    vec![],
                    CommitId(7),
                )
                .unwrap();
            state
                .commit(vec![entry(1, "t_00000001")], vec![entry(2, "t_00000002")], CommitId(8))
                .unwrap();
        }

        let mut state = StateStore::open(&path).unwrap();
        assert_eq!(state.commit_id(), CommitId(8));
        assert_eq!(state.visible_tables(), &[entry(1, "t_00000001")]);
        assert_eq!(state.deleted_tables(), &[entry(2, "t_00000002")]);
        assert_eq!(state.next_table_id().unwrap(), TableId(3));
    }
}
