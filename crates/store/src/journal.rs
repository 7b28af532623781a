use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use granite_primitives::SectorId;
use log::{debug, warn};

use crate::error::Result;

/// One staged mutation of a sector file.
///
/// The journal is a redo log: an entry records the bytes that are about to
/// land in the main file. Replaying every valid entry in order reproduces
/// the post-crash intent; torn tails are cut off by the per-entry checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalEntry {
    WriteSector {
        sector: SectorId,
        status: u8,
        next: SectorId,
        payload: Vec<u8>,
    },
    PatchNext {
        sector: SectorId,
        next: SectorId,
    },
    WriteHeader {
        sector_count: u32,
        free_head: SectorId,
    },
    WriteReserved {
        bytes: Vec<u8>,
    },
}

const OP_WRITE_SECTOR: u8 = 1;
const OP_PATCH_NEXT: u8 = 2;
const OP_WRITE_HEADER: u8 = 3;
const OP_WRITE_RESERVED: u8 = 4;

impl JournalEntry {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            JournalEntry::WriteSector {
                sector,
                status,
                next,
                payload,
            } => {
                buf.push(OP_WRITE_SECTOR);
                buf.extend_from_slice(&sector.0.to_be_bytes());
                buf.push(*status);
                buf.extend_from_slice(&next.0.to_be_bytes());
                buf.extend_from_slice(payload);
            }
            JournalEntry::PatchNext { sector, next } => {
                buf.push(OP_PATCH_NEXT);
                buf.extend_from_slice(&sector.0.to_be_bytes());
                buf.extend_from_slice(&next.0.to_be_bytes());
            }
            JournalEntry::WriteHeader {
                sector_count,
                free_head,
            } => {
                buf.push(OP_WRITE_HEADER);
                buf.extend_from_slice(&sector_count.to_be_bytes());
                buf.extend_from_slice(&free_head.0.to_be_bytes());
            }
            JournalEntry::WriteReserved { bytes } => {
                buf.push(OP_WRITE_RESERVED);
                buf.extend_from_slice(bytes);
            }
        }
        buf
    }

    fn decode(payload: &[u8]) -> Option<JournalEntry> {
        let (&op, rest) = payload.split_first()?;
        match op {
            OP_WRITE_SECTOR => {
                if rest.len() < 9 {
                    return None;
                }
                let sector = SectorId(i32::from_be_bytes(rest[0..4].try_into().ok()?));
                let status = rest[4];
                let next = SectorId(i32::from_be_bytes(rest[5..9].try_into().ok()?));
                Some(JournalEntry::WriteSector {
                    sector,
                    status,
                    next,
                    payload: rest[9..].to_vec(),
                })
            }
            OP_PATCH_NEXT => {
                if rest.len() != 8 {
                    return None;
                }
                Some(JournalEntry::PatchNext {
                    sector: SectorId(i32::from_be_bytes(rest[0..4].try_into().ok()?)),
                    next: SectorId(i32::from_be_bytes(rest[4..8].try_into().ok()?)),
                })
            }
            OP_WRITE_HEADER => {
                if rest.len() != 8 {
                    return None;
                }
                Some(JournalEntry::WriteHeader {
                    sector_count: u32::from_be_bytes(rest[0..4].try_into().ok()?),
                    free_head: SectorId(i32::from_be_bytes(rest[4..8].try_into().ok()?)),
                })
            }
            OP_WRITE_RESERVED => Some(JournalEntry::WriteReserved { bytes: rest.to_vec() }),
            _ => None,
        }
    }
}

/// Write-ahead journal of a fixed-size sector store.
///
/// Entries are framed as `{len: u32_be, crc32c: u32_be, payload}`. The
/// journal is truncated at every checkpoint; a non-empty journal at open
/// time means the store was not closed cleanly and a recovery pass is due.
pub(crate) struct SectorJournal {
    path: PathBuf,
    file: BufWriter<File>,
}

impl SectorJournal {
    /// Open the journal at `path`, returning the valid entries left behind
    /// by an unclean shutdown. An empty vector means no recovery is needed.
    pub(crate) fn open(path: &Path) -> Result<(SectorJournal, Vec<JournalEntry>)> {
        let mut pending = Vec::new();
        if path.exists() {
            let mut file = File::open(path).with_context(|| format!("could not open journal: {}", path.display()))?;
            let mut raw = Vec::new();
            file.read_to_end(&mut raw)?;
            pending = parse_entries(&raw, path);
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("could not create journal: {}", path.display()))?;

        Ok((
            SectorJournal {
                path: path.to_owned(),
                file: BufWriter::new(file),
            },
            pending,
        ))
    }

    /// Append one entry and push it to the OS. The entry must be on its way
    /// to the journal before the corresponding main-file write is issued.
    pub(crate) fn log(&mut self, entry: &JournalEntry) -> Result<()> {
        let payload = entry.encode();
        let crc = crc32c::crc32c(&payload);
        self.file.write_all(&(payload.len() as u32).to_be_bytes())?;
        self.file.write_all(&crc.to_be_bytes())?;
        self.file.write_all(&payload)?;
        self.file.flush()?;
        Ok(())
    }

    /// Discard all journaled entries. Only valid once the main file has been
    /// flushed past everything the journal covers.
    pub(crate) fn checkpoint(&mut self) -> Result<()> {
        self.file.flush()?;
        let file = self.file.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Force the journal itself onto the platter.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_entries(raw: &[u8], path: &Path) -> Vec<JournalEntry> {
    let mut entries = Vec::new();
    let mut cursor = 0usize;
    while raw.len() - cursor >= 8 {
        let len = u32::from_be_bytes(raw[cursor..cursor + 4].try_into().unwrap()) as usize;
        let crc = u32::from_be_bytes(raw[cursor + 4..cursor + 8].try_into().unwrap());
        let body_start = cursor + 8;
        if raw.len() - body_start < len {
            warn!("journal {} has a torn tail entry, discarding", path.display());
            break;
        }
        let payload = &raw[body_start..body_start + len];
        if crc32c::crc32c(payload) != crc {
            warn!("journal {} has a corrupt entry at byte {cursor}, discarding tail", path.display());
            break;
        }
        match JournalEntry::decode(payload) {
            Some(entry) => entries.push(entry),
            None => {
                warn!("journal {} has an undecodable entry at byte {cursor}, discarding tail", path.display());
                break;
            }
        }
        cursor = body_start + len;
    }
    if !entries.is_empty() {
        debug!("journal {} holds {} entries to replay", path.display(), entries.len());
    }
    entries
}
