use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use granite_primitives::{RecordId, SectorId};
use log::trace;

use crate::error::{Result, StoreError};
use crate::sector::{FixedSectorStore, OpenOptions as SectorOptions, StoreWriteLock, STATUS_CONT, STATUS_FREE, STATUS_HEAD};

/// Low 8 bits of the type key are reserved for the record store itself.
pub const TYPE_KEY_RESERVED_MASK: i32 = 0xFF;
/// Bit 0 of the reserved area: the record body is Deflate-compressed.
pub const TYPE_KEY_COMPRESSED: i32 = 0x01;

const ALLOC_ENTRY_LEN: usize = 12;

/// One entry of the allocation index: `{chain_head, length, type_key}`,
/// each a big-endian i32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocEntry {
    pub chain_head: SectorId,
    pub length: i32,
    pub type_key: i32,
}

impl AllocEntry {
    fn encode(&self) -> [u8; ALLOC_ENTRY_LEN] {
        let mut buf = [0u8; ALLOC_ENTRY_LEN];
        buf[0..4].copy_from_slice(&self.chain_head.0.to_be_bytes());
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
        buf[8..12].copy_from_slice(&self.type_key.to_be_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<AllocEntry> {
        if buf.len() != ALLOC_ENTRY_LEN {
            return Err(StoreError::Corrupt(format!(
                "allocation entry of {} bytes, expected {ALLOC_ENTRY_LEN}",
                buf.len()
            )));
        }
        Ok(AllocEntry {
            chain_head: SectorId(i32::from_be_bytes(buf[0..4].try_into().unwrap())),
            length: i32::from_be_bytes(buf[4..8].try_into().unwrap()),
            type_key: i32::from_be_bytes(buf[8..12].try_into().unwrap()),
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.type_key & TYPE_KEY_COMPRESSED != 0
    }

    /// The type key with the reserved bits masked off.
    pub fn user_type(&self) -> i32 {
        self.type_key & !TYPE_KEY_RESERVED_MASK
    }
}

/// Occupancy counters reported by [`VarRecordStore::statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatistics {
    pub record_count: u32,
    pub data_sectors_used: u32,
    pub data_sectors_free: u32,
    pub data_sector_size: usize,
}

/// Options for opening a [`VarRecordStore`].
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
    data_sector_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions { data_sector_size: 1024 }
    }
}

impl OpenOptions {
    /// Payload capacity of a data sector. Supported range 512..=4096.
    pub fn data_sector_size(&mut self, size: usize) -> &mut Self {
        self.data_sector_size = size;
        self
    }

    /// Open or create the record store at `<base>.axi` / `<base>.dss`.
    ///
    /// The boolean is `true` when either backing file required journal
    /// recovery.
    pub fn open(&self, base: impl AsRef<Path>) -> Result<(VarRecordStore, bool)> {
        let base = base.as_ref();
        let (alloc, rec_a) = SectorOptions::default()
            .sector_size(ALLOC_ENTRY_LEN)
            .open(base.with_extension("axi"))?;
        let (data, rec_d) = SectorOptions::default()
            .sector_size(self.data_sector_size)
            .open(base.with_extension("dss"))?;
        Ok((
            VarRecordStore {
                base: base.to_owned(),
                alloc,
                data,
                stream_open: AtomicBool::new(false),
            },
            rec_a || rec_d,
        ))
    }
}

/// Variable-size records layered over two fixed-size sector stores: an
/// allocation index of 12-byte entries and a data file of sector chains.
///
/// Records larger than one data sector are considered for Deflate
/// compression; a compressed body carries the uncompressed length in its
/// trailing four bytes and sets bit 0 of the record's type key.
pub struct VarRecordStore {
    base: PathBuf,
    alloc: FixedSectorStore,
    data: FixedSectorStore,
    stream_open: AtomicBool,
}

impl VarRecordStore {
    pub fn options() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn open(base: impl AsRef<Path>) -> Result<(VarRecordStore, bool)> {
        OpenOptions::default().open(base)
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn data_sector_size(&self) -> usize {
        self.data.sector_size()
    }

    /// Write `buf` as a new record, compressing when that saves sectors.
    pub fn write(&self, buf: &[u8]) -> Result<RecordId> {
        let sector_size = self.data.sector_size();
        let mut type_key = 0i32;
        let mut stored: &[u8] = buf;

        let compressed;
        if buf.len() > sector_size {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(buf)?;
            let mut candidate = encoder.finish()?;
            candidate.extend_from_slice(&(buf.len() as u32).to_be_bytes());
            if spans(candidate.len(), sector_size) < spans(buf.len(), sector_size) {
                compressed = candidate;
                stored = &compressed;
                type_key |= TYPE_KEY_COMPRESSED;
                trace!("record of {} bytes deflates to {}", buf.len(), stored.len());
            }
        }

        let chain_head = self.data.write_across(stored)?;
        let entry = AllocEntry {
            chain_head,
            length: stored.len() as i32,
            type_key,
        };
        let id = self.alloc.add_sector(&entry.encode())?;
        Ok(RecordId(id.0 as u32))
    }

    fn entry(&self, record: RecordId) -> Result<AllocEntry> {
        let id = SectorId(record.0 as i32);
        let payload = self.alloc.get_sector(id).map_err(|e| match e {
            StoreError::SectorOutOfBounds(_) | StoreError::SectorNotInUse(_) => StoreError::RecordNotAllocated(record),
            other => other,
        })?;
        AllocEntry::decode(&payload)
    }

    /// Read a whole record, decompressing if the compressed flag is set.
    pub fn read(&self, record: RecordId) -> Result<Vec<u8>> {
        let entry = self.entry(record)?;
        let raw = self.data.read_across(entry.chain_head)?;
        if raw.len() != entry.length as usize {
            return Err(StoreError::Corrupt(format!(
                "record {record} stores {} bytes but its entry says {}",
                raw.len(),
                entry.length
            )));
        }
        if !entry.is_compressed() {
            return Ok(raw);
        }
        if raw.len() < 4 {
            return Err(StoreError::Corrupt(format!("compressed record {record} shorter than its trailer")));
        }
        let (body, trailer) = raw.split_at(raw.len() - 4);
        let expect = u32::from_be_bytes(trailer.try_into().unwrap()) as usize;
        let mut out = Vec::with_capacity(expect);
        DeflateDecoder::new(body).read_to_end(&mut out)?;
        if out.len() != expect {
            return Err(StoreError::Corrupt(format!(
                "record {record} inflates to {} bytes, trailer says {expect}",
                out.len()
            )));
        }
        Ok(out)
    }

    /// Read `len` bytes of a record starting at `offset`.
    pub fn read_range(&self, record: RecordId, offset: usize, len: usize) -> Result<Vec<u8>> {
        let full = self.read(record)?;
        if offset + len > full.len() {
            return Err(StoreError::Corrupt(format!(
                "range {offset}+{len} outside record {record} of {} bytes",
                full.len()
            )));
        }
        Ok(full[offset..offset + len].to_vec())
    }

    /// A streaming reader over the record body. Uncompressed records are
    /// streamed sector by sector; compressed records are materialized.
    pub fn record_reader(&self, record: RecordId) -> Result<RecordReader<'_>> {
        let entry = self.entry(record)?;
        if entry.is_compressed() {
            Ok(RecordReader::Buffered(io::Cursor::new(self.read(record)?)))
        } else {
            Ok(RecordReader::Chained {
                store: &self.data,
                next: entry.chain_head,
                pending: Vec::new(),
                pos: 0,
            })
        }
    }

    /// Delete a record, freeing its allocation entry and data chain.
    pub fn delete(&self, record: RecordId) -> Result<()> {
        let entry = self.entry(record)?;
        self.data.delete_across(entry.chain_head)?;
        self.alloc.delete_sector(SectorId(record.0 as i32))
    }

    /// Replace the upper 24 bits of a record's type key, preserving the
    /// reserved low byte.
    pub fn write_record_type(&self, record: RecordId, type_key: i32) -> Result<()> {
        let mut entry = self.entry(record)?;
        entry.type_key = (type_key & !TYPE_KEY_RESERVED_MASK) | (entry.type_key & TYPE_KEY_RESERVED_MASK);
        self.alloc.overwrite_sector(SectorId(record.0 as i32), &entry.encode())
    }

    pub fn record_type(&self, record: RecordId) -> Result<i32> {
        Ok(self.entry(record)?.user_type())
    }

    pub fn is_compressed(&self, record: RecordId) -> Result<bool> {
        Ok(self.entry(record)?.is_compressed())
    }

    /// Stored size of the record in bytes (compressed size if compressed).
    pub fn record_size(&self, record: RecordId) -> Result<usize> {
        Ok(self.entry(record)?.length as usize)
    }

    /// Every allocated record with its entry, in record order.
    pub fn records(&self) -> Result<Vec<(RecordId, AllocEntry)>> {
        let mut out = Vec::new();
        for i in 0..self.alloc.sector_count() {
            let id = SectorId(i as i32);
            match self.alloc.sector_meta(id)? {
                (STATUS_FREE, _, _) => continue,
                _ => {
                    let entry = AllocEntry::decode(&self.alloc.get_sector(id)?)?;
                    out.push((RecordId(i), entry));
                }
            }
        }
        Ok(out)
    }

    /// Open a streaming writer for one large record.
    ///
    /// # Panics
    ///
    /// Panics if another record stream is already open on this store; that
    /// is a programming error in the caller.
    pub fn open_record_stream(&self) -> RecordWriter<'_> {
        if self.stream_open.swap(true, Ordering::SeqCst) {
            panic!("a record stream is already open on {}", self.base.display());
        }
        RecordWriter {
            store: self,
            data: self.data.lock_for_write(),
            buf: Vec::new(),
            head: SectorId::NIL,
            prev: SectorId::NIL,
            total: 0,
            finished: false,
        }
    }

    pub fn statistics(&self) -> StoreStatistics {
        let data_total = self.data.sector_count();
        let data_free = self.data.free_sector_count();
        StoreStatistics {
            record_count: self.alloc.sector_count() - self.alloc.free_sector_count(),
            data_sectors_used: data_total - data_free,
            data_sectors_free: data_free,
            data_sector_size: self.data.sector_size(),
        }
    }

    /// Give back trailing free space in both backing files.
    pub fn compact(&self) -> Result<u32> {
        Ok(self.data.trim_trailing_free()? + self.alloc.trim_trailing_free()?)
    }

    pub fn synch(&self) -> Result<()> {
        self.alloc.synch()?;
        self.data.synch()
    }

    pub fn hard_synch(&self) -> Result<()> {
        self.alloc.hard_synch()?;
        self.data.hard_synch()
    }

    pub fn check_and_repair(&self) -> Result<u32> {
        Ok(self.alloc.check_and_repair()? + self.data.check_and_repair()?)
    }

    pub fn close(self) -> Result<()> {
        self.alloc.close()?;
        self.data.close()
    }

    /// Delete both backing files. The store must be consumed first.
    pub fn delete_files(base: impl AsRef<Path>) -> Result<()> {
        let base = base.as_ref();
        for ext in ["axi", "dss", "axi.sjf", "dss.sjf"] {
            let path = base.with_extension(ext);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn spans(len: usize, sector_size: usize) -> usize {
    len.div_ceil(sector_size).max(1)
}

/// Streaming writer for one record; created by
/// [`VarRecordStore::open_record_stream`]. Holds the data store's write
/// lock for its whole lifetime. Dropping without [`RecordWriter::finish`]
/// frees any sectors already spilled.
pub struct RecordWriter<'a> {
    store: &'a VarRecordStore,
    data: StoreWriteLock<'a>,
    buf: Vec<u8>,
    head: SectorId,
    prev: SectorId,
    total: usize,
    finished: bool,
}

impl RecordWriter<'_> {
    fn spill(&mut self, upto: usize) -> Result<()> {
        let chunk: Vec<u8> = self.buf.drain(..upto).collect();
        let id = self.data.alloc_sector()?;
        let status = if self.head.is_nil() { STATUS_HEAD } else { STATUS_CONT };
        self.data.write_sector(id, status, SectorId::NIL, &chunk)?;
        if self.prev.is_nil() {
            self.head = id;
        } else {
            self.data.patch_next(self.prev, id)?;
        }
        self.prev = id;
        Ok(())
    }

    /// Seal the stream and return the new record's id. Streamed records are
    /// never compressed.
    pub fn finish(mut self) -> Result<RecordId> {
        if !self.buf.is_empty() || self.head.is_nil() {
            let upto = self.buf.len();
            self.spill(upto)?;
        }
        self.finished = true;
        let entry = AllocEntry {
            chain_head: self.head,
            length: self.total as i32,
            type_key: 0,
        };
        let id = self.store.alloc.add_sector(&entry.encode())?;
        Ok(RecordId(id.0 as u32))
    }
}

impl Write for RecordWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        self.total += buf.len();
        let sector_size = self.data.sector_size();
        while self.buf.len() >= sector_size {
            self.spill(sector_size)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RecordWriter<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.head.is_nil() {
            let _ = self.data.delete_across(self.head);
        }
        self.store.stream_open.store(false, Ordering::SeqCst);
    }
}

/// Streaming reader over a record body, created by
/// [`VarRecordStore::record_reader`].
pub enum RecordReader<'a> {
    Buffered(io::Cursor<Vec<u8>>),
    Chained {
        store: &'a FixedSectorStore,
        next: SectorId,
        pending: Vec<u8>,
        pos: usize,
    },
}

impl Read for RecordReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            RecordReader::Buffered(cursor) => cursor.read(out),
            RecordReader::Chained {
                store,
                next,
                pending,
                pos,
            } => {
                if *pos >= pending.len() {
                    if next.is_nil() {
                        return Ok(0);
                    }
                    let (_, n, payload) = store.lock_for_read().read_sector(*next)?;
                    *pending = payload;
                    *pos = 0;
                    *next = n;
                    if pending.is_empty() {
                        return Ok(0);
                    }
                }
                let n = (pending.len() - *pos).min(out.len());
                out[..n].copy_from_slice(&pending[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
        }
    }
}
