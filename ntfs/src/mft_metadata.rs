// Standalone $MFT parsing
// A forensically extracted $MFT file carries every record but no cluster
// data, so entries expose metadata, resident payloads, and path hints;
// non-resident stream reads are refused.

use crate::cluster_stream::StreamContext;
use crate::file_entry::{EntrySource, FileEntry};
use crate::mft::{MftRecord, MftReference};
use crate::name::UpcaseTable;
use crate::structures::*;
use lodestone_core::{read_vec_at, LodestoneError, RangeReader};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records in a bare $MFT still carry fix-ups laid out for 512-byte
/// sectors.
const MFT_FILE_SECTOR_SIZE: usize = 512;

struct MftFileInner {
    reader: Arc<dyn RangeReader>,
    entry_size: u32,
    entry_count: u64,
    abort: AtomicBool,
    cache: Mutex<HashMap<u64, Arc<MftRecord>>>,
    cache_order: Mutex<VecDeque<u64>>,
    cache_capacity: usize,
}

impl EntrySource for MftFileInner {
    fn load_record(&self, index: u64) -> Result<Arc<MftRecord>, LodestoneError> {
        if index >= self.entry_count {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT entry {} beyond the table's {} entries",
                index, self.entry_count
            )));
        }
        if let Some(record) = self.cache.lock().unwrap().get(&index) {
            return Ok(record.clone());
        }

        let mut buffer = read_vec_at(
            self.reader.as_ref(),
            index * self.entry_size as u64,
            self.entry_size as usize,
        )?;
        let record = Arc::new(MftRecord::parse(
            &mut buffer,
            index,
            MFT_FILE_SECTOR_SIZE,
            None,
        )?);

        let mut cache = self.cache.lock().unwrap();
        let mut order = self.cache_order.lock().unwrap();
        if cache.insert(index, record.clone()).is_none() {
            order.push_back(index);
        }
        while cache.len() > self.cache_capacity {
            match order.pop_front() {
                Some(evicted) => {
                    cache.remove(&evicted);
                }
                None => break,
            }
        }
        Ok(record)
    }

    fn load_record_by_reference(
        &self,
        reference: MftReference,
    ) -> Result<Arc<MftRecord>, LodestoneError> {
        let record = self.load_record(reference.index())?;
        if reference.sequence() != 0 && record.sequence != reference.sequence() {
            return Err(LodestoneError::StaleReference {
                index: reference.index(),
                expected: reference.sequence(),
                actual: record.sequence,
            });
        }
        Ok(record)
    }

    fn stream_context(&self) -> Option<Arc<StreamContext>> {
        None
    }

    fn bytes_per_sector(&self) -> usize {
        MFT_FILE_SECTOR_SIZE
    }

    fn upcase(&self) -> Option<Arc<UpcaseTable>> {
        None
    }
}

/// A parsed standalone $MFT metadata file.
pub struct MftMetadataFile {
    inner: Arc<MftFileInner>,
}

impl MftMetadataFile {
    /// Open a $MFT image. The entry size is taken from record 0's
    /// allocated size field.
    pub fn open<R: RangeReader + 'static>(reader: R) -> Result<MftMetadataFile, LodestoneError> {
        let reader: Arc<dyn RangeReader> = Arc::new(reader);
        let header = read_vec_at(reader.as_ref(), 0, MFT_RECORD_HEADER_SIZE)?;
        if &header[0..4] != MFT_RECORD_SIGNATURE {
            return Err(LodestoneError::CorruptedRecord(format!(
                "first record has signature {:02x?}",
                &header[0..4]
            )));
        }
        let entry_size = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
        if entry_size < MFT_RECORD_HEADER_SIZE as u32
            || entry_size > 0x1_0000
            || !entry_size.is_power_of_two()
        {
            return Err(LodestoneError::CorruptedRecord(format!(
                "record 0 declares an entry size of {} bytes",
                entry_size
            )));
        }
        let entry_count = reader.len() / entry_size as u64;
        debug!(
            "$MFT file: {} bytes, {}-byte entries, {} records",
            reader.len(),
            entry_size,
            entry_count
        );

        Ok(MftMetadataFile {
            inner: Arc::new(MftFileInner {
                reader,
                entry_size,
                entry_count,
                abort: AtomicBool::new(false),
                cache: Mutex::new(HashMap::new()),
                cache_order: Mutex::new(VecDeque::new()),
                cache_capacity: 1024,
            }),
        })
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count
    }

    pub fn entry_size(&self) -> u32 {
        self.inner.entry_size
    }

    pub fn entry(&self, index: u64) -> Result<FileEntry, LodestoneError> {
        let record = self.inner.load_record(index)?;
        FileEntry::build(source(&self.inner), record)
    }

    pub fn entry_by_reference(
        &self,
        reference: MftReference,
    ) -> Result<FileEntry, LodestoneError> {
        let record = self.inner.load_record_by_reference(reference)?;
        FileEntry::build(source(&self.inner), record)
    }

    /// Lazy scan over every record, one result per entry.
    pub fn entries(&self) -> MftFileEntryIter {
        MftFileEntryIter {
            inner: self.inner.clone(),
            next_index: 0,
            stopped: false,
        }
    }

    pub fn abort(&self) {
        self.inner.abort.store(true, Ordering::SeqCst);
    }
}

pub struct MftFileEntryIter {
    inner: Arc<MftFileInner>,
    next_index: u64,
    stopped: bool,
}

impl Iterator for MftFileEntryIter {
    type Item = Result<FileEntry, LodestoneError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.next_index >= self.inner.entry_count {
            return None;
        }
        if self.inner.abort.load(Ordering::Relaxed) {
            self.stopped = true;
            return Some(Err(LodestoneError::Aborted));
        }
        let index = self.next_index;
        self.next_index += 1;
        let item = self
            .inner
            .load_record(index)
            .and_then(|record| FileEntry::build(source(&self.inner), record));
        Some(item)
    }
}

/// Coerce the concrete inner into the trait object FileEntry expects.
fn source(inner: &Arc<MftFileInner>) -> Arc<dyn EntrySource> {
    inner.clone()
}
