// Volume: boot sector, MFT bootstrap, entry cache
// Opens once, reads many. The MFT describes itself through entry 0, so the
// bootstrap parses that record raw, builds a stream over its $DATA, and
// serves every other entry through a bounded LRU cache on top of it.

use crate::attribute_list::{build_chains, parse_attribute_list, splice_extension_chains};
use crate::attributes::VolumeInformation;
use crate::boot_sector::{parse_boot_sector, VolumeGeometry};
use crate::cluster_stream::{ClusterStream, StreamContext};
use crate::file_entry::{EntrySource, FileEntry};
use crate::mft::{MftRecord, MftReference};
use crate::name::UpcaseTable;
use crate::path_resolver::{resolve_from, ResolvedPath};
use crate::structures::*;
use crate::usn_journal::UsnJournal;
use lodestone_core::{
    read_vec_at, DiagnosticsSink, LodestoneError, LogSink, RangeReader, Severity,
};
use log::{debug, warn};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Open-time configuration.
pub struct VolumeOptions {
    /// Bounded LRU capacity of the MFT entry cache.
    pub entry_cache_capacity: usize,
    /// Load the $UpCase table (MFT entry 10) for name folding.
    pub load_upcase: bool,
    /// Diagnostics sink; defaults to forwarding into the `log` facade.
    pub sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        VolumeOptions {
            entry_cache_capacity: 1024,
            load_upcase: true,
            sink: None,
        }
    }
}

/// Serialisable volume summary.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub label: Option<String>,
    pub ntfs_major_version: Option<u8>,
    pub ntfs_minor_version: Option<u8>,
    pub serial_number: u64,
    pub bytes_per_sector: u32,
    pub cluster_size: u64,
    pub mft_entry_size: u32,
    pub index_entry_size: u32,
    pub total_sectors: u64,
    pub total_clusters: u64,
}

/// Bounded LRU over parsed MFT records. Failed parses are never inserted.
struct EntryCache {
    capacity: usize,
    map: HashMap<u64, Arc<MftRecord>>,
    order: VecDeque<u64>,
}

impl EntryCache {
    fn new(capacity: usize) -> EntryCache {
        EntryCache {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, index: u64) -> Option<Arc<MftRecord>> {
        let record = self.map.get(&index)?.clone();
        if let Some(position) = self.order.iter().position(|&i| i == index) {
            self.order.remove(position);
            self.order.push_back(index);
        }
        Some(record)
    }

    fn insert(&mut self, index: u64, record: Arc<MftRecord>) {
        if self.map.insert(index, record).is_none() {
            self.order.push_back(index);
        }
        while self.map.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            } else {
                break;
            }
        }
    }
}

pub(crate) struct VolumeInner {
    geometry: VolumeGeometry,
    context: Arc<StreamContext>,
    abort: Arc<AtomicBool>,
    mft_stream: ClusterStream,
    cache: Mutex<EntryCache>,
    upcase: Option<Arc<UpcaseTable>>,
    label: Option<String>,
    volume_information: Option<VolumeInformation>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl VolumeInner {
    fn entry_count(&self) -> u64 {
        self.mft_stream.size() / self.geometry.mft_entry_size as u64
    }
}

impl EntrySource for VolumeInner {
    fn load_record(&self, index: u64) -> Result<Arc<MftRecord>, LodestoneError> {
        let count = self.entry_count();
        if index >= count {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT entry {} beyond the table's {} entries",
                index, count
            )));
        }
        if let Some(record) = self.cache.lock().unwrap().get(index) {
            return Ok(record);
        }
        let record = Arc::new(read_record_from_stream(
            &self.mft_stream,
            &self.geometry,
            index,
        )?);
        self.cache.lock().unwrap().insert(index, record.clone());
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
        Some(self.context.clone())
    }

    fn bytes_per_sector(&self) -> usize {
        self.geometry.bytes_per_sector as usize
    }

    fn upcase(&self) -> Option<Arc<UpcaseTable>> {
        self.upcase.clone()
    }
}

/// Read and parse one record straight off the MFT stream.
fn read_record_from_stream(
    stream: &ClusterStream,
    geometry: &VolumeGeometry,
    index: u64,
) -> Result<MftRecord, LodestoneError> {
    let entry_size = geometry.mft_entry_size as usize;
    let mut buffer = vec![0u8; entry_size];
    let read = stream.read_at(index * entry_size as u64, &mut buffer)?;
    if read != entry_size {
        return Err(LodestoneError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("MFT entry {} truncated to {} bytes", index, read),
        )));
    }
    MftRecord::parse(
        &mut buffer,
        index,
        geometry.bytes_per_sector as usize,
        Some(geometry.total_clusters()),
    )
}

/// A read-only NTFS volume.
pub struct Volume {
    inner: Arc<VolumeInner>,
}

impl Volume {
    pub fn open<R: RangeReader + 'static>(
        reader: R,
        volume_offset: u64,
    ) -> Result<Volume, LodestoneError> {
        Self::open_with_options(reader, volume_offset, VolumeOptions::default())
    }

    pub fn open_with_options<R: RangeReader + 'static>(
        reader: R,
        volume_offset: u64,
        options: VolumeOptions,
    ) -> Result<Volume, LodestoneError> {
        let reader: Arc<dyn RangeReader> = Arc::new(reader);
        let sink = options.sink.unwrap_or_else(|| Arc::new(LogSink));

        let boot = read_vec_at(reader.as_ref(), volume_offset, 512)?;
        let geometry = parse_boot_sector(&boot)?;

        let abort = Arc::new(AtomicBool::new(false));
        let context = Arc::new(StreamContext::new(
            reader.clone(),
            volume_offset,
            geometry.cluster_size,
            abort.clone(),
        ));

        // Bootstrap: MFT entry 0 describes the MFT itself.
        let mut record0_buffer = read_vec_at(
            reader.as_ref(),
            volume_offset + geometry.mft_offset(),
            geometry.mft_entry_size as usize,
        )?;
        let record0 = Arc::new(MftRecord::parse(
            &mut record0_buffer,
            0,
            geometry.bytes_per_sector as usize,
            Some(geometry.total_clusters()),
        )?);

        let mft_stream = bootstrap_mft_stream(&record0, &geometry, &context)?;
        debug!(
            "MFT stream: {} bytes, {} entries",
            mft_stream.size(),
            mft_stream.size() / geometry.mft_entry_size as u64
        );

        let mut inner = VolumeInner {
            geometry,
            context,
            abort,
            mft_stream,
            cache: Mutex::new(EntryCache::new(options.entry_cache_capacity)),
            upcase: None,
            label: None,
            volume_information: None,
            sink,
        };

        load_volume_metadata(&mut inner)?;
        if options.load_upcase {
            load_upcase_table(&mut inner);
        }

        Ok(Volume {
            inner: Arc::new(inner),
        })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.inner.geometry
    }

    pub fn info(&self) -> VolumeInfo {
        let geometry = &self.inner.geometry;
        VolumeInfo {
            label: self.inner.label.clone(),
            ntfs_major_version: self.inner.volume_information.map(|v| v.major_version),
            ntfs_minor_version: self.inner.volume_information.map(|v| v.minor_version),
            serial_number: geometry.serial_number,
            bytes_per_sector: geometry.bytes_per_sector,
            cluster_size: geometry.cluster_size,
            mft_entry_size: geometry.mft_entry_size,
            index_entry_size: geometry.index_entry_size,
            total_sectors: geometry.total_sectors,
            total_clusters: geometry.total_clusters(),
        }
    }

    /// Number of entries the MFT can hold.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn root(&self) -> Result<FileEntry, LodestoneError> {
        self.get_entry_by_index(MFT_ENTRY_ROOT)
    }

    pub fn get_entry_by_index(&self, index: u64) -> Result<FileEntry, LodestoneError> {
        let record = self.inner.load_record(index)?;
        FileEntry::build(self.source(), record)
    }

    /// Load through a full file reference; fails with `StaleReference`
    /// when the slot has been reused since the reference was minted.
    pub fn get_entry_by_reference(
        &self,
        reference: MftReference,
    ) -> Result<FileEntry, LodestoneError> {
        let record = self.inner.load_record_by_reference(reference)?;
        FileEntry::build(self.source(), record)
    }

    /// Resolve a `\`-separated path. A trailing `:stream` suffix selects
    /// an alternate data stream; use `resolve_path` to receive it.
    pub fn get_entry_by_path(&self, path: &str) -> Result<Option<FileEntry>, LodestoneError> {
        Ok(self.resolve_path(path)?.map(|resolved| resolved.entry))
    }

    pub fn resolve_path(&self, path: &str) -> Result<Option<ResolvedPath>, LodestoneError> {
        resolve_from(self.root()?, path)
    }

    /// Lazy scan over every MFT entry. Each item is its own result so one
    /// bad record does not end the scan.
    pub fn mft_entries(&self) -> MftEntryIter {
        MftEntryIter {
            inner: self.inner.clone(),
            next_index: 0,
            count: self.inner.entry_count(),
            stopped: false,
        }
    }

    /// Open the USN change journal at `\$Extend\$UsnJrnl:$J`. `Ok(None)`
    /// when the volume has no journal.
    pub fn usn_journal(&self) -> Result<Option<UsnJournal>, LodestoneError> {
        let entry = match self.get_entry_by_path("\\$Extend\\$UsnJrnl")? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let stream = match entry.open_stream(Some("$J"))? {
            Some(stream) => stream,
            None => return Ok(None),
        };
        Ok(Some(UsnJournal::new(stream)))
    }

    /// Request cooperative cancellation: long-running loops observe the
    /// flag at natural boundaries and return `Aborted`.
    pub fn abort(&self) {
        self.inner.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.load(Ordering::Relaxed)
    }

    pub fn upcase_loaded(&self) -> bool {
        self.inner.upcase.is_some()
    }

    fn source(&self) -> Arc<dyn EntrySource> {
        self.inner.clone()
    }
}

/// Build the stream over the MFT's own $DATA, resolving entry 0's
/// attribute list through the partial stream when one exists.
fn bootstrap_mft_stream(
    record0: &Arc<MftRecord>,
    geometry: &VolumeGeometry,
    context: &Arc<StreamContext>,
) -> Result<ClusterStream, LodestoneError> {
    let chains = build_chains(record0);
    let data_chain = chains
        .iter()
        .find(|c| c.attribute_type == ATTR_TYPE_DATA && c.name.is_none())
        .ok_or_else(|| {
            LodestoneError::CorruptedRecord("MFT entry 0 has no $DATA attribute".to_string())
        })?;
    let partial = ClusterStream::from_chain(context.clone(), data_chain)?;

    let list_attribute = match record0.find_attribute(ATTR_TYPE_ATTRIBUTE_LIST, None) {
        None => return Ok(partial),
        Some(attribute) => attribute,
    };

    // A fragmented MFT: its own attribute list points at extension
    // records that the partial stream (the base record's runs) already
    // covers. Resolve through it and rebuild.
    debug!("MFT entry 0 carries an attribute list; resolving extensions");
    let list_bytes = match list_attribute.resident_data() {
        Some(data) => data.to_vec(),
        None => {
            let chain = crate::attribute_list::AttributeChain {
                attribute_type: ATTR_TYPE_ATTRIBUTE_LIST,
                name: None,
                attributes: vec![list_attribute.clone()],
                truncated: None,
            };
            ClusterStream::from_chain(context.clone(), &chain)?.read_all()?
        }
    };
    let entries = parse_attribute_list(&list_bytes)?;
    let chains = splice_extension_chains(record0, &entries, |reference| {
        let record = read_record_from_stream(&partial, geometry, reference.index())?;
        if reference.sequence() != 0 && record.sequence != reference.sequence() {
            return Err(LodestoneError::StaleReference {
                index: reference.index(),
                expected: reference.sequence(),
                actual: record.sequence,
            });
        }
        Ok(Arc::new(record))
    });
    let data_chain = chains
        .iter()
        .find(|c| c.attribute_type == ATTR_TYPE_DATA && c.name.is_none())
        .ok_or_else(|| {
            LodestoneError::CorruptedRecord("MFT entry 0 has no $DATA attribute".to_string())
        })?;
    ClusterStream::from_chain(context.clone(), data_chain)
}

/// Read label and NTFS version from the $Volume entry. A missing entry is
/// tolerated; a non-3.x version is not.
fn load_volume_metadata(inner: &mut VolumeInner) -> Result<(), LodestoneError> {
    let record = match inner.load_record(MFT_ENTRY_VOLUME) {
        Ok(record) => record,
        Err(error) => {
            inner.sink.report(
                Severity::Warning,
                "$Volume",
                &format!("entry unavailable: {}", error),
            );
            return Ok(());
        }
    };
    if let Some(attribute) = record.find_attribute(ATTR_TYPE_VOLUME_NAME, None) {
        match attribute.as_volume_name() {
            Ok(label) if !label.is_empty() => inner.label = Some(label),
            Ok(_) => {}
            Err(error) => inner.sink.report(
                Severity::Warning,
                "$Volume",
                &format!("unreadable label: {}", error),
            ),
        }
    }
    if let Some(attribute) = record.find_attribute(ATTR_TYPE_VOLUME_INFORMATION, None) {
        let information = attribute.as_volume_information()?;
        if information.major_version != 3 {
            return Err(LodestoneError::Unsupported(format!(
                "NTFS version {}.{}",
                information.major_version, information.minor_version
            )));
        }
        debug!(
            "NTFS version {}.{}",
            information.major_version, information.minor_version
        );
        inner.volume_information = Some(information);
    }
    Ok(())
}

/// Load the $UpCase table. Any failure falls back to ambient folding.
fn load_upcase_table(inner: &mut VolumeInner) {
    let loaded = (|| -> Result<Option<UpcaseTable>, LodestoneError> {
        let record = inner.load_record(MFT_ENTRY_UPCASE)?;
        let chains = build_chains(&record);
        let chain = match chains
            .iter()
            .find(|c| c.attribute_type == ATTR_TYPE_DATA && c.name.is_none())
        {
            Some(chain) => chain,
            None => return Ok(None),
        };
        let stream = ClusterStream::from_chain(inner.context.clone(), chain)?;
        if stream.size() == 0 || stream.size() > UpcaseTable::FULL_SIZE as u64 * 2 {
            return Ok(None);
        }
        let bytes = stream.read_all()?;
        Ok(UpcaseTable::from_bytes(&bytes))
    })();

    match loaded {
        Ok(Some(table)) => {
            debug!("$UpCase loaded: {} mappings", table.len());
            inner.upcase = Some(Arc::new(table));
        }
        Ok(None) => warn!("$UpCase unusable, falling back to ambient case folding"),
        Err(error) => {
            inner.sink.report(
                Severity::Warning,
                "$UpCase",
                &format!("load failed, using ambient case folding: {}", error),
            );
        }
    }
}

/// Iterator over every MFT entry, yielding one result per record.
pub struct MftEntryIter {
    inner: Arc<VolumeInner>,
    next_index: u64,
    count: u64,
    stopped: bool,
}

impl Iterator for MftEntryIter {
    type Item = Result<FileEntry, LodestoneError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.next_index >= self.count {
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
            .and_then(|record| FileEntry::build(self.inner.clone(), record));
        Some(item)
    }
}
