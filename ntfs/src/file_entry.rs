// User-facing file handle
// A FileEntry combines one MFT record with its resolved attribute chains
// and reaches back into its source (a volume or a standalone $MFT) for
// streams, directories and parent walks.

use crate::attribute_list::{
    build_chains, parse_attribute_list, splice_extension_chains, AttributeChain,
};
use crate::attributes::{
    FileAttributeFlags, FileNameAttr, MftAttribute, ObjectId, ReparsePoint, StandardInformation,
};
use crate::cluster_stream::{ClusterStream, StreamContext};
use crate::directory::{Directory, DirectoryEntry};
use crate::index::Index;
use crate::mft::{MftRecord, MftReference};
use crate::name::{names_equal, UpcaseTable};
use crate::structures::*;
use crate::timestamps::filetime_to_datetime;
use chrono::{DateTime, Utc};
use lodestone_core::LodestoneError;
use log::trace;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Where a FileEntry loads further records and cluster data from.
pub(crate) trait EntrySource: Send + Sync {
    fn load_record(&self, index: u64) -> Result<Arc<MftRecord>, LodestoneError>;
    fn load_record_by_reference(
        &self,
        reference: MftReference,
    ) -> Result<Arc<MftRecord>, LodestoneError>;
    /// Cluster-level IO. Absent when parsing a standalone $MFT file.
    fn stream_context(&self) -> Option<Arc<StreamContext>>;
    fn bytes_per_sector(&self) -> usize;
    fn upcase(&self) -> Option<Arc<UpcaseTable>>;
}

/// Summary of one entry, serialisable for external tooling.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub mft_index: u64,
    pub sequence: u16,
    pub size: u64,
    pub allocated_size: u64,
    pub is_directory: bool,
    pub is_allocated: bool,
    pub file_attribute_flags: FileAttributeFlags,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub entry_modified: Option<DateTime<Utc>>,
    pub link_count: u16,
}

/// A file (or directory) as seen through its base MFT record.
pub struct FileEntry {
    source: Arc<dyn EntrySource>,
    record: Arc<MftRecord>,
    chains: Vec<AttributeChain>,
}

impl FileEntry {
    pub(crate) fn build(
        source: Arc<dyn EntrySource>,
        record: Arc<MftRecord>,
    ) -> Result<FileEntry, LodestoneError> {
        let chains = match record.find_attribute(ATTR_TYPE_ATTRIBUTE_LIST, None) {
            None => build_chains(&record),
            Some(list_attribute) => {
                let bytes = load_attribute_payload(&source, list_attribute)?;
                let entries = parse_attribute_list(&bytes)?;
                trace!(
                    "entry {}: attribute list with {} entries",
                    record.index,
                    entries.len()
                );
                splice_extension_chains(&record, &entries, |reference| {
                    source.load_record_by_reference(reference)
                })
            }
        };
        Ok(FileEntry {
            source,
            record,
            chains,
        })
    }

    pub fn mft_index(&self) -> u64 {
        self.record.index
    }

    pub fn sequence(&self) -> u16 {
        self.record.sequence
    }

    pub fn file_reference(&self) -> MftReference {
        self.record.file_reference()
    }

    pub fn is_directory(&self) -> bool {
        self.record.is_directory()
    }

    pub fn is_allocated(&self) -> bool {
        self.record.is_allocated()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty
    }

    pub fn is_corrupt(&self) -> bool {
        self.record.is_corrupt
    }

    pub fn link_count(&self) -> u16 {
        self.record.link_count
    }

    /// The resolved attribute chains, extensions spliced in.
    pub fn attribute_chains(&self) -> &[AttributeChain] {
        &self.chains
    }

    pub fn find_chain(&self, attribute_type: u32, name: Option<&str>) -> Option<&AttributeChain> {
        self.chains
            .iter()
            .find(|c| c.attribute_type == attribute_type && c.name.as_deref() == name)
    }

    fn find_attribute(&self, attribute_type: u32, name: Option<&str>) -> Option<&MftAttribute> {
        self.find_chain(attribute_type, name).and_then(|c| c.first())
    }

    pub fn standard_information(&self) -> Result<Option<StandardInformation>, LodestoneError> {
        self.find_attribute(ATTR_TYPE_STANDARD_INFORMATION, None)
            .map(|a| a.as_standard_information())
            .transpose()
    }

    /// All $FILE_NAME attributes: one per hard link, plus DOS short forms.
    pub fn names(&self) -> Result<Vec<FileNameAttr>, LodestoneError> {
        match self.find_chain(ATTR_TYPE_FILE_NAME, None) {
            None => Ok(Vec::new()),
            Some(chain) => chain
                .attributes
                .iter()
                .map(|a| a.as_file_name())
                .collect(),
        }
    }

    /// Size of the default $DATA stream; 0 for directories and bare
    /// entries.
    pub fn size(&self) -> u64 {
        self.find_attribute(ATTR_TYPE_DATA, None)
            .map(|a| a.data_size())
            .unwrap_or(0)
    }

    pub fn allocated_size(&self) -> u64 {
        self.find_attribute(ATTR_TYPE_DATA, None)
            .map(|a| a.allocated_size())
            .unwrap_or(0)
    }

    /// Union of the flag words in $STANDARD_INFORMATION and the first
    /// $FILE_NAME.
    pub fn file_attribute_flags(&self) -> FileAttributeFlags {
        let mut flags = 0u32;
        if let Ok(Some(si)) = self.standard_information() {
            flags |= si.file_attribute_flags.0;
        }
        if let Ok(names) = self.names() {
            if let Some(first) = names.first() {
                flags |= first.file_attribute_flags.0;
            }
        }
        FileAttributeFlags(flags)
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.si_time(|si| si.creation_time)
    }

    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        self.si_time(|si| si.modification_time)
    }

    pub fn access_time(&self) -> Option<DateTime<Utc>> {
        self.si_time(|si| si.access_time)
    }

    pub fn entry_modification_time(&self) -> Option<DateTime<Utc>> {
        self.si_time(|si| si.entry_modification_time)
    }

    fn si_time(&self, pick: impl Fn(&StandardInformation) -> u64) -> Option<DateTime<Utc>> {
        match self.standard_information() {
            Ok(Some(si)) => filetime_to_datetime(pick(&si)),
            _ => None,
        }
    }

    /// Open the default $DATA stream (`None`) or a named alternate data
    /// stream. `Ok(None)` when the entry has no such stream.
    pub fn open_stream(
        &self,
        name: Option<&str>,
    ) -> Result<Option<ClusterStream>, LodestoneError> {
        let upcase = self.source.upcase();
        let chain = self.chains.iter().find(|c| {
            c.attribute_type == ATTR_TYPE_DATA
                && match (name, &c.name) {
                    (None, None) => true,
                    (Some(probe), Some(stream)) => {
                        let units: Vec<u16> = stream.encode_utf16().collect();
                        names_equal(&units, probe, true, upcase.as_deref())
                    }
                    _ => false,
                }
        });
        let chain = match chain {
            Some(chain) => chain,
            None => return Ok(None),
        };
        self.open_chain(chain).map(Some)
    }

    /// Names of the alternate data streams.
    pub fn alternate_stream_names(&self) -> Vec<String> {
        self.chains
            .iter()
            .filter(|c| c.attribute_type == ATTR_TYPE_DATA)
            .filter_map(|c| c.name.clone())
            .collect()
    }

    fn open_chain(&self, chain: &AttributeChain) -> Result<ClusterStream, LodestoneError> {
        chain.ensure_intact()?;
        let head = chain.first().ok_or_else(|| {
            LodestoneError::TruncatedAttributeChain("attribute chain is empty".to_string())
        })?;
        if head.is_resident() {
            return Ok(ClusterStream::resident(
                chain.name.clone(),
                head.resident_data().map(|d| d.to_vec()).unwrap_or_default(),
            ));
        }
        let context = self.source.stream_context().ok_or_else(|| {
            LodestoneError::Unsupported(
                "non-resident data is unreachable without the volume".to_string(),
            )
        })?;
        ClusterStream::from_chain(context, chain)
    }

    /// The directory index of this entry, if it has one.
    pub fn directory(&self) -> Result<Option<Directory>, LodestoneError> {
        let root_attribute = match self.find_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30")) {
            Some(attribute) => attribute,
            None => return Ok(None),
        };
        let root_data = root_attribute.resident_data().ok_or_else(|| {
            LodestoneError::IndexCorrupted("non-resident $INDEX_ROOT".to_string())
        })?;

        let allocation = match self.find_chain(ATTR_TYPE_INDEX_ALLOCATION, Some("$I30")) {
            None => None,
            Some(chain) => Some(self.open_chain(chain)?),
        };
        let cluster_size = self
            .source
            .stream_context()
            .map(|c| c.cluster_size())
            .unwrap_or(4096);

        let index = Index::new(
            root_data,
            allocation,
            self.source.bytes_per_sector(),
            cluster_size,
            self.source.upcase(),
        )?;
        Directory::new(index).map(Some)
    }

    /// Children of a directory entry; empty for files.
    pub fn sub_entries(&self) -> Result<Vec<DirectoryEntry>, LodestoneError> {
        match self.directory()? {
            None => Ok(Vec::new()),
            Some(directory) => directory.iter_children().collect(),
        }
    }

    pub fn object_id(&self) -> Result<Option<ObjectId>, LodestoneError> {
        self.find_attribute(ATTR_TYPE_OBJECT_ID, None)
            .map(|a| a.as_object_id())
            .transpose()
    }

    pub fn reparse_point(&self) -> Result<Option<ReparsePoint>, LodestoneError> {
        self.find_attribute(ATTR_TYPE_REPARSE_POINT, None)
            .map(|a| a.as_reparse_point())
            .transpose()
    }

    /// Whether the entry carries a $BITMAP attribute. Presence only; the
    /// allocation map itself is not decoded.
    pub fn has_bitmap(&self) -> bool {
        self.chains
            .iter()
            .any(|c| c.attribute_type == ATTR_TYPE_BITMAP)
    }

    /// Best-effort absolute path for one of the entry's names, walking
    /// parent references up to the root. `None` when the walk cannot be
    /// anchored (stale parent, cycle, depth cap).
    pub fn path_hint(&self, name_index: usize) -> Result<Option<String>, LodestoneError> {
        if self.record.index == MFT_ENTRY_ROOT {
            return Ok(Some("\\".to_string()));
        }
        let names = self.names()?;
        let name = match names.get(name_index) {
            Some(name) => name,
            None => return Ok(None),
        };

        let mut segments = vec![name.name.clone()];
        let mut parent = name.parent;
        let mut visited: HashSet<u64> = HashSet::new();
        visited.insert(self.record.index);

        for _ in 0..256 {
            if parent.index() == MFT_ENTRY_ROOT {
                segments.reverse();
                return Ok(Some(format!("\\{}", segments.join("\\"))));
            }
            if !visited.insert(parent.index()) {
                trace!("path hint for entry {}: parent cycle", self.record.index);
                return Ok(None);
            }
            let record = match self.source.load_record_by_reference(parent) {
                Ok(record) => record,
                Err(LodestoneError::StaleReference { .. }) => return Ok(None),
                Err(error) if error.is_corruption() => return Ok(None),
                Err(error) => return Err(error),
            };
            let parent_name = record
                .attributes_of_type(ATTR_TYPE_FILE_NAME)
                .filter_map(|a| a.as_file_name().ok())
                .find(|f| !f.is_dos_name());
            match parent_name {
                Some(parent_name) => {
                    segments.push(parent_name.name.clone());
                    parent = parent_name.parent;
                }
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    /// One best-effort path per name.
    pub fn path_hints(&self) -> Result<Vec<String>, LodestoneError> {
        let mut paths = Vec::new();
        for index in 0..self.names()?.len() {
            if let Some(path) = self.path_hint(index)? {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Load another entry (a directory child, a link target) through the
    /// same source, verifying the reference's sequence number.
    pub(crate) fn resolve_child(
        &self,
        reference: MftReference,
    ) -> Result<FileEntry, LodestoneError> {
        let record = self.source.load_record_by_reference(reference)?;
        FileEntry::build(self.source.clone(), record)
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            mft_index: self.record.index,
            sequence: self.record.sequence,
            size: self.size(),
            allocated_size: self.allocated_size(),
            is_directory: self.is_directory(),
            is_allocated: self.is_allocated(),
            file_attribute_flags: self.file_attribute_flags(),
            created: self.creation_time(),
            modified: self.modification_time(),
            accessed: self.access_time(),
            entry_modified: self.entry_modification_time(),
            link_count: self.record.link_count,
        }
    }
}

/// Load the payload bytes of a single attribute, resident or not.
fn load_attribute_payload(
    source: &Arc<dyn EntrySource>,
    attribute: &MftAttribute,
) -> Result<Vec<u8>, LodestoneError> {
    if let Some(data) = attribute.resident_data() {
        return Ok(data.to_vec());
    }
    let context = source.stream_context().ok_or_else(|| {
        LodestoneError::Unsupported(
            "non-resident attribute list is unreachable without the volume".to_string(),
        )
    })?;
    let chain = AttributeChain {
        attribute_type: attribute.attribute_type,
        name: attribute.name.clone(),
        attributes: vec![attribute.clone()],
        truncated: None,
    };
    ClusterStream::from_chain(context, &chain)?.read_all()
}
