// Directory view over a $I30 file-name index
// Enumerates children and resolves names, with the DOS short-name
// equivalence as a lookup fallback.

use crate::attributes::FileNameAttr;
use crate::index::{Index, IndexValue};
use crate::mft::MftReference;
use crate::name::{compare_names, file_name_key_units, short_name_matches};
use crate::structures::*;
use lodestone_core::LodestoneError;
use log::trace;
use std::cmp::Ordering;

/// One directory child: the indexed $FILE_NAME key plus the file reference
/// the entry points at.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub reference: MftReference,
    pub file_name: FileNameAttr,
}

impl DirectoryEntry {
    fn from_value(value: &IndexValue) -> Result<DirectoryEntry, LodestoneError> {
        Ok(DirectoryEntry {
            reference: value.file_reference,
            file_name: FileNameAttr::parse(&value.key).map_err(|_| {
                LodestoneError::IndexCorrupted(format!(
                    "file name index key of {} bytes",
                    value.key.len()
                ))
            })?,
        })
    }
}

/// A directory: the $I30 index of one MFT entry.
pub struct Directory {
    index: Index,
}

impl Directory {
    pub(crate) fn new(index: Index) -> Result<Directory, LodestoneError> {
        if index.indexed_attribute_type != ATTR_TYPE_FILE_NAME {
            return Err(LodestoneError::IndexCorrupted(format!(
                "directory index keyed by attribute type 0x{:x}",
                index.indexed_attribute_type
            )));
        }
        Ok(Directory { index })
    }

    /// Every index entry, including DOS short-name duplicates.
    pub fn iter_entries(
        &self,
    ) -> impl Iterator<Item = Result<DirectoryEntry, LodestoneError>> + '_ {
        self.index
            .iter()
            .map(|value| value.and_then(|v| DirectoryEntry::from_value(&v)))
    }

    /// Directory children: one entry per name, the DOS-namespace
    /// duplicates of Win32 names skipped.
    pub fn iter_children(
        &self,
    ) -> impl Iterator<Item = Result<DirectoryEntry, LodestoneError>> + '_ {
        self.iter_entries().filter(|entry| match entry {
            Ok(entry) => entry.file_name.namespace != FILE_NAME_NAMESPACE_DOS,
            Err(_) => true,
        })
    }

    /// Case-sensitive lookup. Descends case-insensitively (the on-disk
    /// collation) and verifies the exact name on the hit.
    pub fn lookup(&self, name: &str) -> Result<Option<DirectoryEntry>, LodestoneError> {
        let probe: Vec<u16> = name.encode_utf16().collect();
        if let Some(entry) = self.descend(&probe)? {
            if compare_names(&probe, &entry.file_name.name_units, false, None) == Ordering::Equal {
                return Ok(Some(entry));
            }
            // Same name under the fold but different case: scan for an
            // exact-case sibling.
            for entry in self.iter_entries() {
                let entry = entry?;
                if compare_names(&probe, &entry.file_name.name_units, false, None)
                    == Ordering::Equal
                {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    /// Case-insensitive lookup with DOS short-name fallback.
    pub fn lookup_case_insensitive(
        &self,
        name: &str,
    ) -> Result<Option<DirectoryEntry>, LodestoneError> {
        let probe: Vec<u16> = name.encode_utf16().collect();
        if let Some(entry) = self.descend(&probe)? {
            return Ok(Some(entry));
        }

        // Miss: re-walk comparing the probe as a generated 8.3 short name
        // against each long name.
        trace!("lookup miss for {:?}, trying short-name equivalence", name);
        for entry in self.iter_entries() {
            let entry = entry?;
            if short_name_matches(&entry.file_name.name_units, &probe, self.index.upcase()) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// B+ tree descent under the file-name collation.
    fn descend(&self, probe: &[u16]) -> Result<Option<DirectoryEntry>, LodestoneError> {
        let upcase = self.index.upcase();
        let found = self.index.lookup_with(|value| {
            let key_units = file_name_key_units(&value.key)?;
            Ok(compare_names(probe, &key_units, true, upcase))
        })?;
        found
            .map(|value| DirectoryEntry::from_value(&value))
            .transpose()
    }
}
