// MFT attribute parsing
// One attribute = 16-byte common header + resident tail (inline data) or
// non-resident tail (VCN range + packed run list), plus an optional UTF-16
// name between the two.

use crate::data_runs::{decode_data_runs, validate_run_list, DataRun};
use crate::mft::MftReference;
use crate::name::{units_to_string, utf16_units};
use crate::structures::*;
use crate::timestamps::filetime_to_datetime;
use chrono::{DateTime, Utc};
use lodestone_core::LodestoneError;
use log::trace;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Resident or non-resident attribute body.
#[derive(Debug, Clone)]
pub enum Residency {
    Resident {
        data: Vec<u8>,
        indexed: bool,
    },
    NonResident {
        first_vcn: u64,
        last_vcn: u64,
        allocated_size: u64,
        data_size: u64,
        valid_data_size: u64,
        total_data_size: Option<u64>,
        compression_unit_shift: u16,
        runs: Vec<DataRun>,
    },
}

/// One parsed MFT attribute.
#[derive(Debug, Clone)]
pub struct MftAttribute {
    pub attribute_type: u32,
    pub name: Option<String>,
    pub name_units: Vec<u16>,
    pub data_flags: u16,
    pub identifier: u16,
    pub residency: Residency,
}

impl MftAttribute {
    /// Parse the attribute at `offset` inside a fixed-up MFT record.
    /// Returns `None` at the end-of-list sentinel, otherwise the attribute
    /// and the offset of the next one.
    pub fn parse(
        record: &[u8],
        offset: usize,
        total_clusters: Option<u64>,
    ) -> Result<Option<(MftAttribute, usize)>, LodestoneError> {
        if offset + 4 > record.len() {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "attribute header at offset {} exceeds the record",
                offset
            )));
        }
        let attribute_type = le_u32(&record[offset..]);
        if attribute_type == ATTR_TYPE_END {
            return Ok(None);
        }
        if offset + ATTRIBUTE_HEADER_SIZE > record.len() {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "attribute header at offset {} exceeds the record",
                offset
            )));
        }

        let bytes = &record[offset..];
        let header =
            unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const AttributeHeaderRaw) };
        let size = header.size as usize;
        let non_resident = header.non_resident_flag != 0;
        let name_length = header.name_length as usize;
        let name_offset = header.name_offset as usize;
        let data_flags = header.data_flags;
        let identifier = header.identifier;

        if size % 8 != 0 || size < ATTRIBUTE_HEADER_SIZE || offset + size > record.len() {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "attribute type 0x{:x} at offset {} has size {}",
                attribute_type, offset, size
            )));
        }
        if data_flags & ATTR_FLAG_COMPRESSION_MASK != 0 && data_flags & ATTR_FLAG_ENCRYPTED != 0 {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "attribute type 0x{:x} is both compressed and encrypted",
                attribute_type
            )));
        }

        let name_units = if name_length > 0 {
            if name_offset + name_length * 2 > size {
                return Err(LodestoneError::CorruptedAttribute(format!(
                    "attribute name at offset {} with {} characters exceeds the attribute",
                    name_offset, name_length
                )));
            }
            utf16_units(&bytes[name_offset..name_offset + name_length * 2])
        } else {
            Vec::new()
        };
        let name = if name_units.is_empty() {
            None
        } else {
            Some(units_to_string(&name_units))
        };

        let residency = if non_resident {
            Self::parse_non_resident(bytes, size, attribute_type, data_flags, total_clusters)?
        } else {
            Self::parse_resident(bytes, size, attribute_type)?
        };

        trace!(
            "attribute {} ({}) id {} at offset {}, {} bytes",
            attribute_type_name(attribute_type),
            if non_resident { "non-resident" } else { "resident" },
            identifier,
            offset,
            size
        );

        Ok(Some((
            MftAttribute {
                attribute_type,
                name,
                name_units,
                data_flags,
                identifier,
                residency,
            },
            offset + size,
        )))
    }

    fn parse_resident(
        bytes: &[u8],
        size: usize,
        attribute_type: u32,
    ) -> Result<Residency, LodestoneError> {
        if size < RESIDENT_HEADER_SIZE {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "resident attribute type 0x{:x} of {} bytes",
                attribute_type, size
            )));
        }
        let tail = unsafe {
            std::ptr::read_unaligned(
                bytes[ATTRIBUTE_HEADER_SIZE..].as_ptr() as *const ResidentTailRaw
            )
        };
        let data_size = tail.data_size as usize;
        let data_offset = tail.data_offset as usize;
        let indexed = tail.indexed_flag != 0;

        if data_offset + data_size > size {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "resident data [{}, {}) exceeds the attribute's {} bytes",
                data_offset,
                data_offset + data_size,
                size
            )));
        }
        Ok(Residency::Resident {
            data: bytes[data_offset..data_offset + data_size].to_vec(),
            indexed,
        })
    }

    fn parse_non_resident(
        bytes: &[u8],
        size: usize,
        attribute_type: u32,
        data_flags: u16,
        total_clusters: Option<u64>,
    ) -> Result<Residency, LodestoneError> {
        if size < NON_RESIDENT_HEADER_SIZE {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "non-resident attribute type 0x{:x} of {} bytes",
                attribute_type, size
            )));
        }
        let tail = unsafe {
            std::ptr::read_unaligned(
                bytes[ATTRIBUTE_HEADER_SIZE..].as_ptr() as *const NonResidentTailRaw
            )
        };
        let first_vcn = tail.first_vcn;
        let last_vcn = tail.last_vcn;
        let run_list_offset = tail.run_list_offset as usize;
        let compression_unit_shift = tail.compression_unit_shift;
        let allocated_size = tail.allocated_size;
        let data_size = tail.data_size;
        let valid_data_size = tail.valid_data_size;

        // Only 0 (uncompressed) and 4 (16-cluster units) occur in practice;
        // anything past 8 would demand absurd unit buffers.
        if compression_unit_shift > 8 {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "compression unit shift of {}",
                compression_unit_shift
            )));
        }
        let total_data_size = if compression_unit_shift != 0 {
            if size < NON_RESIDENT_COMPRESSED_HEADER_SIZE {
                return Err(LodestoneError::CorruptedAttribute(format!(
                    "compressed attribute type 0x{:x} of {} bytes has no total data size",
                    attribute_type, size
                )));
            }
            Some(le_u64(&bytes[64..]))
        } else {
            None
        };

        if run_list_offset < NON_RESIDENT_HEADER_SIZE || run_list_offset > size {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "run list offset {} outside attribute of {} bytes",
                run_list_offset, size
            )));
        }

        // last_vcn == first_vcn - 1 encodes an attribute with no clusters.
        let empty = last_vcn.wrapping_add(1) == first_vcn;
        let runs = if empty {
            Vec::new()
        } else {
            if last_vcn < first_vcn {
                return Err(LodestoneError::CorruptedAttribute(format!(
                    "attribute VCN range [{}, {}] is inverted",
                    first_vcn, last_vcn
                )));
            }
            let runs = decode_data_runs(&bytes[run_list_offset..size], total_clusters)?;
            validate_run_list(&runs, first_vcn, last_vcn)?;
            runs
        };

        Ok(Residency::NonResident {
            first_vcn,
            last_vcn,
            allocated_size,
            data_size,
            valid_data_size,
            total_data_size,
            compression_unit_shift,
            runs,
        })
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.residency, Residency::Resident { .. })
    }

    /// Inline payload of a resident attribute.
    pub fn resident_data(&self) -> Option<&[u8]> {
        match &self.residency {
            Residency::Resident { data, .. } => Some(data),
            Residency::NonResident { .. } => None,
        }
    }

    pub fn data_size(&self) -> u64 {
        match &self.residency {
            Residency::Resident { data, .. } => data.len() as u64,
            Residency::NonResident { data_size, .. } => *data_size,
        }
    }

    pub fn allocated_size(&self) -> u64 {
        match &self.residency {
            Residency::Resident { data, .. } => data.len() as u64,
            Residency::NonResident { allocated_size, .. } => *allocated_size,
        }
    }

    pub fn valid_data_size(&self) -> u64 {
        match &self.residency {
            Residency::Resident { data, .. } => data.len() as u64,
            Residency::NonResident {
                valid_data_size, ..
            } => *valid_data_size,
        }
    }

    pub fn vcn_range(&self) -> Option<(u64, u64)> {
        match &self.residency {
            Residency::Resident { .. } => None,
            Residency::NonResident {
                first_vcn,
                last_vcn,
                ..
            } => Some((*first_vcn, *last_vcn)),
        }
    }

    pub fn runs(&self) -> &[DataRun] {
        match &self.residency {
            Residency::Resident { .. } => &[],
            Residency::NonResident { runs, .. } => runs,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.data_flags & ATTR_FLAG_COMPRESSION_MASK != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.data_flags & ATTR_FLAG_SPARSE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.data_flags & ATTR_FLAG_ENCRYPTED != 0
    }

    /// Compression unit size in clusters. Zero for uncompressed attributes.
    /// A compressed attribute with a zero unit shift was never written;
    /// those use the default of 16 clusters.
    pub fn compression_unit_clusters(&self) -> u64 {
        match &self.residency {
            Residency::Resident { .. } => 0,
            Residency::NonResident {
                compression_unit_shift,
                ..
            } => {
                if *compression_unit_shift != 0 {
                    1 << compression_unit_shift
                } else if self.is_compressed() {
                    DEFAULT_COMPRESSION_UNIT_CLUSTERS
                } else {
                    0
                }
            }
        }
    }

    /// Whether this attribute carries the named stream (case-sensitive).
    pub fn name_is(&self, name: Option<&str>) -> bool {
        match (name, &self.name) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_file_name(&self) -> Result<FileNameAttr, LodestoneError> {
        FileNameAttr::parse(self.expect_resident()?)
    }

    pub fn as_standard_information(&self) -> Result<StandardInformation, LodestoneError> {
        StandardInformation::parse(self.expect_resident()?)
    }

    pub fn as_volume_name(&self) -> Result<String, LodestoneError> {
        Ok(units_to_string(&utf16_units(self.expect_resident()?)))
    }

    pub fn as_volume_information(&self) -> Result<VolumeInformation, LodestoneError> {
        VolumeInformation::parse(self.expect_resident()?)
    }

    pub fn as_object_id(&self) -> Result<ObjectId, LodestoneError> {
        ObjectId::parse(self.expect_resident()?)
    }

    pub fn as_reparse_point(&self) -> Result<ReparsePoint, LodestoneError> {
        ReparsePoint::parse(self.expect_resident()?)
    }

    fn expect_resident(&self) -> Result<&[u8], LodestoneError> {
        self.resident_data().ok_or_else(|| {
            LodestoneError::CorruptedAttribute(format!(
                "{} attribute is unexpectedly non-resident",
                attribute_type_name(self.attribute_type)
            ))
        })
    }
}

/// Windows FILE_ATTRIBUTE_* flag word as stored in $STANDARD_INFORMATION
/// and $FILE_NAME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FileAttributeFlags(pub u32);

impl FileAttributeFlags {
    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_READ_ONLY)
    }

    pub fn is_hidden(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_HIDDEN)
    }

    pub fn is_system(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_SYSTEM)
    }

    pub fn is_archive(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_ARCHIVE)
    }

    pub fn is_sparse(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_SPARSE_FILE)
    }

    pub fn is_reparse_point(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_REPARSE_POINT)
    }

    pub fn is_compressed(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_COMPRESSED)
    }

    pub fn is_encrypted(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_ENCRYPTED)
    }

    pub fn is_directory(&self) -> bool {
        self.contains(FILE_ATTRIBUTE_DIRECTORY) || self.contains(FILE_ATTRIBUTE_IS_DIRECTORY)
    }
}

impl fmt::Display for FileAttributeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(u32, &str)] = &[
            (FILE_ATTRIBUTE_READ_ONLY, "read-only"),
            (FILE_ATTRIBUTE_HIDDEN, "hidden"),
            (FILE_ATTRIBUTE_SYSTEM, "system"),
            (FILE_ATTRIBUTE_DIRECTORY, "directory"),
            (FILE_ATTRIBUTE_ARCHIVE, "archive"),
            (FILE_ATTRIBUTE_DEVICE, "device"),
            (FILE_ATTRIBUTE_NORMAL, "normal"),
            (FILE_ATTRIBUTE_TEMPORARY, "temporary"),
            (FILE_ATTRIBUTE_SPARSE_FILE, "sparse"),
            (FILE_ATTRIBUTE_REPARSE_POINT, "reparse-point"),
            (FILE_ATTRIBUTE_COMPRESSED, "compressed"),
            (FILE_ATTRIBUTE_OFFLINE, "offline"),
            (FILE_ATTRIBUTE_NOT_CONTENT_INDEXED, "not-indexed"),
            (FILE_ATTRIBUTE_ENCRYPTED, "encrypted"),
            (FILE_ATTRIBUTE_IS_DIRECTORY, "mft-directory"),
            (FILE_ATTRIBUTE_IS_INDEX_VIEW, "index-view"),
        ];
        let mut first = true;
        for (flag, label) in NAMES {
            if self.0 & flag != 0 {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", label)?;
                first = false;
            }
        }
        if first {
            write!(f, "(none)")?;
        }
        Ok(())
    }
}

/// Decoded $FILE_NAME attribute body.
#[derive(Debug, Clone)]
pub struct FileNameAttr {
    pub parent: MftReference,
    pub creation_time: u64,
    pub modification_time: u64,
    pub entry_modification_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attribute_flags: FileAttributeFlags,
    pub extended_data: u32,
    pub namespace: u8,
    pub name_units: Vec<u16>,
    pub name: String,
}

impl FileNameAttr {
    pub fn parse(data: &[u8]) -> Result<FileNameAttr, LodestoneError> {
        if data.len() < FILE_NAME_HEADER_SIZE {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$FILE_NAME of {} bytes",
                data.len()
            )));
        }
        let name_length = data[64] as usize;
        if FILE_NAME_HEADER_SIZE + name_length * 2 > data.len() {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$FILE_NAME declares {} name characters in {} bytes",
                name_length,
                data.len()
            )));
        }
        let name_units = utf16_units(&data[66..66 + name_length * 2]);
        Ok(FileNameAttr {
            parent: MftReference(le_u64(data)),
            creation_time: le_u64(&data[8..]),
            modification_time: le_u64(&data[16..]),
            entry_modification_time: le_u64(&data[24..]),
            access_time: le_u64(&data[32..]),
            allocated_size: le_u64(&data[40..]),
            data_size: le_u64(&data[48..]),
            file_attribute_flags: FileAttributeFlags(le_u32(&data[56..])),
            extended_data: le_u32(&data[60..]),
            namespace: data[65],
            name: units_to_string(&name_units),
            name_units,
        })
    }

    pub fn is_dos_name(&self) -> bool {
        self.namespace == FILE_NAME_NAMESPACE_DOS
    }

    pub fn creation_datetime(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.creation_time)
    }

    pub fn modification_datetime(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modification_time)
    }
}

/// Decoded $STANDARD_INFORMATION attribute body.
#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub entry_modification_time: u64,
    pub access_time: u64,
    pub file_attribute_flags: FileAttributeFlags,
    pub maximum_versions: u32,
    pub version: u32,
    pub class_identifier: u32,
    pub owner_identifier: Option<u32>,
    pub security_identifier: Option<u32>,
    pub quota_charged: Option<u64>,
    pub update_sequence_number: Option<u64>,
}

impl StandardInformation {
    pub fn parse(data: &[u8]) -> Result<StandardInformation, LodestoneError> {
        if data.len() < STANDARD_INFORMATION_SIZE_SMALL {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$STANDARD_INFORMATION of {} bytes",
                data.len()
            )));
        }
        let large = data.len() >= STANDARD_INFORMATION_SIZE_LARGE;
        Ok(StandardInformation {
            creation_time: le_u64(data),
            modification_time: le_u64(&data[8..]),
            entry_modification_time: le_u64(&data[16..]),
            access_time: le_u64(&data[24..]),
            file_attribute_flags: FileAttributeFlags(le_u32(&data[32..])),
            maximum_versions: le_u32(&data[36..]),
            version: le_u32(&data[40..]),
            class_identifier: le_u32(&data[44..]),
            owner_identifier: large.then(|| le_u32(&data[48..])),
            security_identifier: large.then(|| le_u32(&data[52..])),
            quota_charged: large.then(|| le_u64(&data[56..])),
            update_sequence_number: large.then(|| le_u64(&data[64..])),
        })
    }
}

/// Decoded $VOLUME_INFORMATION attribute body.
#[derive(Debug, Clone, Copy)]
pub struct VolumeInformation {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u16,
}

impl VolumeInformation {
    pub fn parse(data: &[u8]) -> Result<VolumeInformation, LodestoneError> {
        if data.len() < 12 {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$VOLUME_INFORMATION of {} bytes",
                data.len()
            )));
        }
        Ok(VolumeInformation {
            major_version: data[8],
            minor_version: data[9],
            flags: u16::from_le_bytes([data[10], data[11]]),
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// Decoded $OBJECT_ID attribute body. Only the object identifier itself is
/// always present; the birth identifiers are optional.
#[derive(Debug, Clone, Copy)]
pub struct ObjectId {
    pub object_id: Uuid,
    pub birth_volume_id: Option<Uuid>,
    pub birth_object_id: Option<Uuid>,
    pub birth_domain_id: Option<Uuid>,
}

impl ObjectId {
    pub fn parse(data: &[u8]) -> Result<ObjectId, LodestoneError> {
        if data.len() < 16 {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$OBJECT_ID of {} bytes",
                data.len()
            )));
        }
        let guid_at = |offset: usize| -> Option<Uuid> {
            let bytes = data.get(offset..offset + 16)?;
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Some(Uuid::from_bytes_le(raw))
        };
        let object_id = guid_at(0).ok_or_else(|| {
            LodestoneError::CorruptedAttribute("$OBJECT_ID missing identifier".to_string())
        })?;
        Ok(ObjectId {
            object_id,
            birth_volume_id: guid_at(16),
            birth_object_id: guid_at(32),
            birth_domain_id: guid_at(48),
        })
    }
}

/// Decoded $REPARSE_POINT attribute body.
#[derive(Debug, Clone)]
pub struct ReparsePoint {
    pub tag: u32,
    pub data: Vec<u8>,
}

impl ReparsePoint {
    pub fn parse(data: &[u8]) -> Result<ReparsePoint, LodestoneError> {
        if data.len() < 8 {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$REPARSE_POINT of {} bytes",
                data.len()
            )));
        }
        let tag = le_u32(data);
        let reparse_size = u16::from_le_bytes([data[4], data[5]]) as usize;
        if 8 + reparse_size > data.len() {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "$REPARSE_POINT declares {} data bytes in {}",
                reparse_size,
                data.len()
            )));
        }
        Ok(ReparsePoint {
            tag,
            data: data[8..8 + reparse_size].to_vec(),
        })
    }

    pub fn tag_name(&self) -> &'static str {
        match self.tag {
            REPARSE_TAG_MOUNT_POINT => "mount point",
            REPARSE_TAG_SYMLINK => "symbolic link",
            REPARSE_TAG_WOF => "WOF compressed",
            _ => "(unknown)",
        }
    }

    /// Substitute (target) name of a mount point or symbolic link.
    pub fn substitute_name(&self) -> Option<String> {
        self.path_name(0)
    }

    /// Print (display) name of a mount point or symbolic link.
    pub fn print_name(&self) -> Option<String> {
        self.path_name(1)
    }

    fn path_name(&self, which: usize) -> Option<String> {
        let buffer_offset = match self.tag {
            REPARSE_TAG_MOUNT_POINT => 8,
            REPARSE_TAG_SYMLINK => 12,
            _ => return None,
        };
        if self.data.len() < 8 {
            return None;
        }
        let offset = u16::from_le_bytes([self.data[which * 4], self.data[which * 4 + 1]]) as usize;
        let size = u16::from_le_bytes([self.data[which * 4 + 2], self.data[which * 4 + 3]]) as usize;
        let start = buffer_offset + offset;
        let bytes = self.data.get(start..start + size)?;
        Some(units_to_string(&utf16_units(bytes)))
    }

    /// For a WOF reparse point, the compression method name. The data path
    /// of these streams is not supported, only reported.
    pub fn wof_compression_method(&self) -> Option<&'static str> {
        if self.tag != REPARSE_TAG_WOF || self.data.len() < 16 {
            return None;
        }
        Some(match le_u32(&self.data[12..]) {
            WOF_COMPRESSION_XPRESS4K => "XPRESS4K",
            WOF_COMPRESSION_LZX => "LZX",
            WOF_COMPRESSION_XPRESS8K => "XPRESS8K",
            WOF_COMPRESSION_XPRESS16K => "XPRESS16K",
            _ => "(unknown)",
        })
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
