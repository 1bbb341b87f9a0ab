// USN change journal scanning
// `\$Extend\$UsnJrnl:$J` is a sparse stream of variable-length records.
// The scan is sequential: sparse regions are skipped wholesale, and a zero
// record length inside a mapped page advances to the next page boundary.

use crate::attributes::FileAttributeFlags;
use crate::cluster_stream::ClusterStream;
use crate::mft::MftReference;
use crate::name::{units_to_string, utf16_units};
use crate::structures::{USN_MAX_RECORD_SIZE, USN_PAGE_SIZE, USN_RECORD_HEADER_SIZE};
use crate::timestamps::filetime_to_datetime;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use lodestone_core::LodestoneError;
use log::trace;
use serde::Serialize;

// USN_REASON_* flags
pub const USN_REASON_DATA_OVERWRITE: u32 = 0x0000_0001;
pub const USN_REASON_DATA_EXTEND: u32 = 0x0000_0002;
pub const USN_REASON_DATA_TRUNCATION: u32 = 0x0000_0004;
pub const USN_REASON_NAMED_DATA_OVERWRITE: u32 = 0x0000_0010;
pub const USN_REASON_NAMED_DATA_EXTEND: u32 = 0x0000_0020;
pub const USN_REASON_NAMED_DATA_TRUNCATION: u32 = 0x0000_0040;
pub const USN_REASON_FILE_CREATE: u32 = 0x0000_0100;
pub const USN_REASON_FILE_DELETE: u32 = 0x0000_0200;
pub const USN_REASON_EA_CHANGE: u32 = 0x0000_0400;
pub const USN_REASON_SECURITY_CHANGE: u32 = 0x0000_0800;
pub const USN_REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
pub const USN_REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;
pub const USN_REASON_INDEXABLE_CHANGE: u32 = 0x0000_4000;
pub const USN_REASON_BASIC_INFO_CHANGE: u32 = 0x0000_8000;
pub const USN_REASON_HARD_LINK_CHANGE: u32 = 0x0001_0000;
pub const USN_REASON_COMPRESSION_CHANGE: u32 = 0x0002_0000;
pub const USN_REASON_ENCRYPTION_CHANGE: u32 = 0x0004_0000;
pub const USN_REASON_OBJECT_ID_CHANGE: u32 = 0x0008_0000;
pub const USN_REASON_REPARSE_POINT_CHANGE: u32 = 0x0010_0000;
pub const USN_REASON_STREAM_CHANGE: u32 = 0x0020_0000;
pub const USN_REASON_CLOSE: u32 = 0x8000_0000;

/// One USN_RECORD_V2.
#[derive(Debug, Clone, Serialize)]
pub struct UsnRecord {
    /// Byte offset of the record inside $J.
    pub offset: u64,
    pub length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    #[serde(skip)]
    pub file_reference: MftReference,
    #[serde(skip)]
    pub parent_reference: MftReference,
    pub usn: u64,
    pub timestamp: u64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attribute_flags: FileAttributeFlags,
    pub name: String,
}

impl UsnRecord {
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.timestamp)
    }

    pub fn reason_names(&self) -> Vec<&'static str> {
        const NAMES: &[(u32, &str)] = &[
            (USN_REASON_DATA_OVERWRITE, "DATA_OVERWRITE"),
            (USN_REASON_DATA_EXTEND, "DATA_EXTEND"),
            (USN_REASON_DATA_TRUNCATION, "DATA_TRUNCATION"),
            (USN_REASON_NAMED_DATA_OVERWRITE, "NAMED_DATA_OVERWRITE"),
            (USN_REASON_NAMED_DATA_EXTEND, "NAMED_DATA_EXTEND"),
            (USN_REASON_NAMED_DATA_TRUNCATION, "NAMED_DATA_TRUNCATION"),
            (USN_REASON_FILE_CREATE, "FILE_CREATE"),
            (USN_REASON_FILE_DELETE, "FILE_DELETE"),
            (USN_REASON_EA_CHANGE, "EA_CHANGE"),
            (USN_REASON_SECURITY_CHANGE, "SECURITY_CHANGE"),
            (USN_REASON_RENAME_OLD_NAME, "RENAME_OLD_NAME"),
            (USN_REASON_RENAME_NEW_NAME, "RENAME_NEW_NAME"),
            (USN_REASON_INDEXABLE_CHANGE, "INDEXABLE_CHANGE"),
            (USN_REASON_BASIC_INFO_CHANGE, "BASIC_INFO_CHANGE"),
            (USN_REASON_HARD_LINK_CHANGE, "HARD_LINK_CHANGE"),
            (USN_REASON_COMPRESSION_CHANGE, "COMPRESSION_CHANGE"),
            (USN_REASON_ENCRYPTION_CHANGE, "ENCRYPTION_CHANGE"),
            (USN_REASON_OBJECT_ID_CHANGE, "OBJECT_ID_CHANGE"),
            (USN_REASON_REPARSE_POINT_CHANGE, "REPARSE_POINT_CHANGE"),
            (USN_REASON_STREAM_CHANGE, "STREAM_CHANGE"),
            (USN_REASON_CLOSE, "CLOSE"),
        ];
        NAMES
            .iter()
            .filter(|(flag, _)| self.reason & flag != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Sequential reader over the change journal. Single-pass; re-open the
/// journal for another scan.
pub struct UsnJournal {
    stream: ClusterStream,
    position: u64,
    finished: bool,
}

impl UsnJournal {
    pub(crate) fn new(stream: ClusterStream) -> UsnJournal {
        UsnJournal {
            stream,
            position: 0,
            finished: false,
        }
    }

    /// Size of the $J stream, holes included.
    pub fn size(&self) -> u64 {
        self.stream.size()
    }

    fn parse_record(&self, buffer: &[u8], offset: u64) -> Result<UsnRecord, LodestoneError> {
        let mut cursor = std::io::Cursor::new(buffer);
        let length = cursor.read_u32::<LittleEndian>()?;
        let major_version = cursor.read_u16::<LittleEndian>()?;
        let minor_version = cursor.read_u16::<LittleEndian>()?;
        if major_version != 2 {
            return Err(LodestoneError::Unsupported(format!(
                "USN record version {}.{}",
                major_version, minor_version
            )));
        }
        let file_reference = MftReference(cursor.read_u64::<LittleEndian>()?);
        let parent_reference = MftReference(cursor.read_u64::<LittleEndian>()?);
        let usn = cursor.read_u64::<LittleEndian>()?;
        let timestamp = cursor.read_u64::<LittleEndian>()?;
        let reason = cursor.read_u32::<LittleEndian>()?;
        let source_info = cursor.read_u32::<LittleEndian>()?;
        let security_id = cursor.read_u32::<LittleEndian>()?;
        let file_attribute_flags = FileAttributeFlags(cursor.read_u32::<LittleEndian>()?);
        let name_size = cursor.read_u16::<LittleEndian>()? as usize;
        let name_offset = cursor.read_u16::<LittleEndian>()? as usize;

        if name_offset + name_size > buffer.len() {
            return Err(LodestoneError::CorruptedRecord(format!(
                "USN record at offset {}: name [{}, {}) outside its {} bytes",
                offset,
                name_offset,
                name_offset + name_size,
                buffer.len()
            )));
        }
        let name = units_to_string(&utf16_units(&buffer[name_offset..name_offset + name_size]));

        Ok(UsnRecord {
            offset,
            length,
            major_version,
            minor_version,
            file_reference,
            parent_reference,
            usn,
            timestamp,
            reason,
            source_info,
            security_id,
            file_attribute_flags,
            name,
        })
    }
}

impl Iterator for UsnJournal {
    type Item = Result<UsnRecord, LodestoneError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            // Skip sparse regions without touching them.
            self.position = match self.stream.next_mapped_offset(self.position) {
                Some(position) => position,
                None => {
                    self.finished = true;
                    return None;
                }
            };
            if self.position >= self.stream.size() {
                self.finished = true;
                return None;
            }

            let mut header = [0u8; 4];
            match self.stream.read_at(self.position, &mut header) {
                Ok(4) => {}
                Ok(_) => {
                    self.finished = true;
                    return None;
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
            let length = u32::from_le_bytes(header);

            if length == 0 {
                // End of this journal page: continue at the next boundary.
                let next_page = (self.position / USN_PAGE_SIZE + 1) * USN_PAGE_SIZE;
                trace!(
                    "USN hole at offset {}, skipping to {}",
                    self.position,
                    next_page
                );
                self.position = next_page;
                continue;
            }
            if length < USN_RECORD_HEADER_SIZE as u32
                || length > USN_MAX_RECORD_SIZE
                || length % 8 != 0
            {
                self.finished = true;
                return Some(Err(LodestoneError::CorruptedRecord(format!(
                    "USN record at offset {} with length {}",
                    self.position, length
                ))));
            }

            let offset = self.position;
            let mut buffer = vec![0u8; length as usize];
            match self.stream.read_at(offset, &mut buffer) {
                Ok(n) if n == buffer.len() => {}
                Ok(_) => {
                    self.finished = true;
                    return Some(Err(LodestoneError::CorruptedRecord(format!(
                        "USN record at offset {} truncated",
                        offset
                    ))));
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
            self.position += length as u64;

            // An unsupported record version is reported but does not end
            // the scan; the length field still advances correctly.
            return Some(self.parse_record(&buffer, offset));
        }
    }
}
