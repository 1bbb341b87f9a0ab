// NTFS on-disk structures and constants
// Raw headers are #[repr(C, packed)] and read with read_unaligned; all
// multi-byte fields are little-endian.

use static_assertions::const_assert_eq;

// Well-known MFT entry indices
pub const MFT_ENTRY_MFT: u64 = 0;
pub const MFT_ENTRY_MFT_MIRROR: u64 = 1;
pub const MFT_ENTRY_LOGFILE: u64 = 2;
pub const MFT_ENTRY_VOLUME: u64 = 3;
pub const MFT_ENTRY_ATTRIBUTE_DEFS: u64 = 4;
pub const MFT_ENTRY_ROOT: u64 = 5;
pub const MFT_ENTRY_BITMAP: u64 = 6;
pub const MFT_ENTRY_BOOT: u64 = 7;
pub const MFT_ENTRY_BAD_CLUSTERS: u64 = 8;
pub const MFT_ENTRY_SECURE: u64 = 9;
pub const MFT_ENTRY_UPCASE: u64 = 10;
pub const MFT_ENTRY_EXTEND: u64 = 11;
pub const MFT_ENTRY_FIRST_USER: u64 = 16;

// Attribute type codes
pub const ATTR_TYPE_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_TYPE_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_TYPE_FILE_NAME: u32 = 0x30;
pub const ATTR_TYPE_OBJECT_ID: u32 = 0x40;
pub const ATTR_TYPE_SECURITY_DESCRIPTOR: u32 = 0x50;
pub const ATTR_TYPE_VOLUME_NAME: u32 = 0x60;
pub const ATTR_TYPE_VOLUME_INFORMATION: u32 = 0x70;
pub const ATTR_TYPE_DATA: u32 = 0x80;
pub const ATTR_TYPE_INDEX_ROOT: u32 = 0x90;
pub const ATTR_TYPE_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_TYPE_BITMAP: u32 = 0xB0;
pub const ATTR_TYPE_REPARSE_POINT: u32 = 0xC0;
pub const ATTR_TYPE_EA_INFORMATION: u32 = 0xD0;
pub const ATTR_TYPE_EA: u32 = 0xE0;
pub const ATTR_TYPE_PROPERTY_SET: u32 = 0xF0;
pub const ATTR_TYPE_LOGGED_UTILITY_STREAM: u32 = 0x100;
pub const ATTR_TYPE_END: u32 = 0xFFFF_FFFF;

pub fn attribute_type_name(attr_type: u32) -> &'static str {
    match attr_type {
        ATTR_TYPE_STANDARD_INFORMATION => "$STANDARD_INFORMATION",
        ATTR_TYPE_ATTRIBUTE_LIST => "$ATTRIBUTE_LIST",
        ATTR_TYPE_FILE_NAME => "$FILE_NAME",
        ATTR_TYPE_OBJECT_ID => "$OBJECT_ID",
        ATTR_TYPE_SECURITY_DESCRIPTOR => "$SECURITY_DESCRIPTOR",
        ATTR_TYPE_VOLUME_NAME => "$VOLUME_NAME",
        ATTR_TYPE_VOLUME_INFORMATION => "$VOLUME_INFORMATION",
        ATTR_TYPE_DATA => "$DATA",
        ATTR_TYPE_INDEX_ROOT => "$INDEX_ROOT",
        ATTR_TYPE_INDEX_ALLOCATION => "$INDEX_ALLOCATION",
        ATTR_TYPE_BITMAP => "$BITMAP",
        ATTR_TYPE_REPARSE_POINT => "$REPARSE_POINT",
        ATTR_TYPE_EA_INFORMATION => "$EA_INFORMATION",
        ATTR_TYPE_EA => "$EA",
        ATTR_TYPE_PROPERTY_SET => "$PROPERTY_SET",
        ATTR_TYPE_LOGGED_UTILITY_STREAM => "$LOGGED_UTILITY_STREAM",
        _ => "(unknown)",
    }
}

// MFT record header flags
pub const MFT_RECORD_IN_USE: u16 = 0x0001;
pub const MFT_RECORD_HAS_INDEX: u16 = 0x0002;

// Attribute data flags
pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_COMPRESSION_MASK: u16 = 0x00FF;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

// Compression unit used when the compressed flag is set but the attribute
// header carries a zero compression unit shift (compressed, never written)
pub const DEFAULT_COMPRESSION_UNIT_CLUSTERS: u64 = 16;

// $FILE_NAME namespaces
pub const FILE_NAME_NAMESPACE_POSIX: u8 = 0;
pub const FILE_NAME_NAMESPACE_WINDOWS: u8 = 1;
pub const FILE_NAME_NAMESPACE_DOS: u8 = 2;
pub const FILE_NAME_NAMESPACE_WINDOWS_AND_DOS: u8 = 3;

// Collation orders declared by $INDEX_ROOT
pub const COLLATION_BINARY: u32 = 0x00;
pub const COLLATION_FILENAME: u32 = 0x01;
pub const COLLATION_UNICODE_STRING: u32 = 0x02;
pub const COLLATION_NTOFS_ULONG: u32 = 0x10;
pub const COLLATION_NTOFS_SID: u32 = 0x11;
pub const COLLATION_NTOFS_SECURITY_HASH: u32 = 0x12;
pub const COLLATION_NTOFS_ULONGS: u32 = 0x13;

// FILE_ATTRIBUTE_* flags (as stored in $STANDARD_INFORMATION / $FILE_NAME)
pub const FILE_ATTRIBUTE_READ_ONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x0000_0004;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
pub const FILE_ATTRIBUTE_DEVICE: u32 = 0x0000_0040;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
pub const FILE_ATTRIBUTE_TEMPORARY: u32 = 0x0000_0100;
pub const FILE_ATTRIBUTE_SPARSE_FILE: u32 = 0x0000_0200;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;
pub const FILE_ATTRIBUTE_COMPRESSED: u32 = 0x0000_0800;
pub const FILE_ATTRIBUTE_OFFLINE: u32 = 0x0000_1000;
pub const FILE_ATTRIBUTE_NOT_CONTENT_INDEXED: u32 = 0x0000_2000;
pub const FILE_ATTRIBUTE_ENCRYPTED: u32 = 0x0000_4000;
pub const FILE_ATTRIBUTE_IS_DIRECTORY: u32 = 0x1000_0000;
pub const FILE_ATTRIBUTE_IS_INDEX_VIEW: u32 = 0x2000_0000;

// Reparse point tags the parser knows how to name
pub const REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;
pub const REPARSE_TAG_WOF: u32 = 0x8000_0017;

// WOF compression methods (data path unsupported, tag is reported)
pub const WOF_COMPRESSION_XPRESS4K: u32 = 0;
pub const WOF_COMPRESSION_LZX: u32 = 1;
pub const WOF_COMPRESSION_XPRESS8K: u32 = 2;
pub const WOF_COMPRESSION_XPRESS16K: u32 = 3;

/// NTFS boot sector (VBR), first 512 bytes of the volume.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BootSectorRaw {
    pub jump: [u8; 3],
    pub oem_id: [u8; 8],            // "NTFS    "
    pub bytes_per_sector: u16,      // offset 11
    pub sectors_per_cluster: u8,    // offset 13
    pub reserved_sectors: u16,      // always 0 on NTFS
    pub unused1: [u8; 3],
    pub unused2: u16,
    pub media_descriptor: u8,
    pub unused3: u16,
    pub sectors_per_track: u16,
    pub number_of_heads: u16,
    pub hidden_sectors: u32,
    pub unused4: u32,
    pub unused5: u32,
    pub total_sectors: u64,         // offset 40
    pub mft_cluster: u64,           // offset 48
    pub mirror_mft_cluster: u64,    // offset 56
    pub mft_entry_size: i8,         // offset 64: clusters, or -shift
    pub reserved1: [u8; 3],
    pub index_entry_size: i8,       // offset 68: clusters, or -shift
    pub reserved2: [u8; 3],
    pub serial_number: u64,         // offset 72
    pub checksum: u32,
}

const_assert_eq!(std::mem::size_of::<BootSectorRaw>(), 84);

/// MFT file record header, first 48 bytes of every record.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MftRecordHeaderRaw {
    pub signature: [u8; 4],         // "FILE" or "BAAD"
    pub usa_offset: u16,            // offset 4
    pub usa_count: u16,             // offset 6
    pub journal_sequence: u64,      // offset 8 ($LogFile LSN)
    pub sequence: u16,              // offset 16
    pub link_count: u16,            // offset 18
    pub attributes_offset: u16,     // offset 20
    pub flags: u16,                 // offset 22
    pub used_size: u32,             // offset 24
    pub allocated_size: u32,        // offset 28
    pub base_record_reference: u64, // offset 32, 0 for base records
    pub next_attribute_id: u16,     // offset 40
    pub unused: u16,
    pub mft_index: u32,             // offset 44
}

const_assert_eq!(std::mem::size_of::<MftRecordHeaderRaw>(), 48);

pub const MFT_RECORD_HEADER_SIZE: usize = 48;
pub const MFT_RECORD_SIGNATURE: &[u8; 4] = b"FILE";
pub const MFT_RECORD_SIGNATURE_BAD: &[u8; 4] = b"BAAD";

/// Common 16-byte attribute header.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AttributeHeaderRaw {
    pub attribute_type: u32,
    pub size: u32,
    pub non_resident_flag: u8,
    pub name_length: u8,            // in UTF-16 code units
    pub name_offset: u16,
    pub data_flags: u16,
    pub identifier: u16,
}

const_assert_eq!(std::mem::size_of::<AttributeHeaderRaw>(), 16);

pub const ATTRIBUTE_HEADER_SIZE: usize = 16;
pub const RESIDENT_HEADER_SIZE: usize = 24;
pub const NON_RESIDENT_HEADER_SIZE: usize = 64;
pub const NON_RESIDENT_COMPRESSED_HEADER_SIZE: usize = 72;

/// Resident attribute tail, directly after the common header.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ResidentTailRaw {
    pub data_size: u32,
    pub data_offset: u16,
    pub indexed_flag: u8,
    pub padding: u8,
}

const_assert_eq!(std::mem::size_of::<ResidentTailRaw>(), 8);

/// Non-resident attribute tail, directly after the common header. The
/// trailing total_data_size u64 is present only when the compression unit
/// shift is non-zero and is read separately.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct NonResidentTailRaw {
    pub first_vcn: u64,
    pub last_vcn: u64,
    pub run_list_offset: u16,
    pub compression_unit_shift: u16,
    pub padding: u32,
    pub allocated_size: u64,
    pub data_size: u64,
    pub valid_data_size: u64,
}

const_assert_eq!(std::mem::size_of::<NonResidentTailRaw>(), 48);

/// INDX block header ($INDEX_ALLOCATION records).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndexBlockHeaderRaw {
    pub signature: [u8; 4],         // "INDX"
    pub usa_offset: u16,
    pub usa_count: u16,
    pub journal_sequence: u64,
    pub vcn: u64,                   // offset 16
}

const_assert_eq!(std::mem::size_of::<IndexBlockHeaderRaw>(), 24);

pub const INDEX_BLOCK_HEADER_SIZE: usize = 24;
pub const INDEX_BLOCK_SIGNATURE: &[u8; 4] = b"INDX";

/// Index node header, shared by the $INDEX_ROOT inline node and INDX blocks.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndexNodeHeaderRaw {
    pub values_offset: u32,         // relative to this header
    pub size: u32,                  // used bytes including this header
    pub allocated_size: u32,
    pub flags: u32,
}

const_assert_eq!(std::mem::size_of::<IndexNodeHeaderRaw>(), 16);

pub const INDEX_NODE_HEADER_SIZE: usize = 16;
pub const INDEX_NODE_HAS_BRANCH: u32 = 0x01;

/// $INDEX_ROOT attribute body header, followed by the inline node.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndexRootHeaderRaw {
    pub attribute_type: u32,        // type of the indexed key records
    pub collation_type: u32,
    pub index_entry_size: u32,      // bytes per INDX block
    pub blocks_per_entry: u8,       // clusters (or 512-byte units) per block
    pub reserved: [u8; 3],
}

const_assert_eq!(std::mem::size_of::<IndexRootHeaderRaw>(), 16);

pub const INDEX_ROOT_HEADER_SIZE: usize = 16;

// Index value flags
pub const INDEX_VALUE_HAS_SUB_NODE: u16 = 0x01;
pub const INDEX_VALUE_IS_LAST: u16 = 0x02;

pub const INDEX_VALUE_HEADER_SIZE: usize = 16;

// $FILE_NAME body offsets (after which the UTF-16 name follows at 66)
pub const FILE_NAME_HEADER_SIZE: usize = 66;

// $STANDARD_INFORMATION sizes: NTFS 1.x records are 48 bytes, 3.x adds
// owner/security/quota/usn for 72
pub const STANDARD_INFORMATION_SIZE_SMALL: usize = 48;
pub const STANDARD_INFORMATION_SIZE_LARGE: usize = 72;

// $ATTRIBUTE_LIST entry: fixed header before the UTF-16 name at offset 26
pub const ATTRIBUTE_LIST_ENTRY_HEADER_SIZE: usize = 26;

// USN change journal
pub const USN_RECORD_HEADER_SIZE: usize = 60;
pub const USN_PAGE_SIZE: u64 = 4096;
pub const USN_MAX_RECORD_SIZE: u32 = 4096;
