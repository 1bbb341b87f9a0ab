// Synthetic NTFS volume builder for the end-to-end tests.
// Produces a complete 8 MiB image: boot sector, fixed-up MFT records,
// directory indexes (resident roots and one INDX-backed root), sparse and
// LZNT1-compressed streams, an attribute-list split file, and a USN
// journal under \$Extend.

#![allow(dead_code)]

pub const BYTES_PER_SECTOR: usize = 512;
pub const CLUSTER_SIZE: u64 = 4096;
pub const MFT_ENTRY_SIZE: usize = 1024;
pub const MFT_CLUSTER: u64 = 4;
pub const TOTAL_SECTORS: u64 = 16384; // 8 MiB
pub const MFT_ENTRY_COUNT: usize = 64;
pub const VOLUME_SERIAL: u64 = 0xC0FF_EE00_1234_5678;
pub const VOLUME_LABEL: &str = "LODESTONE";

// A fixed timestamp: 2023-01-01T00:00:00Z in FILETIME ticks.
pub const TEST_FILETIME: u64 = 133_170_048_000_000_000;

// Attribute type codes used by the builder.
const ATTR_STANDARD_INFORMATION: u32 = 0x10;
const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
const ATTR_FILE_NAME: u32 = 0x30;
const ATTR_VOLUME_NAME: u32 = 0x60;
const ATTR_VOLUME_INFORMATION: u32 = 0x70;
const ATTR_DATA: u32 = 0x80;
const ATTR_INDEX_ROOT: u32 = 0x90;
const ATTR_INDEX_ALLOCATION: u32 = 0xA0;
const ATTR_BITMAP: u32 = 0xB0;
const ATTR_END: u32 = 0xFFFF_FFFF;

const RECORD_IN_USE: u16 = 0x01;
const RECORD_HAS_INDEX: u16 = 0x02;

const VALUE_HAS_SUB_NODE: u16 = 0x01;
const VALUE_IS_LAST: u16 = 0x02;

pub struct VolumeBuilder {
    image: Vec<u8>,
    next_free_cluster: u64,
    records: Vec<Option<Vec<u8>>>,
}

impl VolumeBuilder {
    pub fn new() -> VolumeBuilder {
        VolumeBuilder {
            image: vec![0u8; (TOTAL_SECTORS as usize) * BYTES_PER_SECTOR],
            next_free_cluster: 64,
            records: vec![None; MFT_ENTRY_COUNT],
        }
    }

    /// Claim a run of clusters and return its first LCN.
    pub fn alloc(&mut self, clusters: u64) -> u64 {
        let lcn = self.next_free_cluster;
        self.next_free_cluster += clusters;
        lcn
    }

    pub fn write_at_cluster(&mut self, lcn: u64, data: &[u8]) {
        let at = (lcn * CLUSTER_SIZE) as usize;
        self.image[at..at + data.len()].copy_from_slice(data);
    }

    pub fn set_record(&mut self, index: usize, record: Vec<u8>) {
        assert_eq!(record.len(), MFT_ENTRY_SIZE);
        self.records[index] = Some(record);
    }

    /// Assemble the final image.
    pub fn build(mut self) -> Vec<u8> {
        let boot = build_boot_sector();
        self.image[..512].copy_from_slice(&boot);

        let mft_offset = (MFT_CLUSTER * CLUSTER_SIZE) as usize;
        for (index, record) in self.records.iter().enumerate() {
            if let Some(record) = record {
                let at = mft_offset + index * MFT_ENTRY_SIZE;
                self.image[at..at + MFT_ENTRY_SIZE].copy_from_slice(record);
            }
        }
        self.image
    }
}

pub fn build_boot_sector() -> Vec<u8> {
    let mut out = vec![0u8; 512];
    out[3..11].copy_from_slice(b"NTFS    ");
    out[11..13].copy_from_slice(&(BYTES_PER_SECTOR as u16).to_le_bytes());
    out[13] = (CLUSTER_SIZE as usize / BYTES_PER_SECTOR) as u8;
    out[21] = 0xF8;
    out[40..48].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
    out[48..56].copy_from_slice(&MFT_CLUSTER.to_le_bytes());
    out[56..64].copy_from_slice(&2u64.to_le_bytes());
    out[64] = (-10i8) as u8; // 1024-byte MFT entries
    out[68] = 1; // one cluster per index block
    out[72..80].copy_from_slice(&VOLUME_SERIAL.to_le_bytes());
    out[510] = 0x55;
    out[511] = 0xAA;
    out
}

/// Fixed-size MFT record with a valid update sequence array.
pub fn build_record(
    index: u64,
    sequence: u16,
    flags: u16,
    base_reference: u64,
    attributes: &[Vec<u8>],
) -> Vec<u8> {
    let attributes_offset = 56usize;
    let mut body = vec![0u8; attributes_offset];
    for attribute in attributes {
        body.extend_from_slice(attribute);
    }
    body.extend_from_slice(&ATTR_END.to_le_bytes());
    let used_size = body.len() as u32;
    assert!(
        body.len() <= MFT_ENTRY_SIZE,
        "record {} overflows: {} bytes",
        index,
        body.len()
    );
    body.resize(MFT_ENTRY_SIZE, 0);

    body[0..4].copy_from_slice(b"FILE");
    body[4..6].copy_from_slice(&48u16.to_le_bytes()); // usa offset
    body[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa count
    body[16..18].copy_from_slice(&sequence.to_le_bytes());
    body[18..20].copy_from_slice(&1u16.to_le_bytes()); // link count
    body[20..22].copy_from_slice(&(attributes_offset as u16).to_le_bytes());
    body[22..24].copy_from_slice(&flags.to_le_bytes());
    body[24..28].copy_from_slice(&used_size.to_le_bytes());
    body[28..32].copy_from_slice(&(MFT_ENTRY_SIZE as u32).to_le_bytes());
    body[32..40].copy_from_slice(&base_reference.to_le_bytes());
    body[40..42].copy_from_slice(&7u16.to_le_bytes());
    body[44..48].copy_from_slice(&(index as u32).to_le_bytes());

    // Install the fix-up.
    let usn = 0x0101u16;
    body[48..50].copy_from_slice(&usn.to_le_bytes());
    let tail_one = [body[510], body[511]];
    let tail_two = [body[1022], body[1023]];
    body[50..52].copy_from_slice(&tail_one);
    body[52..54].copy_from_slice(&tail_two);
    body[510..512].copy_from_slice(&usn.to_le_bytes());
    body[1022..1024].copy_from_slice(&usn.to_le_bytes());
    body
}

pub fn mft_reference(index: u64, sequence: u16) -> u64 {
    (index & 0x0000_FFFF_FFFF_FFFF) | ((sequence as u64) << 48)
}

/// Resident attribute encoder.
pub fn resident_attribute(
    attribute_type: u32,
    name: Option<&str>,
    identifier: u16,
    payload: &[u8],
) -> Vec<u8> {
    let name_units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
    let name_offset = 24usize;
    let data_offset = name_offset + name_units.len() * 2;
    let size = (data_offset + payload.len() + 7) & !7;

    let mut out = vec![0u8; size];
    out[0..4].copy_from_slice(&attribute_type.to_le_bytes());
    out[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    out[14..16].copy_from_slice(&identifier.to_le_bytes());
    out[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out[20..22].copy_from_slice(&(data_offset as u16).to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        out[name_offset + i * 2..name_offset + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[data_offset..data_offset + payload.len()].copy_from_slice(payload);
    out
}

/// Non-resident attribute encoder. `runs` pairs (lcn, length); None = hole.
#[allow(clippy::too_many_arguments)]
pub fn non_resident_attribute(
    attribute_type: u32,
    name: Option<&str>,
    identifier: u16,
    data_flags: u16,
    vcn_range: (u64, u64),
    sizes: (u64, u64, u64), // allocated, data, valid
    compression_unit_shift: u16,
    total_data_size: Option<u64>,
    runs: &[(Option<u64>, u64)],
) -> Vec<u8> {
    let name_units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
    let header_size = if compression_unit_shift != 0 { 72 } else { 64 };
    let name_offset = header_size;
    let run_offset = name_offset + name_units.len() * 2;
    let run_list = encode_runs(runs);
    let size = (run_offset + run_list.len() + 7) & !7;

    let mut out = vec![0u8; size];
    out[0..4].copy_from_slice(&attribute_type.to_le_bytes());
    out[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    out[8] = 1;
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    out[12..14].copy_from_slice(&data_flags.to_le_bytes());
    out[14..16].copy_from_slice(&identifier.to_le_bytes());
    out[16..24].copy_from_slice(&vcn_range.0.to_le_bytes());
    out[24..32].copy_from_slice(&vcn_range.1.to_le_bytes());
    out[32..34].copy_from_slice(&(run_offset as u16).to_le_bytes());
    out[34..36].copy_from_slice(&compression_unit_shift.to_le_bytes());
    out[40..48].copy_from_slice(&sizes.0.to_le_bytes());
    out[48..56].copy_from_slice(&sizes.1.to_le_bytes());
    out[56..64].copy_from_slice(&sizes.2.to_le_bytes());
    if compression_unit_shift != 0 {
        out[64..72].copy_from_slice(&total_data_size.unwrap_or(sizes.0).to_le_bytes());
    }
    for (i, unit) in name_units.iter().enumerate() {
        out[name_offset + i * 2..name_offset + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[run_offset..run_offset + run_list.len()].copy_from_slice(&run_list);
    out
}

fn encode_runs(runs: &[(Option<u64>, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous = 0i64;
    for (lcn, length) in runs {
        let length_bytes = unsigned_width(*length);
        match lcn {
            None => {
                out.push(length_bytes as u8);
                out.extend_from_slice(&length.to_le_bytes()[..length_bytes]);
            }
            Some(lcn) => {
                let delta = *lcn as i64 - previous;
                previous = *lcn as i64;
                let offset_bytes = signed_width(delta);
                out.push(((offset_bytes as u8) << 4) | length_bytes as u8);
                out.extend_from_slice(&length.to_le_bytes()[..length_bytes]);
                out.extend_from_slice(&delta.to_le_bytes()[..offset_bytes]);
            }
        }
    }
    out.push(0);
    out
}

fn unsigned_width(value: u64) -> usize {
    (((64 - value.leading_zeros() as usize) + 7) / 8).max(1)
}

fn signed_width(value: i64) -> usize {
    for width in 1..8 {
        let bits = width * 8;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value >= min && value <= max {
            return width;
        }
    }
    8
}

/// $STANDARD_INFORMATION payload (the 72-byte NTFS 3.x form).
pub fn standard_information(flags: u32) -> Vec<u8> {
    let mut out = vec![0u8; 72];
    for at in [0usize, 8, 16, 24] {
        out[at..at + 8].copy_from_slice(&TEST_FILETIME.to_le_bytes());
    }
    out[32..36].copy_from_slice(&flags.to_le_bytes());
    out[52..56].copy_from_slice(&0x100u32.to_le_bytes()); // security id
    out
}

/// $FILE_NAME payload.
pub fn file_name_payload(
    parent_reference: u64,
    name: &str,
    namespace: u8,
    flags: u32,
    data_size: u64,
) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut out = vec![0u8; 66];
    out[0..8].copy_from_slice(&parent_reference.to_le_bytes());
    for at in [8usize, 16, 24, 32] {
        out[at..at + 8].copy_from_slice(&TEST_FILETIME.to_le_bytes());
    }
    out[40..48].copy_from_slice(&data_size.to_le_bytes());
    out[48..56].copy_from_slice(&data_size.to_le_bytes());
    out[56..60].copy_from_slice(&flags.to_le_bytes());
    out[64] = units.len() as u8;
    out[65] = namespace;
    for unit in &units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// One $I30 index value whose key is a $FILE_NAME payload.
pub fn index_value_for(reference: u64, key: &[u8], flags: u16, sub_node: Option<u64>) -> Vec<u8> {
    let mut entry_size = 16 + key.len();
    entry_size = (entry_size + 7) & !7;
    if sub_node.is_some() {
        entry_size += 8;
    }
    let mut out = vec![0u8; entry_size];
    out[0..8].copy_from_slice(&reference.to_le_bytes());
    out[8..10].copy_from_slice(&(entry_size as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(key.len() as u16).to_le_bytes());
    let mut value_flags = flags;
    if sub_node.is_some() {
        value_flags |= VALUE_HAS_SUB_NODE;
    }
    out[12..14].copy_from_slice(&value_flags.to_le_bytes());
    out[16..16 + key.len()].copy_from_slice(key);
    if let Some(vcn) = sub_node {
        let at = entry_size - 8;
        out[at..].copy_from_slice(&vcn.to_le_bytes());
    }
    out
}

fn sentinel_value(sub_node: Option<u64>) -> Vec<u8> {
    index_value_for(0, &[], VALUE_IS_LAST, sub_node)
}

/// A directory child for index building.
pub struct Child {
    pub reference: u64,
    pub name: String,
    pub namespace: u8,
    pub flags: u32,
    pub size: u64,
}

impl Child {
    pub fn new(reference: u64, name: &str) -> Child {
        Child {
            reference,
            name: name.to_string(),
            namespace: 1,
            flags: 0x20,
            size: 0,
        }
    }

    pub fn directory(mut self) -> Child {
        self.flags = 0x1000_0010;
        self
    }

    fn key(&self, parent_reference: u64) -> Vec<u8> {
        file_name_payload(
            parent_reference,
            &self.name,
            self.namespace,
            self.flags,
            self.size,
        )
    }
}

fn sort_children(children: &mut [Child]) {
    children.sort_by_key(|c| c.name.to_uppercase().encode_utf16().collect::<Vec<u16>>());
}

/// Resident $INDEX_ROOT over $FILE_NAME keys, children sorted.
pub fn index_root_resident(parent_reference: u64, mut children: Vec<Child>) -> Vec<u8> {
    sort_children(&mut children);
    let mut values: Vec<Vec<u8>> = children
        .iter()
        .map(|child| index_value_for(child.reference, &child.key(parent_reference), 0, None))
        .collect();
    values.push(sentinel_value(None));
    index_root_from_values(&values, 0)
}

/// Branched $INDEX_ROOT whose sentinel points at INDX block VCN 0.
pub fn index_root_branched() -> Vec<u8> {
    let values = vec![sentinel_value(Some(0))];
    index_root_from_values(&values, 1)
}

fn index_root_from_values(values: &[Vec<u8>], node_flags: u32) -> Vec<u8> {
    let body_len: usize = values.iter().map(|v| v.len()).sum();
    let node_size = 16 + body_len;

    let mut out = Vec::new();
    out.extend_from_slice(&ATTR_FILE_NAME.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // filename collation
    out.extend_from_slice(&(CLUSTER_SIZE as u32).to_le_bytes());
    out.push(1);
    out.extend_from_slice(&[0u8; 3]);
    // Node header.
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&(node_size as u32).to_le_bytes());
    out.extend_from_slice(&(node_size as u32).to_le_bytes());
    out.extend_from_slice(&node_flags.to_le_bytes());
    for value in values {
        out.extend_from_slice(value);
    }
    out
}

/// One INDX block (a leaf) holding the sorted children of a directory.
pub fn indx_block(vcn: u64, parent_reference: u64, mut children: Vec<Child>) -> Vec<u8> {
    sort_children(&mut children);
    let mut values: Vec<Vec<u8>> = children
        .iter()
        .map(|child| index_value_for(child.reference, &child.key(parent_reference), 0, None))
        .collect();
    values.push(sentinel_value(None));

    let block_size = CLUSTER_SIZE as usize;
    let sectors = block_size / BYTES_PER_SECTOR;
    let usa_count = sectors + 1;
    let values_offset = (40 + 2 * usa_count - 24 + 7) & !7;

    let mut out = vec![0u8; block_size];
    out[0..4].copy_from_slice(b"INDX");
    out[4..6].copy_from_slice(&40u16.to_le_bytes());
    out[6..8].copy_from_slice(&(usa_count as u16).to_le_bytes());
    out[16..24].copy_from_slice(&vcn.to_le_bytes());

    let body_len: usize = values.iter().map(|v| v.len()).sum();
    let node_size = values_offset + body_len;
    out[24..28].copy_from_slice(&(values_offset as u32).to_le_bytes());
    out[28..32].copy_from_slice(&(node_size as u32).to_le_bytes());
    out[32..36].copy_from_slice(&((block_size - 24) as u32).to_le_bytes());
    out[36..40].copy_from_slice(&0u32.to_le_bytes());

    let mut at = 24 + values_offset;
    for value in &values {
        out[at..at + value.len()].copy_from_slice(value);
        at += value.len();
    }

    let usn = 0x0202u16;
    out[40..42].copy_from_slice(&usn.to_le_bytes());
    for sector in 0..sectors {
        let tail = (sector + 1) * BYTES_PER_SECTOR - 2;
        let entry = 42 + sector * 2;
        let saved = [out[tail], out[tail + 1]];
        out[entry..entry + 2].copy_from_slice(&saved);
        out[tail..tail + 2].copy_from_slice(&usn.to_le_bytes());
    }
    out
}

/// LZNT1 unit that decompresses to 64 KiB of `byte`.
pub fn lznt1_unit_of(byte: u8) -> Vec<u8> {
    let mut out = Vec::new();
    for _ in 0..16 {
        out.extend_from_slice(&0xB003u16.to_le_bytes());
        out.push(0x02); // literal then phrase
        out.push(byte);
        out.extend_from_slice(&4092u16.to_le_bytes()); // offset 1, length 4095
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// One USN_RECORD_V2.
pub fn usn_record(usn: u64, file_reference: u64, parent_reference: u64, reason: u32, name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let name_size = units.len() * 2;
    let length = (60 + name_size + 7) & !7;

    let mut out = vec![0u8; length];
    out[0..4].copy_from_slice(&(length as u32).to_le_bytes());
    out[4..6].copy_from_slice(&2u16.to_le_bytes());
    out[8..16].copy_from_slice(&file_reference.to_le_bytes());
    out[16..24].copy_from_slice(&parent_reference.to_le_bytes());
    out[24..32].copy_from_slice(&usn.to_le_bytes());
    out[32..40].copy_from_slice(&TEST_FILETIME.to_le_bytes());
    out[40..44].copy_from_slice(&reason.to_le_bytes());
    out[52..56].copy_from_slice(&0x20u32.to_le_bytes());
    out[56..58].copy_from_slice(&(name_size as u16).to_le_bytes());
    out[58..60].copy_from_slice(&60u16.to_le_bytes());
    for (i, unit) in units.iter().enumerate() {
        out[60 + i * 2..60 + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}

/// The standard test volume. Layout:
///
/// | MFT | name             | shape |
/// |-----|------------------|-------|
/// | 0   | $MFT             | 16-cluster non-resident $DATA |
/// | 3   | $Volume          | label + NTFS 3.1 |
/// | 5   | . (root)         | INDX-backed $I30 |
/// | 10  | $UpCase          | 128 KiB ASCII fold table |
/// | 11  | $Extend          | resident $I30, holds $UsnJrnl |
/// | 37  | docs             | resident $I30 |
/// | 41  | HELLO.TXT        | resident "Hello, NTFS!\n" |
/// | 42  | sparse.bin       | 1 MiB logical, first 64 KiB mapped |
/// | 43  | comp.bin         | 128 KiB, unit 0 LZNT1, unit 1 sparse |
/// | 44  | NOTES            | 5-byte default data + 9-byte :metadata |
/// | 45  | link.txt         | hard link, also docs\mirror.txt |
/// | 46  | $UsnJrnl         | sparse $J with three records |
/// | 47  | split.bin        | $ATTRIBUTE_LIST, $DATA in entry 48 |
/// | 48  | (extension)      | holds split.bin's $DATA |
/// | 49  | long name document.txt | in docs, exercises 8.3 lookup |
pub fn build_standard_volume() -> Vec<u8> {
    let mut builder = VolumeBuilder::new();

    let root_ref = mft_reference(5, 5);
    let extend_ref = mft_reference(11, 1);
    let docs_ref = mft_reference(37, 1);

    // --- record 0: $MFT ---
    builder.set_record(
        0,
        build_record(
            0,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x06)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "$MFT", 3, 0x06, 0),
                ),
                non_resident_attribute(
                    ATTR_DATA,
                    None,
                    1,
                    0,
                    (0, 15),
                    (16 * CLUSTER_SIZE, 16 * CLUSTER_SIZE, 16 * CLUSTER_SIZE),
                    0,
                    None,
                    &[(Some(MFT_CLUSTER), 16)],
                ),
            ],
        ),
    );

    // --- record 3: $Volume ---
    let label_units: Vec<u8> = VOLUME_LABEL
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    let volume_information = {
        let mut out = vec![0u8; 12];
        out[8] = 3; // major
        out[9] = 1; // minor
        out
    };
    builder.set_record(
        3,
        build_record(
            3,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x06)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "$Volume", 3, 0x06, 0),
                ),
                resident_attribute(ATTR_VOLUME_NAME, None, 3, &label_units),
                resident_attribute(ATTR_VOLUME_INFORMATION, None, 4, &volume_information),
            ],
        ),
    );

    // --- record 10: $UpCase (ASCII fold, identity elsewhere) ---
    let upcase_clusters = 32u64; // 128 KiB
    let upcase_lcn = builder.alloc(upcase_clusters);
    let mut upcase_table = Vec::with_capacity(0x20000);
    for unit in 0u32..0x10000 {
        let folded = if (0x61..=0x7A).contains(&unit) {
            unit - 0x20
        } else {
            unit
        } as u16;
        upcase_table.extend_from_slice(&folded.to_le_bytes());
    }
    builder.write_at_cluster(upcase_lcn, &upcase_table);
    builder.set_record(
        10,
        build_record(
            10,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x06)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "$UpCase", 3, 0x06, 0x20000),
                ),
                non_resident_attribute(
                    ATTR_DATA,
                    None,
                    1,
                    0,
                    (0, upcase_clusters - 1),
                    (0x20000, 0x20000, 0x20000),
                    0,
                    None,
                    &[(Some(upcase_lcn), upcase_clusters)],
                ),
            ],
        ),
    );

    // --- record 41: HELLO.TXT ---
    builder.set_record(
        41,
        build_record(
            41,
            3,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x20)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "HELLO.TXT", 3, 0x20, 13),
                ),
                resident_attribute(ATTR_DATA, None, 1, b"Hello, NTFS!\n"),
            ],
        ),
    );

    // --- record 42: sparse.bin, 1 MiB logical, first 64 KiB mapped ---
    let sparse_lcn = builder.alloc(16);
    let mut sparse_head = vec![0u8; 16 * CLUSTER_SIZE as usize];
    for (i, byte) in sparse_head.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    builder.write_at_cluster(sparse_lcn, &sparse_head);
    builder.set_record(
        42,
        build_record(
            42,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(
                    ATTR_STANDARD_INFORMATION,
                    None,
                    0,
                    &standard_information(0x220),
                ),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "sparse.bin", 3, 0x220, 1 << 20),
                ),
                non_resident_attribute(
                    ATTR_DATA,
                    None,
                    1,
                    0x8000, // sparse
                    (0, 255),
                    (256 * CLUSTER_SIZE, 1 << 20, 1 << 20),
                    0,
                    None,
                    &[(Some(sparse_lcn), 16), (None, 240)],
                ),
            ],
        ),
    );

    // --- record 43: comp.bin, two 64 KiB units ---
    let comp_lcn = builder.alloc(1);
    let comp_unit = lznt1_unit_of(b'A');
    builder.write_at_cluster(comp_lcn, &comp_unit);
    builder.set_record(
        43,
        build_record(
            43,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(
                    ATTR_STANDARD_INFORMATION,
                    None,
                    0,
                    &standard_information(0x820),
                ),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "comp.bin", 3, 0x820, 1 << 17),
                ),
                non_resident_attribute(
                    ATTR_DATA,
                    None,
                    1,
                    0x0001, // compressed
                    (0, 31),
                    (32 * CLUSTER_SIZE, 1 << 17, 1 << 17),
                    4, // 16-cluster units
                    Some(CLUSTER_SIZE),
                    &[(Some(comp_lcn), 1), (None, 15), (None, 16)],
                ),
            ],
        ),
    );

    // --- record 44: NOTES with an alternate data stream ---
    builder.set_record(
        44,
        build_record(
            44,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x20)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "NOTES", 3, 0x20, 5),
                ),
                resident_attribute(ATTR_DATA, None, 1, b"notes"),
                resident_attribute(ATTR_DATA, Some("metadata"), 3, b"ads bytes"),
            ],
        ),
    );

    // --- record 45: link.txt, hard-linked as docs\mirror.txt ---
    builder.set_record(
        45,
        build_record(
            45,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x20)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "link.txt", 3, 0x20, 6),
                ),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    3,
                    &file_name_payload(docs_ref, "mirror.txt", 3, 0x20, 6),
                ),
                resident_attribute(ATTR_DATA, None, 1, b"linked"),
            ],
        ),
    );

    // --- record 46: $UsnJrnl with a sparse leading page ---
    let usn_lcn = builder.alloc(1);
    let mut usn_page = Vec::new();
    usn_page.extend_from_slice(&usn_record(4096, mft_reference(41, 3), root_ref, 0x100, "HELLO.TXT"));
    usn_page.extend_from_slice(&usn_record(
        4200,
        mft_reference(44, 1),
        root_ref,
        0x2 | 0x8000_0000,
        "NOTES",
    ));
    usn_page.extend_from_slice(&usn_record(
        4360,
        mft_reference(45, 1),
        docs_ref,
        0x1000,
        "mirror.txt",
    ));
    builder.write_at_cluster(usn_lcn, &usn_page);
    builder.set_record(
        46,
        build_record(
            46,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x26)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(extend_ref, "$UsnJrnl", 3, 0x26, 8192),
                ),
                non_resident_attribute(
                    ATTR_DATA,
                    Some("$J"),
                    1,
                    0x8000,
                    (0, 1),
                    (2 * CLUSTER_SIZE, 8192, 8192),
                    0,
                    None,
                    &[(None, 1), (Some(usn_lcn), 1)],
                ),
            ],
        ),
    );

    // --- records 47/48: split.bin via $ATTRIBUTE_LIST ---
    let split_lcn = builder.alloc(1);
    builder.write_at_cluster(split_lcn, b"split data lives in an extension record\n");
    let split_base_ref = mft_reference(47, 2);
    let attribute_list = {
        let mut out = Vec::new();
        out.extend_from_slice(&attribute_list_entry(
            ATTR_STANDARD_INFORMATION,
            None,
            0,
            split_base_ref,
            0,
        ));
        out.extend_from_slice(&attribute_list_entry(ATTR_FILE_NAME, None, 0, split_base_ref, 2));
        out.extend_from_slice(&attribute_list_entry(
            ATTR_DATA,
            None,
            0,
            mft_reference(48, 1),
            1,
        ));
        out
    };
    builder.set_record(
        47,
        build_record(
            47,
            2,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x20)),
                resident_attribute(ATTR_ATTRIBUTE_LIST, None, 5, &attribute_list),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "split.bin", 3, 0x20, 40),
                ),
            ],
        ),
    );
    builder.set_record(
        48,
        build_record(
            48,
            1,
            RECORD_IN_USE,
            split_base_ref,
            &[non_resident_attribute(
                ATTR_DATA,
                None,
                1,
                0,
                (0, 0),
                (CLUSTER_SIZE, 40, 40),
                0,
                None,
                &[(Some(split_lcn), 1)],
            )],
        ),
    );

    // --- record 49: a long name for 8.3 lookups ---
    builder.set_record(
        49,
        build_record(
            49,
            1,
            RECORD_IN_USE,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x20)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(docs_ref, "long name document.txt", 1, 0x20, 4),
                ),
                resident_attribute(ATTR_DATA, None, 1, b"long"),
            ],
        ),
    );

    // --- record 37: docs directory (resident index) ---
    let docs_children = vec![
        {
            let mut child = Child::new(mft_reference(45, 1), "mirror.txt");
            child.size = 6;
            child
        },
        {
            let mut child = Child::new(mft_reference(49, 1), "long name document.txt");
            child.size = 4;
            child
        },
    ];
    builder.set_record(
        37,
        build_record(
            37,
            1,
            RECORD_IN_USE | RECORD_HAS_INDEX,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x10)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "docs", 3, 0x1000_0010, 0),
                ),
                resident_attribute(
                    ATTR_INDEX_ROOT,
                    Some("$I30"),
                    3,
                    &index_root_resident(docs_ref, docs_children),
                ),
            ],
        ),
    );

    // --- record 11: $Extend directory ---
    builder.set_record(
        11,
        build_record(
            11,
            1,
            RECORD_IN_USE | RECORD_HAS_INDEX,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x16)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, "$Extend", 3, 0x16, 0),
                ),
                resident_attribute(
                    ATTR_INDEX_ROOT,
                    Some("$I30"),
                    3,
                    &index_root_resident(
                        extend_ref,
                        vec![Child::new(mft_reference(46, 1), "$UsnJrnl")],
                    ),
                ),
            ],
        ),
    );

    // --- record 5: root directory, INDX-backed ---
    let root_children = vec![
        Child::new(extend_ref, "$Extend").directory(),
        Child::new(mft_reference(0, 1), "$MFT"),
        Child::new(mft_reference(10, 1), "$UpCase"),
        Child::new(mft_reference(3, 1), "$Volume"),
        {
            let mut child = Child::new(mft_reference(43, 1), "comp.bin");
            child.size = 1 << 17;
            child
        },
        Child::new(docs_ref, "docs").directory(),
        {
            let mut child = Child::new(mft_reference(41, 3), "HELLO.TXT");
            child.size = 13;
            child
        },
        {
            let mut child = Child::new(mft_reference(45, 1), "link.txt");
            child.size = 6;
            child
        },
        {
            let mut child = Child::new(mft_reference(44, 1), "NOTES");
            child.size = 5;
            child
        },
        {
            let mut child = Child::new(mft_reference(42, 1), "sparse.bin");
            child.size = 1 << 20;
            child
        },
        {
            let mut child = Child::new(mft_reference(47, 2), "split.bin");
            child.size = 40;
            child
        },
    ];
    let root_indx_lcn = builder.alloc(1);
    let root_block = indx_block(0, root_ref, root_children);
    builder.write_at_cluster(root_indx_lcn, &root_block);

    builder.set_record(
        5,
        build_record(
            5,
            5,
            RECORD_IN_USE | RECORD_HAS_INDEX,
            0,
            &[
                resident_attribute(ATTR_STANDARD_INFORMATION, None, 0, &standard_information(0x16)),
                resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    2,
                    &file_name_payload(root_ref, ".", 3, 0x1000_0016, 0),
                ),
                resident_attribute(ATTR_INDEX_ROOT, Some("$I30"), 3, &index_root_branched()),
                non_resident_attribute(
                    ATTR_INDEX_ALLOCATION,
                    Some("$I30"),
                    4,
                    0,
                    (0, 0),
                    (CLUSTER_SIZE, CLUSTER_SIZE, CLUSTER_SIZE),
                    0,
                    None,
                    &[(Some(root_indx_lcn), 1)],
                ),
                resident_attribute(ATTR_BITMAP, Some("$I30"), 5, &[0x01, 0, 0, 0, 0, 0, 0, 0]),
            ],
        ),
    );

    builder.build()
}

fn attribute_list_entry(
    attribute_type: u32,
    name: Option<&str>,
    first_vcn: u64,
    reference: u64,
    identifier: u16,
) -> Vec<u8> {
    let name_units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
    let size = (26 + name_units.len() * 2 + 7) & !7;
    let mut out = vec![0u8; size];
    out[0..4].copy_from_slice(&attribute_type.to_le_bytes());
    out[4..6].copy_from_slice(&(size as u16).to_le_bytes());
    out[6] = name_units.len() as u8;
    out[7] = 26;
    out[8..16].copy_from_slice(&first_vcn.to_le_bytes());
    out[16..24].copy_from_slice(&reference.to_le_bytes());
    out[24..26].copy_from_slice(&identifier.to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        out[26 + i * 2..26 + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}
