// MFT file record parsing
// A record is a fixed-size multi-sector structure: header, update sequence
// array, then a run of attributes ending at the 0xFFFFFFFF sentinel.

use crate::attributes::MftAttribute;
use crate::fixup::apply_fixup;
use crate::structures::*;
use lodestone_core::LodestoneError;
use log::{trace, warn};
use std::fmt;

/// 64-bit file reference: low 48 bits are the MFT index, high 16 bits the
/// sequence number of the expected incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MftReference(pub u64);

impl MftReference {
    pub fn new(index: u64, sequence: u16) -> MftReference {
        MftReference((index & 0x0000_FFFF_FFFF_FFFF) | ((sequence as u64) << 48))
    }

    pub fn index(&self) -> u64 {
        self.0 & 0x0000_FFFF_FFFF_FFFF
    }

    pub fn sequence(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MftReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.index(), self.sequence())
    }
}

/// One parsed MFT record.
#[derive(Debug)]
pub struct MftRecord {
    pub index: u64,
    pub sequence: u16,
    pub journal_sequence: u64,
    pub link_count: u16,
    pub flags: u16,
    pub used_size: u32,
    pub allocated_size: u32,
    pub base_record_reference: MftReference,
    pub next_attribute_id: u16,
    /// Signature was BAAD: header metadata is exposed, attributes are not.
    pub is_corrupt: bool,
    /// Record carries no attributes (freshly initialised slot).
    pub is_empty: bool,
    pub attributes: Vec<MftAttribute>,
}

impl MftRecord {
    /// Parse one MFT record. `buffer` must be exactly the record size; the
    /// fix-up is applied in place.
    pub fn parse(
        buffer: &mut [u8],
        index: u64,
        bytes_per_sector: usize,
        total_clusters: Option<u64>,
    ) -> Result<MftRecord, LodestoneError> {
        if buffer.len() < MFT_RECORD_HEADER_SIZE {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT record of {} bytes",
                buffer.len()
            )));
        }

        let header =
            unsafe { std::ptr::read_unaligned(buffer.as_ptr() as *const MftRecordHeaderRaw) };

        // Copy the fields out of the packed header before use.
        let signature = header.signature;
        let usa_offset = header.usa_offset;
        let usa_count = header.usa_count;
        let journal_sequence = header.journal_sequence;
        let sequence = header.sequence;
        let link_count = header.link_count;
        let attributes_offset = header.attributes_offset as usize;
        let flags = header.flags;
        let used_size = header.used_size;
        let allocated_size = header.allocated_size;
        let base_record_reference = MftReference(header.base_record_reference);
        let next_attribute_id = header.next_attribute_id;

        // A zeroed slot is a never-used record, not corruption.
        if signature == [0, 0, 0, 0] && buffer.iter().all(|&b| b == 0) {
            trace!("MFT entry {} is an unused zeroed slot", index);
            return Ok(MftRecord {
                index,
                sequence: 0,
                journal_sequence: 0,
                link_count: 0,
                flags: 0,
                used_size: 0,
                allocated_size: buffer.len() as u32,
                base_record_reference: MftReference(0),
                next_attribute_id: 0,
                is_corrupt: false,
                is_empty: true,
                attributes: Vec::new(),
            });
        }

        let is_bad = &signature == MFT_RECORD_SIGNATURE_BAD;
        if !is_bad && &signature != MFT_RECORD_SIGNATURE {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT entry {} has signature {:02x?}",
                index, signature
            )));
        }

        let mut record = MftRecord {
            index,
            sequence,
            journal_sequence,
            link_count,
            flags,
            used_size,
            allocated_size,
            base_record_reference,
            next_attribute_id,
            is_corrupt: is_bad,
            is_empty: false,
            attributes: Vec::new(),
        };

        if is_bad {
            // Multi-sector write failure detected by a previous driver.
            // Header metadata stays readable; the body does not.
            warn!("MFT entry {} has a BAAD signature", index);
            return Ok(record);
        }

        if used_size as usize > buffer.len() || allocated_size as usize > buffer.len() {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT entry {} declares used {} allocated {} in a {}-byte record",
                index,
                used_size,
                allocated_size,
                buffer.len()
            )));
        }
        if used_size > allocated_size {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT entry {} used size {} exceeds allocated size {}",
                index, used_size, allocated_size
            )));
        }
        if attributes_offset < usa_offset as usize + 2 * usa_count as usize {
            return Err(LodestoneError::CorruptedRecord(format!(
                "MFT entry {} attributes at {} overlap the update sequence array",
                index, attributes_offset
            )));
        }

        apply_fixup(buffer, usa_offset, usa_count, bytes_per_sector)?;

        // An initialised-but-unused record ends right after the header.
        if attributes_offset >= used_size as usize {
            record.is_empty = true;
            return Ok(record);
        }

        let bounded = &buffer[..used_size as usize];
        let mut offset = attributes_offset;
        while let Some((attribute, next)) = MftAttribute::parse(bounded, offset, total_clusters)? {
            record.attributes.push(attribute);
            offset = next;
        }
        if record.attributes.is_empty() {
            record.is_empty = true;
        }

        trace!(
            "MFT entry {}: sequence {}, {} attributes, flags 0x{:x}",
            index,
            sequence,
            record.attributes.len(),
            flags
        );
        Ok(record)
    }

    pub fn file_reference(&self) -> MftReference {
        MftReference::new(self.index, self.sequence)
    }

    pub fn is_allocated(&self) -> bool {
        self.flags & MFT_RECORD_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & MFT_RECORD_HAS_INDEX != 0
    }

    /// Whether this is a base record. Extension records only make sense
    /// spliced into their base via the attribute list.
    pub fn is_base_record(&self) -> bool {
        self.base_record_reference.is_null()
    }

    pub fn attributes_of_type(&self, attribute_type: u32) -> impl Iterator<Item = &MftAttribute> {
        self.attributes
            .iter()
            .filter(move |a| a.attribute_type == attribute_type)
    }

    pub fn find_attribute(&self, attribute_type: u32, name: Option<&str>) -> Option<&MftAttribute> {
        self.attributes
            .iter()
            .find(|a| a.attribute_type == attribute_type && a.name_is(name))
    }

    pub fn all_attributes(&self) -> &[MftAttribute] {
        &self.attributes
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a fixed-up 1024-byte record from a header and attributes.
    pub(crate) fn build_record(
        index: u64,
        sequence: u16,
        flags: u16,
        base_reference: u64,
        attribute_bytes: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut body = vec![0u8; MFT_RECORD_HEADER_SIZE];
        // USA: usn + 2 replacement words at offset 48
        let attributes_offset = MFT_RECORD_HEADER_SIZE + 8;
        body.resize(attributes_offset, 0);
        for attr in attribute_bytes {
            body.extend_from_slice(attr);
        }
        body.extend_from_slice(&ATTR_TYPE_END.to_le_bytes());
        let used_size = body.len() as u32;
        body.resize(1024, 0);

        body[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        body[4..6].copy_from_slice(&48u16.to_le_bytes()); // usa offset
        body[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa count
        body[16..18].copy_from_slice(&sequence.to_le_bytes());
        body[18..20].copy_from_slice(&1u16.to_le_bytes());
        body[20..22].copy_from_slice(&(attributes_offset as u16).to_le_bytes());
        body[22..24].copy_from_slice(&flags.to_le_bytes());
        body[24..28].copy_from_slice(&used_size.to_le_bytes());
        body[28..32].copy_from_slice(&1024u32.to_le_bytes());
        body[32..40].copy_from_slice(&base_reference.to_le_bytes());
        body[44..48].copy_from_slice(&(index as u32).to_le_bytes());

        apply_test_fixup(&mut body);
        body
    }

    /// Install a valid USA at offset 48 over a 1024-byte record.
    pub(crate) fn apply_test_fixup(body: &mut [u8]) {
        let usn = 0x0101u16;
        body[48..50].copy_from_slice(&usn.to_le_bytes());
        let sector0_end: [u8; 2] = body[510..512].try_into().unwrap();
        let sector1_end: [u8; 2] = body[1022..1024].try_into().unwrap();
        body[50..52].copy_from_slice(&sector0_end);
        body[52..54].copy_from_slice(&sector1_end);
        body[510..512].copy_from_slice(&usn.to_le_bytes());
        body[1022..1024].copy_from_slice(&usn.to_le_bytes());
    }

    #[test]
    fn test_reference_packing() {
        let reference = MftReference::new(0x1234, 7);
        assert_eq!(reference.index(), 0x1234);
        assert_eq!(reference.sequence(), 7);
        assert_eq!(reference.to_string(), "4660-7");
        assert!(MftReference(0).is_null());
    }

    #[test]
    fn test_parse_record_with_attributes() {
        use crate::attributes::tests::build_resident_attribute;

        let data = build_resident_attribute(ATTR_TYPE_DATA, None, 1, b"contents");
        let mut buffer = build_record(41, 3, MFT_RECORD_IN_USE, 0, &[data]);

        let record = MftRecord::parse(&mut buffer, 41, 512, None).unwrap();
        assert_eq!(record.index, 41);
        assert_eq!(record.sequence, 3);
        assert!(record.is_allocated());
        assert!(!record.is_directory());
        assert!(record.is_base_record());
        assert!(!record.is_empty);
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(
            record
                .find_attribute(ATTR_TYPE_DATA, None)
                .unwrap()
                .resident_data()
                .unwrap(),
            b"contents"
        );
        assert_eq!(record.file_reference(), MftReference::new(41, 3));
    }

    #[test]
    fn test_baad_record_exposes_header_only() {
        let mut buffer = build_record(12, 9, MFT_RECORD_IN_USE, 0, &[]);
        buffer[0..4].copy_from_slice(MFT_RECORD_SIGNATURE_BAD);

        let record = MftRecord::parse(&mut buffer, 12, 512, None).unwrap();
        assert!(record.is_corrupt);
        assert_eq!(record.sequence, 9);
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let mut buffer = build_record(12, 9, 0, 0, &[]);
        buffer[0..4].copy_from_slice(b"XXXX");
        assert!(MftRecord::parse(&mut buffer, 12, 512, None).is_err());
    }

    #[test]
    fn test_zeroed_slot_is_empty() {
        let mut buffer = vec![0u8; 1024];
        let record = MftRecord::parse(&mut buffer, 77, 512, None).unwrap();
        assert!(record.is_empty);
        assert!(!record.is_allocated());
    }

    #[test]
    fn test_empty_record_tolerated() {
        let mut buffer = build_record(20, 1, MFT_RECORD_IN_USE, 0, &[]);
        // No attributes at all: used size stops right at the sentinel.
        let record = MftRecord::parse(&mut buffer, 20, 512, None).unwrap();
        assert!(record.is_empty);
        assert!(record.is_allocated());
    }

    #[test]
    fn test_used_size_bounds() {
        let mut buffer = build_record(20, 1, 0, 0, &[]);
        buffer[24..28].copy_from_slice(&2048u32.to_le_bytes());
        apply_test_fixup(&mut buffer);
        assert!(MftRecord::parse(&mut buffer, 20, 512, None).is_err());
    }

    #[test]
    fn test_extension_record_linkage() {
        let base = MftReference::new(30, 2);
        let mut buffer = build_record(31, 1, MFT_RECORD_IN_USE, base.0, &[]);
        let record = MftRecord::parse(&mut buffer, 31, 512, None).unwrap();
        assert!(!record.is_base_record());
        assert_eq!(record.base_record_reference.index(), 30);
    }
}
