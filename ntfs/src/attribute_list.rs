// $ATTRIBUTE_LIST decoding and extension-record splicing
// When a file's attributes overflow its base record, the base keeps a
// $ATTRIBUTE_LIST naming every attribute and the extension record holding
// it. The resolver merges those back into per-(type, name) chains.

use crate::attributes::MftAttribute;
use crate::mft::{MftRecord, MftReference};
use crate::name::{units_to_string, utf16_units};
use crate::structures::*;
use lodestone_core::LodestoneError;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// One record of a $ATTRIBUTE_LIST attribute.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attribute_type: u32,
    pub name: Option<String>,
    pub name_units: Vec<u16>,
    pub first_vcn: u64,
    pub reference: MftReference,
    pub identifier: u16,
}

/// Parse the packed entries of a $ATTRIBUTE_LIST payload.
pub fn parse_attribute_list(data: &[u8]) -> Result<Vec<AttributeListEntry>, LodestoneError> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + ATTRIBUTE_LIST_ENTRY_HEADER_SIZE <= data.len() {
        let bytes = &data[offset..];
        let attribute_type = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if attribute_type == 0 {
            break;
        }
        let entry_size = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
        let name_length = bytes[6] as usize;
        let name_offset = bytes[7] as usize;
        let first_vcn = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        let reference = MftReference(u64::from_le_bytes([
            bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22], bytes[23],
        ]));
        let identifier = u16::from_le_bytes([bytes[24], bytes[25]]);

        if entry_size < ATTRIBUTE_LIST_ENTRY_HEADER_SIZE || offset + entry_size > data.len() {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "attribute list entry at offset {} with size {}",
                offset, entry_size
            )));
        }
        if name_offset + name_length * 2 > entry_size {
            return Err(LodestoneError::CorruptedAttribute(format!(
                "attribute list entry name at {} with {} characters exceeds entry",
                name_offset, name_length
            )));
        }

        let name_units = utf16_units(&bytes[name_offset..name_offset + name_length * 2]);
        entries.push(AttributeListEntry {
            attribute_type,
            name: if name_units.is_empty() {
                None
            } else {
                Some(units_to_string(&name_units))
            },
            name_units,
            first_vcn,
            reference,
            identifier,
        });

        offset += entry_size;
    }

    Ok(entries)
}

/// A per-(type, name) chain of attributes ordered by first VCN. Chains the
/// resolver could not complete stay usable for metadata but carry a
/// truncation reason; traversing their data fails.
#[derive(Debug, Clone)]
pub struct AttributeChain {
    pub attribute_type: u32,
    pub name: Option<String>,
    pub attributes: Vec<MftAttribute>,
    pub truncated: Option<String>,
}

impl AttributeChain {
    pub fn ensure_intact(&self) -> Result<(), LodestoneError> {
        match &self.truncated {
            None => Ok(()),
            Some(reason) => Err(LodestoneError::TruncatedAttributeChain(reason.clone())),
        }
    }

    pub fn first(&self) -> Option<&MftAttribute> {
        self.attributes.first()
    }
}

/// Group a record's own attributes into chains, ordered by first VCN.
pub fn build_chains(record: &MftRecord) -> Vec<AttributeChain> {
    let mut chains: Vec<AttributeChain> = Vec::new();
    let mut lookup: HashMap<(u32, Option<String>), usize> = HashMap::new();

    for attribute in &record.attributes {
        push_attribute(&mut chains, &mut lookup, attribute.clone());
    }
    finish_chains(&mut chains);
    chains
}

/// Merge extension-record attributes into the base record's chains.
///
/// `fetch` loads an extension record through the volume's entry cache.
/// Entries referencing the base itself are satisfied by the base's own
/// copy. A missing or mismatched extension poisons only the chains that
/// depended on it.
pub fn splice_extension_chains(
    base: &MftRecord,
    list_entries: &[AttributeListEntry],
    mut fetch: impl FnMut(MftReference) -> Result<Arc<MftRecord>, LodestoneError>,
) -> Vec<AttributeChain> {
    let mut chains: Vec<AttributeChain> = Vec::new();
    let mut lookup: HashMap<(u32, Option<String>), usize> = HashMap::new();

    for attribute in &base.attributes {
        push_attribute(&mut chains, &mut lookup, attribute.clone());
    }

    let base_reference = base.file_reference();
    for entry in list_entries {
        if entry.reference.index() == base.index {
            // The base record's copy is authoritative; it is already in
            // the chains.
            continue;
        }

        let extension = match fetch(entry.reference) {
            Ok(extension) => extension,
            Err(error) => {
                warn!(
                    "attribute list of entry {}: extension {} unavailable: {}",
                    base.index, entry.reference, error
                );
                poison_chain(
                    &mut chains,
                    &mut lookup,
                    entry,
                    format!("extension record {} unavailable: {}", entry.reference, error),
                );
                continue;
            }
        };

        if extension.base_record_reference != base_reference {
            poison_chain(
                &mut chains,
                &mut lookup,
                entry,
                format!(
                    "extension record {} belongs to {}, not {}",
                    entry.reference, extension.base_record_reference, base_reference
                ),
            );
            continue;
        }

        let matched = extension.attributes.iter().find(|a| {
            a.attribute_type == entry.attribute_type
                && a.identifier == entry.identifier
                && a.name.as_deref() == entry.name.as_deref()
                && a.vcn_range().map(|(first, _)| first).unwrap_or(0) == entry.first_vcn
        });
        match matched {
            Some(attribute) => {
                debug!(
                    "spliced {} (vcn {}) from extension {} into entry {}",
                    attribute_type_name(entry.attribute_type),
                    entry.first_vcn,
                    entry.reference,
                    base.index
                );
                push_attribute(&mut chains, &mut lookup, attribute.clone());
            }
            None => {
                poison_chain(
                    &mut chains,
                    &mut lookup,
                    entry,
                    format!(
                        "extension record {} has no {} with identifier {} at VCN {}",
                        entry.reference,
                        attribute_type_name(entry.attribute_type),
                        entry.identifier,
                        entry.first_vcn
                    ),
                );
            }
        }
    }

    finish_chains(&mut chains);
    chains
}

fn push_attribute(
    chains: &mut Vec<AttributeChain>,
    lookup: &mut HashMap<(u32, Option<String>), usize>,
    attribute: MftAttribute,
) {
    let key = (attribute.attribute_type, attribute.name.clone());
    match lookup.get(&key) {
        Some(&i) => chains[i].attributes.push(attribute),
        None => {
            lookup.insert(key, chains.len());
            chains.push(AttributeChain {
                attribute_type: attribute.attribute_type,
                name: attribute.name.clone(),
                attributes: vec![attribute],
                truncated: None,
            });
        }
    }
}

fn poison_chain(
    chains: &mut Vec<AttributeChain>,
    lookup: &mut HashMap<(u32, Option<String>), usize>,
    entry: &AttributeListEntry,
    reason: String,
) {
    let key = (entry.attribute_type, entry.name.clone());
    match lookup.get(&key) {
        Some(&i) => chains[i].truncated = Some(reason),
        None => {
            lookup.insert(key, chains.len());
            chains.push(AttributeChain {
                attribute_type: entry.attribute_type,
                name: entry.name.clone(),
                attributes: Vec::new(),
                truncated: Some(reason),
            });
        }
    }
}

/// Order every chain by first VCN. A duplicate first VCN between two
/// non-resident pieces is an irreconcilable inconsistency for that chain;
/// resident attributes (several $FILE_NAMEs on a hard-linked file) may
/// legitimately share one chain.
fn finish_chains(chains: &mut [AttributeChain]) {
    for chain in chains.iter_mut() {
        chain
            .attributes
            .sort_by_key(|a| a.vcn_range().map(|(first, _)| first).unwrap_or(0));
        if chain.attributes.len() > 1 {
            let duplicate = chain.attributes.windows(2).any(|pair| {
                match (pair[0].vcn_range(), pair[1].vcn_range()) {
                    (Some((a, _)), Some((b, _))) => a == b,
                    _ => false,
                }
            });
            if duplicate && chain.truncated.is_none() {
                chain.truncated = Some(format!(
                    "duplicate first VCN in {} chain",
                    attribute_type_name(chain.attribute_type)
                ));
            }
        }
    }
}
