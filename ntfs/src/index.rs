// NTFS index (B+ tree) parsing and traversal
// $INDEX_ROOT holds the root node inline; larger nodes live in INDX blocks
// inside $INDEX_ALLOCATION. Entries are typed by the root's declared
// attribute type and ordered by its collation rule.

use crate::cluster_stream::ClusterStream;
use crate::fixup::apply_fixup;
use crate::mft::MftReference;
use crate::name::UpcaseTable;
use crate::structures::*;
use lodestone_core::LodestoneError;
use log::trace;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// One index entry. Leaf entries carry the key payload; branch entries add
/// the VCN of the child holding smaller keys; the terminal sentinel has no
/// key at all.
#[derive(Debug, Clone)]
pub struct IndexValue {
    pub file_reference: MftReference,
    pub flags: u16,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub sub_node_vcn: Option<u64>,
}

impl IndexValue {
    pub fn is_last(&self) -> bool {
        self.flags & INDEX_VALUE_IS_LAST != 0
    }

    pub fn has_sub_node(&self) -> bool {
        self.flags & INDEX_VALUE_HAS_SUB_NODE != 0
    }
}

/// One parsed node: the inline root node or the payload of an INDX block.
#[derive(Debug, Clone)]
pub struct IndexNode {
    pub flags: u32,
    pub values: Vec<IndexValue>,
}

impl IndexNode {
    pub fn has_branches(&self) -> bool {
        self.flags & INDEX_NODE_HAS_BRANCH != 0
    }

    /// Parse a node given the bytes starting at its node header.
    /// `view_index` selects the data-bearing entry layout used by $SDH,
    /// $SII, $O, $Q and $R indexes instead of a file reference.
    pub fn parse(data: &[u8], view_index: bool) -> Result<IndexNode, LodestoneError> {
        if data.len() < INDEX_NODE_HEADER_SIZE {
            return Err(LodestoneError::IndexCorrupted(format!(
                "index node of {} bytes",
                data.len()
            )));
        }
        let header =
            unsafe { std::ptr::read_unaligned(data.as_ptr() as *const IndexNodeHeaderRaw) };
        let values_offset = header.values_offset as usize;
        let size = header.size as usize;
        let allocated_size = header.allocated_size as usize;
        let flags = header.flags;

        if values_offset < INDEX_NODE_HEADER_SIZE
            || size < values_offset
            || size > data.len()
            || allocated_size < size
        {
            return Err(LodestoneError::IndexCorrupted(format!(
                "index node header: values at {}, size {}, allocated {}",
                values_offset, size, allocated_size
            )));
        }

        let mut values = Vec::new();
        let mut offset = values_offset;
        loop {
            if offset + INDEX_VALUE_HEADER_SIZE > size {
                return Err(LodestoneError::IndexCorrupted(
                    "index node ends without a sentinel value".to_string(),
                ));
            }
            let bytes = &data[offset..];
            let first_qword = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            let entry_size = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
            let key_size = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
            let flags = u16::from_le_bytes([bytes[12], bytes[13]]);

            if entry_size < INDEX_VALUE_HEADER_SIZE || offset + entry_size > size {
                return Err(LodestoneError::IndexCorrupted(format!(
                    "index value at offset {} with size {}",
                    offset, entry_size
                )));
            }
            let has_sub_node = flags & INDEX_VALUE_HAS_SUB_NODE != 0;
            let key_end = INDEX_VALUE_HEADER_SIZE + key_size;
            let value_end = if has_sub_node {
                entry_size - 8
            } else {
                entry_size
            };
            if key_end > value_end {
                return Err(LodestoneError::IndexCorrupted(format!(
                    "index value key of {} bytes exceeds its {}-byte entry",
                    key_size, entry_size
                )));
            }

            let key = bytes[INDEX_VALUE_HEADER_SIZE..key_end].to_vec();
            let data_bytes = if view_index && !key.is_empty() {
                // View indexes replace the file reference with a
                // (data offset, data size) pair into the entry.
                let data_offset = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
                let data_size = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
                if data_offset + data_size <= value_end {
                    bytes[data_offset..data_offset + data_size].to_vec()
                } else {
                    Vec::new()
                }
            } else {
                Vec::new()
            };
            let sub_node_vcn = if has_sub_node {
                Some(u64::from_le_bytes([
                    bytes[entry_size - 8],
                    bytes[entry_size - 7],
                    bytes[entry_size - 6],
                    bytes[entry_size - 5],
                    bytes[entry_size - 4],
                    bytes[entry_size - 3],
                    bytes[entry_size - 2],
                    bytes[entry_size - 1],
                ]))
            } else {
                None
            };

            let is_last = flags & INDEX_VALUE_IS_LAST != 0;
            values.push(IndexValue {
                file_reference: MftReference(first_qword),
                flags,
                key,
                data: data_bytes,
                sub_node_vcn,
            });
            if is_last {
                break;
            }
            offset += entry_size;
        }

        Ok(IndexNode { flags, values })
    }
}

/// A complete index: the root, its allocation stream when the tree has
/// branches, and enough geometry to address sub-nodes.
pub struct Index {
    pub indexed_attribute_type: u32,
    pub collation_type: u32,
    pub index_entry_size: u32,
    root_node: IndexNode,
    allocation: Option<ClusterStream>,
    bytes_per_sector: usize,
    cluster_size: u64,
    upcase: Option<Arc<UpcaseTable>>,
}

impl Index {
    /// Parse an index from its $INDEX_ROOT payload and, for branched
    /// trees, the $INDEX_ALLOCATION stream.
    pub fn new(
        root_data: &[u8],
        allocation: Option<ClusterStream>,
        bytes_per_sector: usize,
        cluster_size: u64,
        upcase: Option<Arc<UpcaseTable>>,
    ) -> Result<Index, LodestoneError> {
        if root_data.len() < INDEX_ROOT_HEADER_SIZE + INDEX_NODE_HEADER_SIZE {
            return Err(LodestoneError::IndexCorrupted(format!(
                "$INDEX_ROOT of {} bytes",
                root_data.len()
            )));
        }
        let header =
            unsafe { std::ptr::read_unaligned(root_data.as_ptr() as *const IndexRootHeaderRaw) };
        let indexed_attribute_type = header.attribute_type;
        let collation_type = header.collation_type;
        let index_entry_size = header.index_entry_size;

        let view_index = indexed_attribute_type == 0;
        let root_node = IndexNode::parse(&root_data[INDEX_ROOT_HEADER_SIZE..], view_index)?;

        if root_node.has_branches() && allocation.is_none() {
            return Err(LodestoneError::IndexCorrupted(
                "branched index without an $INDEX_ALLOCATION stream".to_string(),
            ));
        }

        trace!(
            "index over type 0x{:x}, collation 0x{:x}, {} root values",
            indexed_attribute_type,
            collation_type,
            root_node.values.len()
        );
        Ok(Index {
            indexed_attribute_type,
            collation_type,
            index_entry_size,
            root_node,
            allocation,
            bytes_per_sector,
            cluster_size,
            upcase,
        })
    }

    pub fn upcase(&self) -> Option<&UpcaseTable> {
        self.upcase.as_deref()
    }

    /// Read and fix up one INDX block, returning its node.
    fn read_sub_node(&self, vcn: u64) -> Result<IndexNode, LodestoneError> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            LodestoneError::IndexCorrupted(format!(
                "sub-node VCN {} referenced without an allocation stream",
                vcn
            ))
        })?;

        let block_size = self.index_entry_size as usize;
        if block_size < INDEX_BLOCK_HEADER_SIZE + INDEX_NODE_HEADER_SIZE {
            return Err(LodestoneError::IndexCorrupted(format!(
                "index block size of {} bytes",
                block_size
            )));
        }
        // Sub-node VCNs count clusters, or 512-byte units when a block is
        // smaller than a cluster.
        let unit = if (self.index_entry_size as u64) < self.cluster_size {
            512
        } else {
            self.cluster_size
        };
        let offset = vcn * unit;

        let mut buffer = vec![0u8; block_size];
        let read = allocation.read_at(offset, &mut buffer)?;
        if read != block_size {
            return Err(LodestoneError::IndexCorrupted(format!(
                "INDX block at VCN {} truncated to {} bytes",
                vcn, read
            )));
        }

        let header =
            unsafe { std::ptr::read_unaligned(buffer.as_ptr() as *const IndexBlockHeaderRaw) };
        let signature = header.signature;
        let usa_offset = header.usa_offset;
        let usa_count = header.usa_count;
        let stored_vcn = header.vcn;

        if &signature != INDEX_BLOCK_SIGNATURE {
            return Err(LodestoneError::IndexCorrupted(format!(
                "INDX block at VCN {} has signature {:02x?}",
                vcn, signature
            )));
        }
        if stored_vcn != vcn {
            return Err(LodestoneError::IndexCorrupted(format!(
                "INDX block declares VCN {} where {} was expected",
                stored_vcn, vcn
            )));
        }
        apply_fixup(&mut buffer, usa_offset, usa_count, self.bytes_per_sector)?;

        IndexNode::parse(
            &buffer[INDEX_BLOCK_HEADER_SIZE..],
            self.indexed_attribute_type == 0,
        )
    }

    /// Depth-first, in-order iteration over every non-sentinel value.
    pub fn iter(&self) -> IndexIter<'_> {
        IndexIter {
            index: self,
            work: vec![WorkItem::Enter(self.root_node.clone(), 0)],
            visited: HashSet::new(),
            failed: false,
        }
    }

    /// B+ tree descent. `compare` orders the probe against an entry's key:
    /// `Less` descends left of the entry, `Equal` returns it.
    pub fn lookup_with(
        &self,
        mut compare: impl FnMut(&IndexValue) -> Result<Ordering, LodestoneError>,
    ) -> Result<Option<IndexValue>, LodestoneError> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut node = self.root_node.clone();

        loop {
            // Find the first entry at or past the probe. The child left of
            // that entry (or of the sentinel) holds any smaller keys.
            let mut descend_vcn: Option<u64> = None;
            let mut hit: Option<IndexValue> = None;
            for value in &node.values {
                if value.is_last() {
                    descend_vcn = value.sub_node_vcn;
                    break;
                }
                match compare(value)? {
                    Ordering::Equal => {
                        hit = Some(value.clone());
                        break;
                    }
                    Ordering::Less => {
                        descend_vcn = value.sub_node_vcn;
                        break;
                    }
                    Ordering::Greater => {}
                }
            }
            if let Some(value) = hit {
                return Ok(Some(value));
            }
            match descend_vcn {
                None => return Ok(None), // leaf miss
                Some(vcn) => {
                    if !visited.insert(vcn) {
                        return Err(LodestoneError::IndexCycle(vcn));
                    }
                    node = self.read_sub_node(vcn)?;
                }
            }
        }
    }
}

enum WorkItem {
    /// Visit a node starting at the given value cursor.
    Enter(IndexNode, usize),
    /// Emit a value whose subtree has been visited.
    Emit(IndexValue),
}

/// Lazy, single-pass DFS iterator. A second pass re-opens the iterator.
pub struct IndexIter<'a> {
    index: &'a Index,
    work: Vec<WorkItem>,
    visited: HashSet<u64>,
    failed: bool,
}

impl<'a> IndexIter<'a> {
    fn descend(&mut self, vcn: u64) -> Result<IndexNode, LodestoneError> {
        if !self.visited.insert(vcn) {
            return Err(LodestoneError::IndexCycle(vcn));
        }
        self.index.read_sub_node(vcn)
    }
}

impl<'a> Iterator for IndexIter<'a> {
    type Item = Result<IndexValue, LodestoneError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(item) = self.work.pop() {
            match item {
                WorkItem::Emit(value) => return Some(Ok(value)),
                WorkItem::Enter(node, cursor) => {
                    let value = match node.values.get(cursor) {
                        Some(value) => value.clone(),
                        None => continue,
                    };
                    if value.is_last() {
                        // The sentinel's child is the right-most subtree.
                        if let Some(vcn) = value.sub_node_vcn {
                            match self.descend(vcn) {
                                Ok(child) => self.work.push(WorkItem::Enter(child, 0)),
                                Err(error) => {
                                    self.failed = true;
                                    return Some(Err(error));
                                }
                            }
                        }
                        continue;
                    }
                    // In-order: child subtree first, then the value, then
                    // the rest of this node.
                    self.work.push(WorkItem::Enter(node, cursor + 1));
                    self.work.push(WorkItem::Emit(value.clone()));
                    if let Some(vcn) = value.sub_node_vcn {
                        match self.descend(vcn) {
                            Ok(child) => self.work.push(WorkItem::Enter(child, 0)),
                            Err(error) => {
                                self.failed = true;
                                return Some(Err(error));
                            }
                        }
                    }
                }
            }
        }
        None
    }
}
