// Logical byte streams over attribute chains
// A stream serves reads from resident payload bytes, from mapped clusters,
// from sparse holes (zeros), or through LZNT1 compression units.

use crate::attribute_list::AttributeChain;
use crate::attributes::Residency;
use crate::compression::decompress_unit;
use lodestone_core::{read_exact_at, LodestoneError, RangeReader};
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared volume-side state every stream needs: the backing reader, the
/// volume's position inside it, the cluster geometry, and the abort flag.
pub struct StreamContext {
    reader: Arc<dyn RangeReader>,
    volume_offset: u64,
    cluster_size: u64,
    abort: Arc<AtomicBool>,
}

impl StreamContext {
    pub fn new(
        reader: Arc<dyn RangeReader>,
        volume_offset: u64,
        cluster_size: u64,
        abort: Arc<AtomicBool>,
    ) -> StreamContext {
        StreamContext {
            reader,
            volume_offset,
            cluster_size,
            abort,
        }
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    pub fn check_abort(&self) -> Result<(), LodestoneError> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(LodestoneError::Aborted);
        }
        Ok(())
    }

    /// Read raw bytes at a physical cluster position.
    fn read_physical(&self, lcn: u64, within: u64, buf: &mut [u8]) -> Result<(), LodestoneError> {
        let offset = self.volume_offset + lcn * self.cluster_size + within;
        read_exact_at(self.reader.as_ref(), offset, buf)
    }
}

/// One extent of a stream's logical-to-physical map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub vcn: u64,
    pub clusters: u64,
    pub lcn: Option<u64>,
}

impl Extent {
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }
}

enum Backing {
    Resident(Vec<u8>),
    NonResident {
        context: Arc<StreamContext>,
        extents: Vec<Extent>,
        data_size: u64,
        valid_data_size: u64,
        allocated_size: u64,
        /// Compression unit size in bytes; 0 for uncompressed streams.
        compression_unit: u64,
    },
}

/// A read-only logical byte stream over one attribute chain.
pub struct ClusterStream {
    name: Option<String>,
    backing: Backing,
}

impl ClusterStream {
    /// Stream over a resident attribute's inline payload.
    pub fn resident(name: Option<String>, data: Vec<u8>) -> ClusterStream {
        ClusterStream {
            name,
            backing: Backing::Resident(data),
        }
    }

    /// Stream over a (possibly multi-attribute) non-resident chain.
    pub fn from_chain(
        context: Arc<StreamContext>,
        chain: &AttributeChain,
    ) -> Result<ClusterStream, LodestoneError> {
        chain.ensure_intact()?;
        let head = chain.first().ok_or_else(|| {
            LodestoneError::TruncatedAttributeChain("attribute chain is empty".to_string())
        })?;

        if head.is_encrypted() {
            return Err(LodestoneError::Unsupported(format!(
                "encrypted stream {:?}",
                chain.name
            )));
        }

        match &head.residency {
            Residency::Resident { data, .. } => {
                Ok(ClusterStream::resident(chain.name.clone(), data.clone()))
            }
            Residency::NonResident {
                data_size,
                valid_data_size,
                allocated_size,
                ..
            } => {
                let data_size = *data_size;
                let valid_data_size = *valid_data_size;
                let allocated_size = *allocated_size;
                let compression_unit =
                    head.compression_unit_clusters() * context.cluster_size;

                // Flatten the chain into one contiguous extent map; each
                // attribute must pick up exactly where the previous ended.
                let mut extents = Vec::new();
                let mut next_vcn = 0u64;
                for attribute in &chain.attributes {
                    let (first_vcn, last_vcn) = match attribute.vcn_range() {
                        Some(range) => range,
                        None => {
                            return Err(LodestoneError::CorruptedAttribute(format!(
                                "resident attribute inside non-resident chain {:?}",
                                chain.name
                            )))
                        }
                    };
                    if first_vcn != next_vcn {
                        return Err(LodestoneError::TruncatedAttributeChain(format!(
                            "chain {:?} jumps from VCN {} to {}",
                            chain.name, next_vcn, first_vcn
                        )));
                    }
                    for run in attribute.runs() {
                        extents.push(Extent {
                            vcn: next_vcn,
                            clusters: run.length,
                            lcn: run.lcn,
                        });
                        next_vcn += run.length;
                    }
                    if next_vcn != last_vcn + 1 {
                        return Err(LodestoneError::CorruptedRunList(format!(
                            "chain {:?} attribute ends at VCN {} instead of {}",
                            chain.name,
                            next_vcn,
                            last_vcn + 1
                        )));
                    }
                }

                trace!(
                    "stream {:?}: {} extents, {} data bytes, unit {} bytes",
                    chain.name,
                    extents.len(),
                    data_size,
                    compression_unit
                );
                Ok(ClusterStream {
                    name: chain.name.clone(),
                    backing: Backing::NonResident {
                        context,
                        extents,
                        data_size,
                        valid_data_size,
                        allocated_size,
                        compression_unit,
                    },
                })
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Logical stream size in bytes.
    pub fn size(&self) -> u64 {
        match &self.backing {
            Backing::Resident(data) => data.len() as u64,
            Backing::NonResident { data_size, .. } => *data_size,
        }
    }

    /// Bytes at or beyond this offset read as zero even when allocated.
    pub fn valid_size(&self) -> u64 {
        match &self.backing {
            Backing::Resident(data) => data.len() as u64,
            Backing::NonResident {
                valid_data_size, ..
            } => *valid_data_size,
        }
    }

    pub fn allocated_size(&self) -> u64 {
        match &self.backing {
            Backing::Resident(data) => data.len() as u64,
            Backing::NonResident { allocated_size, .. } => *allocated_size,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            &self.backing,
            Backing::NonResident {
                compression_unit, ..
            } if *compression_unit > 0
        )
    }

    /// The stream's extent map. Empty for resident streams.
    pub fn extents(&self) -> impl Iterator<Item = &Extent> {
        const NO_EXTENTS: &[Extent] = &[];
        match &self.backing {
            Backing::Resident(_) => NO_EXTENTS.iter(),
            Backing::NonResident { extents, .. } => extents.iter(),
        }
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns bytes read; 0 at
    /// or past end of stream.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, LodestoneError> {
        let size = self.size();
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(size - offset) as usize;

        match &self.backing {
            Backing::Resident(data) => {
                buf[..want].copy_from_slice(&data[offset as usize..offset as usize + want]);
            }
            Backing::NonResident {
                compression_unit, ..
            } => {
                if *compression_unit > 0 {
                    self.read_compressed(offset, &mut buf[..want])?;
                } else {
                    self.read_mapped(offset, &mut buf[..want])?;
                }
                // Allocated bytes past the valid data size read as zero.
                let valid = self.valid_size();
                if offset + want as u64 > valid {
                    let from = valid.saturating_sub(offset) as usize;
                    for byte in buf[from.min(want)..want].iter_mut() {
                        *byte = 0;
                    }
                }
            }
        }
        Ok(want)
    }

    /// The next byte offset at or after `from` that is backed by a mapped
    /// extent. `None` once only holes remain. Lets sequential scanners
    /// (the USN journal) skip sparse regions wholesale.
    pub fn next_mapped_offset(&self, from: u64) -> Option<u64> {
        if from >= self.size() {
            return None;
        }
        match &self.backing {
            Backing::Resident(_) => Some(from),
            Backing::NonResident {
                context, extents, ..
            } => {
                let cluster_size = context.cluster_size;
                let vcn = from / cluster_size;
                for extent in extents {
                    if extent.vcn + extent.clusters <= vcn || extent.is_sparse() {
                        continue;
                    }
                    let start = extent.vcn * cluster_size;
                    let candidate = start.max(from);
                    if candidate < self.size() {
                        return Some(candidate);
                    }
                    return None;
                }
                None
            }
        }
    }

    /// Read the whole stream into memory. Intended for metadata streams
    /// (attribute lists, $UpCase, index blocks), not file contents.
    pub fn read_all(&self) -> Result<Vec<u8>, LodestoneError> {
        let size = self.size() as usize;
        let mut buf = vec![0u8; size];
        let n = self.read_at(0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Serve a read from the plain (uncompressed) cluster map.
    fn read_mapped(&self, offset: u64, buf: &mut [u8]) -> Result<(), LodestoneError> {
        let (context, extents) = match &self.backing {
            Backing::NonResident {
                context, extents, ..
            } => (context, extents),
            Backing::Resident(_) => unreachable!(),
        };
        let cluster_size = context.cluster_size;
        let valid = self.valid_size();

        let mut position = offset;
        let mut filled = 0usize;
        while filled < buf.len() {
            context.check_abort()?;

            let vcn = position / cluster_size;
            let extent = match find_extent(extents, vcn) {
                Some(extent) => extent,
                None => {
                    // Holes the extent map does not cover read as zero.
                    let chunk = buf.len() - filled;
                    for byte in buf[filled..filled + chunk].iter_mut() {
                        *byte = 0;
                    }
                    break;
                }
            };
            let extent_end = (extent.vcn + extent.clusters) * cluster_size;
            let chunk = ((extent_end - position) as usize).min(buf.len() - filled);

            match extent.lcn {
                None => {
                    for byte in buf[filled..filled + chunk].iter_mut() {
                        *byte = 0;
                    }
                }
                Some(lcn) => {
                    if position >= valid {
                        // Entirely past the valid data size: skip the IO.
                        for byte in buf[filled..filled + chunk].iter_mut() {
                            *byte = 0;
                        }
                    } else {
                        let within = position - extent.vcn * cluster_size;
                        context.read_physical(lcn, within, &mut buf[filled..filled + chunk])?;
                    }
                }
            }
            position += chunk as u64;
            filled += chunk;
        }
        Ok(())
    }

    /// Serve a read through LZNT1 compression units.
    fn read_compressed(&self, offset: u64, buf: &mut [u8]) -> Result<(), LodestoneError> {
        let (context, unit_size) = match &self.backing {
            Backing::NonResident {
                context,
                compression_unit,
                ..
            } => (context, *compression_unit),
            Backing::Resident(_) => unreachable!(),
        };

        let mut position = offset;
        let mut filled = 0usize;
        while filled < buf.len() {
            context.check_abort()?;

            let unit_index = position / unit_size;
            let unit = self.materialise_unit(unit_index)?;
            let within = (position - unit_index * unit_size) as usize;
            let chunk = (unit.len() - within).min(buf.len() - filled);
            buf[filled..filled + chunk].copy_from_slice(&unit[within..within + chunk]);
            position += chunk as u64;
            filled += chunk;
        }
        Ok(())
    }

    /// Produce the decompressed bytes of one compression unit.
    ///
    /// A unit is all-sparse (zeros), fully mapped (stored uncompressed), or
    /// a mapped prefix holding LZNT1 data followed by sparse clusters.
    fn materialise_unit(&self, unit_index: u64) -> Result<Vec<u8>, LodestoneError> {
        let (context, extents, unit_size) = match &self.backing {
            Backing::NonResident {
                context,
                extents,
                compression_unit,
                ..
            } => (context, extents, *compression_unit),
            Backing::Resident(_) => unreachable!(),
        };
        let cluster_size = context.cluster_size;
        let unit_clusters = unit_size / cluster_size;
        let first_vcn = unit_index * unit_clusters;

        // Map each cluster of the unit.
        let mut mapped: Vec<Option<u64>> = Vec::with_capacity(unit_clusters as usize);
        for vcn in first_vcn..first_vcn + unit_clusters {
            match find_extent(extents, vcn) {
                Some(extent) => mapped.push(
                    extent
                        .lcn
                        .map(|lcn| lcn + (vcn - extent.vcn)),
                ),
                None => mapped.push(None),
            }
        }

        let present = mapped.iter().take_while(|c| c.is_some()).count();
        let all_present = present == mapped.len();
        if mapped[present..].iter().any(|c| c.is_some()) {
            return Err(LodestoneError::CompressionCorrupted(format!(
                "compression unit {} has mapped clusters after its sparse tail",
                unit_index
            )));
        }

        let mut unit = vec![0u8; unit_size as usize];
        if present == 0 {
            // All sparse: decompresses to zeros.
            return Ok(unit);
        }

        if all_present {
            // Stored uncompressed, copied verbatim cluster by cluster.
            for (i, lcn) in mapped.iter().enumerate() {
                let at = i * cluster_size as usize;
                if let Some(lcn) = lcn {
                    context.read_physical(*lcn, 0, &mut unit[at..at + cluster_size as usize])?;
                }
            }
            return Ok(unit);
        }

        // Compressed: the mapped prefix holds the LZNT1 byte stream.
        let mut compressed = vec![0u8; present * cluster_size as usize];
        for (i, lcn) in mapped[..present].iter().enumerate() {
            let at = i * cluster_size as usize;
            if let Some(lcn) = lcn {
                context.read_physical(*lcn, 0, &mut compressed[at..at + cluster_size as usize])?;
            }
        }
        decompress_unit(&compressed, &mut unit)?;
        Ok(unit)
    }
}

/// Binary search the extent covering a VCN.
fn find_extent(extents: &[Extent], vcn: u64) -> Option<&Extent> {
    let i = extents.partition_point(|e| e.vcn + e.clusters <= vcn);
    extents.get(i).filter(|e| e.vcn <= vcn)
}
