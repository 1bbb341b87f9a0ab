// NTFS data run decoder
// Decodes the packed run list at the tail of a non-resident attribute into
// an ordered list of cluster extents.

use lodestone_core::LodestoneError;
use log::trace;

/// Largest run length the decoder accepts, in clusters. A VCN is 48 bits.
const MAX_RUN_LENGTH: u64 = 1 << 48;

/// One extent of a non-resident stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRun {
    pub lcn: Option<u64>,               // None for sparse runs
    pub length: u64,                    // in clusters
}

impl DataRun {
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }
}

/// Decode NTFS data runs from raw bytes.
///
/// Each entry starts with a header byte whose low nibble is the length field
/// width and high nibble the offset field width. The offset is a signed LCN
/// delta from the previous run; a zero-width offset marks a sparse run. A
/// zero header byte ends the list. When `total_clusters` is known, LCNs are
/// bounds-checked against it.
pub fn decode_data_runs(
    data: &[u8],
    total_clusters: Option<u64>,
) -> Result<Vec<DataRun>, LodestoneError> {
    let mut runs = Vec::new();
    let mut pos = 0;
    let mut prev_lcn = 0i64;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break; // End marker
        }

        let length_size = (header & 0x0F) as usize;
        let offset_size = ((header >> 4) & 0x0F) as usize;
        pos += 1;

        if length_size == 0 || length_size > 8 {
            return Err(LodestoneError::CorruptedRunList(format!(
                "run length field of {} bytes",
                length_size
            )));
        }
        if offset_size > 8 {
            return Err(LodestoneError::CorruptedRunList(format!(
                "run offset field of {} bytes",
                offset_size
            )));
        }
        if pos + length_size + offset_size > data.len() {
            return Err(LodestoneError::CorruptedRunList(
                "run entry extends beyond buffer".to_string(),
            ));
        }

        // Read run length (in clusters)
        let length = read_le_bytes(&data[pos..pos + length_size]);
        pos += length_size;

        if length == 0 {
            return Err(LodestoneError::CorruptedRunList(
                "zero-length run".to_string(),
            ));
        }
        if length > MAX_RUN_LENGTH {
            return Err(LodestoneError::CorruptedRunList(format!(
                "run of {} clusters exceeds the VCN space",
                length
            )));
        }

        if offset_size == 0 {
            // Sparse run (hole): no physical backing, reads as zero
            trace!("sparse run of {} clusters", length);
            runs.push(DataRun { lcn: None, length });
        } else {
            // Read offset (signed, relative to previous run's LCN)
            let offset = read_le_bytes_signed(&data[pos..pos + offset_size]);
            pos += offset_size;

            let lcn = prev_lcn + offset;
            prev_lcn = lcn;

            if lcn < 0 {
                return Err(LodestoneError::CorruptedRunList(format!(
                    "negative LCN {}",
                    lcn
                )));
            }
            if let Some(total) = total_clusters {
                if lcn as u64 + length > total {
                    return Err(LodestoneError::CorruptedRunList(format!(
                        "run [{}, {}) exceeds the volume's {} clusters",
                        lcn,
                        lcn as u64 + length,
                        total
                    )));
                }
            }

            trace!("run of {} clusters at LCN {}", length, lcn);
            runs.push(DataRun {
                lcn: Some(lcn as u64),
                length,
            });
        }
    }

    Ok(runs)
}

/// Check the decoded runs cover exactly the attribute's VCN range.
pub fn validate_run_list(
    runs: &[DataRun],
    first_vcn: u64,
    last_vcn: u64,
) -> Result<(), LodestoneError> {
    let expected = last_vcn
        .checked_sub(first_vcn)
        .map(|d| d + 1)
        .ok_or_else(|| {
            LodestoneError::CorruptedRunList(format!(
                "attribute VCN range [{}, {}] is inverted",
                first_vcn, last_vcn
            ))
        })?;
    let total: u64 = runs.iter().map(|r| r.length).sum();
    if total != expected {
        return Err(LodestoneError::CorruptedRunList(format!(
            "runs cover {} clusters, attribute declares {}",
            total, expected
        )));
    }
    Ok(())
}

/// Read little-endian bytes as unsigned integer
fn read_le_bytes(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= (byte as u64) << (i * 8);
    }
    value
}

/// Read little-endian bytes as signed integer
fn read_le_bytes_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }

    let mut value = 0i64;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= (byte as i64) << (i * 8);
    }

    // Sign extend if negative
    let bits = bytes.len() * 8;
    if bits < 64 && (value & (1 << (bits - 1))) != 0 {
        value |= !((1i64 << bits) - 1);
    }

    value
}
