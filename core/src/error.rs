use thiserror::Error;

#[derive(Debug, Error)]
pub enum LodestoneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    #[error("Corrupted record: {0}")]
    CorruptedRecord(String),

    #[error("Corrupted attribute: {0}")]
    CorruptedAttribute(String),

    #[error("Corrupted run list: {0}")]
    CorruptedRunList(String),

    #[error("Corrupted compressed data: {0}")]
    CompressionCorrupted(String),

    #[error("Corrupted index: {0}")]
    IndexCorrupted(String),

    #[error("Index cycle detected at VCN {0}")]
    IndexCycle(u64),

    #[error("Truncated attribute chain: {0}")]
    TruncatedAttributeChain(String),

    #[error("Stale file reference: entry {index} has sequence {actual}, reference expects {expected}")]
    StaleReference {
        index: u64,
        expected: u16,
        actual: u16,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Operation aborted")]
    Aborted,
}

impl LodestoneError {
    /// Whether the error marks on-disk corruption rather than an
    /// environmental failure (IO, cancellation, unsupported feature).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LodestoneError::InvalidBootSector(_)
                | LodestoneError::CorruptedRecord(_)
                | LodestoneError::CorruptedAttribute(_)
                | LodestoneError::CorruptedRunList(_)
                | LodestoneError::CompressionCorrupted(_)
                | LodestoneError::IndexCorrupted(_)
                | LodestoneError::IndexCycle(_)
                | LodestoneError::TruncatedAttributeChain(_)
        )
    }
}
