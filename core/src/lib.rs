pub mod diagnostics;
pub mod error;
pub mod reader;

pub use diagnostics::{DiagnosticsSink, LogSink, NullSink, Severity};
pub use error::LodestoneError;
pub use reader::{read_exact_at, read_vec_at, FileRangeReader, RangeReader, SliceReader};
