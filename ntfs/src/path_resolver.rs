// Path resolution
// Walks a separated path from the root directory, one index lookup per
// segment. Backslash is authoritative; forward slash is accepted. A
// trailing `:stream` suffix names an alternate data stream.

use crate::file_entry::FileEntry;
use lodestone_core::LodestoneError;
use log::trace;

/// Result of resolving a path: the final entry plus the alternate data
/// stream the path named, if any.
pub struct ResolvedPath {
    pub entry: FileEntry,
    pub stream: Option<String>,
}

/// Split a path into its segments and an optional `:stream` suffix on the
/// final segment. Empty segments are skipped; `.` and `..` are not
/// special, since NTFS directories do not index them.
pub(crate) fn split_path(path: &str) -> (Vec<&str>, Option<&str>) {
    let mut segments: Vec<&str> = path
        .split(['\\', '/'])
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut stream = None;
    if let Some(last) = segments.pop() {
        match last.split_once(':') {
            Some((name, stream_name)) if !stream_name.is_empty() => {
                if !name.is_empty() {
                    segments.push(name);
                }
                stream = Some(stream_name);
            }
            _ => segments.push(last),
        }
    }
    (segments, stream)
}

/// Resolve `path` starting from `root` via repeated directory lookups
/// (case-insensitive, with short-name fallback).
pub(crate) fn resolve_from(
    root: FileEntry,
    path: &str,
) -> Result<Option<ResolvedPath>, LodestoneError> {
    let (segments, stream) = split_path(path);
    let stream = stream.map(str::to_string);

    let mut current = root;
    for segment in segments {
        let directory = match current.directory()? {
            Some(directory) => directory,
            None => {
                trace!("path segment {:?} under a non-directory", segment);
                return Ok(None);
            }
        };
        let child = match directory.lookup_case_insensitive(segment)? {
            Some(child) => child,
            None => return Ok(None),
        };
        current = current.resolve_child(child.reference)?;
    }
    Ok(Some(ResolvedPath {
        entry: current,
        stream,
    }))
}
