// NTFS name comparison and collation
// Names are UTF-16LE on disk and may contain unpaired surrogates, so
// comparisons work on code units and combine surrogate pairs where possible
// instead of round-tripping through String.

use crate::structures::*;
use lodestone_core::LodestoneError;
use std::cmp::Ordering;

/// The $UpCase system file: a table mapping each BMP code unit to its
/// upper-case form. When loaded it supersedes the ambient upper-casing.
pub struct UpcaseTable {
    table: Vec<u16>,
}

impl UpcaseTable {
    /// Expected size of a complete table: 65536 u16 entries.
    pub const FULL_SIZE: usize = 0x20000;

    pub fn from_bytes(data: &[u8]) -> Option<UpcaseTable> {
        if data.len() < 2 || data.len() % 2 != 0 {
            return None;
        }
        let table = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Some(UpcaseTable { table })
    }

    pub fn fold_unit(&self, unit: u16) -> u16 {
        self.table.get(unit as usize).copied().unwrap_or(unit)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Decode the next Unicode code point from UTF-16 units, tolerating
/// unpaired surrogates (which compare as their unit value).
fn next_code_point(units: &[u16], index: &mut usize) -> u32 {
    let unit = units[*index];
    *index += 1;
    if (0xD800..0xDC00).contains(&unit) && *index < units.len() {
        let low = units[*index];
        if (0xDC00..0xE000).contains(&low) {
            *index += 1;
            return 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
        }
    }
    unit as u32
}

/// Upper-case fold one code point: through the $UpCase table for BMP
/// characters when available, otherwise the ambient single-character
/// uppercase mapping.
pub fn fold_code_point(cp: u32, upcase: Option<&UpcaseTable>) -> u32 {
    if cp < 0x10000 {
        if let Some(table) = upcase {
            return table.fold_unit(cp as u16) as u32;
        }
    }
    match char::from_u32(cp) {
        Some(c) => {
            let mut upper = c.to_uppercase();
            let first = upper.next().unwrap_or(c);
            // Multi-character expansions are not what towupper does; keep
            // the original in that case.
            if upper.next().is_none() {
                first as u32
            } else {
                cp
            }
        }
        None => cp,
    }
}

/// Canonical NTFS name comparison. Case-insensitive when `case_fold` is set.
pub fn compare_names(
    a: &[u16],
    b: &[u16],
    case_fold: bool,
    upcase: Option<&UpcaseTable>,
) -> Ordering {
    let mut ai = 0;
    let mut bi = 0;
    while ai < a.len() && bi < b.len() {
        let mut ac = next_code_point(a, &mut ai);
        let mut bc = next_code_point(b, &mut bi);
        if case_fold {
            ac = fold_code_point(ac, upcase);
            bc = fold_code_point(bc, upcase);
        }
        match ac.cmp(&bc) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    if bi < b.len() {
        Ordering::Less
    } else if ai < a.len() {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Convenience wrapper for `&str` against a UTF-16 name.
pub fn compare_with_str(
    name: &[u16],
    other: &str,
    case_fold: bool,
    upcase: Option<&UpcaseTable>,
) -> Ordering {
    let units: Vec<u16> = other.encode_utf16().collect();
    compare_names(name, &units, case_fold, upcase)
}

pub fn names_equal(a: &[u16], b: &str, case_fold: bool, upcase: Option<&UpcaseTable>) -> bool {
    compare_with_str(a, b, case_fold, upcase) == Ordering::Equal
}

/// Characters the DOS short-name generator drops from the long name:
/// control characters, space, `" * + , . / : ; < = > ? \` and anything
/// outside 7-bit ASCII.
fn short_name_ignores(cp: u32) -> bool {
    cp <= 0x20
        || cp == 0x22
        || (0x2a..=0x2c).contains(&cp)
        || cp == 0x2e
        || cp == 0x2f
        || (0x3a..=0x3f).contains(&cp)
        || cp == 0x5c
        || cp >= 0x80
}

/// Same set without the dot, used when comparing extensions.
fn short_name_extension_ignores(cp: u32) -> bool {
    cp <= 0x20
        || cp == 0x22
        || (0x2a..=0x2c).contains(&cp)
        || cp == 0x2f
        || (0x3a..=0x3f).contains(&cp)
        || cp == 0x5c
        || cp >= 0x80
}

/// Whether a DOS 8.3 short name (`PROGRA~1`, `DOCUME~2.TXT`) is the
/// generated short form of `name`. A valid short name carries a `~`
/// followed by decimal digits; the first four significant characters of
/// the long name must match exactly, later ones loosely, and extensions
/// are compared after the last dot.
pub fn short_name_matches(name: &[u16], short: &[u16], upcase: Option<&UpcaseTable>) -> bool {
    let fold = |cp: u32| fold_code_point(cp, upcase);

    let mut ni = 0;
    let mut si = 0;
    let mut last_ni = 0;
    let mut last_si = 0;
    let mut matched_chars = 0usize;
    let mut sc: u32 = 0;

    while ni < name.len() && si < short.len() {
        let nc = next_code_point(name, &mut ni);
        if short_name_ignores(nc) {
            continue;
        }
        // The short-name generator writes [ and ] as underscores.
        let nc = if nc == 0x5b || nc == 0x5d { 0x5f } else { nc };

        sc = next_code_point(short, &mut si);
        if sc == 0x7e {
            break;
        }
        if matched_chars < 4 {
            if fold(sc) != fold(nc) {
                return false;
            }
        } else if fold(sc) != fold(nc) {
            break;
        }
        matched_chars += 1;
        last_ni = ni;
        last_si = si;
    }

    // Skip ahead to the tilde.
    while si < short.len() && sc != 0x7e {
        sc = next_code_point(short, &mut si);
    }
    if sc != 0x7e {
        // Not a generated short name at all.
        return false;
    }

    // The tilde suffix must be decimal digits, optionally ending in a dot
    // that introduces the extension.
    sc = 0;
    while si < short.len() {
        sc = next_code_point(short, &mut si);
        if sc == 0x2e {
            break;
        }
        if !(0x30..=0x39).contains(&sc) {
            return false;
        }
    }

    if sc == 0x2e {
        // Position the long name after its last dot.
        let mut nc = 0u32;
        ni = name.len();
        while ni >= 1 {
            ni -= 1;
            let mut peek = ni;
            nc = next_code_point(name, &mut peek);
            if nc == 0x2e {
                ni = peek;
                break;
            }
        }
        if nc == 0x2e {
            while ni < name.len() && si < short.len() {
                let nc = next_code_point(name, &mut ni);
                if short_name_extension_ignores(nc) {
                    continue;
                }
                let sc = next_code_point(short, &mut si);
                if fold(sc) != fold(nc) {
                    break;
                }
            }
        }
    }

    if si < short.len() {
        // Leftover short-name characters: fall back to comparing the
        // remainders from the last match point as case-insensitive text.
        let mut ni = last_ni;
        let mut si = last_si;
        if ni >= name.len() {
            return false;
        }
        while ni < name.len() && si < short.len() {
            let nc = next_code_point(name, &mut ni);
            let sc = next_code_point(short, &mut si);
            if fold(sc) != fold(nc) {
                return false;
            }
        }
    }
    true
}

/// Compare two index keys under an NTFS collation order.
pub fn collate_keys(
    collation_type: u32,
    a: &[u8],
    b: &[u8],
    upcase: Option<&UpcaseTable>,
) -> Result<Ordering, LodestoneError> {
    match collation_type {
        COLLATION_BINARY => Ok(a.cmp(b)),
        COLLATION_FILENAME => {
            let a_name = file_name_key_units(a)?;
            let b_name = file_name_key_units(b)?;
            Ok(compare_names(&a_name, &b_name, true, upcase))
        }
        COLLATION_UNICODE_STRING => {
            let a_units = utf16_units(a);
            let b_units = utf16_units(b);
            Ok(compare_names(&a_units, &b_units, true, upcase))
        }
        COLLATION_NTOFS_ULONG => {
            let a_val = ulong_key(a)?;
            let b_val = ulong_key(b)?;
            Ok(a_val.cmp(&b_val))
        }
        COLLATION_NTOFS_SID => Ok(a.cmp(b)),
        COLLATION_NTOFS_SECURITY_HASH => {
            let a_hash = ulong_key(a)?;
            let b_hash = ulong_key(b)?;
            Ok(a_hash.cmp(&b_hash).then_with(|| a[4..].cmp(&b[4..])))
        }
        COLLATION_NTOFS_ULONGS => {
            let a_vals: Vec<u32> = a.chunks_exact(4).map(le_u32).collect();
            let b_vals: Vec<u32> = b.chunks_exact(4).map(le_u32).collect();
            Ok(a_vals.cmp(&b_vals))
        }
        other => Err(LodestoneError::Unsupported(format!(
            "collation order 0x{:02x}",
            other
        ))),
    }
}

/// Extract the name units from a $FILE_NAME-structured index key.
pub(crate) fn file_name_key_units(key: &[u8]) -> Result<Vec<u16>, LodestoneError> {
    if key.len() < FILE_NAME_HEADER_SIZE {
        return Err(LodestoneError::IndexCorrupted(format!(
            "file name key of {} bytes",
            key.len()
        )));
    }
    let name_length = key[64] as usize;
    if FILE_NAME_HEADER_SIZE + name_length * 2 > key.len() {
        return Err(LodestoneError::IndexCorrupted(format!(
            "file name key declares {} name characters in {} bytes",
            name_length,
            key.len()
        )));
    }
    Ok(utf16_units(
        &key[FILE_NAME_HEADER_SIZE..FILE_NAME_HEADER_SIZE + name_length * 2],
    ))
}

fn ulong_key(key: &[u8]) -> Result<u32, LodestoneError> {
    if key.len() < 4 {
        return Err(LodestoneError::IndexCorrupted(format!(
            "ULONG key of {} bytes",
            key.len()
        )));
    }
    Ok(le_u32(&key[..4]))
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode raw little-endian bytes into UTF-16 code units.
pub fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Lossy display form of a UTF-16 name.
pub fn units_to_string(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}
