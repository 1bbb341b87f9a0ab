// NTFS detection
// Cheap probe: boot sector shape only, no MFT bootstrap.

use crate::boot_sector::parse_boot_sector;
use lodestone_core::{read_vec_at, RangeReader};
use log::debug;

pub struct NtfsDetector;

impl NtfsDetector {
    /// Whether the store at `volume_offset` looks like an NTFS volume.
    pub fn detect(reader: &dyn RangeReader, volume_offset: u64) -> bool {
        let sector = match read_vec_at(reader, volume_offset, 512) {
            Ok(sector) => sector,
            Err(_) => return false,
        };
        match parse_boot_sector(&sector) {
            Ok(geometry) => {
                debug!(
                    "NTFS volume detected at offset {}: serial {:016x}",
                    volume_offset, geometry.serial_number
                );
                true
            }
            Err(_) => false,
        }
    }
}
