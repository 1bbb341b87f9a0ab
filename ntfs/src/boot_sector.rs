// NTFS boot sector (VBR) parsing
// Yields the volume geometry everything else is addressed through.

use crate::structures::*;
use lodestone_core::LodestoneError;
use log::debug;

pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Volume geometry derived from the boot sector.
#[derive(Debug, Clone, Copy)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u64,
    pub total_sectors: u64,
    pub mft_cluster: u64,
    pub mirror_mft_cluster: u64,
    pub mft_entry_size: u32,
    pub index_entry_size: u32,
    pub serial_number: u64,
}

impl VolumeGeometry {
    pub fn total_clusters(&self) -> u64 {
        self.total_sectors * self.bytes_per_sector as u64 / self.cluster_size
    }

    pub fn mft_offset(&self) -> u64 {
        self.mft_cluster * self.cluster_size
    }
}

/// Parse and validate the first sector of an NTFS volume.
pub fn parse_boot_sector(data: &[u8]) -> Result<VolumeGeometry, LodestoneError> {
    if data.len() < 512 {
        return Err(LodestoneError::InvalidBootSector(format!(
            "boot sector of {} bytes",
            data.len()
        )));
    }
    if &data[3..11] != NTFS_OEM_ID {
        return Err(LodestoneError::InvalidBootSector(format!(
            "OEM identifier {:?}",
            String::from_utf8_lossy(&data[3..11])
        )));
    }

    let boot = unsafe { std::ptr::read_unaligned(data.as_ptr() as *const BootSectorRaw) };

    let bytes_per_sector = boot.bytes_per_sector as u32;
    if !(256..=4096).contains(&bytes_per_sector) || !bytes_per_sector.is_power_of_two() {
        return Err(LodestoneError::InvalidBootSector(format!(
            "{} bytes per sector",
            bytes_per_sector
        )));
    }
    let sectors_per_cluster = boot.sectors_per_cluster as u32;
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(LodestoneError::InvalidBootSector(format!(
            "{} sectors per cluster",
            sectors_per_cluster
        )));
    }
    let cluster_size = bytes_per_sector as u64 * sectors_per_cluster as u64;

    let total_sectors = boot.total_sectors;
    if total_sectors == 0 {
        return Err(LodestoneError::InvalidBootSector(
            "zero total sectors".to_string(),
        ));
    }
    let total_clusters = total_sectors * bytes_per_sector as u64 / cluster_size;

    let mft_cluster = boot.mft_cluster;
    let mirror_mft_cluster = boot.mirror_mft_cluster;
    if mft_cluster >= total_clusters {
        return Err(LodestoneError::InvalidBootSector(format!(
            "MFT at cluster {} on a {}-cluster volume",
            mft_cluster, total_clusters
        )));
    }

    let mft_entry_size = decode_record_size(boot.mft_entry_size, cluster_size)?;
    if mft_entry_size < 42 || mft_entry_size as u64 % bytes_per_sector as u64 != 0 {
        return Err(LodestoneError::InvalidBootSector(format!(
            "MFT entry size of {} bytes",
            mft_entry_size
        )));
    }
    let index_entry_size = decode_record_size(boot.index_entry_size, cluster_size)?;

    debug!(
        "boot sector: {} bytes/sector, {} bytes/cluster, MFT at cluster {}, entry size {}",
        bytes_per_sector, cluster_size, mft_cluster, mft_entry_size
    );

    Ok(VolumeGeometry {
        bytes_per_sector,
        sectors_per_cluster,
        cluster_size,
        total_sectors,
        mft_cluster,
        mirror_mft_cluster,
        mft_entry_size,
        index_entry_size,
        serial_number: boot.serial_number,
    })
}

/// Record sizes are stored as a cluster count when positive, or as
/// `1 << -value` bytes when negative.
fn decode_record_size(stored: i8, cluster_size: u64) -> Result<u32, LodestoneError> {
    let size = if stored > 0 {
        stored as u64 * cluster_size
    } else if stored < 0 && stored > -32 {
        1u64 << (-stored as u32)
    } else {
        return Err(LodestoneError::InvalidBootSector(format!(
            "record size byte {}",
            stored
        )));
    };
    if size > u32::MAX as u64 {
        return Err(LodestoneError::InvalidBootSector(format!(
            "record size of {} bytes",
            size
        )));
    }
    Ok(size as u32)
}
