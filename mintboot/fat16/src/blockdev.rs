//! Collaborators the engine is parameterised over.
//!
//! Sector I/O and the BIOS parameter block come from the boot ROM or a
//! hardware driver; the engine never touches a device any other way.

use bitflags::bitflags;
use gemdos_api_types::GemdosError;
use gemdos_api_types::fs::DosTimestamp;

pub const SECTOR_SIZE: usize = 512;

pub type Sector = [u8; SECTOR_SIZE];

/// A failed sector transfer. Retry policy belongs to the driver, so the
/// engine only needs to know that it happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoError;

impl From<IoError> for GemdosError {
    fn from(_: IoError) -> Self {
        GemdosError::Accdn
    }
}

pub trait BlockDev {
    fn read_sector(&mut self, dev: u16, lba: u32, buf: &mut Sector) -> Result<(), IoError>;
    fn write_sector(&mut self, dev: u16, lba: u32, buf: &Sector) -> Result<(), IoError>;

    /// Geometry of the medium in `dev`, or `None` if there is no such drive.
    fn get_bpb(&mut self, dev: u16) -> Option<Bpb>;

    /// Current DOS time and date for new and modified directory entries.
    fn now(&mut self) -> DosTimestamp {
        DosTimestamp::default()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BpbFlags: u16 {
        /// FAT entries are 16 bits wide.
        const FAT16   = 1 << 0;
        /// Only one FAT copy on the medium.
        const ONE_FAT = 1 << 1;
    }
}

/// Atari-style BIOS parameter block, as handed out by `Getbpb`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bpb {
    /// Bytes per sector.
    pub recsiz: u32,
    /// Sectors per cluster.
    pub clsiz:  u32,
    /// Bytes per cluster.
    pub clsizb: u32,
    /// Root directory length in sectors.
    pub rdlen:  u32,
    /// FAT length in sectors.
    pub fsiz:   u32,
    /// First sector of the second FAT.
    pub fatrec: u32,
    /// First data sector.
    pub datrec: u32,
    /// Number of data clusters.
    pub numcl:  u32,
    pub bflags: BpbFlags,
}

const MIN_FAT16_CLUSTERS: u32 = 4085;
pub(crate) const MAX_FAT16_CLUSTERS: u32 = 65524;

impl Bpb {
    /// Derive the BPB from a DOS boot sector the way the ROM does for hard
    /// disk partitions. FAT32 boot sectors (16-bit FAT size of zero) are
    /// rejected.
    pub fn from_boot_sector(sec: &Sector) -> Option<Self> {
        let le16 = |off: usize| u16::from_le_bytes([sec[off], sec[off + 1]]) as u32;
        let le32 = |off: usize| u32::from_le_bytes([sec[off], sec[off + 1], sec[off + 2], sec[off + 3]]);

        let recsiz       = le16(11);
        let clsiz        = sec[13] as u32;
        let reserved     = le16(14);
        let nfats        = sec[16] as u32;
        let root_entries = le16(17);
        let fsiz         = le16(22);
        let total = match le16(19) {
            0 => le32(32),
            n => n,
        };

        if recsiz == 0 || clsiz == 0 || fsiz == 0 || !(1..=2).contains(&nfats) {
            return None;
        }

        let rdlen  = (root_entries * 32).div_ceil(recsiz);
        let fatrec = reserved + fsiz;
        let datrec = reserved + nfats * fsiz + rdlen;
        if total <= datrec {
            return None;
        }

        // The FAT may describe fewer clusters than the partition could hold.
        let fat_capacity = (fsiz * recsiz / 2).saturating_sub(2);
        let numcl = ((total - datrec) / clsiz).min(fat_capacity);

        let mut bflags = BpbFlags::empty();
        if (MIN_FAT16_CLUSTERS..=MAX_FAT16_CLUSTERS).contains(&numcl) {
            bflags |= BpbFlags::FAT16;
        }
        if nfats == 1 {
            bflags |= BpbFlags::ONE_FAT;
        }

        Some(Self {
            recsiz,
            clsiz,
            clsizb: recsiz * clsiz,
            rdlen,
            fsiz,
            fatrec,
            datrec,
            numcl,
            bflags,
        })
    }

    pub fn fat_copies(&self) -> u32 {
        if self.bflags.contains(BpbFlags::ONE_FAT) { 1 } else { 2 }
    }
}
