//! Mounted-volume descriptors and the small pool that caches them.

use gemdos_api_types::{GemdosError, MAX_DRIVES};

use crate::blockdev::{Bpb, BpbFlags, MAX_FAT16_CLUSTERS, SECTOR_SIZE};
use crate::dirent::DIRENT_SIZE;

/// Number of volumes kept mounted at once.
pub const MAX_VOLUMES: usize = 8;

/// Geometry of one mounted FAT16 volume, all in 512-byte sectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Volume {
    pub dev:            u16,
    pub spc:            u32,
    pub fat_copies:     u32,
    pub fat_start:      u32,
    pub fat_size:       u32,
    pub root_start:     u32,
    pub root_sectors:   u32,
    pub data_start:     u32,
    pub total_clusters: u32,
}

impl Volume {
    pub fn from_bpb(dev: u16, bpb: &Bpb) -> Result<Self, GemdosError> {
        if bpb.recsiz as usize != SECTOR_SIZE
            || bpb.clsiz == 0
            || bpb.fsiz == 0
            || bpb.rdlen == 0
            || bpb.datrec == 0
            || bpb.numcl == 0
            || bpb.numcl > MAX_FAT16_CLUSTERS
        {
            return Err(GemdosError::Drive);
        }
        if !bpb.bflags.contains(BpbFlags::FAT16) {
            return Err(GemdosError::Drive);
        }

        let fat_copies = bpb.fat_copies();
        let root_start = bpb
            .datrec
            .checked_sub(bpb.rdlen)
            .ok_or(GemdosError::Drive)?;
        let fat_start = fat_copies
            .checked_mul(bpb.fsiz)
            .and_then(|fats| root_start.checked_sub(fats))
            .ok_or(GemdosError::Drive)?;

        let vol = Self {
            dev,
            spc: bpb.clsiz,
            fat_copies,
            fat_start,
            fat_size: bpb.fsiz,
            root_start,
            root_sectors: bpb.rdlen,
            data_start: bpb.datrec,
            total_clusters: bpb.numcl,
        };
        // Cluster numbers must fit the FAT and a 16-bit entry.
        if !vol.fat_covers_clusters() {
            return Err(GemdosError::Drive);
        }
        Ok(vol)
    }

    pub fn cluster_bytes(&self) -> u32 {
        self.spc * SECTOR_SIZE as u32
    }

    pub fn root_entries(&self) -> u32 {
        self.root_sectors * (SECTOR_SIZE / DIRENT_SIZE) as u32
    }

    pub fn entries_per_cluster(&self) -> u32 {
        self.cluster_bytes() / DIRENT_SIZE as u32
    }

    pub fn max_cluster(&self) -> u32 {
        self.total_clusters + 1
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        (2..=self.max_cluster()).contains(&cluster)
    }

    /// First sector of `cluster`; anything below 2 maps to sector 0 and must
    /// not be used for data I/O.
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        if cluster < 2 {
            return 0;
        }
        self.data_start + (cluster - 2) * self.spc
    }

    /// Whether the FAT is large enough to hold an entry for every cluster.
    pub fn fat_covers_clusters(&self) -> bool {
        self.fat_size as u64 * (SECTOR_SIZE as u64 / 2) >= self.total_clusters as u64 + 2
    }
}

/// Index of a slot in the volume pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeId(u8);

/// Fixed pool of mounted volumes with round-robin replacement.
pub(crate) struct VolumeTable {
    slots:   [Option<Volume>; MAX_VOLUMES],
    by_dev:  [Option<VolumeId>; MAX_DRIVES as usize],
    victim:  usize,
}

impl VolumeTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_VOLUMES],
            by_dev: [None; MAX_DRIVES as usize],
            victim: 0,
        }
    }

    pub fn lookup(&self, dev: u16) -> Option<VolumeId> {
        self.by_dev.get(dev as usize).copied().flatten()
    }

    pub fn get(&self, id: VolumeId) -> Option<&Volume> {
        self.slots[id.0 as usize].as_ref()
    }

    /// Store `vol`, taking a free slot or replacing the oldest entry.
    pub fn insert(&mut self, vol: Volume) -> VolumeId {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(i) => i,
            None => {
                let i = self.victim;
                self.victim = (self.victim + 1) % MAX_VOLUMES;
                i
            }
        };
        if let Some(old) = self.slots[slot].take() {
            self.by_dev[old.dev as usize] = None;
        }
        let id = VolumeId(slot as u8);
        self.slots[slot] = Some(vol);
        self.by_dev[vol.dev as usize] = Some(id);
        id
    }

    pub fn remove(&mut self, dev: u16) -> Option<Volume> {
        let id = self.by_dev.get_mut(dev as usize)?.take()?;
        self.slots[id.0 as usize].take()
    }

    pub fn mounted(&self) -> impl Iterator<Item = &Volume> {
        self.slots.iter().flatten()
    }
}
