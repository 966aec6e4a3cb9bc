//! FAT16 chain management and raw sector access for one volume.

use core::ops::ControlFlow;

use gemdos_api_types::GemdosError;
use log::{debug, warn};

use crate::blockdev::{BlockDev, IoError, Sector, SECTOR_SIZE};
use crate::volume::Volume;

pub const FAT_FREE:     u16 = 0x0000;
pub const FAT_RESERVED: u16 = 0x0001;
pub const FAT_BAD_MIN:  u16 = 0xFFF0;
pub const FAT_EOC_MIN:  u16 = 0xFFF8;
pub const FAT_EOC:      u16 = 0xFFFF;

const ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 2) as u32;

pub fn is_eoc(value: u16) -> bool {
    value >= FAT_EOC_MIN
}

/// Reserved and bad-cluster markers, never valid as a chain link.
pub fn is_reserved(value: u16) -> bool {
    value == FAT_RESERVED || (FAT_BAD_MIN..FAT_EOC_MIN).contains(&value)
}

/// A volume's geometry paired with the device that holds it.
pub(crate) struct VolumeIo<'a, D: BlockDev> {
    pub disk: &'a mut D,
    pub vol:  Volume,
}

impl<'a, D: BlockDev> VolumeIo<'a, D> {
    pub fn new(disk: &'a mut D, vol: Volume) -> Self {
        Self { disk, vol }
    }

    pub fn read(&mut self, lba: u32, buf: &mut Sector) -> Result<(), IoError> {
        self.disk.read_sector(self.vol.dev, lba, buf)
    }

    pub fn write(&mut self, lba: u32, buf: &Sector) -> Result<(), IoError> {
        self.disk.write_sector(self.vol.dev, lba, buf)
    }

    /// Sector within one FAT copy and byte offset within that sector.
    fn fat_position(cluster: u32) -> (u32, usize) {
        let offset = cluster * 2;
        (offset / SECTOR_SIZE as u32, (offset % SECTOR_SIZE as u32) as usize)
    }

    /// Entry for `cluster` from the first FAT copy. A failed read yields an
    /// end-of-chain marker so walkers stop.
    pub fn read_fat(&mut self, cluster: u32) -> u16 {
        let (sector, off) = Self::fat_position(cluster);
        let mut buf = [0u8; SECTOR_SIZE];
        if self.read(self.vol.fat_start + sector, &mut buf).is_err() {
            debug!("dev {} FAT read failed for cluster {cluster}", self.vol.dev);
            return FAT_EOC;
        }
        u16::from_le_bytes([buf[off], buf[off + 1]])
    }

    /// Patch one FAT copy, returning the value it held before.
    fn patch_fat_copy(&mut self, lba: u32, off: usize, value: u16) -> Result<u16, IoError> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.read(lba, &mut buf)?;
        let old = u16::from_le_bytes([buf[off], buf[off + 1]]);
        buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
        self.write(lba, &buf)?;
        Ok(old)
    }

    /// Store `value` for `cluster` in every FAT copy. If a later copy fails,
    /// the copies already written are put back to their previous value.
    pub fn write_fat(&mut self, cluster: u32, value: u16) -> Result<(), GemdosError> {
        let (sector, off) = Self::fat_position(cluster);
        let mut previous = [FAT_FREE; 2];
        let copies = self.vol.fat_copies.min(2);

        for copy in 0..copies {
            let lba = self.vol.fat_start + copy * self.vol.fat_size + sector;
            match self.patch_fat_copy(lba, off, value) {
                Ok(old) => previous[copy as usize] = old,
                Err(e) => {
                    warn!("dev {} FAT copy {copy} write failed for cluster {cluster}", self.vol.dev);
                    for undo in 0..copy {
                        let lba = self.vol.fat_start + undo * self.vol.fat_size + sector;
                        if self.patch_fat_copy(lba, off, previous[undo as usize]).is_err() {
                            warn!("dev {} FAT copy {undo} left inconsistent", self.vol.dev);
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Successor of `cluster` if it is a usable link.
    pub fn next_cluster(&mut self, cluster: u32) -> Option<u32> {
        let next = self.read_fat(cluster);
        if next == FAT_FREE || is_eoc(next) || is_reserved(next) {
            return None;
        }
        let next = next as u32;
        self.vol.is_valid_cluster(next).then_some(next)
    }

    /// Visit every FAT entry from cluster 2 to the last data cluster, one FAT
    /// sector at a time.
    pub fn scan_fat<F>(&mut self, mut f: F) -> Result<(), GemdosError>
    where
        F: FnMut(u32, u16) -> ControlFlow<()>,
    {
        let max = self.vol.max_cluster();
        let last_sector = max / ENTRIES_PER_SECTOR;
        let mut buf = [0u8; SECTOR_SIZE];
        for sector in 0..=last_sector.min(self.vol.fat_size - 1) {
            self.read(self.vol.fat_start + sector, &mut buf)?;
            for i in 0..ENTRIES_PER_SECTOR {
                let cluster = sector * ENTRIES_PER_SECTOR + i;
                if cluster < 2 {
                    continue;
                }
                if cluster > max {
                    return Ok(());
                }
                let off = i as usize * 2;
                if let ControlFlow::Break(()) = f(cluster, u16::from_le_bytes([buf[off], buf[off + 1]])) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Reserve the lowest free cluster by marking it end-of-chain.
    /// `None` means the volume is full (or the FAT is unreadable).
    pub fn alloc_cluster(&mut self) -> Option<u32> {
        let mut found = None;
        let scanned = self.scan_fat(|cluster, value| {
            if value == FAT_FREE {
                found = Some(cluster);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if scanned.is_err() {
            debug!("dev {} FAT scan failed during allocation", self.vol.dev);
            return None;
        }
        let cluster = found?;
        self.write_fat(cluster, FAT_EOC).ok()?;
        Some(cluster)
    }

    /// Release every cluster of the chain starting at `start`. Stops quietly
    /// at an entry that is already free.
    pub fn free_chain(&mut self, start: u32) -> Result<(), GemdosError> {
        let mut cluster = start;
        for _ in 0..self.vol.total_clusters {
            if !self.vol.is_valid_cluster(cluster) {
                break;
            }
            let next = self.read_fat(cluster);
            if next == FAT_FREE {
                break;
            }
            self.write_fat(cluster, FAT_FREE)?;
            if is_eoc(next) || is_reserved(next) {
                break;
            }
            cluster = next as u32;
        }
        Ok(())
    }

    pub fn zero_cluster(&mut self, cluster: u32) -> Result<(), GemdosError> {
        let zero = [0u8; SECTOR_SIZE];
        let first = self.vol.cluster_to_sector(cluster);
        for s in 0..self.vol.spc {
            self.write(first + s, &zero)?;
        }
        Ok(())
    }

    /// Allocate a zero-filled cluster and link it after `last` (0 starts a
    /// new chain).
    pub fn extend_chain(&mut self, last: u32) -> Result<u32, GemdosError> {
        let cluster = self.alloc_cluster().ok_or(GemdosError::Accdn)?;
        if let Err(e) = self.zero_cluster(cluster) {
            let _ = self.write_fat(cluster, FAT_FREE);
            return Err(e);
        }
        if last != 0 {
            if let Err(e) = self.write_fat(last, cluster as u16) {
                let _ = self.write_fat(cluster, FAT_FREE);
                return Err(e);
            }
        }
        Ok(cluster)
    }

    /// Last cluster of the chain starting at `start`.
    pub fn chain_last(&mut self, start: u32) -> u32 {
        let mut cluster = start;
        for _ in 0..self.vol.total_clusters {
            match self.next_cluster(cluster) {
                Some(next) => cluster = next,
                None => break,
            }
        }
        cluster
    }

    pub fn count_free(&mut self) -> Result<u32, GemdosError> {
        let mut free = 0;
        self.scan_fat(|_, value| {
            if value == FAT_FREE {
                free += 1;
            }
            ControlFlow::Continue(())
        })?;
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemDisks, FailWrites, C};

    fn io(disks: &mut MemDisks) -> VolumeIo<'_, MemDisks> {
        let vol = disks.volume(C);
        VolumeIo::new(disks, vol)
    }

    #[test]
    fn markers() {
        assert!(is_eoc(0xFFF8) && is_eoc(0xFFFF));
        assert!(!is_eoc(0xFFF7));
        assert!(is_reserved(0x0001) && is_reserved(0xFFF0) && is_reserved(0xFFF7));
        assert!(!is_reserved(0x0000) && !is_reserved(0x0002) && !is_reserved(0xFFF8));
    }

    #[test]
    fn alloc_reserves_lowest_free_cluster() {
        let mut disks = MemDisks::formatted(C);
        let mut io = io(&mut disks);
        let a = io.alloc_cluster().unwrap();
        assert_eq!(a, 2);
        assert_eq!(io.read_fat(a), FAT_EOC);
        let b = io.alloc_cluster().unwrap();
        assert_eq!(b, 3);
    }

    #[test]
    fn write_fat_updates_every_copy() {
        let mut disks = MemDisks::formatted(C);
        let vol = disks.volume(C);
        {
            let mut io = VolumeIo::new(&mut disks, vol);
            io.write_fat(10, 0x1234).unwrap();
        }
        let first = disks.sector(C, vol.fat_start);
        let second = disks.sector(C, vol.fat_start + vol.fat_size);
        assert_eq!(&first[20..22], &[0x34, 0x12]);
        assert_eq!(&second[20..22], &[0x34, 0x12]);
    }

    #[test]
    fn write_fat_rolls_back_on_second_copy_failure() {
        let mut disks = MemDisks::formatted(C);
        let vol = disks.volume(C);
        disks.fail_writes = FailWrites::At(vol.fat_start + vol.fat_size);
        {
            let mut io = VolumeIo::new(&mut disks, vol);
            assert_eq!(io.write_fat(10, 0x1234), Err(GemdosError::Accdn));
            assert_eq!(io.read_fat(10), FAT_FREE);
        }
        disks.fail_writes = FailWrites::Never;
        let first = disks.sector(C, vol.fat_start);
        assert_eq!(&first[20..22], &[0, 0]);
    }

    #[test]
    fn extend_chain_releases_cluster_when_link_fails() {
        let mut disks = MemDisks::formatted(C);
        let vol = disks.volume(C);
        let mut io = VolumeIo::new(&mut disks, vol);
        // Fill the first FAT sector so the new cluster lands in the second.
        for c in 2..300 {
            io.write_fat(c, FAT_EOC).unwrap();
        }
        io.disk.fail_writes = FailWrites::At(vol.fat_start);
        assert_eq!(io.extend_chain(10), Err(GemdosError::Accdn));
        io.disk.fail_writes = FailWrites::Never;
        assert_eq!(io.read_fat(10), FAT_EOC);
        assert_eq!(io.read_fat(300), FAT_FREE);
    }

    #[test]
    fn free_and_count() {
        let mut disks = MemDisks::formatted(C);
        let mut io = io(&mut disks);
        let before = io.count_free().unwrap();
        let a = io.extend_chain(0).unwrap();
        let b = io.extend_chain(a).unwrap();
        let c = io.extend_chain(b).unwrap();
        assert_eq!(io.next_cluster(a), Some(b));
        assert_eq!(io.chain_last(a), c);
        assert_eq!(io.count_free().unwrap(), before - 3);
        io.free_chain(a).unwrap();
        assert_eq!(io.count_free().unwrap(), before);
        // Already free: nothing to do, no error.
        io.free_chain(a).unwrap();
    }

    #[test]
    fn free_chain_stops_at_reserved_link() {
        let mut disks = MemDisks::formatted(C);
        let mut io = io(&mut disks);
        io.write_fat(5, 6).unwrap();
        io.write_fat(6, 0xFFF7).unwrap();
        io.free_chain(5).unwrap();
        assert_eq!(io.read_fat(5), FAT_FREE);
        assert_eq!(io.read_fat(6), FAT_FREE);
    }

    #[test]
    fn full_volume_allocates_nothing() {
        let mut disks = MemDisks::formatted(C);
        let mut io = io(&mut disks);
        let max = io.vol.max_cluster();
        for c in 2..=max {
            io.write_fat(c, FAT_EOC).unwrap();
        }
        assert_eq!(io.alloc_cluster(), None);
        assert_eq!(io.count_free().unwrap(), 0);
        assert_eq!(io.extend_chain(0), Err(GemdosError::Accdn));
    }

    #[test]
    fn new_cluster_is_zeroed() {
        let mut disks = MemDisks::formatted(C);
        let vol = disks.volume(C);
        // Dirty the first data cluster before it is allocated.
        let lba = vol.cluster_to_sector(2);
        disks.put_sector(C, lba, &[0xAA; SECTOR_SIZE]);
        let mut io = VolumeIo::new(&mut disks, vol);
        let c = io.extend_chain(0).unwrap();
        assert_eq!(c, 2);
        let mut buf = [0xFFu8; SECTOR_SIZE];
        io.read(lba, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
