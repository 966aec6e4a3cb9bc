use gemdos_api_types::{GemdosError, MAX_DRIVES};
use log::debug;

use crate::blockdev::BlockDev;
use crate::fat::VolumeIo;
use crate::file::HandleTable;
use crate::search::SearchTable;
use crate::volume::{Volume, VolumeTable};

/// The FAT16 engine: one instance owns the volume, open-file and search
/// pools for every drive served by `disk`.
///
/// Calls must not overlap; the trap dispatcher already serialises them.
pub struct FatEngine<D: BlockDev> {
    pub(crate) disk:     D,
    pub(crate) volumes:  VolumeTable,
    pub(crate) files:    HandleTable,
    pub(crate) searches: SearchTable,
    default_drive:       u16,
}

impl<D: BlockDev> FatEngine<D> {
    pub fn new(disk: D) -> Self {
        Self {
            disk,
            volumes: VolumeTable::new(),
            files: HandleTable::new(),
            searches: SearchTable::new(),
            default_drive: 0,
        }
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut D {
        &mut self.disk
    }

    pub fn into_disk(self) -> D {
        self.disk
    }

    /// Drive used for paths without an `X:` prefix.
    pub fn default_drive(&self) -> u16 {
        self.default_drive
    }

    pub fn set_default_drive(&mut self, dev: u16) -> Result<(), GemdosError> {
        if dev >= MAX_DRIVES {
            return Err(GemdosError::Drive);
        }
        self.default_drive = dev;
        Ok(())
    }

    /// Geometry of `dev`, mounting it from its BPB on first use.
    pub fn mount(&mut self, dev: u16) -> Result<Volume, GemdosError> {
        if dev >= MAX_DRIVES {
            return Err(GemdosError::Drive);
        }
        if let Some(vol) = self.volumes.lookup(dev).and_then(|id| self.volumes.get(id)) {
            return Ok(*vol);
        }
        let Some(bpb) = self.disk.get_bpb(dev) else {
            debug!("no BPB for dev {dev}");
            return Err(GemdosError::Drive);
        };
        let vol = Volume::from_bpb(dev, &bpb).inspect_err(|_| {
            debug!("dev {dev} rejected, BPB {bpb:?}");
        })?;
        self.volumes.insert(vol);
        Ok(vol)
    }

    /// Forget everything cached about `dev` after a media change. Open files
    /// and searches on it become invalid.
    pub fn invalidate(&mut self, dev: u16) {
        self.volumes.remove(dev);
        self.files.release_device(dev);
        self.searches.release_device(dev);
    }

    /// Volumes currently held in the mount cache.
    pub fn mounted(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.mounted()
    }

    pub(crate) fn io(&mut self, dev: u16) -> Result<VolumeIo<'_, D>, GemdosError> {
        let vol = self.mount(dev)?;
        Ok(VolumeIo::new(&mut self.disk, vol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockdev::{Bpb, IoError, Sector};
    use crate::testutil::{MemDisks, C, D};

    /// Counts BPB requests so cache hits are visible.
    struct CountingBpb {
        inner: MemDisks,
        bpb_calls: usize,
    }

    impl BlockDev for CountingBpb {
        fn read_sector(&mut self, dev: u16, lba: u32, buf: &mut Sector) -> Result<(), IoError> {
            self.inner.read_sector(dev, lba, buf)
        }
        fn write_sector(&mut self, dev: u16, lba: u32, buf: &Sector) -> Result<(), IoError> {
            self.inner.write_sector(dev, lba, buf)
        }
        fn get_bpb(&mut self, dev: u16) -> Option<Bpb> {
            self.bpb_calls += 1;
            self.inner.get_bpb(dev)
        }
    }

    #[test]
    fn mount_is_cached() {
        let mut fs = FatEngine::new(CountingBpb { inner: MemDisks::formatted(C), bpb_calls: 0 });
        let a = fs.mount(C).unwrap();
        let b = fs.mount(C).unwrap();
        assert_eq!(a, b);
        assert_eq!(fs.disk().bpb_calls, 1);
        assert_eq!(fs.mounted().count(), 1);
        fs.invalidate(C);
        assert_eq!(fs.mounted().count(), 0);
        fs.mount(C).unwrap();
        assert_eq!(fs.disk().bpb_calls, 2);
    }

    #[test]
    fn mount_unknown_drive_fails() {
        let mut fs = FatEngine::new(MemDisks::formatted(C));
        assert_eq!(fs.mount(D), Err(GemdosError::Drive));
        assert_eq!(fs.mount(MAX_DRIVES), Err(GemdosError::Drive));
    }

    #[test]
    fn out_of_range_drive_fails_before_io() {
        let mut fs = FatEngine::new(CountingBpb { inner: MemDisks::formatted(C), bpb_calls: 0 });
        assert_eq!(fs.mount(40), Err(GemdosError::Drive));
        assert_eq!(fs.disk().bpb_calls, 0);
        assert_eq!(fs.set_default_drive(30), Err(GemdosError::Drive));
    }

    #[test]
    fn blank_medium_is_not_mountable() {
        let mut fs = FatEngine::new(MemDisks::new().with_image(C, std::vec![0u8; 1024 * 1024]));
        assert_eq!(fs.mount(C), Err(GemdosError::Drive));
    }
}
