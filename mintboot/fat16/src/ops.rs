//! Path-level operations that touch directory records but no open handle.

use gemdos_api_types::GemdosError;
use gemdos_api_types::fs::{DiskInfo, FileAttributes};

use crate::blockdev::{BlockDev, SECTOR_SIZE};
use crate::dir::{LOOKUP_MASK, ROOT};
use crate::dirent::{DirEntry, DOTDOT_NAME, DOT_NAME};
use crate::engine::FatEngine;
use crate::fat::VolumeIo;

impl<D: BlockDev> VolumeIo<'_, D> {
    /// Whether `dir` is `ancestor` or lies somewhere below it.
    fn is_within(&mut self, mut dir: u32, ancestor: u32) -> Result<bool, GemdosError> {
        // A well-formed tree is never deeper than the number of clusters.
        for _ in 0..=self.vol.total_clusters {
            if dir == ancestor {
                return Ok(true);
            }
            if dir == ROOT {
                return Ok(false);
            }
            dir = self.parent_of(dir)?;
        }
        Err(GemdosError::Intrn)
    }

    /// Point the `..` record of `dir` at `parent`.
    fn relink_parent(&mut self, dir: u32, parent: u32) -> Result<(), GemdosError> {
        let (mut entry, index) = self
            .find_in_dir(dir, &DOTDOT_NAME, LOOKUP_MASK, 0)?
            .ok_or(GemdosError::Intrn)?;
        entry.cluster = parent as u16;
        self.write_dirent(dir, index, &entry)
    }
}

impl<D: BlockDev> FatEngine<D> {
    /// `Fdelete`: remove a regular file and release its clusters.
    pub fn fdelete(&mut self, path: &str) -> Result<(), GemdosError> {
        let r = self.resolve(path)?;
        let name = r.plain_name()?;
        let (entry, index) = self
            .io(r.dev)?
            .find_in_dir(r.dir, &name, LOOKUP_MASK, 0)?
            .ok_or(GemdosError::Filnf)?;
        if entry.is_dir() || entry.is_read_only() {
            return Err(GemdosError::Accdn);
        }
        self.ensure_closed(r.dev, r.dir, index)?;

        let mut io = self.io(r.dev)?;
        // Unlink first: a crash in between leaks clusters instead of
        // leaving a record that points at free space.
        io.mark_deleted(r.dir, index)?;
        if entry.cluster >= 2 {
            io.free_chain(entry.cluster as u32)?;
        }
        Ok(())
    }

    /// `Frename`: rename or move a file or directory on one drive.
    pub fn frename(&mut self, old: &str, new: &str) -> Result<(), GemdosError> {
        let src = self.resolve(old)?;
        let dst = self.resolve(new)?;
        if src.dev != dst.dev {
            return Err(GemdosError::Nsame);
        }
        let src_name = src.plain_name()?;
        let dst_name = dst.plain_name()?;

        let (entry, index) = self
            .io(src.dev)?
            .find_in_dir(src.dir, &src_name, LOOKUP_MASK, 0)?
            .ok_or(GemdosError::Filnf)?;
        if entry.is_read_only() || entry.is_dot() || entry.is_dotdot() {
            return Err(GemdosError::Accdn);
        }
        self.ensure_closed(src.dev, src.dir, index)?;

        let mut io = self.io(src.dev)?;
        if io.find_in_dir(dst.dir, &dst_name, LOOKUP_MASK, 0)?.is_some() {
            return Err(GemdosError::Exist);
        }

        let mut moved = entry;
        moved.name = dst_name;
        if src.dir == dst.dir {
            return io.write_dirent(src.dir, index, &moved);
        }

        let subdir = entry.is_dir() && entry.cluster >= 2;
        if subdir && io.is_within(dst.dir, entry.cluster as u32)? {
            return Err(GemdosError::Accdn);
        }
        let slot = io.find_free_entry(dst.dir)?;
        io.write_dirent(dst.dir, slot, &moved)?;
        io.mark_deleted(src.dir, index)?;
        if subdir {
            io.relink_parent(entry.cluster as u32, dst.dir)?;
        }
        Ok(())
    }

    /// `Fattrib`: attributes of `path`. Changing them is not supported.
    pub fn fattrib(&mut self, path: &str, set: Option<FileAttributes>) -> Result<FileAttributes, GemdosError> {
        let r = self.resolve(path)?;
        let name = r.plain_name()?;
        let mut io = self.io(r.dev)?;
        let (entry, _) = io
            .find_in_dir(r.dir, &name, LOOKUP_MASK, 0)?
            .ok_or(GemdosError::Filnf)?;
        if set.is_some() {
            return Err(GemdosError::Accdn);
        }
        Ok(entry.attr)
    }

    /// `Dcreate`: make an empty directory.
    pub fn dcreate(&mut self, path: &str) -> Result<(), GemdosError> {
        let r = self.resolve(path)?;
        let name = r.plain_name().map_err(|_| GemdosError::Pthnf)?;
        let mut io = self.io(r.dev)?;
        if io.find_in_dir(r.dir, &name, LOOKUP_MASK, 0)?.is_some() {
            return Err(GemdosError::Accdn);
        }
        let index = io.find_free_entry(r.dir)?;
        let cluster = io.extend_chain(0)?;
        let stamp = io.disk.now();

        // `.` and `..` go out before the parent learns about the directory.
        let dot = DirEntry::new(DOT_NAME, FileAttributes::DIRECTORY, stamp, cluster as u16, 0);
        let dotdot = DirEntry::new(DOTDOT_NAME, FileAttributes::DIRECTORY, stamp, r.dir as u16, 0);
        let record = DirEntry::new(name, FileAttributes::DIRECTORY, stamp, cluster as u16, 0);
        let written = io
            .write_dirent(cluster, 0, &dot)
            .and_then(|()| io.write_dirent(cluster, 1, &dotdot))
            .and_then(|()| io.write_dirent(r.dir, index, &record));
        if written.is_err() {
            let _ = io.free_chain(cluster);
        }
        written
    }

    /// `Ddelete`: remove an empty directory.
    pub fn ddelete(&mut self, path: &str) -> Result<(), GemdosError> {
        let r = self.resolve(path)?;
        let name = r.plain_name().map_err(|_| GemdosError::Pthnf)?;
        let mut io = self.io(r.dev)?;
        let (entry, index) = io
            .find_in_dir(r.dir, &name, LOOKUP_MASK, 0)?
            .ok_or(GemdosError::Pthnf)?;
        if !entry.is_dir() || entry.is_read_only() || entry.is_dot() || entry.is_dotdot() {
            return Err(GemdosError::Accdn);
        }
        let cluster = entry.cluster as u32;
        if cluster >= 2 && !io.is_dir_empty(cluster)? {
            return Err(GemdosError::Accdn);
        }
        io.mark_deleted(r.dir, index)?;
        if cluster >= 2 {
            io.free_chain(cluster)?;
        }
        Ok(())
    }

    /// `Dfree`: cluster counts and geometry of `dev`.
    pub fn dfree(&mut self, dev: u16) -> Result<DiskInfo, GemdosError> {
        let mut io = self.io(dev)?;
        let free_clusters = io.count_free()?;
        Ok(DiskInfo {
            free_clusters,
            total_clusters: io.vol.total_clusters,
            bytes_per_sector: SECTOR_SIZE as u32,
            sectors_per_cluster: io.vol.spc,
        })
    }
}
