//! Directory engine: locating, scanning and mutating directory records, and
//! turning GEMDOS paths into (drive, directory, 8.3 name).

use gemdos_api_types::fs::FileAttributes;
use gemdos_api_types::{GemdosError, drive_from_letter};
use log::debug;

use crate::blockdev::{BlockDev, SECTOR_SIZE};
use crate::dirent::{self, DirEntry, DIRENT_SIZE, DOTDOT_NAME};
use crate::engine::FatEngine;
use crate::fat::VolumeIo;

/// Directory cluster value that denotes the fixed root region.
pub const ROOT: u32 = 0;

const ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / DIRENT_SIZE) as u32;

/// Attribute mask for internal lookups: everything but volume labels.
pub(crate) const LOOKUP_MASK: FileAttributes = FileAttributes::HIDDEN
    .union(FileAttributes::SYSTEM)
    .union(FileAttributes::DIRECTORY);

/// Result of path resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub dev:  u16,
    pub dir:  u32,
    pub name: [u8; 11],
}

impl Resolved {
    pub fn is_wild(&self) -> bool {
        dirent::is_wild(&self.name)
    }

    /// Path named a directory itself (`C:\`, `C:\FOO\..`).
    pub fn is_blank(&self) -> bool {
        self.name[0] == b' '
    }

    /// The final segment as a concrete, non-wildcard name.
    pub fn plain_name(&self) -> Result<[u8; 11], GemdosError> {
        if self.is_blank() || self.is_wild() {
            return Err(GemdosError::Filnf);
        }
        Ok(self.name)
    }
}

impl<D: BlockDev> VolumeIo<'_, D> {
    /// Sector and byte offset of record `index` of directory `dir`, or `None`
    /// past the end of the root region or of the directory's chain.
    pub fn dirent_location(&mut self, dir: u32, index: u32) -> Option<(u32, usize)> {
        let within_sector = ((index % ENTRIES_PER_SECTOR) as usize) * DIRENT_SIZE;
        if dir == ROOT {
            if index >= self.vol.root_entries() {
                return None;
            }
            return Some((self.vol.root_start + index / ENTRIES_PER_SECTOR, within_sector));
        }
        if !self.vol.is_valid_cluster(dir) {
            return None;
        }
        let per_cluster = self.vol.entries_per_cluster();
        let mut cluster = dir;
        for _ in 0..index / per_cluster {
            cluster = self.next_cluster(cluster)?;
        }
        let in_cluster = index % per_cluster;
        Some((self.vol.cluster_to_sector(cluster) + in_cluster / ENTRIES_PER_SECTOR, within_sector))
    }

    /// Record `index` of `dir`; `Ok(None)` when the directory has no such slot.
    pub fn read_dirent(&mut self, dir: u32, index: u32) -> Result<Option<DirEntry>, GemdosError> {
        let Some((lba, off)) = self.dirent_location(dir, index) else {
            return Ok(None);
        };
        let mut buf = [0u8; SECTOR_SIZE];
        self.read(lba, &mut buf)?;
        let mut raw = [0u8; DIRENT_SIZE];
        raw.copy_from_slice(&buf[off..off + DIRENT_SIZE]);
        Ok(Some(DirEntry::decode(&raw)))
    }

    /// Read-modify-write of one record.
    pub fn write_dirent(&mut self, dir: u32, index: u32, entry: &DirEntry) -> Result<(), GemdosError> {
        let (lba, off) = self.dirent_location(dir, index).ok_or(GemdosError::Intrn)?;
        let mut buf = [0u8; SECTOR_SIZE];
        self.read(lba, &mut buf)?;
        buf[off..off + DIRENT_SIZE].copy_from_slice(&entry.encode());
        self.write(lba, &buf)?;
        Ok(())
    }

    pub fn mark_deleted(&mut self, dir: u32, index: u32) -> Result<(), GemdosError> {
        let mut entry = self.read_dirent(dir, index)?.ok_or(GemdosError::Intrn)?;
        entry.name[0] = dirent::ENTRY_DELETED;
        self.write_dirent(dir, index, &entry)
    }

    /// First live record at or after `start` whose name matches `pattern`.
    ///
    /// Hidden, system, directory and label entries are only returned when
    /// `mask` asks for each of the bits they carry.
    pub fn find_in_dir(
        &mut self,
        dir: u32,
        pattern: &[u8; 11],
        mask: FileAttributes,
        start: u32,
    ) -> Result<Option<(DirEntry, u32)>, GemdosError> {
        let mut index = start;
        loop {
            let entry = match self.read_dirent(dir, index) {
                Ok(Some(e)) => e,
                Ok(None) => return Ok(None),
                Err(_) => {
                    debug!("dev {} directory {dir} unreadable at {index}", self.vol.dev);
                    return Err(GemdosError::Filnf);
                }
            };
            if entry.is_end() {
                return Ok(None);
            }
            let gated = entry.attr & FileAttributes::SEARCH_GATED;
            if entry.is_live() && mask.contains(gated) && dirent::match_83(&entry.name, pattern) {
                return Ok(Some((entry, index)));
            }
            index += 1;
        }
    }

    /// Index of the first reusable slot, growing a subdirectory by one
    /// cluster when it is full. The root region cannot grow.
    pub fn find_free_entry(&mut self, dir: u32) -> Result<u32, GemdosError> {
        let mut index = 0;
        loop {
            match self.read_dirent(dir, index)? {
                Some(e) if e.is_end() || e.is_deleted() => return Ok(index),
                Some(_) => index += 1,
                None if dir == ROOT => return Err(GemdosError::Accdn),
                None => {
                    let last = self.chain_last(dir);
                    self.extend_chain(last)?;
                    return Ok(index);
                }
            }
        }
    }

    /// Whether `dir` holds nothing but its `.` and `..` records.
    pub fn is_dir_empty(&mut self, dir: u32) -> Result<bool, GemdosError> {
        let mut index = 0;
        while let Some(e) = self.read_dirent(dir, index)? {
            if e.is_end() {
                break;
            }
            if e.is_live() && !e.is_dot() && !e.is_dotdot() {
                return Ok(false);
            }
            index += 1;
        }
        Ok(true)
    }

    /// Cluster of the directory containing `dir` (root for top-level ones).
    pub fn parent_of(&mut self, dir: u32) -> Result<u32, GemdosError> {
        if dir == ROOT {
            return Ok(ROOT);
        }
        match self.find_in_dir(dir, &DOTDOT_NAME, LOOKUP_MASK, 0)? {
            Some((e, _)) => Ok(e.cluster as u32),
            None => Err(GemdosError::Pthnf),
        }
    }
}

impl<D: BlockDev> FatEngine<D> {
    /// Split `path` into drive, containing directory and final 8.3 name.
    ///
    /// Every segment but the last has to be an existing directory and may
    /// not contain wildcards. `.` and `..` are followed; the last segment is
    /// compiled with [`dirent::pattern_83`] and may be a pattern.
    pub(crate) fn resolve(&mut self, path: &str) -> Result<Resolved, GemdosError> {
        let bytes = path.as_bytes();
        let (dev, rest) = if bytes.len() >= 2 && bytes[1] == b':' {
            let dev = drive_from_letter(bytes[0]).ok_or(GemdosError::Drive)?;
            (dev, &path[2..])
        } else {
            (self.default_drive(), path)
        };

        let mut io = self.io(dev)?;
        let mut dir = ROOT;
        let mut name = [b' '; 11];
        let mut segments = rest.split(['\\', '/']).filter(|s| !s.is_empty()).peekable();

        while let Some(seg) = segments.next() {
            let last = segments.peek().is_none();
            match seg {
                "." => continue,
                ".." => {
                    dir = io.parent_of(dir)?;
                    continue;
                }
                _ if last => {
                    name = dirent::pattern_83(seg);
                    break;
                }
                _ => {}
            }
            let pattern = dirent::pattern_83(seg);
            if dirent::is_wild(&pattern) {
                return Err(GemdosError::Filnf);
            }
            match io.find_in_dir(dir, &pattern, LOOKUP_MASK, 0) {
                Ok(Some((e, _))) if e.is_dir() => dir = e.cluster as u32,
                Ok(_) | Err(_) => return Err(GemdosError::Pthnf),
            }
        }

        Ok(Resolved { dev, dir, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::pattern_83;
    use crate::testutil::{fatfs_mkdir, fatfs_write, MemDisks, C};
    use gemdos_api_types::fs::DosTimestamp;

    fn engine_with(files: &[(&str, &[u8])], dirs: &[&str]) -> FatEngine<MemDisks> {
        let mut disks = MemDisks::formatted(C);
        for d in dirs {
            fatfs_mkdir(disks.image_mut(C), d);
        }
        for (path, content) in files {
            fatfs_write(disks.image_mut(C), path, content);
        }
        FatEngine::new(disks)
    }

    #[test]
    fn root_location_is_bounded() {
        let mut fs = engine_with(&[], &[]);
        let mut io = fs.io(C).unwrap();
        let root = io.vol.root_start;
        assert_eq!(io.dirent_location(ROOT, 0), Some((root, 0)));
        assert_eq!(io.dirent_location(ROOT, 17), Some((root + 1, 32)));
        assert_eq!(io.dirent_location(ROOT, 511), Some((root + 31, 480)));
        assert_eq!(io.dirent_location(ROOT, 512), None);
    }

    #[test]
    fn subdirectory_location_follows_chain() {
        let mut fs = engine_with(&[], &["SUB"]);
        let sub = fs.resolve("C:\\SUB\\X").unwrap().dir;
        let mut io = fs.io(C).unwrap();
        let first = io.vol.cluster_to_sector(sub);
        assert_eq!(io.dirent_location(sub, 0), Some((first, 0)));
        assert_eq!(io.dirent_location(sub, 63), Some((first + 3, 480)));
        // One-cluster directory: index 64 is past its chain.
        assert_eq!(io.dirent_location(sub, 64), None);
    }

    #[test]
    fn resolve_splits_drive_dir_and_name() {
        let mut fs = engine_with(&[("SUB/INNER.TXT", b"x")], &["SUB"]);
        let r = fs.resolve("c:\\sub\\inner.txt").unwrap();
        assert_eq!(r.dev, C);
        assert_ne!(r.dir, ROOT);
        assert_eq!(&r.name, b"INNER   TXT");

        let r2 = fs.resolve("C:/SUB/./../SUB/INNER.TXT").unwrap();
        assert_eq!(r2, r);

        let root = fs.resolve("C:\\").unwrap();
        assert_eq!(root.dir, ROOT);
        assert!(root.is_blank());
    }

    #[test]
    fn resolve_uses_default_drive() {
        let mut fs = engine_with(&[], &[]);
        assert_eq!(fs.resolve("\\A.TXT"), Err(GemdosError::Drive));
        fs.set_default_drive(C).unwrap();
        assert_eq!(fs.resolve("\\A.TXT").unwrap().dev, C);
    }

    #[test]
    fn resolve_errors() {
        let mut fs = engine_with(&[("FILE.TXT", b"x")], &["SUB"]);
        assert_eq!(fs.resolve("1:\\X"), Err(GemdosError::Drive));
        assert_eq!(fs.resolve("D:\\X"), Err(GemdosError::Drive));
        assert_eq!(fs.resolve("C:\\NOPE\\X"), Err(GemdosError::Pthnf));
        assert_eq!(fs.resolve("C:\\FILE.TXT\\X"), Err(GemdosError::Pthnf));
        assert_eq!(fs.resolve("C:\\S*\\X"), Err(GemdosError::Filnf));
        // Wildcards are fine in the last segment.
        assert!(fs.resolve("C:\\SUB\\*.*").unwrap().is_wild());
    }

    #[test]
    fn find_in_dir_gates_attributes() {
        let mut fs = engine_with(&[("PLAIN.TXT", b"x")], &["DIR.TXT"]);
        let mut io = fs.io(C).unwrap();
        let pat = pattern_83("*.TXT");
        let (e, idx) = io.find_in_dir(ROOT, &pat, FileAttributes::empty(), 0).unwrap().unwrap();
        assert_eq!(&e.name, b"PLAIN   TXT");
        assert!(io.find_in_dir(ROOT, &pat, FileAttributes::empty(), idx + 1).unwrap().is_none());

        let (d, _) = io.find_in_dir(ROOT, &pattern_83("DIR.TXT"), FileAttributes::DIRECTORY, 0).unwrap().unwrap();
        assert!(d.is_dir());
        assert!(io.find_in_dir(ROOT, &pattern_83("DIR.TXT"), FileAttributes::empty(), 0).unwrap().is_none());
    }

    #[test]
    fn free_entry_reuses_deleted_slots() {
        let mut fs = engine_with(&[("A.TXT", b"1"), ("B.TXT", b"2")], &[]);
        let mut io = fs.io(C).unwrap();
        let (_, a) = io.find_in_dir(ROOT, &pattern_83("A.TXT"), LOOKUP_MASK, 0).unwrap().unwrap();
        let end = io.find_free_entry(ROOT).unwrap();
        assert!(end > a);
        io.mark_deleted(ROOT, a).unwrap();
        assert_eq!(io.find_free_entry(ROOT).unwrap(), a);
    }

    #[test]
    fn full_subdirectory_grows() {
        let mut fs = engine_with(&[], &["SUB"]);
        let sub = fs.resolve("C:\\SUB\\X").unwrap().dir;
        let mut io = fs.io(C).unwrap();
        let per_cluster = io.vol.entries_per_cluster();
        let filler = DirEntry::new(*b"FILLER  BIN", FileAttributes::ARCHIVE, DosTimestamp::default(), 0, 0);
        for i in 2..per_cluster {
            io.write_dirent(sub, i, &filler).unwrap();
        }
        assert_eq!(io.find_free_entry(sub).unwrap(), per_cluster);
        assert!(io.next_cluster(sub).is_some());
        let grown = io.read_dirent(sub, per_cluster).unwrap().unwrap();
        assert!(grown.is_end());
    }

    #[test]
    fn full_root_is_access_denied() {
        let mut fs = engine_with(&[], &[]);
        let mut io = fs.io(C).unwrap();
        let filler = DirEntry::new(*b"FILLER  BIN", FileAttributes::ARCHIVE, DosTimestamp::default(), 0, 0);
        for i in 0..io.vol.root_entries() {
            io.write_dirent(ROOT, i, &filler).unwrap();
        }
        assert_eq!(io.find_free_entry(ROOT), Err(GemdosError::Accdn));
    }

    #[test]
    fn emptiness_ignores_dot_entries() {
        let mut fs = engine_with(&[("FULL/F.TXT", b"x")], &["EMPTY", "FULL"]);
        let empty = fs.resolve("C:\\EMPTY\\X").unwrap().dir;
        let full = fs.resolve("C:\\FULL\\X").unwrap().dir;
        let mut io = fs.io(C).unwrap();
        assert!(io.is_dir_empty(empty).unwrap());
        assert!(!io.is_dir_empty(full).unwrap());
        assert_eq!(io.parent_of(empty).unwrap(), ROOT);
    }
}
