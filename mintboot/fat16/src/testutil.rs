//! Host-side fixtures: an in-memory multi-drive disk and FAT16 images built
//! and inspected with `fatfs`.

extern crate std;

use std::io::{Cursor, Read, Write};
use std::string::String;
use std::vec::Vec;
use std::vec;

use gemdos_api_types::fs::DosTimestamp;

use crate::blockdev::{BlockDev, Bpb, IoError, Sector, SECTOR_SIZE};
use crate::volume::Volume;

pub const C: u16 = 2;
pub const D: u16 = 3;

const IMAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailWrites {
    Never,
    At(u32),
    /// Let this many writes through, fail the next one, then recover.
    Nth(u32),
    All,
}

pub struct MemDisks {
    pub images:      Vec<(u16, Vec<u8>)>,
    pub fail_writes: FailWrites,
    pub stamp:       DosTimestamp,
}

impl MemDisks {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            fail_writes: FailWrites::Never,
            stamp: DosTimestamp::from_parts(2024, 5, 17, 10, 30, 0),
        }
    }

    pub fn formatted(dev: u16) -> Self {
        Self::new().with_image(dev, make_image())
    }

    pub fn with_image(mut self, dev: u16, image: Vec<u8>) -> Self {
        self.images.push((dev, image));
        self
    }

    pub fn image(&self, dev: u16) -> &Vec<u8> {
        &self.images.iter().find(|(d, _)| *d == dev).expect("no such image").1
    }

    pub fn image_mut(&mut self, dev: u16) -> &mut Vec<u8> {
        &mut self.images.iter_mut().find(|(d, _)| *d == dev).expect("no such image").1
    }

    pub fn volume(&mut self, dev: u16) -> Volume {
        let bpb = self.get_bpb(dev).expect("no BPB");
        Volume::from_bpb(dev, &bpb).expect("bad geometry")
    }

    pub fn sector(&self, dev: u16, lba: u32) -> Sector {
        let off = lba as usize * SECTOR_SIZE;
        let mut out = [0u8; SECTOR_SIZE];
        out.copy_from_slice(&self.image(dev)[off..off + SECTOR_SIZE]);
        out
    }

    pub fn put_sector(&mut self, dev: u16, lba: u32, data: &Sector) {
        let off = lba as usize * SECTOR_SIZE;
        self.image_mut(dev)[off..off + SECTOR_SIZE].copy_from_slice(data);
    }
}

impl BlockDev for MemDisks {
    fn read_sector(&mut self, dev: u16, lba: u32, buf: &mut Sector) -> Result<(), IoError> {
        let image = &self.images.iter().find(|(d, _)| *d == dev).ok_or(IoError)?.1;
        let off = lba as usize * SECTOR_SIZE;
        if off + SECTOR_SIZE > image.len() {
            return Err(IoError);
        }
        buf.copy_from_slice(&image[off..off + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&mut self, dev: u16, lba: u32, buf: &Sector) -> Result<(), IoError> {
        match self.fail_writes {
            FailWrites::All => return Err(IoError),
            FailWrites::At(bad) if bad == lba => return Err(IoError),
            FailWrites::Nth(0) => {
                self.fail_writes = FailWrites::Never;
                return Err(IoError);
            }
            FailWrites::Nth(n) => self.fail_writes = FailWrites::Nth(n - 1),
            _ => {}
        }
        let image = &mut self.images.iter_mut().find(|(d, _)| *d == dev).ok_or(IoError)?.1;
        let off = lba as usize * SECTOR_SIZE;
        if off + SECTOR_SIZE > image.len() {
            return Err(IoError);
        }
        image[off..off + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn get_bpb(&mut self, dev: u16) -> Option<Bpb> {
        let image = &self.images.iter().find(|(d, _)| *d == dev)?.1;
        let mut sec = [0u8; SECTOR_SIZE];
        sec.copy_from_slice(&image[..SECTOR_SIZE]);
        Bpb::from_boot_sector(&sec)
    }

    fn now(&mut self) -> DosTimestamp {
        self.stamp
    }
}

/// A blank 16 MiB FAT16 volume with 2 KiB clusters and a 512-entry root.
pub fn make_image() -> Vec<u8> {
    let mut cursor = Cursor::new(vec![0u8; IMAGE_SIZE]);
    fatfs::format_volume(
        &mut cursor,
        fatfs::FormatVolumeOptions::new()
            .fat_type(fatfs::FatType::Fat16)
            .bytes_per_cluster(2048)
            .volume_label(*b"MINTBOOT   "),
    )
    .expect("format_volume failed");
    cursor.into_inner()
}

pub fn boot_sector(image: &[u8]) -> Sector {
    let mut sec = [0u8; SECTOR_SIZE];
    sec.copy_from_slice(&image[..SECTOR_SIZE]);
    sec
}

/// Write `content` to `path` (`/`-separated) through `fatfs`.
pub fn fatfs_write(image: &mut Vec<u8>, path: &str, content: &[u8]) {
    let mut cursor = Cursor::new(image);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).expect("FileSystem::new failed");
    let mut f = fs.root_dir().create_file(path).expect("create_file failed");
    f.truncate().unwrap();
    f.write_all(content).unwrap();
}

pub fn fatfs_mkdir(image: &mut Vec<u8>, path: &str) {
    let mut cursor = Cursor::new(image);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).expect("FileSystem::new failed");
    fs.root_dir().create_dir(path).expect("create_dir failed");
}

/// Contents of `path` as `fatfs` sees them, `None` if it does not exist.
pub fn fatfs_read(image: &mut Vec<u8>, path: &str) -> Option<Vec<u8>> {
    let mut cursor = Cursor::new(image);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).expect("FileSystem::new failed");
    let mut f = fs.root_dir().open_file(path).ok()?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).unwrap();
    Some(buf)
}

/// Names in a directory (`""` for the root), without `.` and `..`.
pub fn fatfs_list(image: &mut Vec<u8>, dir: &str) -> Vec<String> {
    let mut cursor = Cursor::new(image);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).expect("FileSystem::new failed");
    let root = fs.root_dir();
    let d = if dir.is_empty() { root } else { root.open_dir(dir).expect("open_dir failed") };
    d.iter()
        .map(|e| e.unwrap().short_file_name())
        .filter(|n| n != "." && n != "..")
        .collect()
}

pub fn fatfs_free_clusters(image: &mut Vec<u8>) -> u32 {
    let mut cursor = Cursor::new(image);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).expect("FileSystem::new failed");
    fs.stats().expect("stats failed").free_clusters()
}
