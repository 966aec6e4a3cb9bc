//! Open-file handles: byte-level read/write over cluster chains, and the
//! write-back of size and stamps into the parent directory on close.

use gemdos_api_types::GemdosError;
use gemdos_api_types::fs::{DosTimestamp, FileAttributes, OpenMode, SeekOrigin};

use crate::blockdev::{BlockDev, SECTOR_SIZE};
use crate::dir::LOOKUP_MASK;
use crate::dirent::DirEntry;
use crate::engine::FatEngine;
use crate::fat::VolumeIo;

pub const MAX_OPEN_FILES: usize = 16;

/// Handle numbers start above the standard GEMDOS handles.
pub const HANDLE_BASE: i16 = 3;

/// A GEMDOS file handle naming a slot of the open-file pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHandle(u8);

impl FileHandle {
    pub fn from_raw(raw: i32) -> Result<Self, GemdosError> {
        let slot = raw - HANDLE_BASE as i32;
        if (0..MAX_OPEN_FILES as i32).contains(&slot) {
            Ok(Self(slot as u8))
        } else {
            Err(GemdosError::Ihndl)
        }
    }

    pub fn raw(self) -> i16 {
        self.0 as i16 + HANDLE_BASE
    }

    fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct OpenFile {
    pub dev:       u16,
    pub size:      u32,
    pub start:     u32,
    pub offset:    u32,
    pub stamp:     DosTimestamp,
    pub attr:      FileAttributes,
    /// Parent directory and slot of the record to update on close.
    pub dir:       u32,
    pub dir_index: u32,
    /// Name and start cluster the record is expected to still carry.
    name:          [u8; 11],
    disk_start:    u32,
    pub writable:  bool,
    pub dirty:     bool,
    /// Stamp came from `Fdatime` and must survive later writes.
    stamp_fixed:   bool,
    /// Cluster holding chain position `hint_index`, 0 when unknown.
    hint_cluster:  u32,
    hint_index:    u32,
}

impl OpenFile {
    fn from_entry(dev: u16, entry: &DirEntry, dir: u32, dir_index: u32, writable: bool) -> Self {
        Self {
            dev,
            size: entry.size,
            start: entry.cluster as u32,
            offset: 0,
            stamp: entry.stamp(),
            attr: entry.attr,
            dir,
            dir_index,
            name: entry.name,
            disk_start: entry.cluster as u32,
            writable,
            dirty: false,
            stamp_fixed: false,
            hint_cluster: 0,
            hint_index: 0,
        }
    }

    /// Cluster and in-cluster offset of byte `offset`. With `grow`, missing
    /// clusters (including the very first) are allocated zero-filled;
    /// otherwise running off the chain is an error.
    fn locate<D: BlockDev>(
        &mut self,
        io: &mut VolumeIo<'_, D>,
        offset: u32,
        grow: bool,
    ) -> Result<(u32, u32), GemdosError> {
        let cluster_bytes = io.vol.cluster_bytes();
        let target = offset / cluster_bytes;

        if !io.vol.is_valid_cluster(self.start) {
            if !grow {
                return Err(GemdosError::Range);
            }
            self.start = io.extend_chain(0)?;
            self.hint_cluster = 0;
            self.dirty = true;
        }

        let (mut cluster, mut index) = if self.hint_cluster != 0 && self.hint_index <= target {
            (self.hint_cluster, self.hint_index)
        } else {
            (self.start, 0)
        };
        while index < target {
            cluster = match io.next_cluster(cluster) {
                Some(next) => next,
                None if grow => io.extend_chain(cluster)?,
                None => return Err(GemdosError::Range),
            };
            index += 1;
        }
        self.hint_cluster = cluster;
        self.hint_index = index;
        Ok((cluster, offset % cluster_bytes))
    }

    fn sector_of<D: BlockDev>(io: &VolumeIo<'_, D>, cluster: u32, in_cluster: u32) -> (u32, usize) {
        let lba = io.vol.cluster_to_sector(cluster) + in_cluster / SECTOR_SIZE as u32;
        (lba, (in_cluster % SECTOR_SIZE as u32) as usize)
    }

    /// Copy up to `buf.len()` bytes from the cursor. A broken chain ends the
    /// read early instead of failing it.
    fn read<D: BlockDev>(&mut self, io: &mut VolumeIo<'_, D>, buf: &mut [u8]) -> usize {
        let want = buf.len().min(self.size.saturating_sub(self.offset) as usize);
        let mut sector = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < want {
            let Ok((cluster, in_cluster)) = self.locate(io, self.offset, false) else {
                break;
            };
            let (lba, in_sector) = Self::sector_of(io, cluster, in_cluster);
            if io.read(lba, &mut sector).is_err() {
                break;
            }
            let n = (want - done).min(SECTOR_SIZE - in_sector);
            buf[done..done + n].copy_from_slice(&sector[in_sector..in_sector + n]);
            done += n;
            self.offset += n as u32;
        }
        done
    }

    /// Write one piece of `data` that stays within a single sector. A first
    /// cluster allocated for the write is given back if the write fails, so
    /// an empty file keeps owning no clusters.
    fn write_chunk<D: BlockDev>(&mut self, io: &mut VolumeIo<'_, D>, data: &[u8]) -> Result<usize, GemdosError> {
        let fresh = !io.vol.is_valid_cluster(self.start);
        let was_dirty = self.dirty;
        let result = self.put_chunk(io, data);
        if result.is_err() && fresh && io.vol.is_valid_cluster(self.start) {
            let _ = io.free_chain(self.start);
            self.start = 0;
            self.hint_cluster = 0;
            self.hint_index = 0;
            self.dirty = was_dirty;
        }
        result
    }

    fn put_chunk<D: BlockDev>(&mut self, io: &mut VolumeIo<'_, D>, data: &[u8]) -> Result<usize, GemdosError> {
        let (cluster, in_cluster) = self.locate(io, self.offset, true)?;
        let (lba, in_sector) = Self::sector_of(io, cluster, in_cluster);
        let n = data.len().min(SECTOR_SIZE - in_sector);
        let end = self.offset.checked_add(n as u32).ok_or(GemdosError::Accdn)?;

        let mut sector = [0u8; SECTOR_SIZE];
        if n < SECTOR_SIZE {
            io.read(lba, &mut sector)?;
        }
        sector[in_sector..in_sector + n].copy_from_slice(&data[..n]);
        io.write(lba, &sector)?;

        self.offset = end;
        self.size = self.size.max(end);
        Ok(n)
    }

    fn write<D: BlockDev>(&mut self, io: &mut VolumeIo<'_, D>, data: &[u8]) -> Result<usize, GemdosError> {
        if !self.writable {
            return Err(GemdosError::Accdn);
        }
        let mut done = 0;
        while done < data.len() {
            match self.write_chunk(io, &data[done..]) {
                Ok(n) => done += n,
                Err(e) if done == 0 => return Err(e),
                Err(_) => break,
            }
        }
        if done > 0 {
            self.dirty = true;
            self.attr |= FileAttributes::ARCHIVE;
            if !self.stamp_fixed {
                self.stamp = io.disk.now();
            }
        }
        Ok(done)
    }

    /// Whether `entry` is still the record this file was opened from.
    fn owns(&self, entry: &DirEntry) -> bool {
        entry.is_live() && entry.name == self.name && entry.cluster as u32 == self.disk_start
    }

    /// Copy size, start cluster, attributes and stamp back into the record
    /// this file was opened from. A slot that was freed or reused since
    /// counts as gone.
    fn write_back<D: BlockDev>(&self, io: &mut VolumeIo<'_, D>) -> Result<(), GemdosError> {
        let mut entry = io
            .read_dirent(self.dir, self.dir_index)?
            .filter(|e| self.owns(e))
            .ok_or(GemdosError::Accdn)?;
        entry.attr = self.attr;
        entry.time = self.stamp.time;
        entry.date = self.stamp.date;
        entry.cluster = self.start as u16;
        entry.size = self.size;
        io.write_dirent(self.dir, self.dir_index, &entry)
    }
}

/// Fixed pool of open files.
pub(crate) struct HandleTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl HandleTable {
    pub const fn new() -> Self {
        Self { slots: [None; MAX_OPEN_FILES] }
    }

    /// A free slot, without claiming it.
    pub fn free_slot(&self) -> Result<usize, GemdosError> {
        self.slots.iter().position(Option::is_none).ok_or(GemdosError::Nhndl)
    }

    pub fn install(&mut self, slot: usize, file: OpenFile) -> FileHandle {
        self.slots[slot] = Some(file);
        FileHandle(slot as u8)
    }

    pub fn get(&self, handle: FileHandle) -> Result<&OpenFile, GemdosError> {
        self.slots[handle.slot()].as_ref().ok_or(GemdosError::Ihndl)
    }

    pub fn get_mut(&mut self, handle: FileHandle) -> Result<&mut OpenFile, GemdosError> {
        self.slots[handle.slot()].as_mut().ok_or(GemdosError::Ihndl)
    }

    pub fn release(&mut self, handle: FileHandle) -> Result<OpenFile, GemdosError> {
        self.slots[handle.slot()].take().ok_or(GemdosError::Ihndl)
    }

    /// Whether an open file was opened from record `index` of `dir`.
    pub fn holds(&self, dev: u16, dir: u32, index: u32) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|f| f.dev == dev && f.dir == dir && f.dir_index == index)
    }

    pub fn release_device(&mut self, dev: u16) {
        for slot in self.slots.iter_mut() {
            if slot.is_some_and(|f| f.dev == dev) {
                *slot = None;
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl<D: BlockDev> FatEngine<D> {
    /// `Fopen`: open an existing regular file.
    pub fn fopen(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, GemdosError> {
        let r = self.resolve(path)?;
        let name = r.plain_name()?;
        let slot = self.files.free_slot()?;

        let mut io = self.io(r.dev)?;
        let (entry, index) = io
            .find_in_dir(r.dir, &name, LOOKUP_MASK, 0)?
            .ok_or(GemdosError::Filnf)?;
        if entry.is_dir() {
            return Err(GemdosError::Filnf);
        }
        if mode.writable() && entry.is_read_only() {
            return Err(GemdosError::Accdn);
        }

        let file = OpenFile::from_entry(r.dev, &entry, r.dir, index, mode.writable());
        Ok(self.files.install(slot, file))
    }

    /// `Fcreate`: create `path`, or truncate it if it is an existing
    /// writable file. The handle is always writable.
    pub fn fcreate(&mut self, path: &str, attr: FileAttributes) -> Result<FileHandle, GemdosError> {
        if attr.intersects(FileAttributes::DIRECTORY | FileAttributes::VOLUME) {
            return Err(GemdosError::Accdn);
        }
        let r = self.resolve(path)?;
        let name = r.plain_name()?;
        let slot = self.files.free_slot()?;

        let existing = self.io(r.dev)?.find_in_dir(r.dir, &name, LOOKUP_MASK, 0)?;
        if let Some((e, index)) = existing {
            if e.is_dir() || e.is_read_only() {
                return Err(GemdosError::Accdn);
            }
            self.ensure_closed(r.dev, r.dir, index)?;
        }

        let mut io = self.io(r.dev)?;
        let (index, old_chain) = match existing {
            Some((e, index)) => (index, e.cluster as u32),
            None => (io.find_free_entry(r.dir)?, 0),
        };

        let attr = (attr & (FileAttributes::READ_ONLY | FileAttributes::HIDDEN | FileAttributes::SYSTEM))
            | FileAttributes::ARCHIVE;
        let entry = DirEntry::new(name, attr, io.disk.now(), 0, 0);
        io.write_dirent(r.dir, index, &entry)?;
        // The old data only becomes unreachable once the empty record is on disk.
        if old_chain >= 2 {
            io.free_chain(old_chain)?;
        }

        let file = OpenFile::from_entry(r.dev, &entry, r.dir, index, true);
        Ok(self.files.install(slot, file))
    }

    /// Refuse to touch a record some open handle still writes back to.
    pub(crate) fn ensure_closed(&self, dev: u16, dir: u32, index: u32) -> Result<(), GemdosError> {
        if self.files.holds(dev, dir, index) {
            return Err(GemdosError::Accdn);
        }
        Ok(())
    }

    /// `Fclose`: write back a dirty handle, then release it. The slot is
    /// freed even when the write-back fails.
    pub fn fclose(&mut self, handle: FileHandle) -> Result<(), GemdosError> {
        let file = self.files.release(handle)?;
        if !file.dirty {
            return Ok(());
        }
        let mut io = self.io(file.dev)?;
        file.write_back(&mut io)
    }

    /// `Fread`: bytes copied into `buf`, 0 at or past end of file.
    pub fn fread(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, GemdosError> {
        let mut file = *self.files.get(handle)?;
        let n = {
            let mut io = self.io(file.dev)?;
            file.read(&mut io, buf)
        };
        *self.files.get_mut(handle)? = file;
        Ok(n)
    }

    /// `Fwrite`: bytes written at the cursor, extending the file as needed.
    pub fn fwrite(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize, GemdosError> {
        let mut file = *self.files.get(handle)?;
        let result = {
            let mut io = self.io(file.dev)?;
            file.write(&mut io, data)
        };
        *self.files.get_mut(handle)? = file;
        result
    }

    /// `Fseek`: the new position must lie within `[0, size]`.
    pub fn fseek(&mut self, handle: FileHandle, origin: SeekOrigin, offset: i32) -> Result<u32, GemdosError> {
        let file = self.files.get_mut(handle)?;
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => file.offset as i64,
            SeekOrigin::End => file.size as i64,
        };
        let pos = base + offset as i64;
        if pos < 0 || pos > file.size as i64 {
            return Err(GemdosError::Range);
        }
        file.offset = pos as u32;
        Ok(file.offset)
    }

    /// `Fdatime`: read, or with `set` replace, the handle's time and date.
    /// A new stamp is written to the directory on close.
    pub fn fdatime(&mut self, handle: FileHandle, set: Option<DosTimestamp>) -> Result<DosTimestamp, GemdosError> {
        let file = self.files.get_mut(handle)?;
        if let Some(stamp) = set {
            file.stamp = stamp;
            file.stamp_fixed = true;
            file.dirty = true;
        }
        Ok(file.stamp)
    }

    /// Current size of an open file.
    pub fn file_size(&self, handle: FileHandle) -> Result<u32, GemdosError> {
        Ok(self.files.get(handle)?.size)
    }

    pub fn open_files(&self) -> usize {
        self.files.open_count()
    }
}
