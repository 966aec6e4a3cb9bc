//! `Fsfirst`/`Fsnext`: wildcard directory scans whose cursor lives in a
//! small pool, referenced from the caller's DTA.

use gemdos_api_types::GemdosError;
use gemdos_api_types::fs::{Dta, FileAttributes};

use crate::blockdev::BlockDev;
use crate::dirent::DirEntry;
use crate::engine::FatEngine;

pub const MAX_SEARCHES: usize = 8;

/// Tag in `Dta::reserved` marking a DTA filled by this engine.
const DTA_MAGIC: [u8; 2] = *b"F6";

#[derive(Clone, Copy, Debug)]
struct SearchCursor {
    dev:     u16,
    pattern: [u8; 11],
    mask:    FileAttributes,
    dir:     u32,
    /// Record index to resume from.
    next:    u32,
}

/// Search cursors. Each slot has a generation so that a stale DTA cannot
/// resume a cursor that was since handed to someone else.
pub(crate) struct SearchTable {
    slots:       [Option<SearchCursor>; MAX_SEARCHES],
    generations: [u16; MAX_SEARCHES],
}

impl SearchTable {
    pub const fn new() -> Self {
        Self { slots: [None; MAX_SEARCHES], generations: [0; MAX_SEARCHES] }
    }

    /// Live slot referenced by `dta`, if any.
    fn slot_of(&self, dta: &Dta) -> Option<usize> {
        let r = &dta.reserved;
        if r[..2] != DTA_MAGIC {
            return None;
        }
        let slot = r[2] as usize;
        let generation = u16::from_be_bytes([r[3], r[4]]);
        (slot < MAX_SEARCHES && self.slots[slot].is_some() && self.generations[slot] == generation)
            .then_some(slot)
    }

    /// The DTA's own slot when it still holds one, otherwise a free slot.
    fn claim(&mut self, dta: &Dta) -> Result<usize, GemdosError> {
        if let Some(slot) = self.slot_of(dta) {
            self.slots[slot] = None;
            return Ok(slot);
        }
        self.slots.iter().position(Option::is_none).ok_or(GemdosError::Nhndl)
    }

    fn install(&mut self, slot: usize, cursor: SearchCursor, dta: &mut Dta) {
        let generation = self.generations[slot].wrapping_add(1);
        self.generations[slot] = generation;
        self.slots[slot] = Some(cursor);
        dta.reserved = [0; 21];
        dta.reserved[..2].copy_from_slice(&DTA_MAGIC);
        dta.reserved[2] = slot as u8;
        dta.reserved[3..5].copy_from_slice(&generation.to_be_bytes());
    }

    pub fn release_device(&mut self, dev: u16) {
        for slot in self.slots.iter_mut() {
            if slot.is_some_and(|c| c.dev == dev) {
                *slot = None;
            }
        }
    }

    pub fn active(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

fn fill_dta(dta: &mut Dta, entry: &DirEntry) {
    let (name, _) = entry.display_name();
    dta.attrib = entry.attr.bits();
    dta.time = entry.time;
    dta.date = entry.date;
    dta.length = entry.size;
    dta.name = name;
}

impl<D: BlockDev> FatEngine<D> {
    /// `Fsfirst`: start a scan for `path`, whose last segment may hold
    /// wildcards, and report the first match in `dta`.
    ///
    /// Entries with hidden, system, directory or label bits are skipped
    /// unless `mask` includes each of those bits.
    pub fn fsfirst(&mut self, path: &str, mask: FileAttributes, dta: &mut Dta) -> Result<(), GemdosError> {
        let r = self.resolve(path)?;
        let pattern = if r.is_blank() { [b'?'; 11] } else { r.name };
        let slot = self.searches.claim(dta)?;

        let found = self.io(r.dev)?.find_in_dir(r.dir, &pattern, mask, 0)?;
        let (entry, index) = found.ok_or(GemdosError::Filnf)?;
        fill_dta(dta, &entry);
        let cursor = SearchCursor { dev: r.dev, pattern, mask, dir: r.dir, next: index + 1 };
        self.searches.install(slot, cursor, dta);
        Ok(())
    }

    /// `Fsnext`: the next match of the scan started on `dta`. The cursor is
    /// released once the directory is exhausted.
    pub fn fsnext(&mut self, dta: &mut Dta) -> Result<(), GemdosError> {
        let slot = self.searches.slot_of(dta).ok_or(GemdosError::Nmfil)?;
        let Some(cursor) = self.searches.slots[slot] else {
            return Err(GemdosError::Nmfil);
        };

        let found = self
            .io(cursor.dev)
            .and_then(|mut io| io.find_in_dir(cursor.dir, &cursor.pattern, cursor.mask, cursor.next));
        match found {
            Ok(Some((entry, index))) => {
                fill_dta(dta, &entry);
                self.searches.slots[slot] = Some(SearchCursor { next: index + 1, ..cursor });
                Ok(())
            }
            Ok(None) => {
                self.searches.slots[slot] = None;
                Err(GemdosError::Nmfil)
            }
            Err(e) => {
                self.searches.slots[slot] = None;
                Err(e)
            }
        }
    }

    pub fn active_searches(&self) -> usize {
        self.searches.active()
    }
}
