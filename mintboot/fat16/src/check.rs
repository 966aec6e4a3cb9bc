//! Read-only consistency check of a mounted volume.
//!
//! Phase one walks the directory tree depth first from the root, keeping
//! one frame per nesting level in a bounded stack, and claims every chain
//! it reaches. Phase two sweeps the
//! FAT for allocated clusters nobody claimed.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use gemdos_api_types::GemdosError;
use heapless::Vec as Stack;
use log::warn;

use crate::blockdev::{BlockDev, SECTOR_SIZE};
use crate::dir::ROOT;
use crate::dirent::{is_valid_short_name, DirEntry};
use crate::engine::FatEngine;
use crate::fat::{is_eoc, is_reserved, VolumeIo, FAT_FREE};

/// Deepest directory nesting the walk follows, the root included.
pub const MAX_DIR_STACK: usize = 64;

/// Problem counters; all zero means the volume is consistent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FatCheckReport {
    /// Geometry that does not add up.
    pub bad_bpb:       u32,
    /// Malformed or implausible directory records.
    pub bad_dirent:    u32,
    /// Chains that loop, leave the data area, or cannot be read.
    pub bad_chain:     u32,
    /// Free or reserved markers inside chains, unclaimed bad markers, and
    /// FAT sectors whose copies disagree.
    pub bad_fat:       u32,
    /// Allocated clusters no record reaches.
    pub lost_clusters: u32,
    /// Clusters claimed more than once.
    pub cross_links:   u32,
}

impl FatCheckReport {
    pub fn is_clean(&self) -> bool {
        self.problems() == 0
    }

    pub fn problems(&self) -> u32 {
        self.bad_bpb + self.bad_dirent + self.bad_chain + self.bad_fat + self.lost_clusters + self.cross_links
    }
}

/// One directory being scanned; the walk suspends it while a subdirectory
/// is visited and picks up again at `next`.
#[derive(Clone, Copy, Debug)]
struct DirFrame {
    dir:     u32,
    parent:  u32,
    /// Records to look at before giving up; a looping chain would otherwise
    /// never run out of them.
    limit:   u32,
    next:    u32,
    dots:    u32,
    dotdots: u32,
}

impl DirFrame {
    fn new(dir: u32, parent: u32, limit: u32) -> Self {
        Self { dir, parent, limit, next: 0, dots: 0, dotdots: 0 }
    }
}

/// Directories from the root down to the one being scanned.
type Worklist = Stack<DirFrame, MAX_DIR_STACK>;

struct Checker<'a, D: BlockDev> {
    io:       VolumeIo<'a, D>,
    /// Claims per cluster, saturating.
    refs:     Vec<u8>,
    /// Id of the chain that claimed each cluster, to tell loops from
    /// cross-links.
    owner:    Vec<u32>,
    /// Directory clusters already queued for scanning.
    dir_seen: Vec<bool>,
    chain_id: u32,
    report:   FatCheckReport,
}

impl<'a, D: BlockDev> Checker<'a, D> {
    fn new(io: VolumeIo<'a, D>) -> Self {
        let clusters = io.vol.max_cluster() as usize + 1;
        Self {
            io,
            refs: vec![0; clusters],
            owner: vec![0; clusters],
            dir_seen: vec![false; clusters],
            chain_id: 0,
            report: FatCheckReport::default(),
        }
    }

    fn run(mut self) -> FatCheckReport {
        if !self.check_geometry() {
            return self.report;
        }
        self.compare_fat_copies();

        let mut stack = Worklist::new();
        let _ = stack.push(DirFrame::new(ROOT, ROOT, self.io.vol.root_entries()));
        while let Some(&top) = stack.last() {
            let mut frame = top;
            let child = self.scan_dir(&mut frame);
            if let Some(top) = stack.last_mut() {
                *top = frame;
            }
            match child {
                Some(child) => {
                    if stack.push(child).is_err() {
                        warn!("dev {} directories nested too deep at cluster {}", self.io.vol.dev, child.dir);
                        self.report.bad_dirent += 1;
                    }
                }
                None => {
                    stack.pop();
                    self.finish_dir(&frame);
                }
            }
        }

        self.sweep();
        self.report
    }

    fn check_geometry(&mut self) -> bool {
        let vol = self.io.vol;
        let ok = vol.fat_covers_clusters()
            && vol.fat_start + vol.fat_copies * vol.fat_size == vol.root_start
            && vol.root_start + vol.root_sectors == vol.data_start
            && vol.root_entries() > 0;
        if !ok {
            self.report.bad_bpb += 1;
        }
        ok
    }

    fn compare_fat_copies(&mut self) {
        let vol = self.io.vol;
        let mut first = [0u8; SECTOR_SIZE];
        let mut other = [0u8; SECTOR_SIZE];
        for sector in 0..vol.fat_size {
            if self.io.read(vol.fat_start + sector, &mut first).is_err() {
                self.report.bad_fat += 1;
                continue;
            }
            for copy in 1..vol.fat_copies {
                let lba = vol.fat_start + copy * vol.fat_size + sector;
                if self.io.read(lba, &mut other).is_err() || other != first {
                    self.report.bad_fat += 1;
                }
            }
        }
    }

    /// Scan `frame` from where it stopped. Returns the next subdirectory to
    /// descend into, or `None` once the directory is done.
    fn scan_dir(&mut self, frame: &mut DirFrame) -> Option<DirFrame> {
        while frame.next < frame.limit {
            let index = frame.next;
            frame.next += 1;
            let entry = match self.io.read_dirent(frame.dir, index) {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(_) => {
                    self.report.bad_chain += 1;
                    break;
                }
            };
            if entry.is_end() {
                break;
            }
            if !entry.is_live() {
                continue;
            }
            if entry.is_dot() {
                frame.dots += 1;
                if entry.cluster as u32 != frame.dir {
                    self.report.bad_dirent += 1;
                }
                continue;
            }
            if entry.is_dotdot() {
                frame.dotdots += 1;
                if entry.cluster as u32 != frame.parent {
                    self.report.bad_dirent += 1;
                }
                continue;
            }
            if entry.is_label() {
                continue;
            }
            if !is_valid_short_name(&entry.name) {
                self.report.bad_dirent += 1;
            }
            if let Some(child) = self.check_entry(&entry, frame.dir) {
                return Some(child);
            }
        }
        frame.next = frame.limit;
        None
    }

    fn finish_dir(&mut self, frame: &DirFrame) {
        let expected = if frame.dir == ROOT { 0 } else { 1 };
        if frame.dots != expected || frame.dotdots != expected {
            self.report.bad_dirent += 1;
        }
    }

    /// Claim the clusters of `entry`; a subdirectory comes back as a frame
    /// to scan.
    fn check_entry(&mut self, entry: &DirEntry, dir: u32) -> Option<DirFrame> {
        let start = entry.cluster as u32;
        if start < 2 {
            // Only an empty file may own no clusters.
            if entry.is_dir() || entry.size != 0 {
                self.report.bad_dirent += 1;
            }
            return None;
        }
        if !self.io.vol.is_valid_cluster(start) {
            self.report.bad_dirent += 1;
            return None;
        }

        if entry.is_dir() {
            if self.dir_seen[start as usize] {
                self.report.cross_links += 1;
                return None;
            }
            self.dir_seen[start as usize] = true;
            let limit = self.claim_chain(start) * self.io.vol.entries_per_cluster();
            return Some(DirFrame::new(start, dir, limit));
        }

        if entry.size == 0 {
            self.report.bad_dirent += 1;
        }
        let clusters = self.claim_chain(start) as u64;
        if entry.size as u64 > clusters * self.io.vol.cluster_bytes() as u64 {
            self.report.bad_dirent += 1;
        }
        None
    }

    /// Claim every cluster of the chain at `start`; returns how many were
    /// claimed before the chain ended or went wrong.
    fn claim_chain(&mut self, start: u32) -> u32 {
        self.chain_id += 1;
        let id = self.chain_id;
        let mut cluster = start;
        let mut count = 0;
        loop {
            let c = cluster as usize;
            if self.owner[c] == id {
                self.report.bad_chain += 1;
                break;
            }
            if self.refs[c] > 0 {
                self.refs[c] = self.refs[c].saturating_add(1);
                self.report.cross_links += 1;
                break;
            }
            self.refs[c] = 1;
            self.owner[c] = id;
            count += 1;

            let next = self.io.read_fat(cluster);
            if is_eoc(next) {
                break;
            }
            if next == FAT_FREE || is_reserved(next) {
                self.report.bad_fat += 1;
                break;
            }
            if !self.io.vol.is_valid_cluster(next as u32) {
                self.report.bad_chain += 1;
                break;
            }
            cluster = next as u32;
        }
        count
    }

    fn sweep(&mut self) {
        let refs = &self.refs;
        let report = &mut self.report;
        let scanned = self.io.scan_fat(|cluster, value| {
            if refs[cluster as usize] == 0 && value != FAT_FREE {
                if is_reserved(value) {
                    report.bad_fat += 1;
                } else {
                    report.lost_clusters += 1;
                }
            }
            ControlFlow::Continue(())
        });
        if scanned.is_err() {
            self.report.bad_fat += 1;
        }
    }
}

impl<D: BlockDev> FatEngine<D> {
    /// Check the consistency of `dev` without modifying it.
    pub fn fat_check(&mut self, dev: u16) -> Result<FatCheckReport, GemdosError> {
        let io = self.io(dev)?;
        let report = Checker::new(io).run();
        if !report.is_clean() {
            warn!("dev {dev} check found {} problems: {report:?}", report.problems());
        }
        Ok(report)
    }
}
