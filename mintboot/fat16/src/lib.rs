//! FAT16 filesystem engine for the mintboot loader.
//!
//! [`FatEngine`] serves the GEMDOS file calls for every drive reachable
//! through one [`BlockDev`]. Geometry comes from the Atari BPB of each
//! drive and is cached on first use.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod blockdev;
pub mod check;
mod dir;
pub mod dirent;
mod engine;
pub mod fat;
pub mod file;
pub mod gemdos;
pub mod logger;
mod ops;
pub mod search;
pub mod volume;

#[cfg(test)]
mod testutil;

pub use blockdev::{BlockDev, Bpb, BpbFlags, IoError, Sector, SECTOR_SIZE};
pub use check::FatCheckReport;
pub use engine::FatEngine;
pub use file::{FileHandle, HANDLE_BASE, MAX_OPEN_FILES};
pub use gemdos::GemdosCall;
pub use gemdos_api_types::{GemdosError, GemdosFn};
pub use search::MAX_SEARCHES;
pub use volume::{Volume, MAX_VOLUMES};
