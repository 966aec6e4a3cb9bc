//! GEMDOS trap adapter: decoded call arguments in, a `d0` value out.
//!
//! Non-negative results are byte counts, handles, positions or attribute
//! bits; negative ones are [`GemdosError`] codes.

use gemdos_api_types::fs::{DTA_SIZE, DosTimestamp, Dta, FileAttributes, OpenMode, SeekOrigin};
use gemdos_api_types::{GemdosError, GemdosFn, MAX_DRIVES};
use log::debug;

use crate::blockdev::BlockDev;
use crate::engine::FatEngine;
use crate::file::FileHandle;

/// Longest path accepted from a caller, terminator excluded.
pub const MAX_PATH: usize = 128;

/// One GEMDOS call with its arguments already fetched from the caller.
/// Paths are raw, NUL-terminated byte strings.
#[derive(Debug)]
pub enum GemdosCall<'a> {
    /// `drive` 0 is the default drive, 1 is `A:`.
    Dfree { info: &'a mut [u8; 16], drive: u16 },
    Dcreate { path: &'a [u8] },
    Ddelete { path: &'a [u8] },
    Fcreate { path: &'a [u8], attr: u8 },
    Fopen { path: &'a [u8], mode: u16 },
    Fclose { handle: i16 },
    Fread { handle: i16, buf: &'a mut [u8] },
    Fwrite { handle: i16, buf: &'a [u8] },
    Fdelete { path: &'a [u8] },
    Fseek { offset: i32, handle: i16, mode: u16 },
    Fattrib { path: &'a [u8], set: bool, attr: u8 },
    Fsfirst { path: &'a [u8], attr: u16, dta: &'a mut [u8; DTA_SIZE] },
    Fsnext { dta: &'a mut [u8; DTA_SIZE] },
    Frename { old: &'a [u8], new: &'a [u8] },
    Fdatime { stamp: &'a mut DosTimestamp, handle: i16, set: bool },
    /// Any other trap #1 opcode routed here.
    Unsupported(u16),
}

impl GemdosCall<'_> {
    /// The opcode this call answers to; `None` for [`GemdosCall::Unsupported`].
    pub fn function(&self) -> Option<GemdosFn> {
        Some(match self {
            Self::Dfree { .. } => GemdosFn::Dfree,
            Self::Dcreate { .. } => GemdosFn::Dcreate,
            Self::Ddelete { .. } => GemdosFn::Ddelete,
            Self::Fcreate { .. } => GemdosFn::Fcreate,
            Self::Fopen { .. } => GemdosFn::Fopen,
            Self::Fclose { .. } => GemdosFn::Fclose,
            Self::Fread { .. } => GemdosFn::Fread,
            Self::Fwrite { .. } => GemdosFn::Fwrite,
            Self::Fdelete { .. } => GemdosFn::Fdelete,
            Self::Fseek { .. } => GemdosFn::Fseek,
            Self::Fattrib { .. } => GemdosFn::Fattrib,
            Self::Fsfirst { .. } => GemdosFn::Fsfirst,
            Self::Fsnext { .. } => GemdosFn::Fsnext,
            Self::Frename { .. } => GemdosFn::Frename,
            Self::Fdatime { .. } => GemdosFn::Fdatime,
            Self::Unsupported(_) => return None,
        })
    }
}

/// The text of a NUL-terminated caller path.
fn path_str(raw: &[u8]) -> Result<&str, GemdosError> {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    if len > MAX_PATH {
        return Err(GemdosError::Pthnf);
    }
    core::str::from_utf8(&raw[..len]).map_err(|_| GemdosError::Filnf)
}

fn handle(raw: i16) -> Result<FileHandle, GemdosError> {
    FileHandle::from_raw(raw as i32)
}

/// Clamp a byte count into the non-negative `d0` range.
fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl<D: BlockDev> FatEngine<D> {
    /// Run one GEMDOS call and encode its outcome for `d0`.
    pub fn dispatch(&mut self, call: GemdosCall<'_>) -> i32 {
        let function = call.function();
        match self.run_call(call) {
            Ok(value) => value,
            Err(e) => {
                debug!("{function:?} failed: {e}");
                e.code()
            }
        }
    }

    fn run_call(&mut self, call: GemdosCall<'_>) -> Result<i32, GemdosError> {
        match call {
            GemdosCall::Dfree { info, drive } => {
                let dev = match drive {
                    0 => self.default_drive(),
                    n if n <= MAX_DRIVES => n - 1,
                    _ => return Err(GemdosError::Drive),
                };
                *info = self.dfree(dev)?.to_bytes();
                Ok(0)
            }
            GemdosCall::Dcreate { path } => self.dcreate(path_str(path)?).map(|()| 0),
            GemdosCall::Ddelete { path } => self.ddelete(path_str(path)?).map(|()| 0),
            GemdosCall::Fcreate { path, attr } => {
                let h = self.fcreate(path_str(path)?, FileAttributes::from_bits_retain(attr))?;
                Ok(h.raw() as i32)
            }
            GemdosCall::Fopen { path, mode } => {
                let mode = OpenMode::try_from(mode).map_err(|_| GemdosError::Accdn)?;
                Ok(self.fopen(path_str(path)?, mode)?.raw() as i32)
            }
            GemdosCall::Fclose { handle: h } => self.fclose(handle(h)?).map(|()| 0),
            GemdosCall::Fread { handle: h, buf } => Ok(count(self.fread(handle(h)?, buf)?)),
            GemdosCall::Fwrite { handle: h, buf } => Ok(count(self.fwrite(handle(h)?, buf)?)),
            GemdosCall::Fdelete { path } => self.fdelete(path_str(path)?).map(|()| 0),
            GemdosCall::Fseek { offset, handle: h, mode } => {
                let origin = SeekOrigin::try_from(mode).map_err(|_| GemdosError::Range)?;
                let pos = self.fseek(handle(h)?, origin, offset)?;
                Ok(pos as i32)
            }
            GemdosCall::Fattrib { path, set, attr } => {
                let set = set.then_some(FileAttributes::from_bits_retain(attr));
                Ok(self.fattrib(path_str(path)?, set)?.bits() as i32)
            }
            GemdosCall::Fsfirst { path, attr, dta } => {
                let mut record = Dta::from_bytes(dta);
                let mask = FileAttributes::from_bits_retain(attr as u8);
                let result = self.fsfirst(path_str(path)?, mask, &mut record);
                *dta = record.to_bytes();
                result.map(|()| 0)
            }
            GemdosCall::Fsnext { dta } => {
                let mut record = Dta::from_bytes(dta);
                let result = self.fsnext(&mut record);
                *dta = record.to_bytes();
                result.map(|()| 0)
            }
            GemdosCall::Frename { old, new } => self.frename(path_str(old)?, path_str(new)?).map(|()| 0),
            GemdosCall::Fdatime { stamp, handle: h, set } => {
                *stamp = self.fdatime(handle(h)?, set.then_some(*stamp))?;
                Ok(0)
            }
            GemdosCall::Unsupported(_) => Err(GemdosError::Invfn),
        }
    }
}
