#![no_std]

#[cfg(test)]
extern crate std;

pub mod error;
pub mod fs;

pub use error::GemdosError;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// GEMDOS function numbers (trap #1 opcode) served by the FAT engine.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum GemdosFn {
    Dfree    = 0x36,
    Dcreate  = 0x39,
    Ddelete  = 0x3A,
    Fcreate  = 0x3C,
    Fopen    = 0x3D,
    Fclose   = 0x3E,
    Fread    = 0x3F,
    Fwrite   = 0x40,
    Fdelete  = 0x41,
    Fseek    = 0x42,
    Fattrib  = 0x43,
    Fsfirst  = 0x4E,
    Fsnext   = 0x4F,
    Frename  = 0x56,
    Fdatime  = 0x57,
}

/// Highest drive number plus one (`A:` through `Z:`).
pub const MAX_DRIVES: u16 = 26;

/// Map a drive letter (either case) to its device number.
pub fn drive_from_letter(letter: u8) -> Option<u16> {
    match letter {
        b'A'..=b'Z' => Some((letter - b'A') as u16),
        b'a'..=b'z' => Some((letter - b'a') as u16),
        _ => None,
    }
}
