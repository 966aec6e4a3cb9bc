//! The 32-byte on-disk directory record and 8.3 name handling.
//!
//! Field offsets:
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 11   | name, 8 + 3, space padded, upper case  |
//! | 11     | 1    | attribute byte                         |
//! | 12     | 10   | reserved / creation stamp, kept as is  |
//! | 22     | 2    | last-write time                        |
//! | 24     | 2    | last-write date                        |
//! | 26     | 2    | start cluster                          |
//! | 28     | 4    | file size                              |
//!
//! Multi-byte fields are little-endian regardless of the host.

use gemdos_api_types::fs::{DosTimestamp, FileAttributes, DTA_NAME_LEN};

pub const DIRENT_SIZE: usize = 32;

pub type RawDirent = [u8; DIRENT_SIZE];

/// First name byte of the end-of-directory marker.
pub const ENTRY_END: u8 = 0x00;
/// First name byte of a deleted, reusable slot.
pub const ENTRY_DELETED: u8 = 0xE5;
/// Stands in for a leading 0xE5 in a live name.
pub const ENTRY_KANJI: u8 = 0x05;

pub const DOT_NAME: [u8; 11] = *b".          ";
pub const DOTDOT_NAME: [u8; 11] = *b"..         ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name:     [u8; 11],
    pub attr:     FileAttributes,
    pub reserved: [u8; 10],
    pub time:     u16,
    pub date:     u16,
    pub cluster:  u16,
    pub size:     u32,
}

impl DirEntry {
    pub fn new(name: [u8; 11], attr: FileAttributes, stamp: DosTimestamp, cluster: u16, size: u32) -> Self {
        Self {
            name,
            attr,
            reserved: [0; 10],
            time: stamp.time,
            date: stamp.date,
            cluster,
            size,
        }
    }

    pub fn decode(raw: &RawDirent) -> Self {
        let le16 = |off: usize| u16::from_le_bytes([raw[off], raw[off + 1]]);
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[..11]);
        let mut reserved = [0u8; 10];
        reserved.copy_from_slice(&raw[12..22]);
        Self {
            name,
            attr: FileAttributes::from_bits_retain(raw[11]),
            reserved,
            time: le16(22),
            date: le16(24),
            cluster: le16(26),
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    pub fn encode(&self) -> RawDirent {
        let mut raw = [0u8; DIRENT_SIZE];
        raw[..11].copy_from_slice(&self.name);
        raw[11] = self.attr.bits();
        raw[12..22].copy_from_slice(&self.reserved);
        raw[22..24].copy_from_slice(&self.time.to_le_bytes());
        raw[24..26].copy_from_slice(&self.date.to_le_bytes());
        raw[26..28].copy_from_slice(&self.cluster.to_le_bytes());
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
        raw
    }

    pub fn is_end(&self) -> bool      { self.name[0] == ENTRY_END }
    pub fn is_deleted(&self) -> bool  { self.name[0] == ENTRY_DELETED }
    pub fn is_long_name(&self) -> bool { self.attr.is_long_name() }
    pub fn is_dir(&self) -> bool      { self.attr.contains(FileAttributes::DIRECTORY) }
    pub fn is_label(&self) -> bool    { self.attr.contains(FileAttributes::VOLUME) && !self.is_long_name() }
    pub fn is_read_only(&self) -> bool { self.attr.contains(FileAttributes::READ_ONLY) }

    /// Neither end marker, deleted slot, nor VFAT fragment.
    pub fn is_live(&self) -> bool {
        !self.is_end() && !self.is_deleted() && !self.is_long_name()
    }

    pub fn is_dot(&self) -> bool    { self.name == DOT_NAME }
    pub fn is_dotdot(&self) -> bool { self.name == DOTDOT_NAME }

    pub fn stamp(&self) -> DosTimestamp {
        DosTimestamp::new(self.time, self.date)
    }

    /// `"HELLO   TXT"` → `"HELLO.TXT"`, NUL padded to the DTA name width.
    pub fn display_name(&self) -> ([u8; DTA_NAME_LEN], usize) {
        let mut buf = [0u8; DTA_NAME_LEN];
        let mut len = 0usize;
        let base_end = self.name[..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        buf[..base_end].copy_from_slice(&self.name[..base_end]);
        if base_end > 0 && buf[0] == ENTRY_KANJI {
            buf[0] = ENTRY_DELETED;
        }
        len += base_end;
        let ext_end = self.name[8..].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        if ext_end > 0 {
            buf[len] = b'.';
            len += 1;
            buf[len..len + ext_end].copy_from_slice(&self.name[8..8 + ext_end]);
            len += ext_end;
        }
        (buf, len)
    }
}

/// Compile a name or search pattern into its 11-byte form.
///
/// `*` fills the rest of the current field with `?` (the base name up to
/// position 8, or the extension up to 11); `.` moves to the extension.
/// Letters are upper-cased and the input ends at the first path separator.
pub fn pattern_83(name: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    let mut pos = 0usize;
    let mut field_end = 8usize;
    for c in name.bytes() {
        match c {
            b'\\' | b'/' | 0 => break,
            b'.' => {
                pos = 8;
                field_end = 11;
            }
            b'*' => {
                while pos < field_end {
                    out[pos] = b'?';
                    pos += 1;
                }
            }
            _ => {
                if pos < field_end {
                    out[pos] = c.to_ascii_uppercase();
                    pos += 1;
                }
            }
        }
    }
    out
}

/// Byte-wise comparison where `?` in the pattern matches anything.
pub fn match_83(name: &[u8; 11], pattern: &[u8; 11]) -> bool {
    name.iter().zip(pattern).all(|(&n, &p)| p == b'?' || n == p)
}

pub fn is_wild(pattern: &[u8; 11]) -> bool {
    pattern.contains(&b'?')
}

/// Punctuation allowed in a short name besides letters and digits.
const NAME_PUNCT: &[u8] = b"!#$%&'()-@^_`{}~";

/// Whether `name` only uses the short-name character set.
pub fn is_valid_short_name(name: &[u8; 11]) -> bool {
    if name[0] == b' ' {
        return false;
    }
    name.iter().enumerate().all(|(i, &b)| {
        b == b' '
            || b.is_ascii_uppercase()
            || b.is_ascii_digit()
            || NAME_PUNCT.contains(&b)
            || (i == 0 && b == ENTRY_KANJI)
    })
}
