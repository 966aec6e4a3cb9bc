use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

bitflags! {
    /// FAT directory-entry attribute byte, as seen by `Fattrib` and `Fsfirst`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME    = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;

        // Reserved bits survive a round trip through the disk.
        const _ = !0;
    }
}

impl FileAttributes {
    /// VFAT long-name marker (RO|HIDDEN|SYSTEM|VOLUME).
    pub const LONG_NAME: Self = Self::from_bits_retain(0x0F);

    /// Bits a search has to ask for explicitly before it sees such an entry.
    pub const SEARCH_GATED: Self = Self::from_bits_retain(0x1E);

    pub fn is_long_name(self) -> bool {
        self.bits() & 0x3F == Self::LONG_NAME.bits()
    }
}

/// `Fseek` origin.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum SeekOrigin {
    Start   = 0,
    Current = 1,
    End     = 2,
}

/// `Fopen` access mode (low two bits of the mode word).
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum OpenMode {
    ReadOnly  = 0,
    WriteOnly = 1,
    ReadWrite = 2,
}

impl OpenMode {
    pub fn writable(self) -> bool {
        self != OpenMode::ReadOnly
    }
}

/// Packed DOS time and date words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DosTimestamp {
    /// `hhhhhmmmmmmsssss`, seconds in units of two.
    pub time: u16,
    /// `yyyyyyymmmmddddd`, years since 1980.
    pub date: u16,
}

impl DosTimestamp {
    pub const fn new(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    pub fn from_parts(year: u16, month: u8, day: u8, hour: u8, min: u8, sec: u8) -> Self {
        let date = (year.saturating_sub(1980) << 9) | ((month as u16 & 0x0F) << 5) | (day as u16 & 0x1F);
        let time = ((hour as u16 & 0x1F) << 11) | ((min as u16 & 0x3F) << 5) | ((sec as u16 / 2) & 0x1F);
        Self { time, date }
    }
}

/// Size of the GEMDOS disk transfer area filled by `Fsfirst`/`Fsnext`.
pub const DTA_SIZE: usize = 44;

/// Length of the DTA name field, terminator included.
pub const DTA_NAME_LEN: usize = 14;

/// The "find" transfer record. `reserved` belongs to the filesystem and
/// carries the search state between `Fsfirst` and `Fsnext`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dta {
    pub reserved: [u8; 21],
    pub attrib:   u8,
    pub time:     u16,
    pub date:     u16,
    pub length:   u32,
    /// NUL-terminated `NAME.EXT`.
    pub name:     [u8; DTA_NAME_LEN],
}

impl Dta {
    pub const fn empty() -> Self {
        Self {
            reserved: [0; 21],
            attrib: 0,
            time: 0,
            date: 0,
            length: 0,
            name: [0; DTA_NAME_LEN],
        }
    }

    /// The name up to its terminator.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DTA_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Big-endian layout as seen by m68k callers.
    pub fn to_bytes(&self) -> [u8; DTA_SIZE] {
        let mut out = [0u8; DTA_SIZE];
        out[..21].copy_from_slice(&self.reserved);
        out[21] = self.attrib;
        out[22..24].copy_from_slice(&self.time.to_be_bytes());
        out[24..26].copy_from_slice(&self.date.to_be_bytes());
        out[26..30].copy_from_slice(&self.length.to_be_bytes());
        out[30..44].copy_from_slice(&self.name);
        out
    }

    pub fn from_bytes(raw: &[u8; DTA_SIZE]) -> Self {
        let mut dta = Self::empty();
        dta.reserved.copy_from_slice(&raw[..21]);
        dta.attrib = raw[21];
        dta.time = u16::from_be_bytes([raw[22], raw[23]]);
        dta.date = u16::from_be_bytes([raw[24], raw[25]]);
        dta.length = u32::from_be_bytes([raw[26], raw[27], raw[28], raw[29]]);
        dta.name.copy_from_slice(&raw[30..44]);
        dta
    }
}

impl Default for Dta {
    fn default() -> Self {
        Self::empty()
    }
}

/// `Dfree` result (`DISKINFO`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiskInfo {
    pub free_clusters:       u32,
    pub total_clusters:      u32,
    pub bytes_per_sector:    u32,
    pub sectors_per_cluster: u32,
}

impl DiskInfo {
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.free_clusters.to_be_bytes());
        out[4..8].copy_from_slice(&self.total_clusters.to_be_bytes());
        out[8..12].copy_from_slice(&self.bytes_per_sector.to_be_bytes());
        out[12..16].copy_from_slice(&self.sectors_per_cluster.to_be_bytes());
        out
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_clusters as u64 * self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dta_layout_is_big_endian() {
        let mut dta = Dta::empty();
        dta.attrib = 0x20;
        dta.time = 0x1234;
        dta.date = 0x5678;
        dta.length = 0x0001_0203;
        dta.name[..9].copy_from_slice(b"HELLO.TXT");
        let raw = dta.to_bytes();
        assert_eq!(raw[21], 0x20);
        assert_eq!(&raw[22..26], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&raw[26..30], &[0x00, 0x01, 0x02, 0x03]);
        assert_eq!(&raw[30..39], b"HELLO.TXT");
        assert_eq!(raw[39], 0);
        assert_eq!(Dta::from_bytes(&raw), dta);
        assert_eq!(dta.name(), "HELLO.TXT");
    }

    #[test]
    fn long_name_detection() {
        assert!(FileAttributes::from_bits_retain(0x0F).is_long_name());
        assert!(FileAttributes::from_bits_retain(0xCF).is_long_name());
        assert!(!FileAttributes::from_bits_retain(0x2F).is_long_name());
        assert!(!FileAttributes::DIRECTORY.is_long_name());
    }

    #[test]
    fn timestamp_packing() {
        let ts = DosTimestamp::from_parts(2024, 3, 15, 13, 45, 30);
        assert_eq!(ts.date >> 9, 44);
        assert_eq!((ts.date >> 5) & 0x0F, 3);
        assert_eq!(ts.date & 0x1F, 15);
        assert_eq!(ts.time >> 11, 13);
        assert_eq!((ts.time >> 5) & 0x3F, 45);
        assert_eq!(ts.time & 0x1F, 15);
    }

    #[test]
    fn open_mode_writable() {
        assert!(!OpenMode::ReadOnly.writable());
        assert!(OpenMode::try_from(2_u16).map(OpenMode::writable).unwrap_or(false));
    }
}
