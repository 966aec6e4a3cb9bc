use num_enum::{IntoPrimitive, TryFromPrimitive};

/// GEMDOS error codes. The discriminants are the legacy negative values the
/// trap dispatcher hands back in `d0`, so they must not change.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum GemdosError {
    /// Invalid function number / unsupported request.
    Invfn  = -32,
    /// File not found.
    Filnf  = -33,
    /// Path not found.
    Pthnf  = -34,
    /// No more handles.
    Nhndl  = -35,
    /// Access denied.
    Accdn  = -36,
    /// Invalid handle.
    Ihndl  = -37,
    /// Invalid drive.
    Drive  = -46,
    /// Not the same drive.
    Nsame  = -48,
    /// No more files.
    Nmfil  = -49,
    /// Seek out of range.
    Range  = -64,
    /// Internal error.
    Intrn  = -65,
    /// File exists.
    Exist  = -85,
}

impl GemdosError {
    pub const FNF: Self = Self::Filnf;
    pub const PTH: Self = Self::Pthnf;
    pub const BADF: Self = Self::Ihndl;
    pub const NMFIL: Self = Self::Nmfil;
    pub const XDEV: Self = Self::Nsame;

    /// Value as returned to the caller in `d0`.
    pub fn code(self) -> i32 {
        self.into()
    }

    /// Decode a negative `d0` value; anything unknown collapses to `Intrn`.
    pub fn from_code(v: i32) -> Self {
        Self::try_from(v).unwrap_or(Self::Intrn)
    }
}

impl core::fmt::Display for GemdosError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Invfn => "invalid function",
            Self::Filnf => "file not found",
            Self::Pthnf => "path not found",
            Self::Nhndl => "no more handles",
            Self::Accdn => "access denied",
            Self::Ihndl => "invalid handle",
            Self::Drive => "invalid drive",
            Self::Nsame => "not the same drive",
            Self::Nmfil => "no more files",
            Self::Range => "seek out of range",
            Self::Intrn => "internal error",
            Self::Exist => "file exists",
        };
        write!(f, "{s} ({})", *self as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_values_are_preserved() {
        assert_eq!(GemdosError::Filnf.code(), -33);
        assert_eq!(GemdosError::Accdn.code(), -36);
        assert_eq!(GemdosError::Drive.code(), -46);
        assert_eq!(GemdosError::Range.code(), -64);
        assert_eq!(GemdosError::XDEV, GemdosError::Nsame);
    }

    #[test]
    fn from_code_unknown_is_internal() {
        assert_eq!(GemdosError::from_code(-36), GemdosError::Accdn);
        assert_eq!(GemdosError::from_code(-1), GemdosError::Intrn);
    }
}
