//! Sqpack archive addressing
//!
//! Archive data/index containers are referenced in patch chunks by numeric IDs,
//! not paths. The IDs only resolve to an on-disk name once the target platform
//! is known (a TargetInfo chunk may change it mid-file), which is why path
//! resolution is a separate step from decoding.

use crate::reader::ChunkReader;
use crate::Result;

/// Game platform, as carried by the TargetInfo chunk.
///
/// The platform selects the middle component of archive file names
/// (`0a0000.win32.dat0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Win32,
    Ps3,
    Ps4,
    Unknown,
}

impl Platform {
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            0 => Self::Win32,
            1 => Self::Ps3,
            2 => Self::Ps4,
            _ => Self::Unknown,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Win32 => 0,
            Self::Ps3 => 1,
            Self::Ps4 => 2,
            Self::Unknown => 3,
        }
    }

    /// File name component for this platform.
    pub fn name(self) -> &'static str {
        match self {
            Self::Win32 => "win32",
            Self::Ps3 => "ps3",
            Self::Ps4 => "ps4",
            Self::Unknown => "unknown",
        }
    }
}

/// Folder name for an expansion id: `ffxiv` for the base game, `ex{n}` after.
pub fn expansion_folder(expansion_id: u8) -> String {
    if expansion_id == 0 {
        "ffxiv".to_owned()
    } else {
        format!("ex{expansion_id}")
    }
}

/// Which container a sqpack reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqpackKind {
    Dat,
    Index,
}

/// Compact numeric reference to one sqpack container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqpackRef {
    pub main_id: u16,
    pub sub_id: u16,
    pub file_id: u32,
    pub kind: SqpackKind,
}

impl SqpackRef {
    /// Decode the 8-byte on-wire form: u16 main, u16 sub, u32 file, big-endian.
    pub fn read(reader: &mut ChunkReader<'_>, kind: SqpackKind) -> Result<Self> {
        Ok(Self {
            main_id: reader.read_u16()?,
            sub_id: reader.read_u16()?,
            file_id: reader.read_u32()?,
            kind,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.main_id.to_be_bytes());
        out.extend_from_slice(&self.sub_id.to_be_bytes());
        out.extend_from_slice(&self.file_id.to_be_bytes());
    }

    /// Expansion the container belongs to, packed into the sub id's high byte.
    pub fn expansion_id(&self) -> u8 {
        (self.sub_id >> 8) as u8
    }

    /// Relative path of the container once the platform is known.
    ///
    /// Dat files carry their file id (`.dat0`, `.dat1`, ...); index files omit
    /// the id for the first index (`.index`, `.index2`, ...).
    pub fn resolve(&self, platform: Platform) -> String {
        let base = format!(
            "sqpack/{}/{:02x}{:04x}.{}",
            expansion_folder(self.expansion_id()),
            self.main_id,
            self.sub_id,
            platform.name(),
        );
        match self.kind {
            SqpackKind::Dat => format!("{base}.dat{}", self.file_id),
            SqpackKind::Index if self.file_id == 0 => format!("{base}.index"),
            SqpackKind::Index => format!("{base}.index{}", self.file_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_folder_names() {
        assert_eq!(expansion_folder(0), "ffxiv");
        assert_eq!(expansion_folder(1), "ex1");
        assert_eq!(expansion_folder(4), "ex4");
    }

    #[test]
    fn test_dat_path_resolution() {
        let r = SqpackRef {
            main_id: 0x0a,
            sub_id: 0x0000,
            file_id: 0,
            kind: SqpackKind::Dat,
        };
        assert_eq!(r.resolve(Platform::Win32), "sqpack/ffxiv/0a0000.win32.dat0");
    }

    #[test]
    fn test_index_path_resolution() {
        let mut r = SqpackRef {
            main_id: 0x02,
            sub_id: 0x0100,
            file_id: 0,
            kind: SqpackKind::Index,
        };
        // sub id high byte selects the expansion folder
        assert_eq!(r.expansion_id(), 1);
        assert_eq!(r.resolve(Platform::Win32), "sqpack/ex1/020100.win32.index");

        r.file_id = 2;
        assert_eq!(r.resolve(Platform::Ps4), "sqpack/ex1/020100.ps4.index2");
    }

    #[test]
    fn test_wire_roundtrip() {
        let r = SqpackRef {
            main_id: 0x1234,
            sub_id: 0x0200,
            file_id: 7,
            kind: SqpackKind::Dat,
        };
        let mut buf = Vec::new();
        r.write(&mut buf);
        let mut reader = ChunkReader::new(&buf);
        let back = SqpackRef::read(&mut reader, SqpackKind::Dat).unwrap();
        assert_eq!(back, r);
    }
}
