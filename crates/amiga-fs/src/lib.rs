//! AmigaDOS filesystem model.
//!
//! Interprets (or synthesizes) the native on-disk structure of an Amiga
//! volume on top of a raw block buffer: boot block, root block, allocation
//! bitmap, directory hash tables, file header/extension chains, and the
//! OFS/FFS data block variants. Blocks live in an arena indexed by block
//! number; blocks reference each other by number only.

mod block;
mod name;
mod volume;

pub use block::{BlockError, BlockType, FsBlock};
pub use name::FsName;
pub use volume::{FsErrorReport, FsVolumeType, FileSystem};

use std::fmt;

/// Filesystem-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// The volume carries no DOS signature.
    Unformatted,
    /// Buffer length is not a multiple of the block size.
    WrongBlockSize,
    /// Buffer length does not match the volume capacity.
    WrongCapacity,
    /// The DOS variant byte is unsupported.
    WrongDosType,
    /// A hash chain or list chain loops back on itself.
    HasCycles,
    /// The volume failed an integrity check.
    Corrupted,
    /// No free block is available.
    OutOfSpace,
    /// An entry with this name already exists in the directory.
    FileExists(String),
    /// Export target directory has content.
    DirNotEmpty,
    /// Host directory could not be created.
    CannotCreateDir(String),
    /// Host file could not be created or written.
    CannotCreateFile(String),
    /// Host file or directory could not be read.
    CannotRead(String),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unformatted => write!(f, "volume is unformatted"),
            Self::WrongBlockSize => write!(f, "buffer is not a whole number of blocks"),
            Self::WrongCapacity => write!(f, "buffer size does not match the volume capacity"),
            Self::WrongDosType => write!(f, "unsupported DOS type"),
            Self::HasCycles => write!(f, "directory structure contains a cycle"),
            Self::Corrupted => write!(f, "volume is corrupted"),
            Self::OutOfSpace => write!(f, "no free blocks left on the volume"),
            Self::FileExists(name) => write!(f, "'{name}' already exists"),
            Self::DirNotEmpty => write!(f, "target directory is not empty"),
            Self::CannotCreateDir(path) => write!(f, "cannot create directory '{path}'"),
            Self::CannotCreateFile(path) => write!(f, "cannot create file '{path}'"),
            Self::CannotRead(path) => write!(f, "cannot read '{path}'"),
        }
    }
}

impl std::error::Error for FsError {}
