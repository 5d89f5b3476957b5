//! Machine-level error vocabulary.
//!
//! Command handlers report these through the command result channel; they
//! never tear the emulator down. Internal invariant violations are not
//! errors but debug assertions with release-build telemetry.

use std::fmt;

use amiga_fs::FsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmigaError {
    // Configuration
    OptionUnsupported(&'static str),
    OptionInvalidArg(String),
    OptionInvalidId(usize),
    OptionLocked(&'static str),

    // Machine state
    PoweredOff,
    PoweredOn,
    Running,
    DebugOff,

    // Media
    DiskMissing,
    FileNotFound(String),
    FileTooLarge,
    FileTooSmall,
    FileTypeMismatch,
    FileTypeUnsupported,
    CannotRead(String),
    CannotWrite(String),
    CannotCreate(String),

    // Filesystem
    Fs(FsError),

    // Snapshots
    SnapTooOld,
    SnapTooNew,
    SnapIsBeta,
    SnapCorrupted,

    // Debugger surface
    RegReadOnly(u16),
    RegWriteOnly(u16),
    RegUnused(u16),
    AddrUnaligned(u32),
    GuardNotFound,
    GuardAlreadySet,
}

impl fmt::Display for AmigaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptionUnsupported(opt) => write!(f, "unsupported option '{opt}'"),
            Self::OptionInvalidArg(arg) => write!(f, "invalid argument '{arg}'"),
            Self::OptionInvalidId(id) => write!(f, "invalid component id {id}"),
            Self::OptionLocked(opt) => {
                write!(f, "option '{opt}' cannot change while the machine is powered on")
            }
            Self::PoweredOff => write!(f, "the machine is powered off"),
            Self::PoweredOn => write!(f, "the machine is powered on"),
            Self::Running => write!(f, "the machine is running"),
            Self::DebugOff => write!(f, "debug mode is disabled"),
            Self::DiskMissing => write!(f, "no disk in drive"),
            Self::FileNotFound(path) => write!(f, "file not found: {path}"),
            Self::FileTooLarge => write!(f, "file is too large"),
            Self::FileTooSmall => write!(f, "file is too small"),
            Self::FileTypeMismatch => write!(f, "file type mismatch"),
            Self::FileTypeUnsupported => write!(f, "unsupported file type"),
            Self::CannotRead(path) => write!(f, "cannot read {path}"),
            Self::CannotWrite(path) => write!(f, "cannot write {path}"),
            Self::CannotCreate(path) => write!(f, "cannot create {path}"),
            Self::Fs(err) => write!(f, "{err}"),
            Self::SnapTooOld => write!(f, "snapshot was created by an older incompatible version"),
            Self::SnapTooNew => write!(f, "snapshot was created by a newer version"),
            Self::SnapIsBeta => write!(f, "snapshot was created by a beta version"),
            Self::SnapCorrupted => write!(f, "snapshot data is corrupted"),
            Self::RegReadOnly(reg) => write!(f, "register ${reg:03X} is read-only"),
            Self::RegWriteOnly(reg) => write!(f, "register ${reg:03X} is write-only"),
            Self::RegUnused(reg) => write!(f, "register ${reg:03X} is unused"),
            Self::AddrUnaligned(addr) => write!(f, "address ${addr:06X} is unaligned"),
            Self::GuardNotFound => write!(f, "guard is not set"),
            Self::GuardAlreadySet => write!(f, "guard is already set"),
        }
    }
}

impl std::error::Error for AmigaError {}

impl From<FsError> for AmigaError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}
