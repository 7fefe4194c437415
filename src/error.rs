use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the device, multiplexer and virtual backend layers.
///
/// Only `WaitFailed`, `RegistrationFailed` and `InsufficientPrivileges`
/// are fatal; the rest concern a single device or a single event.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open input device {path}: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },

    #[error("exclusive grab of {path} failed: {source}")]
    GrabFailed { path: PathBuf, source: io::Error },

    #[error("short read of {len} bytes")]
    ShortRead { len: usize },

    #[error("read from {path} failed: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("waiting on input devices failed: {0}")]
    WaitFailed(#[source] io::Error),

    #[error("all keycode slots in use, press of key {key} dropped")]
    ReportFull { key: u16 },

    #[error("key {key} has no HID usage")]
    UnmappedKey { key: u16 },

    #[error("write to virtual device failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to register virtual device at {path}: {source}")]
    RegistrationFailed { path: PathBuf, source: io::Error },

    #[error("insufficient privileges to access input devices (run as root)")]
    InsufficientPrivileges,
}

impl Error {
    /// Whether the control loop must stop after seeing this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WaitFailed(_) | Error::RegistrationFailed { .. } | Error::InsufficientPrivileges
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
