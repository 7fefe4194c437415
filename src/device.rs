use crate::error::{Error, Result};
use crate::input::{EVIOCGRAB, RawEvent, eviocgname};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Logical identifier handed out for each opened physical device.
pub type DeviceId = u32;

/// Name reported for devices that refuse `EVIOCGNAME`.
pub const UNKNOWN_NAME: &str = "???";

/// Largest number of records fetched by a single read.
pub const MAX_BATCH: usize = 64;

/// An opened `/dev/input/eventN` node.
///
/// The descriptor is owned exclusively by this value; it is closed (and
/// the grab released) by [`PhysicalDevice::close`] or on drop.
pub struct PhysicalDevice {
    path: PathBuf,
    file: Option<File>,
    exclusive: bool,
    display_name: String,
    logical_id: DeviceId,
}

impl PhysicalDevice {
    /// Open `path` read-write and, if `exclusive`, grab it.
    ///
    /// A failed grab is logged and otherwise ignored: the device can
    /// still be read, other readers just keep seeing its events.
    pub fn open(path: impl AsRef<Path>, exclusive: bool, logical_id: DeviceId) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(|source| Error::OpenFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let device = Self::from_file(path, file, exclusive, logical_id);
        info!(
            "Opened device {} ({}) as id {}",
            device.path.display(),
            device.display_name,
            logical_id
        );
        Ok(device)
    }

    /// Wrap an already-open descriptor.
    pub(crate) fn from_file(
        path: impl AsRef<Path>,
        file: File,
        exclusive: bool,
        logical_id: DeviceId,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let display_name = query_name(file.as_raw_fd()).unwrap_or_else(|| UNKNOWN_NAME.to_string());

        let mut device = Self {
            path,
            file: Some(file),
            exclusive,
            display_name,
            logical_id,
        };

        if exclusive {
            if let Err(e) = device.grab() {
                warn!("{} (other processes will still see its events)", e);
            }
        }

        device
    }

    fn grab(&mut self) -> Result<()> {
        let fd = self.raw_fd().ok_or_else(|| Error::GrabFailed {
            path: self.path.clone(),
            source: io::Error::from_raw_os_error(libc::EBADF),
        })?;

        if unsafe { libc::ioctl(fd, EVIOCGRAB as _, 1 as libc::c_int) } != 0 {
            return Err(Error::GrabFailed {
                path: self.path.clone(),
                source: io::Error::last_os_error(),
            });
        }

        debug!("Grabbed {} exclusively", self.path.display());
        Ok(())
    }

    /// Perform one read and decode every whole record it returned.
    ///
    /// Nothing pending and reads shorter than one record both yield an
    /// empty batch. End of file and transport errors are reported as
    /// [`Error::ReadFailed`]; the caller drops the device.
    pub fn read_batch(&mut self, max_events: usize) -> Result<Vec<RawEvent>> {
        let path = &self.path;
        let file = self.file.as_mut().ok_or_else(|| Error::ReadFailed {
            path: path.clone(),
            source: io::Error::from_raw_os_error(libc::EBADF),
        })?;

        let mut buf = vec![0u8; RawEvent::SIZE * max_events.clamp(1, MAX_BATCH)];
        let len = match file.read(&mut buf) {
            Ok(0) => {
                return Err(Error::ReadFailed {
                    path: path.clone(),
                    source: io::Error::from(io::ErrorKind::UnexpectedEof),
                });
            }
            Ok(len) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(Error::ReadFailed {
                    path: path.clone(),
                    source,
                });
            }
        };

        if len < RawEvent::SIZE {
            trace!("{}", Error::ShortRead { len });
            return Ok(Vec::new());
        }

        Ok(buf[..len]
            .chunks_exact(RawEvent::SIZE)
            .filter_map(RawEvent::from_bytes)
            .collect())
    }

    /// Release the grab (best effort) and close the descriptor.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if self.exclusive {
                unsafe { libc::ioctl(file.as_raw_fd(), EVIOCGRAB as _, 0 as libc::c_int) };
            }
            info!("Closed device {}", self.path.display());
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.display_name
    }

    pub fn id(&self) -> DeviceId {
        self.logical_id
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for PhysicalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn query_name(fd: RawFd) -> Option<String> {
    let mut name = [0u8; 256];
    let ret = unsafe { libc::ioctl(fd, eviocgname(name.len()) as _, name.as_mut_ptr()) };
    if ret < 0 {
        return None;
    }
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    Some(String::from_utf8_lossy(&name[..end]).into_owned())
}

/// Read the name of an input device without keeping it open.
pub fn probe_name(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
        .map_err(|source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(query_name(file.as_raw_fd()).unwrap_or_else(|| UNKNOWN_NAME.to_string()))
}

/// An entry found by [`list_devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
}

/// List `event*` nodes under `dir` in name order, skipping ones that
/// cannot be opened.
pub fn list_devices_in(dir: impl AsRef<Path>) -> io::Result<Vec<DeviceInfo>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("event"))
        .map(|entry| entry.path())
        .collect();
    paths.sort_by_key(|p| event_index(p));

    Ok(paths
        .into_iter()
        .filter_map(|path| match probe_name(&path) {
            Ok(name) => Some(DeviceInfo { path, name }),
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect())
}

/// List the system's input devices from `/dev/input`.
pub fn list_devices() -> io::Result<Vec<DeviceInfo>> {
    list_devices_in("/dev/input")
}

fn event_index(path: &Path) -> (u32, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = name
        .strip_prefix("event")
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX);
    (index, name)
}
