//! Virtual keyboard + mouse on top of `/dev/uinput`.

use crate::backend::VirtualDeviceConfig;
use crate::error::{Error, Result};
use crate::input::*;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const UINPUT_PATH: &str = "/dev/uinput";

/// Time given to udev and friends to pick up a freshly created node.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

pub struct VirtualUinputBackend {
    path: PathBuf,
    file: Option<File>,
}

impl VirtualUinputBackend {
    pub fn open(config: &VirtualDeviceConfig) -> Result<Self> {
        Self::open_at(UINPUT_PATH, config)
    }

    pub fn open_at(path: impl AsRef<Path>, config: &VirtualDeviceConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let registration_failed = |source: io::Error| Error::RegistrationFailed {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(&path)
            .map_err(registration_failed)?;
        let fd = file.as_raw_fd();

        setup_device(fd, config).map_err(registration_failed)?;
        ioctl_none(fd, UI_DEV_CREATE).map_err(registration_failed)?;

        info!(
            "Created uinput device \"{}\" ({:04x}:{:04x}) via {}",
            config.name,
            config.vendor,
            config.product,
            path.display()
        );

        std::thread::sleep(SETTLE_DELAY);

        Ok(Self::from_file(path, file))
    }

    /// Wrap a handle whose device has already been created.
    pub(crate) fn from_file(path: impl AsRef<Path>, file: File) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Some(file),
        }
    }

    /// Emit `key` with `state` followed by a `SYN_REPORT`. The kernel
    /// tracks held keys itself, so nothing is remembered here.
    pub fn send(&mut self, key: u16, state: KeyState) -> Result<()> {
        debug!("Key {} {:?}", key, state);
        self.emit(&[
            RawEvent::new(EV_KEY, key, state.value()),
            RawEvent::new(EV_SYN, SYN_REPORT, 0),
        ])
    }

    /// Emit the non-zero relative axes followed by a `SYN_REPORT`.
    pub fn move_relative(&mut self, dx: i32, dy: i32, wheel: i32) -> Result<()> {
        let mut events: Vec<RawEvent> = [(REL_X, dx), (REL_Y, dy), (REL_WHEEL, wheel)]
            .into_iter()
            .filter(|&(_, value)| value != 0)
            .map(|(code, value)| RawEvent::new(EV_REL, code, value))
            .collect();
        if events.is_empty() {
            return Ok(());
        }
        events.push(RawEvent::new(EV_SYN, SYN_REPORT, 0));
        self.emit(&events)
    }

    fn emit(&mut self, events: &[RawEvent]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::WriteFailed(io::Error::from_raw_os_error(libc::EBADF)))?;

        for event in events {
            let written = file.write(event.as_bytes()).map_err(Error::WriteFailed)?;
            if written != RawEvent::SIZE {
                return Err(Error::WriteFailed(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write to uinput: {} of {} bytes", written, RawEvent::SIZE),
                )));
            }
        }
        Ok(())
    }

    /// Destroy the device and close the handle. Safe to call twice.
    pub fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let result = ioctl_none(file.as_raw_fd(), UI_DEV_DESTROY);
        drop(file);
        info!("Destroyed uinput device at {}", self.path.display());
        result.map_err(Error::WriteFailed)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for VirtualUinputBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to destroy uinput device: {}", e);
        }
    }
}

fn setup_device(fd: RawFd, config: &VirtualDeviceConfig) -> io::Result<()> {
    ioctl_int(fd, UI_SET_EVBIT, EV_KEY)?;
    for key in 1..=KEY_LAST_KEYBOARD {
        ioctl_int(fd, UI_SET_KEYBIT, key)?;
    }
    for button in [BTN_LEFT, BTN_RIGHT, BTN_MIDDLE] {
        ioctl_int(fd, UI_SET_KEYBIT, button)?;
    }

    ioctl_int(fd, UI_SET_EVBIT, EV_REL)?;
    for axis in [REL_X, REL_Y, REL_WHEEL] {
        ioctl_int(fd, UI_SET_RELBIT, axis)?;
    }

    let setup = UinputSetup::new(
        InputId {
            bustype: config.bus,
            vendor: config.vendor,
            product: config.product,
            version: config.version,
        },
        &config.name,
    );
    if unsafe { libc::ioctl(fd, UI_DEV_SETUP as _, &setup as *const UinputSetup) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn ioctl_int(fd: RawFd, request: u64, value: u16) -> io::Result<()> {
    if unsafe { libc::ioctl(fd, request as _, libc::c_int::from(value)) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn ioctl_none(fd: RawFd, request: u64) -> io::Result<()> {
    if unsafe { libc::ioctl(fd, request as _) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    pub(crate) fn fake_backend() -> (VirtualUinputBackend, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let file = File::from(std::os::fd::OwnedFd::from(ours));
        (VirtualUinputBackend::from_file("/fake/uinput", file), theirs)
    }

    pub(crate) fn read_events(stream: &mut UnixStream, count: usize) -> Vec<RawEvent> {
        let mut buf = vec![0u8; RawEvent::SIZE * count];
        stream.read_exact(&mut buf).unwrap();
        buf.chunks_exact(RawEvent::SIZE)
            .filter_map(RawEvent::from_bytes)
            .collect()
    }

    #[test]
    fn send_emits_key_then_sync() {
        let (mut backend, mut stream) = fake_backend();
        backend.send(KEY_A, KeyState::Pressed).unwrap();
        backend.send(KEY_A, KeyState::Repeat).unwrap();

        assert_eq!(
            read_events(&mut stream, 4),
            vec![
                RawEvent::new(EV_KEY, KEY_A, 1),
                RawEvent::new(EV_SYN, SYN_REPORT, 0),
                RawEvent::new(EV_KEY, KEY_A, 2),
                RawEvent::new(EV_SYN, SYN_REPORT, 0),
            ]
        );
    }

    #[test]
    fn motion_skips_zero_axes() {
        let (mut backend, mut stream) = fake_backend();
        backend.move_relative(0, -3, 0).unwrap();
        backend.move_relative(0, 0, 0).unwrap();
        backend.send(BTN_RIGHT, KeyState::Released).unwrap();

        assert_eq!(
            read_events(&mut stream, 4),
            vec![
                RawEvent::new(EV_REL, REL_Y, -3),
                RawEvent::new(EV_SYN, SYN_REPORT, 0),
                RawEvent::new(EV_KEY, BTN_RIGHT, 0),
                RawEvent::new(EV_SYN, SYN_REPORT, 0),
            ]
        );
    }

    #[test]
    fn closed_backend_refuses_writes() {
        let (mut backend, _stream) = fake_backend();
        // UI_DEV_DESTROY is not understood by a socket.
        assert!(backend.close().is_err());
        assert!(backend.close().is_ok());
        assert!(!backend.is_open());
        assert!(matches!(
            backend.send(KEY_A, KeyState::Pressed),
            Err(Error::WriteFailed(_))
        ));
    }

    #[test]
    fn missing_node_is_a_registration_failure() {
        let err = VirtualUinputBackend::open_at(
            "/nonexistent/uinput",
            &VirtualDeviceConfig::uinput_default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::RegistrationFailed { .. }));
    }
}
