//! Virtual HID device on top of `/dev/uhid`.
//!
//! Messages written to uhid are a packed `struct uhid_event`: a `u32`
//! type followed by the request. Creation sends the whole structure,
//! input reports only the type, the size and the meaningful report bytes.

use crate::backend::VirtualDeviceConfig;
use crate::error::{Error, Result};
use crate::input::KeyState;
use crate::report::{HidReportEncoder, REPORT_DESCRIPTOR};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

pub const UHID_PATH: &str = "/dev/uhid";

pub const UHID_DESTROY: u32 = 1;
pub const UHID_CREATE2: u32 = 11;
pub const UHID_INPUT2: u32 = 12;

pub const UHID_DATA_MAX: usize = 4096;

const NAME_LEN: usize = 128;
const PHYS_LEN: usize = 64;
const UNIQ_LEN: usize = 64;

// Offsets inside the packed create2 request, counted from the start of the event.
const CREATE2_NAME: usize = 4;
const CREATE2_RD_SIZE: usize = CREATE2_NAME + NAME_LEN + PHYS_LEN + UNIQ_LEN;
const CREATE2_BUS: usize = CREATE2_RD_SIZE + 2;
const CREATE2_VENDOR: usize = CREATE2_BUS + 2;
const CREATE2_PRODUCT: usize = CREATE2_VENDOR + 4;
const CREATE2_VERSION: usize = CREATE2_PRODUCT + 4;
const CREATE2_COUNTRY: usize = CREATE2_VERSION + 4;
const CREATE2_RD_DATA: usize = CREATE2_COUNTRY + 4;

/// `sizeof(struct uhid_event)`; the create2 request is the largest member.
pub const UHID_EVENT_SIZE: usize = CREATE2_RD_DATA + UHID_DATA_MAX;

const INPUT2_HEADER: usize = 4 + 2;

/// `UHID_CREATE2` carrying `descriptor` and the identity in `config`.
pub fn create2_message(config: &VirtualDeviceConfig, descriptor: &[u8]) -> Vec<u8> {
    let mut msg = vec![0u8; UHID_EVENT_SIZE];
    msg[..4].copy_from_slice(&UHID_CREATE2.to_ne_bytes());

    let name = config.name.as_bytes();
    let name_len = name.len().min(NAME_LEN - 1);
    msg[CREATE2_NAME..CREATE2_NAME + name_len].copy_from_slice(&name[..name_len]);

    let rd_len = descriptor.len().min(UHID_DATA_MAX);
    msg[CREATE2_RD_SIZE..CREATE2_BUS].copy_from_slice(&(rd_len as u16).to_ne_bytes());
    msg[CREATE2_BUS..CREATE2_VENDOR].copy_from_slice(&config.bus.to_ne_bytes());
    msg[CREATE2_VENDOR..CREATE2_PRODUCT].copy_from_slice(&u32::from(config.vendor).to_ne_bytes());
    msg[CREATE2_PRODUCT..CREATE2_VERSION].copy_from_slice(&u32::from(config.product).to_ne_bytes());
    msg[CREATE2_VERSION..CREATE2_COUNTRY].copy_from_slice(&u32::from(config.version).to_ne_bytes());
    // country stays 0
    msg[CREATE2_RD_DATA..CREATE2_RD_DATA + rd_len].copy_from_slice(&descriptor[..rd_len]);
    msg
}

/// `UHID_DESTROY`.
pub fn destroy_message() -> Vec<u8> {
    let mut msg = vec![0u8; UHID_EVENT_SIZE];
    msg[..4].copy_from_slice(&UHID_DESTROY.to_ne_bytes());
    msg
}

/// `UHID_INPUT2` truncated after the report bytes.
pub fn input2_message(report: &[u8]) -> Vec<u8> {
    let len = report.len().min(UHID_DATA_MAX);
    let mut msg = Vec::with_capacity(INPUT2_HEADER + len);
    msg.extend_from_slice(&UHID_INPUT2.to_ne_bytes());
    msg.extend_from_slice(&(len as u16).to_ne_bytes());
    msg.extend_from_slice(&report[..len]);
    msg
}

/// Composite keyboard + mouse exposed through uhid.
pub struct VirtualHidBackend {
    path: PathBuf,
    file: Option<File>,
    encoder: HidReportEncoder,
}

impl VirtualHidBackend {
    pub fn open(config: &VirtualDeviceConfig) -> Result<Self> {
        Self::open_at(UHID_PATH, config)
    }

    pub fn open_at(path: impl AsRef<Path>, config: &VirtualDeviceConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(|source| Error::RegistrationFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::register(path, file, config)
    }

    /// Announce the device on an already-open uhid handle.
    pub(crate) fn register(path: impl AsRef<Path>, file: File, config: &VirtualDeviceConfig) -> Result<Self> {
        let mut backend = Self {
            path: path.as_ref().to_path_buf(),
            file: Some(file),
            encoder: HidReportEncoder::new(),
        };

        if let Err(source) = backend.write_message(&create2_message(config, REPORT_DESCRIPTOR)) {
            // Nothing was registered, so there is nothing to destroy.
            backend.file = None;
            return Err(Error::RegistrationFailed {
                path: backend.path.clone(),
                source,
            });
        }

        info!(
            "Created uhid device \"{}\" ({:04x}:{:04x}) via {}",
            config.name,
            config.vendor,
            config.product,
            backend.path.display()
        );
        Ok(backend)
    }

    /// Update the persistent report for `key` and write it if it changed.
    pub fn send(&mut self, key: u16, state: KeyState) -> Result<()> {
        let Some(kind) = self.encoder.apply(key, state)? else {
            trace!("Key {} {:?}: report unchanged", key, state);
            return Ok(());
        };

        let report = self.encoder.report_bytes(kind);
        debug!("Key {} {:?} -> {:?} report {:02x?}", key, state, kind, report);
        self.write_report(&report)
    }

    /// Move the pointer and wheel by the given deltas.
    pub fn move_relative(&mut self, dx: i32, dy: i32, wheel: i32) -> Result<()> {
        let report = self.encoder.motion(dx, dy, wheel);
        self.write_report(&report)
    }

    pub fn encoder(&self) -> &HidReportEncoder {
        &self.encoder
    }

    /// Destroy the device and close the handle. Safe to call twice.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let result = self.write_message(&destroy_message());
        self.file = None;
        self.encoder.clear();
        info!("Destroyed uhid device at {}", self.path.display());
        result.map_err(Error::WriteFailed)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        self.write_message(&input2_message(report))
            .map_err(Error::WriteFailed)
    }

    fn write_message(&mut self, msg: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;

        let written = file.write(msg)?;
        if written != msg.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write to uhid: {} of {} bytes", written, msg.len()),
            ));
        }
        Ok(())
    }
}

impl Drop for VirtualHidBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to destroy uhid device: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::{BTN_LEFT, KEY_A};
    use crate::report::{REPORT_ID_KEYBOARD, REPORT_ID_MOUSE};
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    pub(crate) fn fake_backend() -> (VirtualHidBackend, UnixStream) {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let file = File::from(std::os::fd::OwnedFd::from(ours));
        let backend =
            VirtualHidBackend::register("/fake/uhid", file, &VirtualDeviceConfig::hid_default())
                .unwrap();
        let mut create = vec![0u8; UHID_EVENT_SIZE];
        theirs.read_exact(&mut create).unwrap();
        (backend, theirs)
    }

    /// Read one input2 message and return its report bytes.
    pub(crate) fn read_input2(stream: &mut UnixStream) -> Vec<u8> {
        let mut header = [0u8; INPUT2_HEADER];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(u32::from_ne_bytes(header[..4].try_into().unwrap()), UHID_INPUT2);
        let len = u16::from_ne_bytes(header[4..].try_into().unwrap()) as usize;
        let mut report = vec![0u8; len];
        stream.read_exact(&mut report).unwrap();
        report
    }

    #[test]
    fn create2_layout() {
        let config = VirtualDeviceConfig::hid_default();
        let msg = create2_message(&config, REPORT_DESCRIPTOR);

        assert_eq!(msg.len(), 4376);
        assert_eq!(u32::from_ne_bytes(msg[..4].try_into().unwrap()), UHID_CREATE2);
        assert!(msg[CREATE2_NAME..].starts_with(config.name.as_bytes()));
        assert_eq!(
            u16::from_ne_bytes(msg[260..262].try_into().unwrap()) as usize,
            REPORT_DESCRIPTOR.len()
        );
        assert_eq!(u16::from_ne_bytes(msg[262..264].try_into().unwrap()), config.bus);
        assert_eq!(u32::from_ne_bytes(msg[264..268].try_into().unwrap()), 0x15d9);
        assert_eq!(u32::from_ne_bytes(msg[268..272].try_into().unwrap()), 0x0a37);
        assert_eq!(&msg[280..280 + REPORT_DESCRIPTOR.len()], REPORT_DESCRIPTOR);
    }

    #[test]
    fn input2_carries_only_the_report() {
        let msg = input2_message(&[1, 2, 3]);
        assert_eq!(msg.len(), 9);
        assert_eq!(u16::from_ne_bytes(msg[4..6].try_into().unwrap()), 3);
        assert_eq!(&msg[6..], &[1, 2, 3]);
    }

    #[test]
    fn press_and_release_write_mouse_reports() {
        let (mut backend, mut stream) = fake_backend();

        backend.send(BTN_LEFT, KeyState::Pressed).unwrap();
        assert_eq!(read_input2(&mut stream), vec![REPORT_ID_MOUSE, 0x01, 0, 0, 0]);

        backend.send(BTN_LEFT, KeyState::Released).unwrap();
        assert_eq!(read_input2(&mut stream), vec![REPORT_ID_MOUSE, 0, 0, 0, 0]);
    }

    #[test]
    fn keyboard_report_has_eight_bytes() {
        let (mut backend, mut stream) = fake_backend();
        backend.send(KEY_A, KeyState::Pressed).unwrap();
        assert_eq!(
            read_input2(&mut stream),
            vec![REPORT_ID_KEYBOARD, 0, 0, 0x04, 0, 0, 0, 0]
        );
    }

    #[test]
    fn repeat_writes_nothing() {
        let (mut backend, mut stream) = fake_backend();
        backend.send(KEY_A, KeyState::Pressed).unwrap();
        read_input2(&mut stream);
        backend.send(KEY_A, KeyState::Repeat).unwrap();

        backend.send(BTN_LEFT, KeyState::Pressed).unwrap();
        // The next message on the wire is the mouse press, not a repeat.
        assert_eq!(read_input2(&mut stream)[0], REPORT_ID_MOUSE);
    }

    #[test]
    fn failed_write_keeps_state() {
        let (mut backend, stream) = fake_backend();
        drop(stream);
        assert!(matches!(
            backend.send(BTN_LEFT, KeyState::Pressed),
            Err(Error::WriteFailed(_))
        ));
        assert_eq!(backend.encoder().mouse().buttons, 0x01);
    }

    #[test]
    fn close_sends_destroy_once() {
        let (mut backend, mut stream) = fake_backend();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(!backend.is_open());

        let mut msg = vec![0u8; UHID_EVENT_SIZE];
        stream.read_exact(&mut msg).unwrap();
        assert_eq!(u32::from_ne_bytes(msg[..4].try_into().unwrap()), UHID_DESTROY);

        drop(backend);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn missing_node_is_a_registration_failure() {
        let err = VirtualHidBackend::open_at("/nonexistent/uhid", &VirtualDeviceConfig::hid_default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::RegistrationFailed { .. }));
    }
}
