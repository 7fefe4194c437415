use crate::error::Result;
use crate::input::{BUS_USB, KeyState};
use crate::uhid::VirtualHidBackend;
use crate::uinput::VirtualUinputBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Identity announced for the virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    pub name: String,
    #[serde(default = "default_bus")]
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    #[serde(default)]
    pub version: u16,
}

fn default_bus() -> u16 {
    BUS_USB
}

impl VirtualDeviceConfig {
    pub fn hid_default() -> Self {
        Self {
            name: "macrokey virtual uhid".to_string(),
            bus: BUS_USB,
            vendor: 0x15d9,
            product: 0x0a37,
            version: 0,
        }
    }

    pub fn uinput_default() -> Self {
        Self {
            name: "macrokey virtual mouse & keyboard".to_string(),
            bus: BUS_USB,
            vendor: 0x1234,
            product: 0x5678,
            version: 0,
        }
    }
}

/// What the control loop needs from a virtual output device.
pub trait VirtualDevice {
    /// Re-emit a key or mouse button transition.
    fn send(&mut self, key: u16, state: KeyState) -> Result<()>;

    /// Relative pointer motion and wheel movement.
    fn move_relative(&mut self, dx: i32, dy: i32, wheel: i32) -> Result<()>;

    /// Deregister the device. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// uhid first, uinput if uhid cannot be registered.
    #[default]
    Auto,
    Hid,
    Uinput,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "hid" | "uhid" => Ok(BackendKind::Hid),
            "uinput" => Ok(BackendKind::Uinput),
            other => Err(format!("unknown backend '{}' (expected auto, hid or uinput)", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Auto => "auto",
            BackendKind::Hid => "hid",
            BackendKind::Uinput => "uinput",
        };
        f.write_str(name)
    }
}

/// The one virtual device active in this process.
///
/// Opening both kinds at once is not guarded against here; callers keep
/// a single `Backend` alive at a time. If several threads share it, wrap
/// it in one `Mutex` so a report is never written half-updated.
pub enum Backend {
    Hid(VirtualHidBackend),
    Uinput(VirtualUinputBackend),
}

impl Backend {
    /// Open the requested backend. `config` overrides the per-backend
    /// default identity.
    pub fn open(kind: BackendKind, config: Option<&VirtualDeviceConfig>) -> Result<Self> {
        match kind {
            BackendKind::Hid => Self::open_hid(config),
            BackendKind::Uinput => Self::open_uinput(config),
            BackendKind::Auto => Self::open_hid(config).or_else(|e| {
                warn!("{}, falling back to uinput", e);
                Self::open_uinput(config)
            }),
        }
    }

    fn open_hid(config: Option<&VirtualDeviceConfig>) -> Result<Self> {
        let config = config.cloned().unwrap_or_else(VirtualDeviceConfig::hid_default);
        VirtualHidBackend::open(&config).map(Backend::Hid)
    }

    fn open_uinput(config: Option<&VirtualDeviceConfig>) -> Result<Self> {
        let config = config
            .cloned()
            .unwrap_or_else(VirtualDeviceConfig::uinput_default);
        VirtualUinputBackend::open(&config).map(Backend::Uinput)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Hid(_) => BackendKind::Hid,
            Backend::Uinput(_) => BackendKind::Uinput,
        }
    }
}

impl VirtualDevice for Backend {
    fn send(&mut self, key: u16, state: KeyState) -> Result<()> {
        match self {
            Backend::Hid(dev) => dev.send(key, state),
            Backend::Uinput(dev) => dev.send(key, state),
        }
    }

    fn move_relative(&mut self, dx: i32, dy: i32, wheel: i32) -> Result<()> {
        match self {
            Backend::Hid(dev) => dev.move_relative(dx, dy, wheel),
            Backend::Uinput(dev) => dev.move_relative(dx, dy, wheel),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Backend::Hid(dev) => dev.close(),
            Backend::Uinput(dev) => dev.close(),
        }
    }
}
