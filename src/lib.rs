//! Macrokey - re-emit physical input through a virtual device
//!
//! Reads key events from one or more evdev devices (keyboards,
//! footswitches) and replays whatever they are mapped to through a
//! virtual composite keyboard + mouse, created either via uhid or uinput.

pub mod backend;
pub mod device;
pub mod engine;
pub mod error;
pub mod input;
pub mod keymap;
pub mod multiplexer;
pub mod report;
pub mod uhid;
pub mod uinput;

// Re-export commonly used types
pub use backend::{Backend, BackendKind, VirtualDevice, VirtualDeviceConfig};
pub use device::{DeviceId, DeviceInfo, PhysicalDevice, list_devices, probe_name};
pub use engine::{DeviceEvent, Engine, EventSink, StopHandle, check_privileges};
pub use error::{Error, Result};
pub use input::{BTN_LEFT, BTN_MIDDLE, BTN_RIGHT, EV_KEY, EV_SYN, KeyState, RawEvent};
pub use multiplexer::{DeviceMultiplexer, DispatchStatus};
pub use report::{HidReportEncoder, ReportKind};
pub use uhid::VirtualHidBackend;
pub use uinput::VirtualUinputBackend;
