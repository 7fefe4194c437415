//! Linux input subsystem ABI: event types, key codes, ioctl request
//! numbers and the `#[repr(C)]` records shared by evdev and uinput.

use std::mem::size_of;

// Event types
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;

pub const SYN_REPORT: u16 = 0x00;

// Relative axes
pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_WHEEL: u16 = 0x08;

// Mouse buttons
pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;

// A handful of keys referenced by name; everything else goes by number.
pub const KEY_ESC: u16 = 1;
pub const KEY_LEFTCTRL: u16 = 29;
pub const KEY_A: u16 = 30;
pub const KEY_LEFTSHIFT: u16 = 42;
pub const KEY_C: u16 = 46;
pub const KEY_B: u16 = 48;
pub const KEY_RIGHTSHIFT: u16 = 54;
pub const KEY_LEFTALT: u16 = 56;
pub const KEY_SPACE: u16 = 57;
pub const KEY_RIGHTCTRL: u16 = 97;
pub const KEY_RIGHTALT: u16 = 100;
pub const KEY_LEFTMETA: u16 = 125;
pub const KEY_RIGHTMETA: u16 = 126;

/// Highest keyboard key code announced by the uinput backend.
pub const KEY_LAST_KEYBOARD: u16 = 255;

pub const BUS_USB: u16 = 0x03;

// evdev ioctls
pub const EVIOCGRAB: u64 = 0x40044590;

/// `EVIOCGNAME(len)`: read the device name into a buffer of `len` bytes.
pub const fn eviocgname(len: usize) -> u64 {
    // _IOC(_IOC_READ, 'E', 0x06, len)
    0x80000000 | ((len as u64 & 0x1fff) << 16) | (b'E' as u64) << 8 | 0x06
}

// uinput ioctls
pub const UI_SET_EVBIT: u64 = 0x40045564;
pub const UI_SET_KEYBIT: u64 = 0x40045565;
pub const UI_SET_RELBIT: u64 = 0x40045566;
pub const UI_DEV_SETUP: u64 = 0x405c5503;
pub const UI_DEV_CREATE: u64 = 0x5501;
pub const UI_DEV_DESTROY: u64 = 0x5502;

pub const UINPUT_MAX_NAME_SIZE: usize = 80;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

#[repr(C)]
#[derive(Debug)]
pub struct UinputSetup {
    pub id: InputId,
    pub name: [u8; UINPUT_MAX_NAME_SIZE],
    pub ff_effects_max: u32,
}

impl UinputSetup {
    /// Build a setup record, truncating `name` so it stays NUL terminated.
    pub fn new(id: InputId, name: &str) -> Self {
        let mut buf = [0u8; UINPUT_MAX_NAME_SIZE];
        let len = name.len().min(UINPUT_MAX_NAME_SIZE - 1);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            id,
            name: buf,
            ff_effects_max: 0,
        }
    }
}

/// One `struct input_event` as read from `/dev/input/eventN` or written
/// to `/dev/uinput`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawEvent {
    pub time: libc::timeval,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub const SIZE: usize = size_of::<RawEvent>();

    /// Event with a zero timestamp; the kernel stamps uinput writes itself.
    pub fn new(type_: u16, code: u16, value: i32) -> Self {
        Self {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            type_,
            code,
            value,
        }
    }

    /// Decode one record. `bytes` must hold at least [`RawEvent::SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        // input_event has no padding and every bit pattern is valid
        Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const RawEvent) })
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, Self::SIZE) }
    }
}

impl std::fmt::Debug for RawEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawEvent")
            .field("sec", &self.time.tv_sec)
            .field("usec", &self.time.tv_usec)
            .field("type", &self.type_)
            .field("code", &self.code)
            .field("value", &self.value)
            .finish()
    }
}

impl PartialEq for RawEvent {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for RawEvent {}

/// Value of an `EV_KEY` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Released,
    Pressed,
    Repeat,
}

impl KeyState {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyState::Released),
            1 => Some(KeyState::Pressed),
            2 => Some(KeyState::Repeat),
            _ => None,
        }
    }

    pub fn value(self) -> i32 {
        match self {
            KeyState::Released => 0,
            KeyState::Pressed => 1,
            KeyState::Repeat => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_decodes_its_own_bytes() {
        let ev = RawEvent::new(EV_KEY, KEY_A, 1);
        let decoded = RawEvent::from_bytes(ev.as_bytes()).unwrap();
        assert_eq!(decoded, ev);
        assert!(RawEvent::from_bytes(&ev.as_bytes()[..RawEvent::SIZE - 1]).is_none());
    }

    #[test]
    fn eviocgname_matches_kernel_encoding() {
        assert_eq!(eviocgname(256), 0x81004506);
    }

    #[test]
    fn key_state_values() {
        assert_eq!(KeyState::from_value(2), Some(KeyState::Repeat));
        assert_eq!(KeyState::from_value(7), None);
        assert_eq!(KeyState::Pressed.value(), 1);
    }

    #[test]
    fn setup_name_is_truncated_and_terminated() {
        let long = "x".repeat(200);
        let setup = UinputSetup::new(InputId::default(), &long);
        assert_eq!(setup.name[UINPUT_MAX_NAME_SIZE - 1], 0);
        assert_eq!(setup.name[0], b'x');
    }
}
