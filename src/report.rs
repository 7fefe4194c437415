//! HID report descriptor of the composite keyboard + mouse device and the
//! encoder that keeps its input reports up to date.

use crate::error::{Error, Result};
use crate::input::{BTN_LEFT, BTN_MIDDLE, BTN_RIGHT, KeyState};
use crate::keymap;

pub const REPORT_ID_MOUSE: u8 = 1;
pub const REPORT_ID_KEYBOARD: u8 = 2;

/// Keycode slots in the keyboard report.
pub const KEY_SLOTS: usize = 5;

/// Report ID + modifiers + reserved + keycode slots.
pub const KEYBOARD_REPORT_LEN: usize = 3 + KEY_SLOTS;
/// Report ID + buttons + X + Y + wheel.
pub const MOUSE_REPORT_LEN: usize = 5;

#[rustfmt::skip]
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01,                 // USAGE_PAGE (Generic Desktop)
    0x09, 0x06,                 // USAGE (Keyboard)
    0xa1, 0x01,                 // COLLECTION (Application)
    0x85, REPORT_ID_KEYBOARD,   //   REPORT_ID (2)
    0x05, 0x07,                 //   USAGE_PAGE (Keyboard)
    0x19, 0xe0,                 //   USAGE_MINIMUM (Left Control)
    0x29, 0xe7,                 //   USAGE_MAXIMUM (Right GUI)
    0x15, 0x00,                 //   LOGICAL_MINIMUM (0)
    0x25, 0x01,                 //   LOGICAL_MAXIMUM (1)
    0x95, 0x08,                 //   REPORT_COUNT (8)
    0x75, 0x01,                 //   REPORT_SIZE (1)
    0x81, 0x02,                 //   INPUT (Data,Var,Abs)
    0x95, 0x01,                 //   REPORT_COUNT (1)
    0x75, 0x08,                 //   REPORT_SIZE (8)
    0x81, 0x01,                 //   INPUT (Cnst,Ary,Abs)
    0x95, KEY_SLOTS as u8,      //   REPORT_COUNT (5)
    0x75, 0x08,                 //   REPORT_SIZE (8)
    0x15, 0x00,                 //   LOGICAL_MINIMUM (0)
    0x25, keymap::MAX_USAGE,    //   LOGICAL_MAXIMUM (101)
    0x05, 0x07,                 //   USAGE_PAGE (Keyboard)
    0x19, 0x00,                 //   USAGE_MINIMUM (0)
    0x29, keymap::MAX_USAGE,    //   USAGE_MAXIMUM (101)
    0x81, 0x00,                 //   INPUT (Data,Ary,Abs)
    0xc0,                       // END_COLLECTION

    0x05, 0x01,                 // USAGE_PAGE (Generic Desktop)
    0x09, 0x02,                 // USAGE (Mouse)
    0xa1, 0x01,                 // COLLECTION (Application)
    0x85, REPORT_ID_MOUSE,      //   REPORT_ID (1)
    0x09, 0x01,                 //   USAGE (Pointer)
    0xa1, 0x00,                 //   COLLECTION (Physical)
    0x05, 0x09,                 //     USAGE_PAGE (Button)
    0x19, 0x01,                 //     USAGE_MINIMUM (Button 1)
    0x29, 0x03,                 //     USAGE_MAXIMUM (Button 3)
    0x15, 0x00,                 //     LOGICAL_MINIMUM (0)
    0x25, 0x01,                 //     LOGICAL_MAXIMUM (1)
    0x95, 0x03,                 //     REPORT_COUNT (3)
    0x75, 0x01,                 //     REPORT_SIZE (1)
    0x81, 0x02,                 //     INPUT (Data,Var,Abs)
    0x95, 0x01,                 //     REPORT_COUNT (1)
    0x75, 0x05,                 //     REPORT_SIZE (5)
    0x81, 0x03,                 //     INPUT (Cnst,Var,Abs)
    0x05, 0x01,                 //     USAGE_PAGE (Generic Desktop)
    0x09, 0x30,                 //     USAGE (X)
    0x09, 0x31,                 //     USAGE (Y)
    0x09, 0x38,                 //     USAGE (Wheel)
    0x15, 0x81,                 //     LOGICAL_MINIMUM (-127)
    0x25, 0x7f,                 //     LOGICAL_MAXIMUM (127)
    0x75, 0x08,                 //     REPORT_SIZE (8)
    0x95, 0x03,                 //     REPORT_COUNT (3)
    0x81, 0x06,                 //     INPUT (Data,Var,Rel)
    0xc0,                       //   END_COLLECTION
    0xc0,                       // END_COLLECTION
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Keyboard,
    Mouse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub keycodes: [u8; KEY_SLOTS],
}

impl KeyboardReport {
    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_LEN] {
        let mut bytes = [0u8; KEYBOARD_REPORT_LEN];
        bytes[0] = REPORT_ID_KEYBOARD;
        bytes[1] = self.modifiers;
        bytes[3..].copy_from_slice(&self.keycodes);
        bytes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseReport {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel: i8,
}

impl MouseReport {
    pub fn to_bytes(&self) -> [u8; MOUSE_REPORT_LEN] {
        [
            REPORT_ID_MOUSE,
            self.buttons,
            self.dx as u8,
            self.dy as u8,
            self.wheel as u8,
        ]
    }
}

/// Persistent keyboard and mouse report state of one virtual HID device.
///
/// Every press/release is applied to the same state so that keys held
/// together stay set in the report until each one is released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidReportEncoder {
    keyboard: KeyboardReport,
    mouse: MouseReport,
}

impl HidReportEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a key transition and return which report changed, if any.
    ///
    /// Repeats, presses of held keys and releases of keys that are not
    /// held leave the state untouched and return `Ok(None)`.
    pub fn apply(&mut self, key: u16, state: KeyState) -> Result<Option<ReportKind>> {
        if let Some(bit) = mouse_button_bit(key) {
            let changed = set_bit(&mut self.mouse.buttons, bit, state);
            return Ok(changed.then_some(ReportKind::Mouse));
        }

        if let Some(bit) = keymap::modifier_bit(key) {
            let changed = set_bit(&mut self.keyboard.modifiers, bit, state);
            return Ok(changed.then_some(ReportKind::Keyboard));
        }

        let usage = keymap::hid_usage(key).ok_or(Error::UnmappedKey { key })?;
        let slots = &mut self.keyboard.keycodes;

        let changed = match state {
            KeyState::Repeat => false,
            KeyState::Pressed => {
                if slots.contains(&usage) {
                    false
                } else {
                    let free = slots
                        .iter_mut()
                        .find(|slot| **slot == 0)
                        .ok_or(Error::ReportFull { key })?;
                    *free = usage;
                    true
                }
            }
            KeyState::Released => match slots.iter_mut().find(|slot| **slot == usage) {
                Some(slot) => {
                    *slot = 0;
                    true
                }
                None => false,
            },
        };

        Ok(changed.then_some(ReportKind::Keyboard))
    }

    /// Mouse report carrying one-shot relative motion on top of the held
    /// buttons. The motion is not kept in the persistent state.
    pub fn motion(&self, dx: i32, dy: i32, wheel: i32) -> [u8; MOUSE_REPORT_LEN] {
        MouseReport {
            dx: clamp_axis(dx),
            dy: clamp_axis(dy),
            wheel: clamp_axis(wheel),
            ..self.mouse
        }
        .to_bytes()
    }

    pub fn keyboard(&self) -> &KeyboardReport {
        &self.keyboard
    }

    pub fn mouse(&self) -> &MouseReport {
        &self.mouse
    }

    /// Wire bytes of the given report, report ID first.
    pub fn report_bytes(&self, kind: ReportKind) -> Vec<u8> {
        match kind {
            ReportKind::Keyboard => self.keyboard.to_bytes().to_vec(),
            ReportKind::Mouse => self.mouse.to_bytes().to_vec(),
        }
    }

    /// Forget every held key and button.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn mouse_button_bit(key: u16) -> Option<u8> {
    match key {
        BTN_LEFT => Some(0x01),
        BTN_RIGHT => Some(0x02),
        BTN_MIDDLE => Some(0x04),
        _ => None,
    }
}

fn set_bit(mask: &mut u8, bit: u8, state: KeyState) -> bool {
    let before = *mask;
    match state {
        KeyState::Pressed => *mask |= bit,
        KeyState::Released => *mask &= !bit,
        KeyState::Repeat => {}
    }
    *mask != before
}

fn clamp_axis(value: i32) -> i8 {
    value.clamp(-127, 127) as i8
}
