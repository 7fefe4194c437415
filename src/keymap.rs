//! evdev key codes to USB HID usages (page 0x07, Keyboard/Keypad).
//!
//! HID keeps modifiers out of the keycode array: they travel as the eight
//! bits of the report's modifier byte, so they get their own lookup.

use crate::input::{
    KEY_LEFTALT, KEY_LEFTCTRL, KEY_LEFTMETA, KEY_LEFTSHIFT, KEY_RIGHTALT, KEY_RIGHTCTRL,
    KEY_RIGHTMETA, KEY_RIGHTSHIFT,
};

/// Highest usage the keyboard collection of the report descriptor accepts.
pub const MAX_USAGE: u8 = 0x65;

/// Modifier-byte bit for an evdev modifier key.
pub fn modifier_bit(key: u16) -> Option<u8> {
    let bit = match key {
        KEY_LEFTCTRL => 0x01,
        KEY_LEFTSHIFT => 0x02,
        KEY_LEFTALT => 0x04,
        KEY_LEFTMETA => 0x08,
        KEY_RIGHTCTRL => 0x10,
        KEY_RIGHTSHIFT => 0x20,
        KEY_RIGHTALT => 0x40,
        KEY_RIGHTMETA => 0x80,
        _ => return None,
    };
    Some(bit)
}

/// HID usage for a non-modifier evdev key, if the descriptor can carry it.
pub fn hid_usage(key: u16) -> Option<u8> {
    let usage = match key {
        1 => 0x29,             // ESC
        // 1..9
        2..=10 => key - 2 + 0x1e,
        11 => 0x27,            // 0
        12 => 0x2d,            // MINUS
        13 => 0x2e,            // EQUAL
        14 => 0x2a,            // BACKSPACE
        15 => 0x2b,            // TAB
        16 => 0x14,            // Q
        17 => 0x1a,            // W
        18 => 0x08,            // E
        19 => 0x15,            // R
        20 => 0x17,            // T
        21 => 0x1c,            // Y
        22 => 0x18,            // U
        23 => 0x0c,            // I
        24 => 0x12,            // O
        25 => 0x13,            // P
        26 => 0x2f,            // LEFTBRACE
        27 => 0x30,            // RIGHTBRACE
        28 => 0x28,            // ENTER
        30 => 0x04,            // A
        31 => 0x16,            // S
        32 => 0x07,            // D
        33 => 0x09,            // F
        34 => 0x0a,            // G
        35 => 0x0b,            // H
        36 => 0x0d,            // J
        37 => 0x0e,            // K
        38 => 0x0f,            // L
        39 => 0x33,            // SEMICOLON
        40 => 0x34,            // APOSTROPHE
        41 => 0x35,            // GRAVE
        43 => 0x31,            // BACKSLASH
        44 => 0x1d,            // Z
        45 => 0x1b,            // X
        46 => 0x06,            // C
        47 => 0x19,            // V
        48 => 0x05,            // B
        49 => 0x11,            // N
        50 => 0x10,            // M
        51 => 0x36,            // COMMA
        52 => 0x37,            // DOT
        53 => 0x38,            // SLASH
        55 => 0x55,            // KPASTERISK
        57 => 0x2c,            // SPACE
        58 => 0x39,            // CAPSLOCK
        // F1..F10
        59..=68 => key - 59 + 0x3a,
        69 => 0x53,            // NUMLOCK
        70 => 0x47,            // SCROLLLOCK
        71 => 0x5f,            // KP7
        72 => 0x60,            // KP8
        73 => 0x61,            // KP9
        74 => 0x56,            // KPMINUS
        75 => 0x5c,            // KP4
        76 => 0x5d,            // KP5
        77 => 0x5e,            // KP6
        78 => 0x57,            // KPPLUS
        79 => 0x59,            // KP1
        80 => 0x5a,            // KP2
        81 => 0x5b,            // KP3
        82 => 0x62,            // KP0
        83 => 0x63,            // KPDOT
        86 => 0x64,            // 102ND
        87 => 0x44,            // F11
        88 => 0x45,            // F12
        96 => 0x58,            // KPENTER
        98 => 0x54,            // KPSLASH
        99 => 0x46,            // SYSRQ
        102 => 0x4a,           // HOME
        103 => 0x52,           // UP
        104 => 0x4b,           // PAGEUP
        105 => 0x50,           // LEFT
        106 => 0x4f,           // RIGHT
        107 => 0x4d,           // END
        108 => 0x51,           // DOWN
        109 => 0x4e,           // PAGEDOWN
        110 => 0x49,           // INSERT
        111 => 0x4c,           // DELETE
        119 => 0x48,           // PAUSE
        127 => 0x65,           // COMPOSE
        _ => return None,
    };
    Some(usage as u8)
}
