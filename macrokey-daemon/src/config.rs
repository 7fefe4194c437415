use anyhow::{Context, Result};
use macrokey::{BTN_LEFT, BTN_MIDDLE, BTN_RIGHT, BackendKind, VirtualDeviceConfig};
use serde::Deserialize;
use std::path::Path;

const KEY_A: u16 = 30;
const KEY_B: u16 = 48;
const KEY_C: u16 = 46;

/// Settings read from the JSON file given with `--config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DaemonConfig {
    /// Devices to read, matched by a substring of their name
    pub devices: Vec<DeviceMatch>,
    #[serde(default)]
    pub remap: Vec<RemapRule>,
    /// Forward keys without a remap rule unchanged
    #[serde(default)]
    pub passthrough: bool,
    #[serde(default)]
    pub backend: Option<BackendKind>,
    #[serde(default)]
    pub virtual_device: Option<VirtualDeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceMatch {
    pub name: String,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RemapRule {
    pub from: u16,
    pub to: u16,
}

fn default_exclusive() -> bool {
    true
}

impl Default for DaemonConfig {
    /// Three-pedal footswitch: A, B and C click right, middle and left.
    fn default() -> Self {
        Self {
            devices: vec![
                DeviceMatch {
                    name: "FootSwitch".to_string(),
                    exclusive: true,
                },
                DeviceMatch {
                    name: "HID 413d:2107 Keyboard".to_string(),
                    exclusive: true,
                },
            ],
            remap: vec![
                RemapRule {
                    from: KEY_A,
                    to: BTN_RIGHT,
                },
                RemapRule {
                    from: KEY_B,
                    to: BTN_MIDDLE,
                },
                RemapRule {
                    from: KEY_C,
                    to: BTN_LEFT,
                },
            ],
            passthrough: false,
            backend: None,
            virtual_device: None,
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if config.devices.is_empty() {
            anyhow::bail!("at least one device must be configured");
        }
        if let Some(rule) = config.devices.iter().find(|d| d.name.is_empty()) {
            anyhow::bail!("device match {:?} has an empty name", rule);
        }
        Ok(config)
    }

    /// The first configured match for a device name.
    pub fn match_device(&self, name: &str) -> Option<&DeviceMatch> {
        self.devices.iter().find(|m| name.contains(&m.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = DaemonConfig::parse(
            r#"{
                "devices": [{ "name": "Pedal" }, { "name": "Keyboard", "exclusive": false }],
                "remap": [{ "from": 30, "to": 272 }],
                "passthrough": true,
                "backend": "uinput",
                "virtual_device": { "name": "pedal out", "vendor": 1, "product": 2 }
            }"#,
        )
        .unwrap();

        assert!(config.devices[0].exclusive);
        assert!(!config.devices[1].exclusive);
        assert_eq!(config.remap, vec![RemapRule { from: 30, to: 272 }]);
        assert!(config.passthrough);
        assert_eq!(config.backend, Some(BackendKind::Uinput));

        let virt = config.virtual_device.unwrap();
        assert_eq!(virt.bus, 0x03);
        assert_eq!(virt.version, 0);
    }

    #[test]
    fn rejects_empty_device_list() {
        assert!(DaemonConfig::parse(r#"{ "devices": [] }"#).is_err());
        assert!(DaemonConfig::parse(r#"{ "devices": [{ "name": "" }] }"#).is_err());
        assert!(DaemonConfig::parse("not json").is_err());
    }

    #[test]
    fn matches_by_substring_in_order() {
        let config = DaemonConfig::default();
        let hit = config.match_device("PCsensor FootSwitch").unwrap();
        assert_eq!(hit.name, "FootSwitch");
        assert!(config.match_device("AT Translated Set 2 keyboard").is_none());
    }
}
