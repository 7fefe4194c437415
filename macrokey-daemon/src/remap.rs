use crate::config::DaemonConfig;
use macrokey::{DeviceEvent, EV_KEY, EventSink, KeyState, VirtualDevice};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Sink that re-emits key events through the virtual device, translated
/// through a fixed key table.
pub struct RemapSink {
    table: HashMap<u16, u16>,
    passthrough: bool,
    forwarded: u64,
}

impl RemapSink {
    pub fn new(table: HashMap<u16, u16>, passthrough: bool) -> Self {
        Self {
            table,
            passthrough,
            forwarded: 0,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        let table = config.remap.iter().map(|r| (r.from, r.to)).collect();
        Self::new(table, config.passthrough)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn target(&self, code: u16) -> Option<u16> {
        match self.table.get(&code) {
            Some(&to) => Some(to),
            None if self.passthrough => Some(code),
            None => None,
        }
    }
}

impl EventSink for RemapSink {
    fn on_event(&mut self, event: DeviceEvent, output: &mut dyn VirtualDevice) {
        if event.event_type != EV_KEY {
            return;
        }

        let Some(key) = self.target(event.code) else {
            trace!("Device {}: key {} not mapped", event.device_id, event.code);
            return;
        };
        let Some(state) = KeyState::from_value(event.value) else {
            debug!("Device {}: odd key value {}", event.device_id, event.value);
            return;
        };

        match output.send(key, state) {
            Ok(()) => {
                self.forwarded += 1;
                debug!(
                    "Device {}: key {} {:?} -> {}",
                    event.device_id, event.code, state, key
                );
            }
            Err(e) => warn!("Device {}: {}", event.device_id, e),
        }
    }
}
