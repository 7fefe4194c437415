//! The control loop and the API exposed to whatever decides the mapping.
//!
//! An [`Engine`] owns the open physical devices and the virtual output
//! for as long as the loop runs. Events flow out through an
//! [`EventSink`]; the sink gets the virtual device handed in so it can
//! re-emit whatever it maps an event to.

use crate::backend::{Backend, VirtualDevice};
use crate::device::{DeviceId, PhysicalDevice};
use crate::error::{Error, Result};
use crate::input::{KeyState, RawEvent};
use crate::multiplexer::DeviceMultiplexer;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on one wait so the sink's `on_idle` keeps ticking.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// An input event tagged with the device it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device_id: DeviceId,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl DeviceEvent {
    pub fn from_raw(device_id: DeviceId, raw: &RawEvent) -> Self {
        Self {
            device_id,
            event_type: raw.type_,
            code: raw.code,
            value: raw.value,
        }
    }
}

/// Receiver of the loop's output.
///
/// Anything the sink needs to make calling into it thread safe is its
/// own business; the loop calls it from one thread only.
pub trait EventSink {
    fn on_event(&mut self, event: DeviceEvent, output: &mut dyn VirtualDevice);

    /// Called once per wake-up, whether or not events arrived.
    fn on_idle(&mut self, _output: &mut dyn VirtualDevice) {}
}

/// Cloneable request to leave the loop at the next wake-up.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fail unless the process runs with root privileges. Check this before
/// opening any device.
pub fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        return Err(Error::InsufficientPrivileges);
    }
    Ok(())
}

pub struct Engine<D: VirtualDevice = Backend> {
    multiplexer: DeviceMultiplexer,
    output: D,
    next_id: DeviceId,
    timeout: Duration,
    stop: StopHandle,
}

impl<D: VirtualDevice> Engine<D> {
    pub fn new(output: D) -> Self {
        Self {
            multiplexer: DeviceMultiplexer::new(),
            output,
            next_id: 0,
            timeout: DEFAULT_TIMEOUT,
            stop: StopHandle::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a physical device and add it to the serviced set.
    pub fn open_physical_device(&mut self, path: impl AsRef<Path>, exclusive: bool) -> Result<DeviceId> {
        let id = self.next_id;
        let device = PhysicalDevice::open(path, exclusive, id)?;
        Ok(self.attach(device))
    }

    pub(crate) fn attach(&mut self, device: PhysicalDevice) -> DeviceId {
        let id = device.id();
        self.next_id = self.next_id.max(id + 1);
        // open() and the tests only ever hand over open devices
        if self.multiplexer.register(device).is_err() {
            warn!("Device {} was closed before it could be registered", id);
        }
        id
    }

    pub fn devices(&self) -> &[PhysicalDevice] {
        self.multiplexer.devices()
    }

    /// Re-emit a key transition on the virtual device outside the loop.
    pub fn send_virtual_event(&mut self, key: u16, state: KeyState) -> Result<()> {
        self.output.send(key, state)
    }

    pub fn output(&mut self) -> &mut D {
        &mut self.output
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop_loop(&self) {
        self.stop.stop();
    }

    /// Run until [`Engine::stop_loop`] or a fatal wait error.
    pub fn start_loop<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        info!(
            "Starting event loop over {} device(s), timeout {:?}",
            self.multiplexer.len(),
            self.timeout
        );

        let Self {
            multiplexer,
            output,
            timeout,
            stop,
            ..
        } = self;
        let mut reported_empty = false;

        while !stop.is_stopped() {
            let result = multiplexer.wait_and_dispatch(*timeout, |device, raw| {
                sink.on_event(DeviceEvent::from_raw(device.id(), raw), output);
            });

            match result {
                Ok(status) => trace!("Wake-up: {:?}", status),
                Err(e) if !e.is_fatal() => warn!("{}", e),
                Err(e) => {
                    error!("Event loop aborted: {}", e);
                    stop.reset();
                    return Err(e);
                }
            }

            // Keep idling with no devices; on_idle housekeeping still runs.
            if multiplexer.is_empty() && !reported_empty {
                warn!("No input devices left to read");
                reported_empty = true;
            }

            sink.on_idle(output);
        }

        stop.reset();
        info!("Event loop stopped");
        Ok(())
    }

    /// Close every physical device, then the virtual one.
    pub fn shutdown(mut self) -> Result<()> {
        debug!("Shutting down {} device(s)", self.multiplexer.len());
        self.multiplexer.close_all();
        self.output.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{fake_device, write_events};
    use crate::input::{BTN_LEFT, EV_KEY, EV_SYN, KEY_A};
    use crate::report::REPORT_ID_MOUSE;
    use crate::uhid::tests::{fake_backend, read_input2};

    /// Maps KEY_A to the left button and stops after `limit` key events.
    struct ClickSink {
        stop: StopHandle,
        seen: Vec<DeviceEvent>,
        idles: usize,
        limit: usize,
    }

    impl EventSink for ClickSink {
        fn on_event(&mut self, event: DeviceEvent, output: &mut dyn VirtualDevice) {
            if event.event_type != EV_KEY {
                return;
            }
            self.seen.push(event);
            if event.code == KEY_A {
                if let Some(state) = KeyState::from_value(event.value) {
                    output.send(BTN_LEFT, state).unwrap();
                }
            }
        }

        fn on_idle(&mut self, _output: &mut dyn VirtualDevice) {
            self.idles += 1;
            if self.seen.len() >= self.limit || self.idles > 50 {
                self.stop.stop();
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(u16, KeyState)>,
        closed: usize,
    }

    impl VirtualDevice for Recorder {
        fn send(&mut self, key: u16, state: KeyState) -> Result<()> {
            self.sent.push((key, state));
            Ok(())
        }

        fn move_relative(&mut self, _dx: i32, _dy: i32, _wheel: i32) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed += 1;
            Ok(())
        }
    }

    #[test]
    fn footswitch_key_becomes_left_click() {
        let (hid, mut uhid) = fake_backend();
        let mut engine = Engine::new(Backend::Hid(hid)).with_timeout(Duration::from_millis(20));

        let (device, mut feed) = fake_device(0, true);
        let id = engine.attach(device);
        write_events(
            &mut feed,
            &[
                RawEvent::new(EV_KEY, KEY_A, 1),
                RawEvent::new(EV_SYN, 0, 0),
                RawEvent::new(EV_KEY, KEY_A, 0),
                RawEvent::new(EV_SYN, 0, 0),
            ],
        );

        let mut sink = ClickSink {
            stop: engine.stop_handle(),
            seen: Vec::new(),
            idles: 0,
            limit: 2,
        };
        engine.start_loop(&mut sink).unwrap();

        assert_eq!(sink.seen.len(), 2);
        assert!(sink.seen.iter().all(|e| e.device_id == id));
        assert_eq!(read_input2(&mut uhid), vec![REPORT_ID_MOUSE, 0x01, 0, 0, 0]);
        assert_eq!(read_input2(&mut uhid), vec![REPORT_ID_MOUSE, 0x00, 0, 0, 0]);

        engine.shutdown().unwrap();
    }

    #[test]
    fn idle_runs_on_every_timeout() {
        let mut engine = Engine::new(Recorder::default()).with_timeout(Duration::from_millis(1));
        let (device, _feed) = fake_device(0, false);
        engine.attach(device);

        let mut sink = ClickSink {
            stop: engine.stop_handle(),
            seen: Vec::new(),
            idles: 0,
            limit: usize::MAX,
        };
        engine.start_loop(&mut sink).unwrap();

        assert_eq!(sink.idles, 51);
        assert!(sink.seen.is_empty());
        assert!(engine.output().sent.is_empty());
    }

    #[test]
    fn stop_before_start_returns_immediately_once() {
        let mut engine = Engine::new(Recorder::default()).with_timeout(Duration::from_millis(1));
        let mut sink = ClickSink {
            stop: engine.stop_handle(),
            seen: Vec::new(),
            idles: 0,
            limit: 0,
        };

        engine.stop_loop();
        engine.start_loop(&mut sink).unwrap();
        assert_eq!(sink.idles, 0);

        // The request was consumed; the next run goes until the sink stops it.
        engine.start_loop(&mut sink).unwrap();
        assert_eq!(sink.idles, 1);
    }

    #[test]
    fn send_outside_the_loop_and_shutdown() {
        let mut engine = Engine::new(Recorder::default());
        engine.send_virtual_event(KEY_A, KeyState::Pressed).unwrap();
        assert_eq!(engine.output().sent, vec![(KEY_A, KeyState::Pressed)]);

        let (device, _feed) = fake_device(4, false);
        assert_eq!(engine.attach(device), 4);
        assert_eq!(engine.devices().len(), 1);
        engine.shutdown().unwrap();
    }

    #[test]
    fn missing_device_is_reported_and_not_registered() {
        let mut engine = Engine::new(Recorder::default());
        assert!(matches!(
            engine.open_physical_device("/nonexistent/event0", true),
            Err(Error::OpenFailed { .. })
        ));
        assert!(engine.devices().is_empty());
    }
}
