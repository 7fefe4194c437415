use crate::device::{DeviceId, MAX_BATCH, PhysicalDevice};
use crate::error::{Error, Result};
use crate::input::RawEvent;
use std::io;
use std::time::Duration;
use tracing::{trace, warn};

/// Outcome of one [`DeviceMultiplexer::wait_and_dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatus {
    pub events_dispatched: usize,
    pub timed_out: bool,
}

/// Set of physical devices serviced by a single bounded `poll(2)`.
///
/// Devices are kept in registration order; that order is also the
/// dispatch order within one wake-up.
#[derive(Default)]
pub struct DeviceMultiplexer {
    devices: Vec<PhysicalDevice>,
}

impl DeviceMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open device. Closed devices are refused and handed back.
    pub fn register(&mut self, device: PhysicalDevice) -> std::result::Result<(), PhysicalDevice> {
        if !device.is_open() {
            return Err(device);
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<PhysicalDevice> {
        let index = self.devices.iter().position(|d| d.id() == id)?;
        Some(self.devices.remove(index))
    }

    pub fn devices(&self) -> &[PhysicalDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Block until a device is readable, `timeout` elapses or a signal
    /// interrupts the wait, then hand every decoded event of every ready
    /// device to `handler`.
    ///
    /// A device whose read fails (or which reports a hang-up) is closed
    /// and dropped; the remaining devices are still serviced.
    pub fn wait_and_dispatch<F>(&mut self, timeout: Duration, mut handler: F) -> Result<DispatchStatus>
    where
        F: FnMut(&PhysicalDevice, &RawEvent),
    {
        let mut fds: Vec<libc::pollfd> = self
            .devices
            .iter()
            .filter_map(|d| d.raw_fd())
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("poll interrupted");
                return Ok(DispatchStatus::default());
            }
            return Err(Error::WaitFailed(err));
        }

        if ready == 0 {
            return Ok(DispatchStatus {
                events_dispatched: 0,
                timed_out: true,
            });
        }

        let mut status = DispatchStatus::default();
        let mut failed = Vec::new();

        for (device, pollfd) in self.devices.iter_mut().zip(&fds) {
            let revents = pollfd.revents;
            if revents == 0 {
                continue;
            }

            if revents & libc::POLLIN == 0 {
                warn!(
                    "Device {} ({}) reported poll condition {:#x}, dropping it",
                    device.path().display(),
                    device.name(),
                    revents
                );
                failed.push(device.id());
                continue;
            }

            match device.read_batch(MAX_BATCH) {
                Ok(events) => {
                    for event in &events {
                        handler(device, event);
                    }
                    status.events_dispatched += events.len();
                }
                Err(e) => {
                    warn!("{}, dropping device {}", e, device.id());
                    failed.push(device.id());
                }
            }
        }

        for id in failed {
            if let Some(mut device) = self.remove(id) {
                device.close();
            }
        }

        Ok(status)
    }

    /// Close every device and empty the set.
    pub fn close_all(&mut self) {
        for mut device in self.devices.drain(..) {
            device.close();
        }
    }
}
