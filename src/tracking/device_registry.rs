//! Bookkeeping for the devices currently open on the tracking service.
//!
//! The registry turns raw connect/lost notifications into serial-keyed
//! [`DeviceRecord`]s. It is owned by the polling thread and mutated only
//! there; interested parties observe changes through a [`DeviceListener`].

use super::event_source::{DeviceHandle, DeviceId, DeviceRef, SourceError, TrackingEventSource};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One opened, identified device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub serial: String,
    pub handle: DeviceHandle,
    /// False when subscribing for tracking events failed.
    pub subscribed: bool,
    pub connected_at: DateTime<Local>,
}

/// Receives device and service lifecycle notifications from the polling thread.
pub trait DeviceListener: Send + Sync + 'static {
    fn device_connected(&self, record: &DeviceRecord);

    /// Called while the device handle is still open.
    fn device_lost(&self, serial: &str);

    fn service_connected(&self) {}

    fn service_lost(&self) {}
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceRecord>,
    listener: Option<Arc<dyn DeviceListener>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listener(&mut self, listener: Arc<dyn DeviceListener>) {
        self.listener = Some(listener);
    }

    pub fn listener(&self) -> Option<&Arc<dyn DeviceListener>> {
        self.listener.as_ref()
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn serial_for(&self, id: DeviceId) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.serial.as_str())
    }

    /// Opens every device visible at startup.
    ///
    /// Devices that cannot be subscribed or identified are closed and left out.
    /// Returns false when no device made it into the registry; the caller keeps
    /// running and picks devices up from later connect events.
    pub fn initialize_devices(&mut self, source: &mut dyn TrackingEventSource) -> bool {
        let refs = match source.device_list() {
            Ok(refs) => refs,
            Err(e) => {
                error!("Failed to enumerate devices: {}", e);
                return false;
            }
        };

        if refs.is_empty() {
            warn!("No tracking devices found at startup");
            return false;
        }
        info!("Tracking device count: {}", refs.len());

        for device in refs {
            let handle = match source.open_device(device) {
                Ok(handle) => handle,
                Err(e) => {
                    error!("Failed to open device {}: {}", device.id, e);
                    continue;
                }
            };

            if let Err(e) = source.subscribe(handle) {
                error!(
                    "Failed to subscribe device {} at startup, skipping it: {}",
                    device.id, e
                );
                source.close_device(handle);
                continue;
            }

            let serial = match identify(source, handle) {
                Ok(serial) => serial,
                Err(e) => {
                    error!("Device {} has no usable serial, skipping it: {}", device.id, e);
                    release(source, handle);
                    continue;
                }
            };

            if self.is_duplicate(device.id, &serial) {
                warn!(
                    "Device id {} or serial {} enumerated twice, ignoring the duplicate",
                    device.id, serial
                );
                release(source, handle);
                continue;
            }

            info!("Opened and subscribed device id {} serial {}", device.id, serial);
            let record = DeviceRecord {
                id: device.id,
                serial,
                handle,
                subscribed: true,
                connected_at: Local::now(),
            };
            self.devices.push(record.clone());
            self.notify_connected(&record);
        }

        !self.devices.is_empty()
    }

    /// Handles a connect notification.
    pub fn handle_device_event(&mut self, source: &mut dyn TrackingEventSource, device: DeviceRef) {
        if let Some(known) = self.devices.iter().find(|d| d.id == device.id) {
            info!(
                "Device re-connected: id {} serial {}",
                known.id, known.serial
            );
            let known = known.clone();
            self.notify_connected(&known);
            return;
        }

        debug!("New device connected: id {}", device.id);
        let handle = match source.open_device(device) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to open newly connected device {}: {}", device.id, e);
                return;
            }
        };

        // A device that cannot subscribe stays registered; it just will not track.
        let subscribed = match source.subscribe(handle) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to subscribe device {}, tracking might not work for it: {}",
                    device.id, e
                );
                false
            }
        };

        let serial = match identify(source, handle) {
            Ok(serial) => serial,
            Err(e) => {
                error!(
                    "Device {} has no usable serial, cannot add it: {}",
                    device.id, e
                );
                release(source, handle);
                return;
            }
        };

        if self.is_duplicate(device.id, &serial) {
            warn!(
                "Device with id {} or serial {} already exists, ignoring duplicate connection",
                device.id, serial
            );
            release(source, handle);
            return;
        }

        info!("Added new device: id {} serial {}", device.id, serial);
        let record = DeviceRecord {
            id: device.id,
            serial,
            handle,
            subscribed,
            connected_at: Local::now(),
        };
        self.devices.push(record.clone());
        self.notify_connected(&record);
    }

    /// Handles a lost notification. The listener hears about it before the
    /// handle is released.
    pub fn handle_device_lost(&mut self, source: &mut dyn TrackingEventSource, device: DeviceRef) {
        let Some(index) = self.devices.iter().position(|d| d.id == device.id) else {
            warn!("Device lost event for unknown id {}", device.id);
            return;
        };

        let record = &self.devices[index];
        info!(
            "Device lost: id {} serial {} (connected since {})",
            record.id,
            record.serial,
            record.connected_at.format("%H:%M:%S")
        );

        if let Some(listener) = &self.listener {
            listener.device_lost(&record.serial);
        }

        let record = self.devices.remove(index);
        release(source, record.handle);
    }

    pub fn handle_service_connected(&self) {
        info!("Tracking service connected");
        if let Some(listener) = &self.listener {
            listener.service_connected();
        }
    }

    pub fn handle_service_lost(&self) {
        warn!("Tracking service connection lost");
        if let Some(listener) = &self.listener {
            listener.service_lost();
        }
    }

    /// Releases every remaining device handle.
    pub fn cleanup(&mut self, source: &mut dyn TrackingEventSource) {
        if !self.devices.is_empty() {
            info!("Closing {} remaining device handle(s)", self.devices.len());
        }
        for record in self.devices.drain(..) {
            debug!("Closing handle for serial {}", record.serial);
            release(source, record.handle);
        }
    }

    fn is_duplicate(&self, id: DeviceId, serial: &str) -> bool {
        self.devices
            .iter()
            .any(|d| d.id == id || d.serial == serial)
    }

    fn notify_connected(&self, record: &DeviceRecord) {
        if let Some(listener) = &self.listener {
            listener.device_connected(record);
        }
    }
}

fn identify(
    source: &mut dyn TrackingEventSource,
    handle: DeviceHandle,
) -> Result<String, SourceError> {
    let serial = source.device_serial(handle)?;
    if serial.is_empty() {
        return Err(SourceError::SerialUnavailable("empty serial".to_string()));
    }
    Ok(serial)
}

fn release(source: &mut dyn TrackingEventSource, handle: DeviceHandle) {
    if let Err(e) = source.unsubscribe(handle) {
        warn!("Failed to unsubscribe {:?}: {}", handle, e);
    }
    source.close_device(handle);
}
