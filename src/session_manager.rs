//! The BLE session state machine.
//!
//! [`SessionManager`] owns the discovery coordinator, the connection
//! controller, the service/characteristic catalog and the data channel. It is
//! driven from one logical thread: commands arrive through its methods,
//! platform completions through [`SessionManager::handle_event`], and all
//! output leaves as [`SessionEvent`]s.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::catalog::{CharacteristicRecord, DetailsOutcome, ServiceCatalog, ServiceRecord};
use crate::ble::channel::DataChannel;
use crate::ble::connection::{ConnectionController, ConnectionState};
use crate::ble::discovery::{DiscoveredDevice, DiscoveryCoordinator, DiscoveryState};
use crate::ble::platform::{BlePlatform, CharacteristicHandle, ControllerId, PlatformEvent};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{Notifier, SessionEvent};

/// Central state machine of one BLE session.
pub struct SessionManager<P: BlePlatform> {
    platform: P,
    config: SessionConfig,
    notifier: Notifier,
    discovery: DiscoveryCoordinator,
    connection: ConnectionController,
    catalog: ServiceCatalog,
    channel: DataChannel,
    deferred: VecDeque<SessionEvent>,
}

impl<P: BlePlatform> SessionManager<P> {
    /// Create a session over `platform`.
    pub fn new(platform: P, config: SessionConfig) -> Self {
        Self {
            notifier: Notifier::new(config.event_capacity),
            discovery: DiscoveryCoordinator::new(config.discovery_timeout),
            connection: ConnectionController::new(config.address_type),
            catalog: ServiceCatalog::new(),
            channel: DataChannel::new(),
            deferred: VecDeque::new(),
            platform,
            config,
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The platform backend.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable access to the platform backend.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current scan state.
    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    /// Devices from the last completed scan.
    pub fn devices(&self) -> &[DiscoveredDevice] {
        self.discovery.devices()
    }

    /// The device selected for connection.
    pub fn selected_device(&self) -> Option<&DiscoveredDevice> {
        self.connection.selected_device()
    }

    /// Services of the connected peripheral.
    pub fn services(&self) -> &[ServiceRecord] {
        self.catalog.services()
    }

    /// Characteristics of the selected service.
    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        self.catalog.characteristics()
    }

    /// The bound RX characteristic.
    pub fn rx_characteristic(&self) -> Option<&CharacteristicHandle> {
        self.channel.rx()
    }

    /// The bound TX characteristic.
    pub fn tx_characteristic(&self) -> Option<&CharacteristicHandle> {
        self.channel.tx()
    }

    /// Number of notifications waiting in the deferred queue.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Controller id of the current connection handle.
    pub fn controller(&self) -> Option<ControllerId> {
        self.connection.controller()
    }

    /// Start a device scan, clearing the previous results.
    pub fn start_discovery(&mut self) -> bool {
        self.discovery.start(&mut self.platform, &self.notifier)
    }

    /// Select a device from the last scan by display name and connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] or [`Error::InvalidDevice`]; in both
    /// cases no connection state changes.
    pub fn select_device(&mut self, name: &str) -> Result<()> {
        let Some(device) = self.discovery.find_by_name(name).cloned() else {
            warn!("Device not found: {:?}", name);
            return Err(Error::DeviceNotFound {
                name: name.to_string(),
            });
        };

        self.connection.select(&device)?;
        self.connect()
    }

    /// Connect to the selected device.
    ///
    /// The catalog is cleared (characteristics, then services) before the
    /// connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDeviceSelected`] if no device was selected.
    pub fn connect(&mut self) -> Result<()> {
        if self.connection.selected_device().is_none() {
            return Err(Error::NoDeviceSelected);
        }

        self.channel.reset();
        self.catalog.clear_characteristics(&self.notifier);
        self.notifier.console("Characteristics cleared");
        self.catalog.clear_services(&self.notifier);
        self.notifier.console("Service cleared");

        self.connection
            .connect(&mut self.platform, &self.notifier)
            .map(|_| ())
    }

    /// Disconnect from the current device.
    pub fn disconnect(&mut self) {
        self.connection.disconnect(&mut self.platform, &self.notifier);
    }

    /// Select a service and enumerate its characteristics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before service discovery has started and
    /// [`Error::ServiceNotFound`] on a lookup miss, which keeps the current
    /// RX and TX bindings.
    pub fn select_service(&mut self, uuid: &str) -> Result<()> {
        if !self.connection.state().is_linked() {
            return Err(Error::NotConnected);
        }

        if self.catalog.find_service(uuid).is_some() {
            self.channel.release(&mut self.platform);
        }
        let outcome = self
            .catalog
            .select_service(uuid, &mut self.platform, &self.notifier)?;
        self.apply_outcome(outcome);
        Ok(())
    }

    /// Subscribe to notifications from the characteristic `uuid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`], [`Error::CharacteristicNotFound`] or
    /// [`Error::InvalidHandle`]; none of them change the current binding.
    pub fn select_notify_characteristic(&mut self, uuid: &str) -> Result<()> {
        self.ensure_ready()?;
        let record = self.lookup_characteristic(uuid)?;
        self.channel.select_notify(&record, &mut self.platform)
    }

    /// Use the characteristic `uuid` as the write target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`], [`Error::CharacteristicNotFound`] or
    /// [`Error::InvalidHandle`]; none of them change the current target.
    pub fn select_write_characteristic(&mut self, uuid: &str) -> Result<()> {
        self.ensure_ready()?;
        let record = self.lookup_characteristic(uuid)?;
        self.channel.select_write(&record)
    }

    /// Frame and send a text message on the TX characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoWriteTarget`] if no TX characteristic is selected.
    pub fn write(&mut self, message: &str) -> Result<()> {
        self.channel
            .write(message, &mut self.platform, &self.notifier)
    }

    /// Apply a platform completion.
    pub fn handle_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::DeviceDiscovered { scan, device } => {
                self.discovery
                    .on_device_discovered(scan, &device, &self.notifier);
            }
            PlatformEvent::ScanFinished { scan, devices } => {
                self.discovery
                    .on_scan_finished(scan, devices, &self.notifier);
            }
            PlatformEvent::ScanFailed { scan, error } => {
                self.discovery.on_scan_failed(scan, &error, &self.notifier);
            }
            PlatformEvent::Connected(controller) => {
                self.connection
                    .on_connected(controller, &mut self.platform, &self.notifier);
            }
            PlatformEvent::ControllerError { controller, message } => {
                self.connection
                    .on_error(controller, &message, &self.notifier);
            }
            PlatformEvent::Disconnected(controller) => {
                if self.connection.on_disconnected(controller, &self.notifier) {
                    self.channel.reset();
                }
            }
            PlatformEvent::ServiceDiscovered { controller, uuid } => {
                if self.connection.is_discovering(controller) {
                    self.catalog
                        .add_service(controller, uuid, &mut self.platform, &self.notifier);
                } else {
                    debug!("Ignoring service {} from {} outside discovery", uuid, controller);
                }
            }
            PlatformEvent::ServiceDiscoveryFinished(controller) => {
                if self.connection.is_discovering(controller) {
                    self.catalog.finish_discovery(&self.notifier);
                    self.connection
                        .on_services_discovered(controller, &self.notifier);
                }
            }
            PlatformEvent::ServiceStateChanged { service, state } => {
                if !self.connection.is_current(service.controller) {
                    return;
                }
                let outcome = self.catalog.on_service_state_changed(
                    &service,
                    state,
                    &mut self.platform,
                    &self.notifier,
                );
                self.apply_outcome(outcome);
            }
            PlatformEvent::CharacteristicChanged {
                characteristic,
                value,
            } => {
                self.forward_value(&characteristic, value);
            }
        }
    }

    /// Publish notifications that were scheduled for after the current event.
    pub fn run_deferred(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.deferred.pop_front() {
            self.notifier.emit(event);
            count += 1;
        }
        count
    }

    /// Stop scanning, disconnect, and release the connection handle.
    pub fn shutdown(&mut self) {
        info!("Shutting down session");
        self.discovery.stop(&mut self.platform);
        self.channel.reset();
        self.connection.shutdown(&mut self.platform, &self.notifier);
        self.deferred.clear();
    }

    fn forward_value(&mut self, characteristic: &CharacteristicHandle, value: Bytes) {
        if self.connection.is_current(characteristic.controller) {
            self.channel
                .on_value_changed(characteristic, value, &self.notifier);
        }
    }

    fn apply_outcome(&mut self, outcome: DetailsOutcome) {
        if outcome == DetailsOutcome::GaveUp {
            debug!("Scheduling characteristics fallback");
            self.deferred.push_back(SessionEvent::CharacteristicsUpdated);
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.connection.state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady { state })
        }
    }

    fn lookup_characteristic(&self, uuid: &str) -> Result<CharacteristicRecord> {
        self.catalog.find_characteristic(uuid).cloned().ok_or_else(|| {
            warn!("Characteristic not found: {}", uuid);
            Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            }
        })
    }

}

impl<P: BlePlatform> Drop for SessionManager<P> {
    fn drop(&mut self) {
        if self.connection.active().is_some() {
            self.shutdown();
        }
    }
}
