//! BLE connection management.
//!
//! Owns the single active connection handle and sequences
//! connect → service discovery → ready.

use tracing::{debug, info, warn};

use crate::ble::discovery::DiscoveredDevice;
use crate::ble::platform::{AddressType, BlePlatform, ControllerId, LinkState};
use crate::error::{Error, Result};
use crate::events::{Notifier, SessionEvent};

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection attempted yet.
    #[default]
    Idle,
    /// Waiting for the link to come up.
    Connecting,
    /// Link up, primary services being discovered.
    ServiceDiscovering,
    /// Services known; characteristic operations allowed.
    Ready,
    /// The link went down.
    Disconnected,
    /// The controller reported an error.
    Error,
}

impl ConnectionState {
    /// Check if characteristic operations are allowed.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the link is believed to be up.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::ServiceDiscovering | Self::Ready)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::ServiceDiscovering)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServiceDiscovering => write!(f, "ServiceDiscovering"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// The connection handle to one remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnection {
    /// Platform controller id.
    pub controller: ControllerId,
    /// The device the controller was created for.
    pub device: DiscoveredDevice,
    /// Address type applied on connect.
    pub address_type: AddressType,
}

/// Manages the link to one remote peripheral.
#[derive(Debug)]
pub struct ConnectionController {
    selected: Option<DiscoveredDevice>,
    active: Option<ActiveConnection>,
    state: ConnectionState,
    connected: bool,
    address_type: AddressType,
    next_controller: u64,
}

impl ConnectionController {
    /// Create a controller applying `address_type` on every connect.
    pub fn new(address_type: AddressType) -> Self {
        Self {
            selected: None,
            active: None,
            state: ConnectionState::Idle,
            connected: false,
            address_type,
            next_controller: 0,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the link is up.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The device chosen by the last successful selection.
    pub fn selected_device(&self) -> Option<&DiscoveredDevice> {
        self.selected.as_ref()
    }

    /// The current connection handle.
    pub fn active(&self) -> Option<&ActiveConnection> {
        self.active.as_ref()
    }

    /// Controller id of the current connection handle.
    pub fn controller(&self) -> Option<ControllerId> {
        self.active.as_ref().map(|a| a.controller)
    }

    /// Check whether an event from `controller` belongs to the current handle.
    pub fn is_current(&self, controller: ControllerId) -> bool {
        self.controller() == Some(controller)
    }

    /// Check whether `controller` is the current handle and services are
    /// being discovered on it.
    pub fn is_discovering(&self, controller: ControllerId) -> bool {
        self.is_current(controller) && self.state == ConnectionState::ServiceDiscovering
    }

    /// Make `device` the target of the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDevice`] if the device identity is unusable; the
    /// previous selection is kept.
    pub fn select(&mut self, device: &DiscoveredDevice) -> Result<()> {
        if !device.is_valid() {
            warn!("Not a valid device: {:?}", device.name);
            return Err(Error::InvalidDevice {
                name: device.name.clone(),
            });
        }
        self.selected = Some(device.clone());
        Ok(())
    }

    /// Connect to the selected device.
    ///
    /// A handle to a different device is disconnected and released first. The
    /// caller is responsible for clearing dependent state beforehand.
    pub fn connect<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        notifier: &Notifier,
    ) -> Result<ControllerId> {
        let device = self.selected.clone().ok_or(Error::NoDeviceSelected)?;

        notifier.console("Start connecting to Device");

        if let Some(previous) = self.active.take() {
            if previous.device.id != device.id {
                info!(
                    "Releasing {} for {} before connecting to {}",
                    previous.controller, previous.device.name, device.name
                );
                platform.disconnect_from_device(previous.controller);
                platform.release_controller(previous.controller);
                self.connected = false;
            } else {
                self.active = Some(previous);
            }
        }

        let controller = match &self.active {
            Some(active) => active.controller,
            None => {
                self.next_controller += 1;
                let controller = ControllerId(self.next_controller);
                debug!("Creating {} for {}", controller, device.id);
                platform.create_controller(controller, &device);
                self.active = Some(ActiveConnection {
                    controller,
                    device: device.clone(),
                    address_type: self.address_type,
                });
                controller
            }
        };

        if self.connected && platform.link_state(controller) == LinkState::Connected {
            debug!("{} already linked, rediscovering services", controller);
            self.set_state(ConnectionState::ServiceDiscovering, notifier);
            notifier.console("Discovering services...");
            platform.discover_services(controller);
            return Ok(controller);
        }

        platform.set_remote_address_type(controller, self.address_type);
        self.set_state(ConnectionState::Connecting, notifier);
        platform.connect_to_device(controller);

        Ok(controller)
    }

    /// Disconnect from the current device, if connected.
    pub fn disconnect<P: BlePlatform + ?Sized>(&mut self, platform: &mut P, notifier: &Notifier) {
        let controller = match self.controller() {
            Some(controller) if self.connected => controller,
            _ => {
                notifier.console("No device connected");
                return;
            }
        };

        if platform.link_state(controller) == LinkState::Unconnected {
            self.connected = false;
            notifier.console("No device connected");
            return;
        }

        info!("Disconnecting {}", controller);
        platform.disconnect_from_device(controller);
        self.connected = false;
    }

    /// Handle the link coming up.
    pub fn on_connected<P: BlePlatform + ?Sized>(
        &mut self,
        controller: ControllerId,
        platform: &mut P,
        notifier: &Notifier,
    ) -> bool {
        if !self.is_current(controller) {
            debug!("Ignoring connect from stale {}", controller);
            return false;
        }

        info!("Connected via {}", controller);
        notifier.console("Discovering services...");
        self.connected = true;
        self.set_state(ConnectionState::ServiceDiscovering, notifier);
        platform.discover_services(controller);
        true
    }

    /// Handle a controller error.
    pub fn on_error(&mut self, controller: ControllerId, message: &str, notifier: &Notifier) -> bool {
        if !self.is_current(controller) {
            debug!("Ignoring error from stale {}: {}", controller, message);
            return false;
        }

        warn!("Error: {}", message);
        notifier.console(format!("Error: {}", message));
        self.set_state(ConnectionState::Error, notifier);
        true
    }

    /// Handle the link going down.
    pub fn on_disconnected(&mut self, controller: ControllerId, notifier: &Notifier) -> bool {
        if !self.is_current(controller) {
            debug!("Ignoring disconnect from stale {}", controller);
            return false;
        }

        warn!("Disconnect from device");
        notifier.console("Device Disconnected!");
        self.connected = false;
        self.set_state(ConnectionState::Disconnected, notifier);
        true
    }

    /// Handle completion of service discovery.
    pub fn on_services_discovered(&mut self, controller: ControllerId, notifier: &Notifier) -> bool {
        if !self.is_discovering(controller) {
            debug!("Ignoring late service discovery from {} in {}", controller, self.state);
            return false;
        }
        self.set_state(ConnectionState::Ready, notifier);
        true
    }

    /// Disconnect and release the current handle.
    pub fn shutdown<P: BlePlatform + ?Sized>(&mut self, platform: &mut P, notifier: &Notifier) {
        if let Some(active) = self.active.take() {
            if self.connected {
                platform.disconnect_from_device(active.controller);
            }
            platform.release_controller(active.controller);
            self.connected = false;
            self.set_state(ConnectionState::Disconnected, notifier);
        }
    }

    /// Update the connection state and emit an event.
    fn set_state(&mut self, new_state: ConnectionState, notifier: &Notifier) {
        let old_state = std::mem::replace(&mut self.state, new_state);

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
            notifier.emit(SessionEvent::StateChanged(new_state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::platform::MockBlePlatform;
    use mockall::predicate::*;
    use mockall::Sequence;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Ready.is_ready());
        assert!(!ConnectionState::ServiceDiscovering.is_ready());
        assert!(ConnectionState::ServiceDiscovering.is_linked());
        assert!(!ConnectionState::Disconnected.is_linked());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(!ConnectionState::Ready.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Ready), "Ready");
        assert_eq!(
            format!("{}", ConnectionState::ServiceDiscovering),
            "ServiceDiscovering"
        );
    }

    #[test]
    fn test_connect_without_selection() {
        let notifier = Notifier::new(16);
        let mut platform = MockBlePlatform::new();
        let mut connection = ConnectionController::new(AddressType::Public);

        let err = connection.connect(&mut platform, &notifier).unwrap_err();
        assert!(matches!(err, Error::NoDeviceSelected));
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_invalid_device_keeps_selection() {
        let mut connection = ConnectionController::new(AddressType::Public);
        connection.select(&DiscoveredDevice::new("AA", "Sensor")).unwrap();

        let err = connection.select(&DiscoveredDevice::new(" ", "Ghost")).unwrap_err();
        assert!(matches!(err, Error::InvalidDevice { .. }));
        assert_eq!(connection.selected_device().unwrap().name, "Sensor");
    }

    #[test]
    fn test_address_type_applied_before_connect() {
        let notifier = Notifier::new(16);
        let mut platform = MockBlePlatform::new();
        let mut seq = Sequence::new();

        platform
            .expect_create_controller()
            .with(eq(ControllerId(1)), always())
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_set_remote_address_type()
            .with(eq(ControllerId(1)), eq(AddressType::Random))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_connect_to_device()
            .with(eq(ControllerId(1)))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut connection = ConnectionController::new(AddressType::Random);
        connection.select(&DiscoveredDevice::new("AA", "Sensor")).unwrap();
        let controller = connection.connect(&mut platform, &notifier).unwrap();

        assert_eq!(controller, ControllerId(1));
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(
            connection.active().map(|a| a.address_type),
            Some(AddressType::Random)
        );
    }

    #[test]
    fn test_disconnect_when_not_connected() {
        let notifier = Notifier::new(16);
        let mut rx = notifier.subscribe();
        let mut platform = MockBlePlatform::new();
        let mut connection = ConnectionController::new(AddressType::Public);

        connection.disconnect(&mut platform, &notifier);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Console("No device connected".into())
        );
    }

    #[test]
    fn test_stale_controller_events_ignored() {
        let notifier = Notifier::new(16);
        let mut platform = MockBlePlatform::new();
        platform.expect_create_controller().return_const(());
        platform.expect_set_remote_address_type().return_const(());
        platform.expect_connect_to_device().return_const(());

        let mut connection = ConnectionController::new(AddressType::Public);
        connection.select(&DiscoveredDevice::new("AA", "Sensor")).unwrap();
        connection.connect(&mut platform, &notifier).unwrap();

        assert!(!connection.on_connected(ControllerId(99), &mut platform, &notifier));
        assert!(!connection.on_disconnected(ControllerId(99), &notifier));
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(!connection.is_connected());
    }

    #[test]
    fn test_late_discovery_after_disconnect_stays_disconnected() {
        let notifier = Notifier::new(16);
        let mut platform = MockBlePlatform::new();
        platform.expect_create_controller().return_const(());
        platform.expect_set_remote_address_type().return_const(());
        platform.expect_connect_to_device().return_const(());
        platform.expect_discover_services().return_const(());

        let mut connection = ConnectionController::new(AddressType::Public);
        connection.select(&DiscoveredDevice::new("AA", "Sensor")).unwrap();
        connection.connect(&mut platform, &notifier).unwrap();

        // Discovery finishing before the link is up is not a transition either.
        assert!(!connection.on_services_discovered(ControllerId(1), &notifier));
        assert_eq!(connection.state(), ConnectionState::Connecting);

        assert!(connection.on_connected(ControllerId(1), &mut platform, &notifier));
        assert!(connection.is_discovering(ControllerId(1)));
        assert!(connection.on_disconnected(ControllerId(1), &notifier));

        assert!(!connection.is_discovering(ControllerId(1)));
        assert!(!connection.on_services_discovered(ControllerId(1), &notifier));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
