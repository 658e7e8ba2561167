//! The platform BLE seam.
//!
//! [`BlePlatform`] is everything the session needs from the host Bluetooth
//! stack. Every method returns immediately; completion is reported later as a
//! [`PlatformEvent`] delivered to [`SessionManager::handle_event`].
//!
//! [`SessionManager::handle_event`]: crate::SessionManager::handle_event

use std::fmt;
use std::time::Duration;

use btleplug::api::{CharPropFlags, WriteType};
use bytes::Bytes;
use uuid::Uuid;

use crate::ble::discovery::DiscoveredDevice;
use crate::error::ScanError;

/// Identifies one scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(pub u64);

/// Identifies one connection handle (controller) to a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub u64);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

/// Remote address type used when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressType {
    /// Public (IEEE-assigned) address.
    #[default]
    Public,
    /// Random (static or private) address.
    Random,
}

impl From<AddressType> for btleplug::api::AddressType {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => btleplug::api::AddressType::Public,
            AddressType::Random => btleplug::api::AddressType::Random,
        }
    }
}

/// Link-layer state of a controller as seen by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No link.
    #[default]
    Unconnected,
    /// Link being established.
    Connecting,
    /// Link up.
    Connected,
    /// Link being torn down.
    Closing,
}

/// Readiness of a remote GATT service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service is known but its characteristics have not been discovered.
    RemoteService,
    /// Characteristic discovery is in progress.
    RemoteServiceDiscovering,
    /// Characteristics are available.
    RemoteServiceDiscovered,
    /// The service object is no longer usable.
    InvalidService,
}

/// Platform handle to a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    /// Controller the service belongs to.
    pub controller: ControllerId,
    /// Service UUID.
    pub uuid: Uuid,
}

/// Platform handle to a remote characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandle {
    /// Controller the characteristic belongs to.
    pub controller: ControllerId,
    /// UUID of the owning service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Capability bits.
    pub properties: CharPropFlags,
    /// Whether the platform considers this handle usable.
    pub valid: bool,
}

impl CharacteristicHandle {
    /// Whether the platform considers this handle usable.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether the handle refers to the same remote characteristic as `other`.
    pub fn same_target(&self, other: &CharacteristicHandle) -> bool {
        self.controller == other.controller
            && self.service == other.service
            && self.uuid == other.uuid
    }
}

/// Values written to the Client Characteristic Configuration Descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccdValue {
    /// Notifications and indications off.
    Disable,
    /// Notifications on.
    EnableNotification,
    /// Indications on.
    EnableIndication,
}

impl CccdValue {
    /// The two descriptor bytes (little-endian).
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Self::Disable => [0x00, 0x00],
            Self::EnableNotification => [0x01, 0x00],
            Self::EnableIndication => [0x02, 0x00],
        }
    }
}

/// Asynchronous completions reported by the platform.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// A device was seen during a scan.
    DeviceDiscovered {
        /// Scan the event belongs to.
        scan: ScanId,
        /// The device.
        device: DiscoveredDevice,
    },
    /// A scan ran to completion.
    ScanFinished {
        /// Scan the event belongs to.
        scan: ScanId,
        /// Every device the platform saw during the scan.
        devices: Vec<DiscoveredDevice>,
    },
    /// A scan failed.
    ScanFailed {
        /// Scan the event belongs to.
        scan: ScanId,
        /// What went wrong.
        error: ScanError,
    },
    /// The link to the device is up.
    Connected(ControllerId),
    /// The controller reported an error.
    ControllerError {
        /// Controller the event belongs to.
        controller: ControllerId,
        /// Platform error text.
        message: String,
    },
    /// The link went down.
    Disconnected(ControllerId),
    /// A primary service was discovered.
    ServiceDiscovered {
        /// Controller the event belongs to.
        controller: ControllerId,
        /// Service UUID.
        uuid: Uuid,
    },
    /// Service discovery completed.
    ServiceDiscoveryFinished(ControllerId),
    /// A service changed readiness.
    ServiceStateChanged {
        /// The service.
        service: ServiceHandle,
        /// Its new state.
        state: ServiceState,
    },
    /// A subscribed characteristic delivered a value.
    CharacteristicChanged {
        /// The characteristic.
        characteristic: CharacteristicHandle,
        /// Payload bytes.
        value: Bytes,
    },
}

/// Operations the session requests from the host Bluetooth stack.
#[cfg_attr(test, mockall::automock)]
pub trait BlePlatform {
    /// Start a low-energy scan bounded by `timeout`. Returns whether the scan is active.
    fn start_discovery(&mut self, scan: ScanId, timeout: Duration) -> bool;

    /// Stop the running scan, if any.
    fn stop_discovery(&mut self);

    /// Create a controller for `device` under the given id.
    fn create_controller(&mut self, controller: ControllerId, device: &DiscoveredDevice);

    /// Apply the remote address type for the next connect.
    fn set_remote_address_type(&mut self, controller: ControllerId, address_type: AddressType);

    /// Begin connecting.
    fn connect_to_device(&mut self, controller: ControllerId);

    /// Begin disconnecting.
    fn disconnect_from_device(&mut self, controller: ControllerId);

    /// Current link state of the controller.
    fn link_state(&self, controller: ControllerId) -> LinkState;

    /// Discard the controller and everything attached to it.
    fn release_controller(&mut self, controller: ControllerId);

    /// Begin primary service discovery.
    fn discover_services(&mut self, controller: ControllerId);

    /// Create a service object for a discovered service.
    fn create_service_object(
        &mut self,
        controller: ControllerId,
        uuid: Uuid,
    ) -> Option<ServiceHandle>;

    /// Current readiness of the service.
    fn service_state(&self, service: &ServiceHandle) -> ServiceState;

    /// Begin characteristic discovery for the service.
    fn discover_details(&mut self, service: &ServiceHandle);

    /// Characteristics of a discovered service.
    fn characteristics(&self, service: &ServiceHandle) -> Vec<CharacteristicHandle>;

    /// Write the characteristic's configuration descriptor.
    fn write_client_configuration(
        &mut self,
        characteristic: &CharacteristicHandle,
        value: CccdValue,
    );

    /// Write a value to the characteristic.
    fn write_characteristic(
        &mut self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        write_type: WriteType,
    );
}
