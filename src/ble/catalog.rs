//! GATT service and characteristic catalog.
//!
//! Tracks the services discovered on the connected peripheral and the
//! characteristics of the currently selected service.

use btleplug::api::CharPropFlags;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::platform::{
    BlePlatform, CharacteristicHandle, ControllerId, ServiceHandle, ServiceState,
};
use crate::ble::uuids::{canonical_string, parse_uuid};
use crate::error::{Error, Result};
use crate::events::{Notifier, SessionEvent};

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service UUID.
    pub uuid: Uuid,
    /// Platform handle.
    pub handle: ServiceHandle,
    /// Last known readiness.
    pub state: ServiceState,
}

impl ServiceRecord {
    /// Canonical UUID string.
    pub fn uuid_string(&self) -> String {
        canonical_string(&self.uuid)
    }
}

/// A characteristic of the selected service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Capability bits.
    pub properties: CharPropFlags,
    /// Platform handle; `handle.service` is the owning service.
    pub handle: CharacteristicHandle,
}

impl CharacteristicRecord {
    /// Canonical UUID string.
    pub fn uuid_string(&self) -> String {
        canonical_string(&self.uuid)
    }

    /// Check if the characteristic can be read.
    pub fn can_read(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }

    /// Check if the characteristic accepts writes of either kind.
    pub fn can_write(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    }

    /// Check if the characteristic can notify.
    pub fn can_notify(&self) -> bool {
        self.properties.contains(CharPropFlags::NOTIFY)
    }
}

/// What happened to characteristic enumeration for the selected service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailsOutcome {
    /// Characteristics were enumerated.
    Enumerated,
    /// Waiting for the platform to finish detail discovery.
    Pending,
    /// Detail discovery failed; observers need a completion fallback.
    GaveUp,
    /// The event did not concern the pending service.
    Ignored,
}

/// Services of the connected peripheral and characteristics of the selected service.
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceRecord>,
    characteristics: Vec<CharacteristicRecord>,
    current_service: Option<ServiceHandle>,
    pending_details: Option<ServiceHandle>,
}

impl ServiceCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovered services.
    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    /// Characteristics of the selected service.
    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        &self.characteristics
    }

    /// The selected service.
    pub fn current_service(&self) -> Option<&ServiceHandle> {
        self.current_service.as_ref()
    }

    /// Find a service by UUID in any decorated form.
    pub fn find_service(&self, uuid: &str) -> Option<&ServiceRecord> {
        let uuid = parse_uuid(uuid).ok()?;
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// Find a characteristic by UUID in any decorated form.
    pub fn find_characteristic(&self, uuid: &str) -> Option<&CharacteristicRecord> {
        let uuid = parse_uuid(uuid).ok()?;
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }

    /// Drop every characteristic record and announce it.
    pub fn clear_characteristics(&mut self, notifier: &Notifier) {
        self.characteristics.clear();
        self.pending_details = None;
        notifier.emit(SessionEvent::CharacteristicsCleared);
    }

    /// Drop every service record and announce it.
    pub fn clear_services(&mut self, notifier: &Notifier) {
        self.services.clear();
        self.current_service = None;
        self.pending_details = None;
        notifier.emit(SessionEvent::ServicesCleared);
    }

    /// Record a service reported by discovery.
    pub fn add_service<P: BlePlatform + ?Sized>(
        &mut self,
        controller: ControllerId,
        uuid: Uuid,
        platform: &mut P,
        notifier: &Notifier,
    ) -> bool {
        let Some(handle) = platform.create_service_object(controller, uuid) else {
            warn!("Cannot create service for uuid {}", uuid);
            return false;
        };

        if self.services.iter().any(|s| s.uuid == uuid) {
            trace!("Service {} already catalogued", uuid);
            return false;
        }

        let record = ServiceRecord {
            uuid,
            handle,
            state: platform.service_state(&handle),
        };
        notifier.emit(SessionEvent::ServiceUuid(record.uuid_string()));
        self.services.push(record);

        notifier.console("Services Updated!");
        notifier.emit(SessionEvent::ServicesUpdated);
        true
    }

    /// Announce the end of service discovery.
    pub fn finish_discovery(&mut self, notifier: &Notifier) {
        info!("Service scan done, {} services", self.services.len());
        notifier.console("Service scan done!");
        notifier.emit(SessionEvent::ServiceDiscoveryFinished);

        if self.services.is_empty() {
            notifier.console("Services Updated!");
            notifier.emit(SessionEvent::ServicesUpdated);
        }
    }

    /// Select a service and enumerate its characteristics.
    ///
    /// Characteristic records are cleared first. If the platform has not yet
    /// discovered the service details, discovery is started and enumeration
    /// happens on the matching [`ServiceCatalog::on_service_state_changed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] if no service matches `uuid`.
    pub fn select_service<P: BlePlatform + ?Sized>(
        &mut self,
        uuid: &str,
        platform: &mut P,
        notifier: &Notifier,
    ) -> Result<DetailsOutcome> {
        let handle = match self.find_service(uuid) {
            Some(record) => record.handle,
            None => {
                warn!("Service not found: {}", uuid);
                return Err(Error::ServiceNotFound {
                    uuid: uuid.to_string(),
                });
            }
        };

        self.current_service = Some(handle);
        self.clear_characteristics(notifier);
        notifier.console("Characteristics reset");

        let state = platform.service_state(&handle);
        self.update_state(&handle, state);

        match state {
            ServiceState::RemoteService => {
                self.pending_details = Some(handle);
                platform.discover_details(&handle);
                notifier.console("Discovering details...");
                Ok(DetailsOutcome::Pending)
            }
            ServiceState::RemoteServiceDiscovering => {
                self.pending_details = Some(handle);
                notifier.console("Discovering details...");
                Ok(DetailsOutcome::Pending)
            }
            ServiceState::RemoteServiceDiscovered => {
                self.enumerate(&handle, platform, notifier);
                Ok(DetailsOutcome::Enumerated)
            }
            ServiceState::InvalidService => {
                warn!("Service {} is invalid", handle.uuid);
                Ok(DetailsOutcome::GaveUp)
            }
        }
    }

    /// Handle a readiness change of a service.
    pub fn on_service_state_changed<P: BlePlatform + ?Sized>(
        &mut self,
        service: &ServiceHandle,
        state: ServiceState,
        platform: &mut P,
        notifier: &Notifier,
    ) -> DetailsOutcome {
        self.update_state(service, state);

        if self.pending_details.as_ref() != Some(service) {
            trace!("State change of {} ignored: {:?}", service.uuid, state);
            return DetailsOutcome::Ignored;
        }

        match state {
            ServiceState::RemoteServiceDiscovered => {
                self.pending_details = None;
                self.enumerate(service, platform, notifier);
                DetailsOutcome::Enumerated
            }
            ServiceState::RemoteServiceDiscovering => DetailsOutcome::Pending,
            ServiceState::RemoteService | ServiceState::InvalidService => {
                debug!("Detail discovery of {} ended in {:?}", service.uuid, state);
                self.pending_details = None;
                DetailsOutcome::GaveUp
            }
        }
    }

    fn enumerate<P: BlePlatform + ?Sized>(
        &mut self,
        service: &ServiceHandle,
        platform: &mut P,
        notifier: &Notifier,
    ) {
        for handle in platform.characteristics(service) {
            let record = CharacteristicRecord {
                uuid: handle.uuid,
                properties: handle.properties,
                handle,
            };
            debug!(
                "Found characteristic: {} in service {}, properties: {:?}",
                record.uuid, service.uuid, record.properties
            );
            notifier.emit(SessionEvent::CharacteristicUuid(record.uuid_string()));
            self.characteristics.push(record);
        }

        notifier.console("Characteristics updated");
        notifier.emit(SessionEvent::CharacteristicsUpdated);
    }

    fn update_state(&mut self, service: &ServiceHandle, state: ServiceState) {
        if let Some(record) = self.services.iter_mut().find(|s| s.handle == *service) {
            record.state = state;
        }
    }
}
