//! [`BlePlatform`] backed by `btleplug`.
//!
//! Every request spawns a tokio task that performs the asynchronous btleplug
//! call and reports the outcome as a [`PlatformEvent`] on the channel given at
//! construction. Must be used from within a tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::discovery::DiscoveredDevice;
use crate::ble::platform::{
    AddressType, BlePlatform, CccdValue, CharacteristicHandle, ControllerId, LinkState,
    PlatformEvent, ScanId, ServiceHandle, ServiceState,
};
use crate::error::{Error, Result, ScanError};

type EventSender = mpsc::UnboundedSender<PlatformEvent>;

/// Cached state of one remote service.
#[derive(Debug, Clone)]
struct ServiceSlot {
    state: ServiceState,
    characteristics: Vec<Characteristic>,
}

/// Everything attached to one controller.
struct ControllerSlot {
    device_id: String,
    peripheral: Option<Peripheral>,
    address_type: AddressType,
    link: Arc<RwLock<LinkState>>,
    services: Arc<RwLock<HashMap<Uuid, ServiceSlot>>>,
    watcher: Option<JoinHandle<()>>,
    forwarders: HashMap<(Uuid, Uuid), JoinHandle<()>>,
}

impl ControllerSlot {
    fn find_characteristic(&self, handle: &CharacteristicHandle) -> Option<Characteristic> {
        self.services
            .read()
            .get(&handle.service)?
            .characteristics
            .iter()
            .find(|c| c.uuid == handle.uuid)
            .cloned()
    }
}

impl Drop for ControllerSlot {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        for (_, forwarder) in self.forwarders.drain() {
            forwarder.abort();
        }
    }
}

/// Host Bluetooth stack accessed through btleplug.
pub struct BtleplugPlatform {
    adapter: Adapter,
    events_tx: EventSender,
    scanned: Arc<RwLock<HashMap<String, Peripheral>>>,
    scan_task: Option<JoinHandle<()>>,
    stop_task: Option<JoinHandle<()>>,
    controllers: HashMap<ControllerId, ControllerSlot>,
}

impl BtleplugPlatform {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no usable adapter.
    pub async fn new(events_tx: EventSender) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, events_tx))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter, events_tx: EventSender) -> Self {
        Self {
            adapter,
            events_tx,
            scanned: Arc::new(RwLock::new(HashMap::new())),
            scan_task: None,
            stop_task: None,
            controllers: HashMap::new(),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn send(&self, event: PlatformEvent) {
        send(&self.events_tx, event);
    }

    fn slot(&self, controller: ControllerId) -> Option<&ControllerSlot> {
        let slot = self.controllers.get(&controller);
        if slot.is_none() {
            warn!("Unknown {}", controller);
        }
        slot
    }

    fn peripheral(&self, controller: ControllerId) -> Option<Peripheral> {
        self.slot(controller)?.peripheral.clone()
    }
}

fn send(tx: &EventSender, event: PlatformEvent) {
    if tx.send(event).is_err() {
        trace!("Platform event dropped, session gone");
    }
}

async fn describe(peripheral: &Peripheral) -> Option<DiscoveredDevice> {
    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    Some(DiscoveredDevice {
        id: peripheral.id().to_string(),
        name: properties.local_name.unwrap_or_default(),
        // btleplug only reports low-energy devices.
        le_capable: true,
        rssi: properties.rssi,
        discovered_at: Utc::now(),
    })
}

/// Run `next` once the `pending` task has finished.
async fn after_pending<F: Future>(pending: Option<JoinHandle<()>>, next: F) -> F::Output {
    if let Some(pending) = pending {
        if let Err(e) = pending.await {
            if !e.is_cancelled() {
                debug!("Pending adapter task failed: {}", e);
            }
        }
    }
    next.await
}

/// Stop scanning on the adapter after `pending` is done.
fn spawn_stop_scan(adapter: Adapter, pending: Option<JoinHandle<()>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = after_pending(pending, adapter.stop_scan()).await {
            debug!("Failed to stop scan: {}", e);
        }
    })
}

async fn run_scan(
    adapter: Adapter,
    scan: ScanId,
    timeout: Duration,
    pending_stop: Option<JoinHandle<()>>,
    scanned: Arc<RwLock<HashMap<String, Peripheral>>>,
    tx: EventSender,
) {
    let started = after_pending(pending_stop, adapter.start_scan(ScanFilter::default())).await;
    if let Err(e) = started {
        error!("Failed to start scan: {}", e);
        send(
            &tx,
            PlatformEvent::ScanFailed {
                scan,
                error: ScanError::from_btleplug(&e),
            },
        );
        return;
    }

    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to get adapter events: {}", e);
            let _ = adapter.stop_scan().await;
            send(
                &tx,
                PlatformEvent::ScanFailed {
                    scan,
                    error: ScanError::from_btleplug(&e),
                },
            );
            return;
        }
    };

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) => {
                    trace!("Device discovered: {:?}", id);
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    if let Some(device) = describe(&peripheral).await {
                        scanned.write().insert(device.id.clone(), peripheral);
                        send(&tx, PlatformEvent::DeviceDiscovered { scan, device });
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan cleanly: {}", e);
    }

    let peripherals = match adapter.peripherals().await {
        Ok(peripherals) => peripherals,
        Err(e) => {
            send(
                &tx,
                PlatformEvent::ScanFailed {
                    scan,
                    error: ScanError::from_btleplug(&e),
                },
            );
            return;
        }
    };

    let mut devices = Vec::with_capacity(peripherals.len());
    for peripheral in peripherals {
        if let Some(device) = describe(&peripheral).await {
            scanned.write().insert(device.id.clone(), peripheral);
            devices.push(device);
        }
    }

    debug!("Scan {:?} collected {} devices", scan, devices.len());
    send(&tx, PlatformEvent::ScanFinished { scan, devices });
}

/// Mark the link down and report it, once.
fn report_disconnect(link: &RwLock<LinkState>, controller: ControllerId, tx: &EventSender) {
    let was = std::mem::replace(&mut *link.write(), LinkState::Unconnected);
    if was != LinkState::Unconnected {
        send(tx, PlatformEvent::Disconnected(controller));
    }
}

fn cache_services(
    peripheral: &Peripheral,
    services: &RwLock<HashMap<Uuid, ServiceSlot>>,
) -> Vec<Uuid> {
    let found = peripheral.services();
    let mut map = services.write();
    map.clear();
    for service in &found {
        map.insert(
            service.uuid,
            ServiceSlot {
                state: ServiceState::RemoteService,
                characteristics: service.characteristics.iter().cloned().collect(),
            },
        );
    }
    found.iter().map(|s| s.uuid).collect()
}

impl BlePlatform for BtleplugPlatform {
    fn start_discovery(&mut self, scan: ScanId, timeout: Duration) -> bool {
        let mut pending_stop = self.stop_task.take();
        if let Some(task) = self.scan_task.take() {
            if !task.is_finished() {
                task.abort();
                pending_stop = Some(spawn_stop_scan(self.adapter.clone(), pending_stop));
            }
        }
        self.scanned.write().clear();

        let handle = tokio::spawn(run_scan(
            self.adapter.clone(),
            scan,
            timeout,
            pending_stop,
            self.scanned.clone(),
            self.events_tx.clone(),
        ));
        self.scan_task = Some(handle);
        true
    }

    fn stop_discovery(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
            let pending = self.stop_task.take();
            self.stop_task = Some(spawn_stop_scan(self.adapter.clone(), pending));
        }
    }

    fn create_controller(&mut self, controller: ControllerId, device: &DiscoveredDevice) {
        let peripheral = self.scanned.read().get(&device.id).cloned();
        if peripheral.is_none() {
            warn!("No peripheral cached for {}", device.id);
        }

        let link = Arc::new(RwLock::new(LinkState::Unconnected));

        let watcher = peripheral.as_ref().map(|peripheral| {
            let adapter = self.adapter.clone();
            let target = peripheral.id();
            let link = link.clone();
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let mut events = match adapter.events().await {
                    Ok(events) => events,
                    Err(e) => {
                        error!("Failed to watch adapter events: {}", e);
                        return;
                    }
                };
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        if id == target {
                            report_disconnect(&link, controller, &tx);
                        }
                    }
                }
            })
        });

        self.controllers.insert(
            controller,
            ControllerSlot {
                device_id: device.id.clone(),
                peripheral,
                address_type: AddressType::Public,
                link,
                services: Arc::new(RwLock::new(HashMap::new())),
                watcher,
                forwarders: HashMap::new(),
            },
        );
    }

    // btleplug cannot choose the address type; it is only checked on connect.
    fn set_remote_address_type(&mut self, controller: ControllerId, address_type: AddressType) {
        if let Some(slot) = self.controllers.get_mut(&controller) {
            slot.address_type = address_type;
        }
    }

    fn connect_to_device(&mut self, controller: ControllerId) {
        let Some(slot) = self.slot(controller) else {
            return;
        };
        let Some(peripheral) = slot.peripheral.clone() else {
            self.send(PlatformEvent::ControllerError {
                controller,
                message: format!("Device {} not found", slot.device_id),
            });
            return;
        };

        let link = slot.link.clone();
        let address_type = slot.address_type;
        let tx = self.events_tx.clone();
        *link.write() = LinkState::Connecting;

        tokio::spawn(async move {
            if let Ok(Some(properties)) = peripheral.properties().await {
                let expected: btleplug::api::AddressType = address_type.into();
                if properties.address_type.is_some_and(|actual| actual != expected) {
                    debug!(
                        "Configured {:?} address, platform reports {:?}",
                        address_type, properties.address_type
                    );
                }
            }

            match peripheral.connect().await {
                Ok(()) => {
                    info!("Successfully connected via {}", controller);
                    *link.write() = LinkState::Connected;
                    send(&tx, PlatformEvent::Connected(controller));
                }
                Err(e) => {
                    warn!("Connection via {} failed: {}", controller, e);
                    *link.write() = LinkState::Unconnected;
                    send(
                        &tx,
                        PlatformEvent::ControllerError {
                            controller,
                            message: e.to_string(),
                        },
                    );
                }
            }
        });
    }

    fn disconnect_from_device(&mut self, controller: ControllerId) {
        let Some(slot) = self.slot(controller) else {
            return;
        };
        let Some(peripheral) = slot.peripheral.clone() else {
            return;
        };

        let link = slot.link.clone();
        let tx = self.events_tx.clone();
        *link.write() = LinkState::Closing;

        // Detached: must survive release_controller.
        tokio::spawn(async move {
            match peripheral.disconnect().await {
                Ok(()) => {
                    info!("Successfully disconnected {}", controller);
                    report_disconnect(&link, controller, &tx);
                }
                Err(e) => {
                    error!("Failed to disconnect {}: {}", controller, e);
                    send(
                        &tx,
                        PlatformEvent::ControllerError {
                            controller,
                            message: e.to_string(),
                        },
                    );
                }
            }
        });
    }

    fn link_state(&self, controller: ControllerId) -> LinkState {
        self.controllers
            .get(&controller)
            .map(|slot| *slot.link.read())
            .unwrap_or_default()
    }

    fn release_controller(&mut self, controller: ControllerId) {
        if self.controllers.remove(&controller).is_some() {
            debug!("Released {}", controller);
        }
    }

    fn discover_services(&mut self, controller: ControllerId) {
        let Some(slot) = self.slot(controller) else {
            return;
        };
        let Some(peripheral) = slot.peripheral.clone() else {
            return;
        };
        let services = slot.services.clone();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                warn!("Failed to discover services: {}", e);
                send(
                    &tx,
                    PlatformEvent::ControllerError {
                        controller,
                        message: e.to_string(),
                    },
                );
                return;
            }

            for uuid in cache_services(&peripheral, &services) {
                send(&tx, PlatformEvent::ServiceDiscovered { controller, uuid });
            }
            send(&tx, PlatformEvent::ServiceDiscoveryFinished(controller));
        });
    }

    fn create_service_object(
        &mut self,
        controller: ControllerId,
        uuid: Uuid,
    ) -> Option<ServiceHandle> {
        let slot = self.slot(controller)?;
        slot.services
            .read()
            .contains_key(&uuid)
            .then_some(ServiceHandle { controller, uuid })
    }

    fn service_state(&self, service: &ServiceHandle) -> ServiceState {
        self.controllers
            .get(&service.controller)
            .and_then(|slot| slot.services.read().get(&service.uuid).map(|s| s.state))
            .unwrap_or(ServiceState::InvalidService)
    }

    fn discover_details(&mut self, service: &ServiceHandle) {
        let Some(slot) = self.slot(service.controller) else {
            return;
        };
        let Some(peripheral) = slot.peripheral.clone() else {
            return;
        };
        let services = slot.services.clone();
        let tx = self.events_tx.clone();
        let service = *service;

        if let Some(entry) = services.write().get_mut(&service.uuid) {
            entry.state = ServiceState::RemoteServiceDiscovering;
        }
        send(
            &tx,
            PlatformEvent::ServiceStateChanged {
                service,
                state: ServiceState::RemoteServiceDiscovering,
            },
        );

        tokio::spawn(async move {
            let refreshed = match peripheral.discover_services().await {
                Ok(()) => peripheral.services().into_iter().find(|s| s.uuid == service.uuid),
                Err(e) => {
                    warn!("Detail discovery of {} failed: {}", service.uuid, e);
                    None
                }
            };

            let state = match refreshed {
                Some(found) => {
                    let mut map = services.write();
                    map.insert(
                        service.uuid,
                        ServiceSlot {
                            state: ServiceState::RemoteServiceDiscovered,
                            characteristics: found.characteristics.into_iter().collect(),
                        },
                    );
                    ServiceState::RemoteServiceDiscovered
                }
                None => {
                    if let Some(entry) = services.write().get_mut(&service.uuid) {
                        entry.state = ServiceState::InvalidService;
                    }
                    ServiceState::InvalidService
                }
            };

            send(&tx, PlatformEvent::ServiceStateChanged { service, state });
        });
    }

    fn characteristics(&self, service: &ServiceHandle) -> Vec<CharacteristicHandle> {
        let Some(slot) = self.controllers.get(&service.controller) else {
            return Vec::new();
        };
        let map = slot.services.read();
        let Some(entry) = map.get(&service.uuid) else {
            return Vec::new();
        };

        entry
            .characteristics
            .iter()
            .map(|c| CharacteristicHandle {
                controller: service.controller,
                service: service.uuid,
                uuid: c.uuid,
                properties: c.properties,
                valid: true,
            })
            .collect()
    }

    fn write_client_configuration(
        &mut self,
        characteristic: &CharacteristicHandle,
        value: CccdValue,
    ) {
        let handle = *characteristic;
        let tx = self.events_tx.clone();
        let Some(slot) = self.controllers.get_mut(&handle.controller) else {
            warn!("Unknown {}", handle.controller);
            return;
        };
        let Some(peripheral) = slot.peripheral.clone() else {
            return;
        };
        let Some(target) = slot.find_characteristic(&handle) else {
            warn!("Characteristic {} not cached", handle.uuid);
            return;
        };
        let key = (handle.service, handle.uuid);

        if let Some(previous) = slot.forwarders.remove(&key) {
            previous.abort();
        }

        match value {
            CccdValue::Disable => {
                tokio::spawn(async move {
                    if let Err(e) = peripheral.unsubscribe(&target).await {
                        debug!("Failed to unsubscribe from {}: {}", target.uuid, e);
                    }
                });
            }
            CccdValue::EnableNotification | CccdValue::EnableIndication => {
                let forwarder = tokio::spawn(async move {
                    if let Err(e) = peripheral.subscribe(&target).await {
                        warn!("Failed to subscribe to {}: {}", target.uuid, e);
                        return;
                    }
                    debug!("Successfully subscribed to notifications from {}", target.uuid);

                    let mut notifications = match peripheral.notifications().await {
                        Ok(n) => n,
                        Err(e) => {
                            error!("Failed to get notifications stream: {}", e);
                            return;
                        }
                    };

                    while let Some(notification) = notifications.next().await {
                        if notification.uuid != target.uuid {
                            continue;
                        }
                        send(
                            &tx,
                            PlatformEvent::CharacteristicChanged {
                                characteristic: handle,
                                value: Bytes::from(notification.value),
                            },
                        );
                    }

                    debug!("Notification stream for {} ended", target.uuid);
                });
                slot.forwarders.insert(key, forwarder);
            }
        }
    }

    fn write_characteristic(
        &mut self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        write_type: WriteType,
    ) {
        let Some(slot) = self.slot(characteristic.controller) else {
            return;
        };
        let Some(peripheral) = self.peripheral(characteristic.controller) else {
            return;
        };
        let Some(target) = slot.find_characteristic(characteristic) else {
            warn!("Characteristic {} not cached", characteristic.uuid);
            return;
        };
        let data = data.to_vec();

        tokio::spawn(async move {
            match peripheral.write(&target, &data, write_type).await {
                Ok(()) => trace!("Wrote {} bytes to characteristic {}", data.len(), target.uuid),
                Err(e) => warn!("Write to {} failed: {}", target.uuid, e),
            }
        });
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_scan_start_waits_for_pending_stop() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let stop_order = order.clone();
        let stop = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop_order.lock().push("stop");
        });

        let start_order = order.clone();
        let started = after_pending(Some(stop), async move {
            start_order.lock().push("start");
            7
        })
        .await;

        assert_eq!(started, 7);
        assert_eq!(*order.lock(), vec!["stop", "start"]);
    }

    #[tokio::test]
    async fn test_aborted_stop_does_not_block_start() {
        let stop = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        stop.abort();

        let started = tokio::time::timeout(
            Duration::from_secs(1),
            after_pending(Some(stop), async { "started" }),
        )
        .await;
        assert_eq!(started, Ok("started"));
    }

    #[tokio::test]
    async fn test_no_pending_task_runs_immediately() {
        assert_eq!(after_pending(None, async { 1 }).await, 1);
    }
}
