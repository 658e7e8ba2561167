//! Device discovery.
//!
//! Drives the scan lifecycle and owns the list of devices found by the last
//! completed scan.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::ble::platform::{BlePlatform, ScanId};
use crate::error::ScanError;
use crate::events::{Notifier, SessionEvent};

/// A device reported by the platform during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredDevice {
    /// Platform identifier (address on Linux/Windows, UUID on macOS).
    pub id: String,
    /// Advertised display name; may be empty.
    pub name: String,
    /// Whether the device supports the low-energy core configuration.
    pub le_capable: bool,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// When the device was seen.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    /// Create a BLE-capable device seen now.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            le_capable: true,
            rssi: None,
            discovered_at: Utc::now(),
        }
    }

    /// Set the low-energy capability flag.
    pub fn with_le_capable(mut self, le_capable: bool) -> Self {
        self.le_capable = le_capable;
        self
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Whether the platform identity is usable for connecting.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Scan lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryState {
    /// No scan running.
    #[default]
    Idle,
    /// A scan is running.
    Scanning,
}

/// Drives device scans.
#[derive(Debug)]
pub struct DiscoveryCoordinator {
    devices: Vec<DiscoveredDevice>,
    state: DiscoveryState,
    current_scan: Option<ScanId>,
    next_scan: u64,
    timeout: Duration,
}

impl DiscoveryCoordinator {
    /// Create a coordinator whose scans last `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            devices: Vec::new(),
            state: DiscoveryState::Idle,
            current_scan: None,
            next_scan: 0,
            timeout,
        }
    }

    /// Devices from the last completed scan.
    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Current scan state.
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.state == DiscoveryState::Scanning
    }

    /// Find a device from the last completed scan by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Clear the device list and start a new scan.
    ///
    /// Returns whether the platform reports the scan as active.
    pub fn start<P: BlePlatform + ?Sized>(&mut self, platform: &mut P, notifier: &Notifier) -> bool {
        if self.is_scanning() {
            debug!("Restarting scan, stopping the running one first");
            platform.stop_discovery();
        }

        self.devices.clear();
        notifier.console("Scanning for devices ...");

        self.next_scan += 1;
        let scan = ScanId(self.next_scan);
        self.current_scan = Some(scan);

        let active = platform.start_discovery(scan, self.timeout);
        if active {
            info!("Scan {:?} started ({:?})", scan, self.timeout);
            self.state = DiscoveryState::Scanning;
            notifier.console("Discovery agent is active.");
        } else {
            warn!("Scan {:?} did not start", scan);
            self.state = DiscoveryState::Idle;
            self.current_scan = None;
            notifier.console("Discovery agent is not active.");
        }
        active
    }

    /// Handle a raw device event.
    pub fn on_device_discovered(
        &mut self,
        scan: ScanId,
        device: &DiscoveredDevice,
        notifier: &Notifier,
    ) {
        if !self.is_current(scan) {
            trace!("Ignoring device from stale scan {:?}", scan);
            return;
        }
        if !device.le_capable {
            return;
        }
        if device.name.is_empty() {
            trace!("Unnamed BLE device {}", device.id);
            return;
        }

        notifier.console(format!("Last device added: {}", device.name));
        notifier.emit(SessionEvent::DeviceName(device.name.clone()));
    }

    /// Finalize the device list when the scan completes.
    pub fn on_scan_finished(
        &mut self,
        scan: ScanId,
        devices: Vec<DiscoveredDevice>,
        notifier: &Notifier,
    ) {
        if !self.is_current(scan) {
            trace!("Ignoring completion of stale scan {:?}", scan);
            return;
        }

        self.devices = devices.into_iter().filter(|d| d.le_capable).collect();
        self.state = DiscoveryState::Idle;
        self.current_scan = None;

        info!("Scan {:?} finished with {} devices", scan, self.devices.len());

        if self.devices.is_empty() {
            notifier.console("No Low Energy devices found...");
        } else {
            notifier.console("Done! Scan Again!");
        }
        notifier.emit(SessionEvent::DiscoveryFinished {
            found: self.devices.len(),
        });
    }

    /// Report a scan failure and return to idle.
    pub fn on_scan_failed(&mut self, scan: ScanId, error: &ScanError, notifier: &Notifier) {
        if !self.is_current(scan) {
            trace!("Ignoring error from stale scan {:?}", scan);
            return;
        }

        warn!("Scan {:?} failed: {:?}", scan, error);
        notifier.console(error.to_string());
        self.state = DiscoveryState::Idle;
        self.current_scan = None;
    }

    /// Stop any running scan.
    pub fn stop<P: BlePlatform + ?Sized>(&mut self, platform: &mut P) {
        if self.is_scanning() {
            platform.stop_discovery();
        }
        self.state = DiscoveryState::Idle;
        self.current_scan = None;
    }

    fn is_current(&self, scan: ScanId) -> bool {
        self.current_scan == Some(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::platform::MockBlePlatform;
    use mockall::predicate::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn started(platform: &mut MockBlePlatform, notifier: &Notifier) -> DiscoveryCoordinator {
        platform
            .expect_start_discovery()
            .with(eq(ScanId(1)), eq(Duration::from_secs(10)))
            .times(1)
            .return_const(true);
        let mut discovery = DiscoveryCoordinator::new(Duration::from_secs(10));
        assert!(discovery.start(platform, notifier));
        discovery
    }

    #[test]
    fn test_device_list_empty_until_finished() {
        let notifier = Notifier::new(64);
        let mut platform = MockBlePlatform::new();
        let mut discovery = started(&mut platform, &notifier);

        discovery.on_device_discovered(ScanId(1), &DiscoveredDevice::new("AA", "Sensor"), &notifier);
        assert!(discovery.devices().is_empty());
        assert!(discovery.is_scanning());

        discovery.on_scan_finished(
            ScanId(1),
            vec![
                DiscoveredDevice::new("AA", "Sensor"),
                DiscoveredDevice::new("BB", "Headset").with_le_capable(false),
            ],
            &notifier,
        );

        assert_eq!(discovery.devices().len(), 1);
        assert_eq!(discovery.devices()[0].name, "Sensor");
        assert_eq!(discovery.state(), DiscoveryState::Idle);
    }

    #[test]
    fn test_non_le_devices_are_silently_dropped() {
        let notifier = Notifier::new(64);
        let mut platform = MockBlePlatform::new();
        let mut discovery = started(&mut platform, &notifier);
        let mut rx = notifier.subscribe();

        discovery.on_device_discovered(
            ScanId(1),
            &DiscoveredDevice::new("BB", "Headset").with_le_capable(false),
            &notifier,
        );
        assert!(drain(&mut rx).is_empty());

        discovery.on_device_discovered(ScanId(1), &DiscoveredDevice::new("AA", "Sensor"), &notifier);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Console("Last device added: Sensor".into()),
                SessionEvent::DeviceName("Sensor".into()),
            ]
        );
    }

    #[test]
    fn test_empty_scan_reports_no_devices() {
        let notifier = Notifier::new(64);
        let mut platform = MockBlePlatform::new();
        let mut discovery = started(&mut platform, &notifier);
        let mut rx = notifier.subscribe();

        discovery.on_scan_finished(ScanId(1), Vec::new(), &notifier);

        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Console("No Low Energy devices found...".into()),
                SessionEvent::DiscoveryFinished { found: 0 },
            ]
        );
    }

    #[test]
    fn test_scan_not_started() {
        let notifier = Notifier::new(64);
        let mut rx = notifier.subscribe();
        let mut platform = MockBlePlatform::new();
        platform.expect_start_discovery().return_const(false);

        let mut discovery = DiscoveryCoordinator::new(Duration::from_secs(10));
        assert!(!discovery.start(&mut platform, &notifier));
        assert_eq!(discovery.state(), DiscoveryState::Idle);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Console("Scanning for devices ...".into()),
                SessionEvent::Console("Discovery agent is not active.".into()),
            ]
        );
    }

    #[test]
    fn test_scan_error_resets_to_idle() {
        let notifier = Notifier::new(64);
        let mut platform = MockBlePlatform::new();
        let mut discovery = started(&mut platform, &notifier);
        let mut rx = notifier.subscribe();

        discovery.on_scan_failed(ScanId(1), &ScanError::PoweredOff, &notifier);

        assert_eq!(discovery.state(), DiscoveryState::Idle);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::Console(ScanError::PoweredOff.to_string())]
        );
    }

    #[test]
    fn test_restart_stops_running_scan_and_ignores_stale_events() {
        let notifier = Notifier::new(64);
        let mut platform = MockBlePlatform::new();
        let mut discovery = started(&mut platform, &notifier);

        platform.expect_stop_discovery().times(1).return_const(());
        platform
            .expect_start_discovery()
            .with(eq(ScanId(2)), always())
            .times(1)
            .return_const(true);
        assert!(discovery.start(&mut platform, &notifier));

        discovery.on_scan_finished(
            ScanId(1),
            vec![DiscoveredDevice::new("AA", "Old")],
            &notifier,
        );
        assert!(discovery.devices().is_empty());
        assert!(discovery.is_scanning());

        discovery.on_scan_finished(
            ScanId(2),
            vec![DiscoveredDevice::new("CC", "New")],
            &notifier,
        );
        assert_eq!(discovery.find_by_name("New").map(|d| d.id.as_str()), Some("CC"));
        assert!(discovery.find_by_name("Old").is_none());
    }
}
