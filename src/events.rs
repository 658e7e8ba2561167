//! Notifications emitted by the session to the presentation layer.

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use crate::ble::connection::ConnectionState;

/// Event published by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A human-readable console line.
    Console(String),
    /// A BLE device name seen during the scan.
    DeviceName(String),
    /// A scan completed with this many BLE devices.
    DiscoveryFinished {
        /// Number of BLE-capable devices found.
        found: usize,
    },
    /// The service list was cleared.
    ServicesCleared,
    /// A service UUID in canonical form.
    ServiceUuid(String),
    /// The service list changed (also sent when discovery found nothing).
    ServicesUpdated,
    /// Service discovery completed.
    ServiceDiscoveryFinished,
    /// The characteristic list was cleared.
    CharacteristicsCleared,
    /// A characteristic UUID in canonical form (for both RX and TX selectors).
    CharacteristicUuid(String),
    /// Characteristic enumeration finished or was given up.
    CharacteristicsUpdated,
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Raw payload from the RX characteristic.
    RxValue(Bytes),
}

/// Sending side of the session event channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl Notifier {
    /// Create a notifier with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a console line.
    pub fn console(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("console: {}", line);
        self.emit(SessionEvent::Console(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let notifier = Notifier::new(4);
        notifier.console("nobody listening");
    }

    #[test]
    fn test_console_reaches_subscriber() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();
        notifier.console("Scanning for devices ...");
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Console("Scanning for devices ...".into())
        );
    }
}
