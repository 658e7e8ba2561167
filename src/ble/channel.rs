//! RX/TX data channel.
//!
//! Holds at most one notification source (RX) and one write target (TX),
//! both selected from the catalog's characteristic records.

use btleplug::api::WriteType;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::ble::catalog::CharacteristicRecord;
use crate::ble::platform::{BlePlatform, CccdValue, CharacteristicHandle};
use crate::error::{Error, Result};
use crate::events::{Notifier, SessionEvent};
use crate::protocol::framing::encode_frame;

/// The RX subscription and TX target of the session.
#[derive(Debug, Default)]
pub struct DataChannel {
    rx: Option<CharacteristicHandle>,
    tx: Option<CharacteristicHandle>,
}

impl DataChannel {
    /// Create a channel with nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// The characteristic currently forwarding notifications.
    pub fn rx(&self) -> Option<&CharacteristicHandle> {
        self.rx.as_ref()
    }

    /// The characteristic currently receiving writes.
    pub fn tx(&self) -> Option<&CharacteristicHandle> {
        self.tx.as_ref()
    }

    /// Subscribe to notifications from `record`, replacing any previous RX.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the platform handle is invalid; the
    /// previous binding is kept.
    pub fn select_notify<P: BlePlatform + ?Sized>(
        &mut self,
        record: &CharacteristicRecord,
        platform: &mut P,
    ) -> Result<()> {
        let handle = Self::usable(record)?;

        if let Some(previous) = self.rx.take() {
            if previous.same_target(&handle) {
                trace!("RX {} re-selected", handle.uuid);
            } else {
                debug!("Unbinding previous RX {}", previous.uuid);
                platform.write_client_configuration(&previous, CccdValue::Disable);
            }
        }

        if !record.can_notify() {
            warn!(
                "Characteristic {} does not advertise notify (properties: {:?})",
                record.uuid, record.properties
            );
        }

        platform.write_client_configuration(&handle, CccdValue::EnableNotification);
        info!("RX bound to {}", handle.uuid);
        self.rx = Some(handle);
        Ok(())
    }

    /// Use `record` as the write target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the platform handle is invalid; the
    /// previous target is kept.
    pub fn select_write(&mut self, record: &CharacteristicRecord) -> Result<()> {
        let handle = Self::usable(record)?;
        info!("TX bound to {}", handle.uuid);
        self.tx = Some(handle);
        Ok(())
    }

    /// Frame `message` and write it to the TX characteristic without response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoWriteTarget`] if no TX characteristic is selected.
    pub fn write<P: BlePlatform + ?Sized>(
        &self,
        message: &str,
        platform: &mut P,
        notifier: &Notifier,
    ) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            warn!("Write of {:?} dropped, no TX characteristic selected", message);
            notifier.console("No TX characteristic selected");
            return Err(Error::NoWriteTarget);
        };

        let frame = encode_frame(message);
        trace!("Writing {} bytes to {}: {:02X?}", frame.len(), tx.uuid, frame);
        platform.write_characteristic(tx, &frame, WriteType::WithoutResponse);
        Ok(())
    }

    /// Forward a value if it comes from the bound RX characteristic.
    pub fn on_value_changed(
        &self,
        characteristic: &CharacteristicHandle,
        value: Bytes,
        notifier: &Notifier,
    ) -> bool {
        match &self.rx {
            Some(rx) if rx.same_target(characteristic) => {
                trace!("RX {} bytes: {:02X?}", value.len(), &value[..value.len().min(20)]);
                notifier.emit(SessionEvent::RxValue(value));
                true
            }
            _ => {
                trace!("Dropping value from unbound {}", characteristic.uuid);
                false
            }
        }
    }

    /// Unsubscribe the bound RX and forget both selections.
    pub fn release<P: BlePlatform + ?Sized>(&mut self, platform: &mut P) {
        if let Some(rx) = self.rx.take() {
            debug!("Unsubscribing from {}", rx.uuid);
            platform.write_client_configuration(&rx, CccdValue::Disable);
        }
        self.tx = None;
    }

    /// Forget both selections.
    pub fn reset(&mut self) {
        self.rx = None;
        self.tx = None;
    }

    fn usable(record: &CharacteristicRecord) -> Result<CharacteristicHandle> {
        if !record.handle.is_valid() {
            warn!("Characteristic {} handle is invalid", record.uuid);
            return Err(Error::InvalidHandle {
                uuid: record.uuid_string(),
            });
        }
        Ok(record.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::platform::{ControllerId, MockBlePlatform};
    use crate::ble::uuids::{UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID};
    use btleplug::api::CharPropFlags;
    use mockall::predicate::*;
    use mockall::Sequence;
    use uuid::Uuid;

    fn record(uuid: Uuid, properties: CharPropFlags, valid: bool) -> CharacteristicRecord {
        CharacteristicRecord {
            uuid,
            properties,
            handle: CharacteristicHandle {
                controller: ControllerId(1),
                service: UART_SERVICE_UUID,
                uuid,
                properties,
                valid,
            },
        }
    }

    #[test]
    fn test_write_frames_message() {
        let notifier = Notifier::new(8);
        let mut platform = MockBlePlatform::new();
        let tx = record(UART_RX_UUID, CharPropFlags::WRITE_WITHOUT_RESPONSE, true);

        platform
            .expect_write_characteristic()
            .withf(|c, data, write_type| {
                c.uuid == UART_RX_UUID
                    && data == [0x01, 0x4C, 0x69, 0x76, 0x65, 0x0D]
                    && *write_type == WriteType::WithoutResponse
            })
            .times(1)
            .return_const(());

        let mut channel = DataChannel::new();
        channel.select_write(&tx).unwrap();
        channel.write("Live", &mut platform, &notifier).unwrap();
    }

    #[test]
    fn test_write_without_target_is_noop() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();
        let mut platform = MockBlePlatform::new();
        platform.expect_write_characteristic().never();

        let channel = DataChannel::new();
        let err = channel.write("Live", &mut platform, &notifier).unwrap_err();

        assert!(matches!(err, Error::NoWriteTarget));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Console("No TX characteristic selected".into())
        );
    }

    #[test]
    fn test_invalid_handle_rejected() {
        let mut platform = MockBlePlatform::new();
        platform.expect_write_client_configuration().never();

        let mut channel = DataChannel::new();
        let bad = record(UART_TX_UUID, CharPropFlags::NOTIFY, false);

        assert!(matches!(
            channel.select_notify(&bad, &mut platform),
            Err(Error::InvalidHandle { .. })
        ));
        assert!(matches!(channel.select_write(&bad), Err(Error::InvalidHandle { .. })));
        assert!(channel.rx().is_none());
        assert!(channel.tx().is_none());
    }

    #[test]
    fn test_rx_replacement_disables_previous() {
        let mut platform = MockBlePlatform::new();
        let mut seq = Sequence::new();
        let first = record(UART_TX_UUID, CharPropFlags::NOTIFY, true);
        let second = record(UART_RX_UUID, CharPropFlags::NOTIFY, true);

        platform
            .expect_write_client_configuration()
            .withf(|c, v| c.uuid == UART_TX_UUID && *v == CccdValue::EnableNotification)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_write_client_configuration()
            .withf(|c, v| c.uuid == UART_TX_UUID && *v == CccdValue::Disable)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_write_client_configuration()
            .withf(|c, v| c.uuid == UART_RX_UUID && *v == CccdValue::EnableNotification)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut channel = DataChannel::new();
        channel.select_notify(&first, &mut platform).unwrap();
        channel.select_notify(&second, &mut platform).unwrap();
        assert_eq!(channel.rx().map(|h| h.uuid), Some(UART_RX_UUID));
    }

    #[test]
    fn test_only_bound_rx_is_forwarded() {
        let notifier = Notifier::new(8);
        let mut events = notifier.subscribe();
        let mut platform = MockBlePlatform::new();
        platform.expect_write_client_configuration().return_const(());

        let rx = record(UART_TX_UUID, CharPropFlags::NOTIFY, true);
        let other = record(UART_RX_UUID, CharPropFlags::NOTIFY, true);

        let mut channel = DataChannel::new();
        assert!(!channel.on_value_changed(&rx.handle, Bytes::from_static(b"x"), &notifier));

        channel.select_notify(&rx, &mut platform).unwrap();
        assert!(!channel.on_value_changed(&other.handle, Bytes::from_static(b"no"), &notifier));
        assert!(channel.on_value_changed(&rx.handle, Bytes::from_static(b"yes"), &notifier));

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::RxValue(Bytes::from_static(b"yes"))
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_release_unsubscribes_bound_rx() {
        let mut platform = MockBlePlatform::new();
        platform
            .expect_write_client_configuration()
            .withf(|c, v| c.uuid == UART_TX_UUID && *v == CccdValue::EnableNotification)
            .times(1)
            .return_const(());

        let mut channel = DataChannel::new();
        channel
            .select_notify(&record(UART_TX_UUID, CharPropFlags::NOTIFY, true), &mut platform)
            .unwrap();
        channel
            .select_write(&record(UART_RX_UUID, CharPropFlags::WRITE, true))
            .unwrap();
        platform.checkpoint();

        platform
            .expect_write_client_configuration()
            .withf(|c, v| c.uuid == UART_TX_UUID && *v == CccdValue::Disable)
            .times(1)
            .return_const(());
        channel.release(&mut platform);
        platform.checkpoint();

        assert!(channel.rx().is_none());
        assert!(channel.tx().is_none());

        // Nothing bound, nothing to unsubscribe.
        platform.expect_write_client_configuration().never();
        channel.release(&mut platform);
    }
}
