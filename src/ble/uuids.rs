//! BLE UUID constants and canonical UUID handling.
//!
//! Platform APIs render 128-bit UUIDs in several decorative forms
//! (`{...}`, upper case, surrounding whitespace). Every lookup in this crate
//! goes through [`parse_uuid`], and every UUID string handed to observers is
//! produced by [`canonical_string`].

use uuid::Uuid;

use crate::error::{Error, Result};

/// Client Characteristic Configuration Descriptor UUID (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Generic Access service UUID (0x1800).
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1800_0000_1000_8000_00805f9b34fb);

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (write to peripheral).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (notifications from peripheral).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// Strip decorative formatting from a UUID string.
///
/// Removes surrounding whitespace and any `{`/`}` braces, and lowercases the
/// hex digits. The result is not validated; use [`parse_uuid`] for that.
///
/// # Example
///
/// ```
/// use ble_telemetry_link::ble::uuids::canonical_uuid;
///
/// assert_eq!(
///     canonical_uuid(" {6E400001-B5A3-F393-E0A9-E50E24DCCA9E} "),
///     "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
/// );
/// ```
pub fn canonical_uuid(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '{' && *c != '}')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Parse a UUID string in any decorated form.
///
/// # Errors
///
/// Returns [`Error::InvalidUuid`] if the text is not a 128-bit UUID.
pub fn parse_uuid(raw: &str) -> Result<Uuid> {
    let canonical = canonical_uuid(raw);
    Uuid::parse_str(&canonical).map_err(|_| Error::InvalidUuid {
        value: raw.to_string(),
    })
}

/// Render a UUID in its canonical textual form (lowercase, hyphenated, no braces).
pub fn canonical_string(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_uuid_strips_braces() {
        assert_eq!(
            canonical_uuid("{00002902-0000-1000-8000-00805f9b34fb}"),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            canonical_uuid("00002902-0000-1000-8000-00805f9b34fb"),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_uuid_tolerates_decoration() {
        let braced = parse_uuid("{6E400003-B5A3-F393-E0A9-E50E24DCCA9E}").unwrap();
        let plain = parse_uuid("6e400003-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        assert_eq!(braced, UART_TX_UUID);
        assert_eq!(plain, UART_TX_UUID);
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        let err = parse_uuid("No characteristic selected").unwrap_err();
        assert!(matches!(err, Error::InvalidUuid { .. }));
    }

    #[test]
    fn test_canonical_string_has_no_braces() {
        let text = canonical_string(&CLIENT_CHARACTERISTIC_CONFIGURATION_UUID);
        assert_eq!(text, "00002902-0000-1000-8000-00805f9b34fb");
        assert!(!text.contains('{'));
    }

    #[test]
    fn test_uart_uuids_share_base() {
        let rx = canonical_string(&UART_RX_UUID);
        let tx = canonical_string(&UART_TX_UUID);
        assert!(rx.ends_with("b5a3-f393-e0a9-e50e24dcca9e"));
        assert!(tx.ends_with("b5a3-f393-e0a9-e50e24dcca9e"));
        assert_ne!(rx, tx);
    }
}
