// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-telemetry-link
//!
//! A cross-platform Rust library for talking to a BLE peripheral that streams
//! telemetry over a notify characteristic and accepts framed text commands on
//! a write characteristic.
//!
//! ## Features
//!
//! - **Device Discovery**: Scan for nearby Low Energy devices with a timeout
//! - **Connection Control**: Connect, reconnect and switch between devices
//! - **Service Catalog**: Enumerate services and characteristics of the device
//! - **Data Channel**: One RX notification source and one TX write target
//! - **Telemetry Decoding**: Big-endian `i16` samples and a rolling plot buffer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_telemetry_link::{BleSession, SessionConfig, SessionEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = BleSession::connect_default(SessionConfig::default()).await?;
//!     let mut events = session.subscribe();
//!
//!     session.start_discovery().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SessionEvent::DeviceName(name) => println!("Found: {}", name),
//!             SessionEvent::DiscoveryFinished { .. } => break,
//!             _ => {}
//!         }
//!     }
//!
//!     session.select_device("Sensor").await?;
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod session_manager;

// Re-exports for convenience
pub use config::{SessionConfig, DEFAULT_DISCOVERY_TIMEOUT};
pub use error::{Error, Result, ScanError};
pub use events::{Notifier, SessionEvent};
pub use session::{BleSession, SessionCommand, SessionHandle, SessionRuntime};
pub use session_manager::SessionManager;

// Re-export commonly used types from submodules
pub use ble::connection::ConnectionState;
pub use ble::discovery::{DiscoveredDevice, DiscoveryState};
pub use ble::platform::{AddressType, BlePlatform, PlatformEvent};
pub use ble::BtleplugPlatform;
pub use data::{Axis, PlotBuffer};
pub use protocol::{encode_frame, Telemetry, TelemetryMode, TelemetryPacket};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SessionManager<BtleplugPlatform>>();
        let _ = std::any::TypeId::of::<SessionHandle>();
        let _ = std::any::TypeId::of::<SessionConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SessionEvent>();
        let _ = std::any::TypeId::of::<PlotBuffer>();
        let _ = std::any::TypeId::of::<TelemetryPacket>();
    }

    #[test]
    fn test_frame_export() {
        assert_eq!(encode_frame("Live").first(), Some(&protocol::FRAME_START));
    }
}
