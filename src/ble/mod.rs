//! BLE communication module.
//!
//! The session logic talks to the radio only through the [`BlePlatform`]
//! trait; [`BtleplugPlatform`] implements it on top of btleplug.

pub mod btleplug_backend;
pub mod catalog;
pub mod channel;
pub mod connection;
pub mod discovery;
pub mod platform;
pub mod uuids;

pub use btleplug_backend::BtleplugPlatform;
pub use catalog::{CharacteristicRecord, DetailsOutcome, ServiceCatalog, ServiceRecord};
pub use channel::DataChannel;
pub use connection::{ActiveConnection, ConnectionController, ConnectionState};
pub use discovery::{DiscoveredDevice, DiscoveryCoordinator, DiscoveryState};
pub use platform::{
    AddressType, BlePlatform, CccdValue, CharacteristicHandle, ControllerId, LinkState,
    PlatformEvent, ScanId, ServiceHandle, ServiceState,
};
pub use uuids::*;
