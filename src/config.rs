//! Session configuration.

use std::time::Duration;

use crate::ble::platform::AddressType;

/// Default duration of a device scan.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long a device scan runs before the platform finishes it.
    pub discovery_timeout: Duration,
    /// Remote address type applied before every connect.
    pub address_type: AddressType,
    /// Capacity of the outbound event broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the inbound command channel.
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            address_type: AddressType::Public,
            event_capacity: 256,
            command_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Set the scan duration.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the remote address type policy.
    pub fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = address_type;
        self
    }

    /// Use random remote addresses.
    pub fn with_random_address(self, random: bool) -> Self {
        self.with_address_type(if random {
            AddressType::Random
        } else {
            AddressType::Public
        })
    }

    /// Set the outbound event channel capacity (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the inbound command channel capacity (minimum 1).
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Whether the random address policy is configured.
    pub fn is_random_address(&self) -> bool {
        self.address_type == AddressType::Random
    }
}
