#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod fmt;

pub mod api;
pub mod constants;
pub mod gatt;
pub mod processor;

use crate::constants::{
    EVENT_CHANNEL_DEPTH, MAX_RESPONSE_ENTRIES, REPORT_CHANNEL_DEPTH, REQUEST_CHANNEL_DEPTH,
};
use bt_hci::param::ConnHandle;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use heapless::Vec;

pub use gatt::{
    CharacteristicDiscoveryResponse, CharacteristicProperties, DiscoveredCharacteristic,
    DiscoveredService, DiscoveryEngine, DiscoveryObserver, DiscoveryState, DiscoveryTransport,
    Handle, HandleRange, ServiceDiscoveryResponse, SessionRegistry, ShortUuid,
};

pub(crate) static REQUEST_CHANNEL: Channel<
    CriticalSectionRawMutex,
    DiscoveryRequest,
    REQUEST_CHANNEL_DEPTH,
> = Channel::new();

pub(crate) static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, GattEvent, EVENT_CHANNEL_DEPTH> =
    Channel::new();

pub(crate) static REPORT_CHANNEL: Channel<
    CriticalSectionRawMutex,
    DiscoveryReport,
    REPORT_CHANNEL_DEPTH,
> = Channel::new();

/// Errors reported by the transport when a discovery request cannot be issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The stack is busy with another procedure on this link
    Busy,
    /// The link is not (or no longer) connected
    NotConnected,
    /// The stack ran out of buffers or request slots
    NoResources,
    /// The stack refused the request parameters
    InvalidParameter,
    /// Vendor specific status code
    Vendor(u16),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => f.write_str("stack busy"),
            Self::NotConnected => f.write_str("link not connected"),
            Self::NoResources => f.write_str("no resources"),
            Self::InvalidParameter => f.write_str("invalid parameter"),
            Self::Vendor(code) => write!(f, "vendor status 0x{code:04X}"),
        }
    }
}

/// GATT discovery errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattError {
    /// A discovery session is already running on this connection
    SessionAlreadyActive,
    /// The transport refused to issue a discovery request
    TransportRejected(TransportError),
    /// A response carried handles that violate range or ordering rules
    InvalidHandleRange,
    /// A response page holds more entries than the session buffers
    CapacityExceeded,
    /// A response arrived that no outstanding request asked for
    UnexpectedResponse,
    /// The link dropped while discovery was in progress
    LinkLost,
    /// Every session slot is occupied by an active session
    RegistryFull,
    /// No session is tracked for the connection
    SessionNotFound,
    /// A crate channel had no room for the message
    ChannelFull,
}

impl From<TransportError> for GattError {
    fn from(error: TransportError) -> Self {
        Self::TransportRejected(error)
    }
}

impl core::fmt::Display for GattError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SessionAlreadyActive => f.write_str("discovery session already active"),
            Self::TransportRejected(e) => write!(f, "transport rejected request: {e}"),
            Self::InvalidHandleRange => f.write_str("invalid handle range in response"),
            Self::CapacityExceeded => f.write_str("response exceeds buffer capacity"),
            Self::UnexpectedResponse => f.write_str("unexpected response"),
            Self::LinkLost => f.write_str("link lost during discovery"),
            Self::RegistryFull => f.write_str("no free discovery session slot"),
            Self::SessionNotFound => f.write_str("no discovery session for connection"),
            Self::ChannelFull => f.write_str("channel full"),
        }
    }
}

/// Options for configuring a discovery session
///
/// Filters only decide what gets reported to the observer. Every discovered entry
/// still moves the handle cursor forward, so pagination is identical with or without
/// filters.
///
/// # Examples
///
/// ```rust
/// use gattwren::DiscoveryOptions;
///
/// // Report only the Battery Service and its Battery Level characteristic
/// let options = DiscoveryOptions::default()
///     .with_service_filter(0x180F)
///     .with_characteristic_filter(0x2A19);
///
/// assert!(options.matches_service(0x180F));
/// assert!(!options.matches_service(0x1800));
/// assert!(options.matches_characteristic(0x2A19));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Only services with this UUID are reported and expanded
    pub service_uuid: Option<ShortUuid>,
    /// Only characteristics with this UUID are reported
    pub characteristic_uuid: Option<ShortUuid>,
    /// Whether characteristics are discovered for each reported service
    pub discover_characteristics: bool,
}

impl DiscoveryOptions {
    /// Report only services matching `uuid`
    #[must_use]
    pub fn with_service_filter(mut self, uuid: ShortUuid) -> Self {
        self.service_uuid = Some(uuid);
        self
    }

    /// Report only characteristics matching `uuid`
    #[must_use]
    pub fn with_characteristic_filter(mut self, uuid: ShortUuid) -> Self {
        self.characteristic_uuid = Some(uuid);
        self
    }

    /// Discover services only, skipping the characteristic phase entirely
    #[must_use]
    pub fn without_characteristics(mut self) -> Self {
        self.discover_characteristics = false;
        self
    }

    /// Check a service UUID against the service filter
    #[must_use]
    pub fn matches_service(&self, uuid: ShortUuid) -> bool {
        self.service_uuid.is_none_or(|wanted| wanted == uuid)
    }

    /// Check a characteristic UUID against the characteristic filter
    #[must_use]
    pub fn matches_characteristic(&self, uuid: ShortUuid) -> bool {
        self.characteristic_uuid.is_none_or(|wanted| wanted == uuid)
    }
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            service_uuid: None,
            characteristic_uuid: None,
            discover_characteristics: true,
        }
    }
}

/// Application requests handled by the discovery processor
#[derive(Debug, Clone)]
pub enum DiscoveryRequest {
    /// Start discovering the peer database on a connection
    Start {
        /// Connection to discover
        conn: ConnHandle,
        /// Session options
        options: DiscoveryOptions,
    },
    /// Abort the session on a connection, if any
    Terminate(ConnHandle),
}

/// Transport events fed into the discovery processor
#[derive(Debug, Clone)]
pub enum GattEvent {
    /// A primary service discovery page arrived
    ServicesDiscovered {
        /// Connection the page belongs to
        conn: ConnHandle,
        /// Services in ascending handle order
        services: Vec<DiscoveredService, MAX_RESPONSE_ENTRIES>,
    },
    /// A characteristic discovery page arrived
    CharacteristicsDiscovered {
        /// Connection the page belongs to
        conn: ConnHandle,
        /// Characteristics in ascending handle order
        characteristics: Vec<DiscoveredCharacteristic, MAX_RESPONSE_ENTRIES>,
    },
    /// The link was lost; no response will follow
    LinkLost(ConnHandle),
}

impl GattEvent {
    /// Build a service page event from a transport buffer
    ///
    /// # Errors
    ///
    /// Returns `GattError::CapacityExceeded` if the page holds more than
    /// `MAX_RESPONSE_ENTRIES` services.
    pub fn services(conn: ConnHandle, services: &[DiscoveredService]) -> Result<Self, GattError> {
        Ok(Self::ServicesDiscovered {
            conn,
            services: Vec::from_slice(services).map_err(|()| GattError::CapacityExceeded)?,
        })
    }

    /// Build a characteristic page event from a transport buffer
    ///
    /// # Errors
    ///
    /// Returns `GattError::CapacityExceeded` if the page holds more than
    /// `MAX_RESPONSE_ENTRIES` characteristics.
    pub fn characteristics(
        conn: ConnHandle,
        characteristics: &[DiscoveredCharacteristic],
    ) -> Result<Self, GattError> {
        Ok(Self::CharacteristicsDiscovered {
            conn,
            characteristics: Vec::from_slice(characteristics)
                .map_err(|()| GattError::CapacityExceeded)?,
        })
    }

    /// Connection this event belongs to
    #[must_use]
    pub fn conn(&self) -> ConnHandle {
        match self {
            Self::ServicesDiscovered { conn, .. }
            | Self::CharacteristicsDiscovered { conn, .. }
            | Self::LinkLost(conn) => *conn,
        }
    }
}

/// Discovery results delivered to the application
#[derive(Debug, Clone)]
pub enum DiscoveryReport {
    /// A service passed the service filter
    ServiceFound {
        /// Connection the service was discovered on
        conn: ConnHandle,
        /// The discovered service
        service: DiscoveredService,
    },
    /// A characteristic passed the characteristic filter
    CharacteristicFound {
        /// Connection the characteristic was discovered on
        conn: ConnHandle,
        /// The discovered characteristic
        characteristic: DiscoveredCharacteristic,
    },
    /// The peer database is exhausted
    Complete(ConnHandle),
    /// The session was aborted
    Failed(ConnHandle, GattError),
}

impl DiscoveryReport {
    /// Connection this report belongs to
    #[must_use]
    pub fn conn(&self) -> ConnHandle {
        match self {
            Self::ServiceFound { conn, .. }
            | Self::CharacteristicFound { conn, .. }
            | Self::Complete(conn)
            | Self::Failed(conn, _) => *conn,
        }
    }

    /// Whether this report ends the session
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failed(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_options_default() {
        let options = DiscoveryOptions::default();

        assert_eq!(options.service_uuid, None);
        assert_eq!(options.characteristic_uuid, None);
        assert!(options.discover_characteristics);
        assert!(options.matches_service(0x1800));
        assert!(options.matches_characteristic(0x2A00));
    }

    #[test]
    fn test_discovery_options_builder_pattern() {
        let options = DiscoveryOptions::default()
            .with_service_filter(0x180D)
            .with_characteristic_filter(0x2A37)
            .without_characteristics();

        assert_eq!(options.service_uuid, Some(0x180D));
        assert_eq!(options.characteristic_uuid, Some(0x2A37));
        assert!(!options.discover_characteristics);
        assert!(options.matches_service(0x180D));
        assert!(!options.matches_service(0x180F));
        assert!(options.matches_characteristic(0x2A37));
        assert!(!options.matches_characteristic(0x2A38));
    }

    #[test]
    fn test_gatt_error_from_transport_error() {
        let error: GattError = TransportError::Busy.into();
        assert_eq!(error, GattError::TransportRejected(TransportError::Busy));
    }

    #[test]
    fn test_error_display() {
        use core::fmt::Write;

        let mut buffer = heapless::String::<64>::new();
        write!(
            buffer,
            "{}",
            GattError::TransportRejected(TransportError::Vendor(0x3012))
        )
        .unwrap();
        assert_eq!(
            buffer.as_str(),
            "transport rejected request: vendor status 0x3012"
        );
    }

    #[test]
    fn test_gatt_event_rejects_oversized_page() {
        let conn = ConnHandle::new(1);
        let services = [DiscoveredService::new(0x1800, 1, 3); MAX_RESPONSE_ENTRIES + 1];

        assert_eq!(
            GattEvent::services(conn, &services).unwrap_err(),
            GattError::CapacityExceeded
        );

        let event = GattEvent::services(conn, &services[..2]).unwrap();
        assert_eq!(event.conn().raw(), 1);
        match event {
            GattEvent::ServicesDiscovered { services, .. } => assert_eq!(services.len(), 2),
            _ => panic!("expected a service page"),
        }
    }

    #[test]
    fn test_discovery_report_terminal() {
        let conn = ConnHandle::new(9);

        assert!(DiscoveryReport::Complete(conn).is_terminal());
        assert!(DiscoveryReport::Failed(conn, GattError::LinkLost).is_terminal());
        assert!(
            !DiscoveryReport::ServiceFound {
                conn,
                service: DiscoveredService::new(0x180A, 10, 20),
            }
            .is_terminal()
        );
        assert_eq!(DiscoveryReport::Complete(conn).conn().raw(), 9);
    }
}
