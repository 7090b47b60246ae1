//! GATT Client Discovery
//!
//! This module implements discovery of a peer's GATT database: primary services
//! first, then the characteristics of each service, paging through attribute
//! handle ranges one request at a time.

/// Attribute handle in the peer's GATT database
pub type Handle = u16;

/// 16-bit short form UUID
pub type ShortUuid = u16;

pub mod characteristic;
pub mod discovery;
pub mod observer;
pub mod registry;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use characteristic::{
    CharacteristicDiscoveryResponse, CharacteristicProperties, DiscoveredCharacteristic,
};
pub use discovery::{DiscoveryEngine, DiscoveryState, PendingRequest};
pub use observer::{ChannelObserver, DiscoveryObserver};
pub use registry::SessionRegistry;
pub use service::{DiscoveredService, ServiceDiscoveryResponse};
pub use transport::DiscoveryTransport;

/// Inclusive attribute handle range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    /// First handle in the range
    pub start: Handle,
    /// Last handle in the range
    pub end: Handle,
}

impl HandleRange {
    /// Create a new handle range
    #[must_use]
    pub const fn new(start: Handle, end: Handle) -> Self {
        Self { start, end }
    }

    /// Check whether `handle` lies inside the range
    #[must_use]
    pub const fn contains(&self, handle: Handle) -> bool {
        self.start <= handle && handle <= self.end
    }

    /// Whether no characteristic can be found in this range
    ///
    /// A characteristic needs a declaration and a value attribute, so a range
    /// holding fewer than two handles is never queried.
    #[must_use]
    pub const fn is_empty_for_discovery(&self) -> bool {
        self.start >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_range_contains() {
        let range = HandleRange::new(4, 9);

        assert!(range.contains(4));
        assert!(range.contains(9));
        assert!(!range.contains(3));
        assert!(!range.contains(10));
    }

    #[test]
    fn test_handle_range_empty_for_discovery() {
        assert!(HandleRange::new(5, 5).is_empty_for_discovery());
        assert!(HandleRange::new(4, 3).is_empty_for_discovery());
        assert!(!HandleRange::new(4, 5).is_empty_for_discovery());
        assert!(!HandleRange::new(1, 0xFFFF).is_empty_for_discovery());
    }
}
