//! Discovered primary services

use super::{Handle, HandleRange, ShortUuid};
use crate::GattError;
use bt_hci::param::ConnHandle;

/// A primary service found in the peer's database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredService {
    /// Service type
    pub uuid: ShortUuid,
    /// First handle owned by the service (its declaration)
    pub start_handle: Handle,
    /// Last handle owned by the service
    pub end_handle: Handle,
}

impl DiscoveredService {
    /// Create a new discovered service
    #[must_use]
    pub const fn new(uuid: ShortUuid, start_handle: Handle, end_handle: Handle) -> Self {
        Self {
            uuid,
            start_handle,
            end_handle,
        }
    }

    /// Inclusive handle range owned by the service
    #[must_use]
    pub const fn handle_range(&self) -> HandleRange {
        HandleRange::new(self.start_handle, self.end_handle)
    }
}

/// One page of primary service discovery results
#[derive(Debug, Clone, Copy)]
pub struct ServiceDiscoveryResponse<'a> {
    /// Connection the response arrived on
    pub conn: ConnHandle,
    /// Services in ascending handle order
    pub services: &'a [DiscoveredService],
}

impl<'a> ServiceDiscoveryResponse<'a> {
    /// Create a new response
    #[must_use]
    pub const fn new(conn: ConnHandle, services: &'a [DiscoveredService]) -> Self {
        Self { conn, services }
    }

    /// Check the page against the request that started at `requested_start`
    ///
    /// Every service must own a non-empty range at or after the requested start,
    /// and services must follow each other without overlapping.
    ///
    /// # Errors
    ///
    /// Returns `GattError::InvalidHandleRange` on the first violation.
    pub fn validate(&self, requested_start: Handle) -> Result<(), GattError> {
        let mut previous_end: Option<Handle> = None;
        for service in self.services {
            let ordered = match previous_end {
                Some(end) => service.start_handle > end,
                None => service.start_handle >= requested_start,
            };
            if !ordered || service.start_handle > service.end_handle {
                return Err(GattError::InvalidHandleRange);
            }
            previous_end = Some(service.end_handle);
        }
        Ok(())
    }
}
