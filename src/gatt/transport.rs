//! Discovery transport
//!
//! The stack that actually puts discovery requests on the air. Both operations only
//! queue a request and return; the matching response is delivered later as a
//! [`ServiceDiscoveryResponse`](super::ServiceDiscoveryResponse) or
//! [`CharacteristicDiscoveryResponse`](super::CharacteristicDiscoveryResponse), or a
//! link loss is reported instead.

use super::{Handle, HandleRange};
use crate::TransportError;
use bt_hci::param::ConnHandle;

/// Issues GATT discovery requests on behalf of the discovery engine
pub trait DiscoveryTransport {
    /// Request the next page of primary services starting at `start_handle`
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the request could not be queued.
    fn discover_primary_services(
        &mut self,
        conn: ConnHandle,
        start_handle: Handle,
    ) -> Result<(), TransportError>;

    /// Request the next page of characteristics inside `range`
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the request could not be queued.
    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        range: HandleRange,
    ) -> Result<(), TransportError>;
}

impl<T: DiscoveryTransport + ?Sized> DiscoveryTransport for &mut T {
    fn discover_primary_services(
        &mut self,
        conn: ConnHandle,
        start_handle: Handle,
    ) -> Result<(), TransportError> {
        (**self).discover_primary_services(conn, start_handle)
    }

    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        range: HandleRange,
    ) -> Result<(), TransportError> {
        (**self).discover_characteristics(conn, range)
    }
}
