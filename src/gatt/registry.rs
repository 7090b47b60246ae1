//! Discovery Session Registry
//!
//! Tracks one [`DiscoveryEngine`] per connection so that several links can be
//! discovered at the same time. Responses and link losses are routed to the session
//! of the connection they arrived on.
//!
//! Finished sessions (complete, failed or terminated) stay in the registry so their
//! final state can be inspected, and are reclaimed when a new connection needs a slot.

use super::{
    CharacteristicDiscoveryResponse, DiscoveryEngine, DiscoveryObserver, DiscoveryTransport,
    ServiceDiscoveryResponse,
};
use crate::{DiscoveryOptions, GattError, constants::MAX_SESSIONS};
use bt_hci::param::ConnHandle;
use heapless::FnvIndexMap;

/// Discovery sessions keyed by raw connection handle
///
/// `N` must be a power of two.
#[derive(Debug)]
pub struct SessionRegistry<const N: usize = MAX_SESSIONS> {
    sessions: FnvIndexMap<u16, DiscoveryEngine, N>,
}

impl<const N: usize> SessionRegistry<N> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: FnvIndexMap::new(),
        }
    }

    /// Start a discovery session on `conn`
    ///
    /// Reuses the connection's previous session slot if it has one. Otherwise a free
    /// slot is taken, reclaiming a finished session when the registry is full.
    ///
    /// # Errors
    ///
    /// * `GattError::SessionAlreadyActive` if `conn` already has a running session
    /// * `GattError::RegistryFull` if every slot holds a running session
    /// * `GattError::TransportRejected` if the first request could not be issued
    pub fn start<T: DiscoveryTransport>(
        &mut self,
        conn: ConnHandle,
        options: DiscoveryOptions,
        transport: &mut T,
    ) -> Result<(), GattError> {
        let key = conn.raw();
        if !self.sessions.contains_key(&key) {
            self.allocate(key)?;
        }

        self.sessions
            .get_mut(&key)
            .ok_or(GattError::SessionNotFound)?
            .start(conn, options, transport)
    }

    /// Terminate the session on `conn` without notifying the observer
    ///
    /// # Errors
    ///
    /// Returns `GattError::SessionNotFound` if `conn` has no session.
    pub fn terminate(&mut self, conn: ConnHandle) -> Result<(), GattError> {
        self.sessions
            .get_mut(&conn.raw())
            .ok_or(GattError::SessionNotFound)?
            .terminate();
        Ok(())
    }

    /// Route a service page to the session of its connection
    ///
    /// # Errors
    ///
    /// * `GattError::UnexpectedResponse` if the connection has no session or the
    ///   session did not ask for this page
    /// * Any error of [`DiscoveryEngine::on_service_response`]
    pub fn on_service_response<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        response: &ServiceDiscoveryResponse<'_>,
        transport: &mut T,
        observer: &mut O,
    ) -> Result<(), GattError> {
        self.route(response.conn)?
            .on_service_response(response, transport, observer)
    }

    /// Route a characteristic page to the session of its connection
    ///
    /// # Errors
    ///
    /// * `GattError::UnexpectedResponse` if the connection has no session or the
    ///   session did not ask for this page
    /// * Any error of [`DiscoveryEngine::on_characteristic_response`]
    pub fn on_characteristic_response<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        response: &CharacteristicDiscoveryResponse<'_>,
        transport: &mut T,
        observer: &mut O,
    ) -> Result<(), GattError> {
        self.route(response.conn)?
            .on_characteristic_response(response, transport, observer)
    }

    /// Abort the session of a lost link
    ///
    /// Returns `true` if a running session was aborted.
    pub fn on_link_lost<O: DiscoveryObserver>(&mut self, conn: ConnHandle, observer: &mut O) -> bool {
        self.sessions
            .get_mut(&conn.raw())
            .is_some_and(|engine| engine.on_link_lost(conn, observer))
    }

    /// Session tracked for `conn`, if any
    #[must_use]
    pub fn session(&self, conn: ConnHandle) -> Option<&DiscoveryEngine> {
        self.sessions.get(&conn.raw())
    }

    /// Number of tracked sessions, running or finished
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of running sessions
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|engine| engine.is_active())
            .count()
    }

    fn route(&mut self, conn: ConnHandle) -> Result<&mut DiscoveryEngine, GattError> {
        self.sessions.get_mut(&conn.raw()).ok_or_else(|| {
            debug!(
                "[REGISTRY] No discovery session for connection {}",
                conn.raw()
            );
            GattError::UnexpectedResponse
        })
    }

    fn allocate(&mut self, key: u16) -> Result<(), GattError> {
        if self.sessions.len() == N {
            let finished = self
                .sessions
                .iter()
                .find(|(_, engine)| !engine.is_active())
                .map(|(conn, _)| *conn)
                .ok_or_else(|| {
                    warn!("[REGISTRY] All {} discovery sessions are active", N);
                    GattError::RegistryFull
                })?;
            trace!(
                "[REGISTRY] Reclaiming session slot of connection {}",
                finished
            );
            self.sessions.remove(&finished);
        }

        self.sessions
            .insert(key, DiscoveryEngine::new())
            .map_err(|_| GattError::RegistryFull)?;
        Ok(())
    }
}

impl<const N: usize> Default for SessionRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}
