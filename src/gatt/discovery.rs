//! GATT Discovery Engine
//!
//! Runs one discovery session over one connection. The engine pages through the
//! peer's primary services and, for every service it reports, pages through the
//! characteristics inside that service's handle range before moving on.
//!
//! ## Flow
//!
//! 1. [`DiscoveryEngine::start`] issues a service request at handle `0x0001`
//! 2. Each service page is ingested, then walked service by service
//! 3. A reported service hands the transport to characteristic discovery for its
//!    range until that range is exhausted
//! 4. The next service page starts one past the last service's end handle
//! 5. An empty service page completes the session
//!
//! Exactly one request is outstanding at any time. Responses that no outstanding
//! request asked for are ignored.

use super::{
    CharacteristicDiscoveryResponse, DiscoveredCharacteristic, DiscoveredService,
    DiscoveryObserver, DiscoveryTransport, Handle, HandleRange, ServiceDiscoveryResponse,
};
use crate::{
    DiscoveryOptions, GattError,
    constants::{
        MAX_CHARACTERISTICS_PER_SERVICE, MAX_HANDLE, MAX_SERVICES, SERVICE_DISCOVERY_START_HANDLE,
    },
};
use bt_hci::param::ConnHandle;
use heapless::Vec;

/// Discovery session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryState {
    /// No session has run, or the last one was terminated
    Idle,
    /// Walking primary services
    DiscoveringServices,
    /// Walking the characteristics of the buffered service at `service_index`
    DiscoveringCharacteristics {
        /// Index of the expanded service in the current service page
        service_index: usize,
    },
    /// The peer database was exhausted
    Complete,
    /// The session was aborted
    Failed(GattError),
}

impl DiscoveryState {
    /// Whether a session is running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::DiscoveringServices | Self::DiscoveringCharacteristics { .. }
        )
    }
}

/// The single request a session may have outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PendingRequest {
    /// Primary services from `start` up to the last handle
    Services {
        /// Requested start handle
        start: Handle,
    },
    /// Characteristics within `range`
    Characteristics {
        /// Requested handle range
        range: HandleRange,
    },
}

/// GATT discovery session
///
/// Owns the bounded page buffers and cursors of one session. The transport and the
/// observer are passed into each call, so the engine stays free of the stack and of
/// the application.
#[derive(Debug)]
pub struct DiscoveryEngine {
    /// Current phase
    state: DiscoveryState,
    /// Connection of the current or last session
    conn: Option<ConnHandle>,
    /// Filters and phase toggles of the current session
    options: DiscoveryOptions,
    /// Current service page
    services: Vec<DiscoveredService, MAX_SERVICES>,
    /// Next service to visit in `services`
    current_service: usize,
    /// Current characteristic page of the expanded service
    characteristics: Vec<DiscoveredCharacteristic, MAX_CHARACTERISTICS_PER_SERVICE>,
    /// Next characteristic to visit in `characteristics`
    current_characteristic: usize,
    /// Outstanding request, if any
    pending: Option<PendingRequest>,
}

impl DiscoveryEngine {
    /// Create an idle engine
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DiscoveryState::Idle,
            conn: None,
            options: DiscoveryOptions::default(),
            services: Vec::new(),
            current_service: 0,
            characteristics: Vec::new(),
            current_characteristic: 0,
            pending: None,
        }
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Connection of the current or last session
    #[must_use]
    pub fn conn(&self) -> Option<ConnHandle> {
        self.conn
    }

    /// Options of the current or last session
    #[must_use]
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Outstanding request, if any
    #[must_use]
    pub fn pending(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// Whether a session is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Whether the session is in the service phase
    #[must_use]
    pub fn is_discovering_services(&self) -> bool {
        self.state == DiscoveryState::DiscoveringServices
    }

    /// Whether the session is in the characteristic phase
    #[must_use]
    pub fn is_discovering_characteristics(&self) -> bool {
        matches!(self.state, DiscoveryState::DiscoveringCharacteristics { .. })
    }

    /// Services of the current page
    #[must_use]
    pub fn services(&self) -> &[DiscoveredService] {
        &self.services
    }

    /// Characteristics of the current page
    #[must_use]
    pub fn characteristics(&self) -> &[DiscoveredCharacteristic] {
        &self.characteristics
    }

    /// Index of the next service to visit in the current page
    #[must_use]
    pub fn current_service_index(&self) -> usize {
        self.current_service
    }

    /// Index of the next characteristic to visit in the current page
    #[must_use]
    pub fn current_characteristic_index(&self) -> usize {
        self.current_characteristic
    }

    /// Start discovering the peer database on `conn`
    ///
    /// Clears whatever a previous session left behind and issues the first service
    /// request at [`SERVICE_DISCOVERY_START_HANDLE`].
    ///
    /// # Errors
    ///
    /// * `GattError::SessionAlreadyActive` if a session is running
    /// * `GattError::TransportRejected` if the first request could not be issued;
    ///   the engine is left in `Failed`
    pub fn start<T: DiscoveryTransport>(
        &mut self,
        conn: ConnHandle,
        options: DiscoveryOptions,
        transport: &mut T,
    ) -> Result<(), GattError> {
        if self.is_active() {
            warn!(
                "[DISCOVERY] Session already active on connection {}",
                self.conn.map_or(0, |c| c.raw())
            );
            return Err(GattError::SessionAlreadyActive);
        }

        self.clear();
        self.conn = Some(conn);
        self.options = options;
        self.state = DiscoveryState::DiscoveringServices;
        debug!(
            "[DISCOVERY] Starting service discovery on connection {}",
            conn.raw()
        );

        if let Err(e) = self.request_services(SERVICE_DISCOVERY_START_HANDLE, transport) {
            error!("[DISCOVERY] Failed to start discovery: {:?}", e);
            self.fail(e);
            return Err(e);
        }
        Ok(())
    }

    /// Abort the session without waiting for the outstanding response
    ///
    /// The observer is not notified. Responses arriving afterwards are ignored.
    pub fn terminate(&mut self) {
        if self.is_active() {
            debug!(
                "[DISCOVERY] Terminating discovery on connection {}",
                self.conn.map_or(0, |c| c.raw())
            );
        }
        self.clear();
        self.state = DiscoveryState::Idle;
    }

    /// Handle loss of the link carrying the session
    ///
    /// Returns `true` if an active session on `conn` was aborted.
    pub fn on_link_lost<O: DiscoveryObserver>(&mut self, conn: ConnHandle, observer: &mut O) -> bool {
        if !self.accepts(conn) {
            return false;
        }
        self.abort(GattError::LinkLost, observer);
        true
    }

    /// Ingest a service page and advance discovery as far as possible
    ///
    /// # Errors
    ///
    /// Returns the error of [`ingest_services`](Self::ingest_services).
    pub fn on_service_response<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        response: &ServiceDiscoveryResponse<'_>,
        transport: &mut T,
        observer: &mut O,
    ) -> Result<(), GattError> {
        self.ingest_services(response, observer)?;
        self.advance(transport, observer);
        Ok(())
    }

    /// Ingest a characteristic page and advance discovery as far as possible
    ///
    /// # Errors
    ///
    /// Returns the error of [`ingest_characteristics`](Self::ingest_characteristics).
    pub fn on_characteristic_response<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        response: &CharacteristicDiscoveryResponse<'_>,
        transport: &mut T,
        observer: &mut O,
    ) -> Result<(), GattError> {
        self.ingest_characteristics(response, observer)?;
        self.advance(transport, observer);
        Ok(())
    }

    /// Store a service page, replacing the previous one
    ///
    /// # Errors
    ///
    /// * `GattError::UnexpectedResponse` if no service request of this session is
    ///   outstanding; the response is ignored
    /// * `GattError::InvalidHandleRange` or `GattError::CapacityExceeded` if the page
    ///   is malformed; the session is aborted and the observer notified
    pub fn ingest_services<O: DiscoveryObserver>(
        &mut self,
        response: &ServiceDiscoveryResponse<'_>,
        observer: &mut O,
    ) -> Result<(), GattError> {
        let Some(PendingRequest::Services { start }) = self.pending.filter(|_| self.accepts(response.conn))
        else {
            debug!(
                "[DISCOVERY] Ignoring unexpected service page on connection {}",
                response.conn.raw()
            );
            return Err(GattError::UnexpectedResponse);
        };

        let stored = response
            .validate(start)
            .and_then(|()| Self::fill(&mut self.services, response.services));
        if let Err(e) = stored {
            self.abort(e, observer);
            return Err(e);
        }

        trace!(
            "[DISCOVERY] Service page from handle {}: {} service(s)",
            start,
            self.services.len()
        );
        self.current_service = 0;
        self.pending = None;
        Ok(())
    }

    /// Store a characteristic page, replacing the previous one
    ///
    /// # Errors
    ///
    /// * `GattError::UnexpectedResponse` if no characteristic request of this session
    ///   is outstanding; the response is ignored
    /// * `GattError::InvalidHandleRange` or `GattError::CapacityExceeded` if the page
    ///   is malformed; the session is aborted and the observer notified
    pub fn ingest_characteristics<O: DiscoveryObserver>(
        &mut self,
        response: &CharacteristicDiscoveryResponse<'_>,
        observer: &mut O,
    ) -> Result<(), GattError> {
        let Some(PendingRequest::Characteristics { range }) =
            self.pending.filter(|_| self.accepts(response.conn))
        else {
            debug!(
                "[DISCOVERY] Ignoring unexpected characteristic page on connection {}",
                response.conn.raw()
            );
            return Err(GattError::UnexpectedResponse);
        };

        let stored = response
            .validate(range)
            .and_then(|()| Self::fill(&mut self.characteristics, response.characteristics));
        if let Err(e) = stored {
            self.abort(e, observer);
            return Err(e);
        }

        trace!(
            "[DISCOVERY] Characteristic page in [{}, {}]: {} characteristic(s)",
            range.start,
            range.end,
            self.characteristics.len()
        );
        self.current_characteristic = 0;
        self.pending = None;
        Ok(())
    }

    /// Advance both phases until a request is outstanding or the session ends
    ///
    /// Safe to call at any time; does nothing while a response is awaited.
    pub fn advance<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        transport: &mut T,
        observer: &mut O,
    ) {
        self.advance_characteristics(transport, observer);
        self.advance_services(transport, observer);
    }

    /// Walk the current service page
    ///
    /// Each service passing the filter is reported and then expanded into
    /// characteristic discovery, which must finish before the next service is
    /// visited. Once the page is exhausted the next page is requested, or the session
    /// completes if the page was empty.
    pub fn advance_services<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        transport: &mut T,
        observer: &mut O,
    ) {
        if !self.is_discovering_services() || self.pending.is_some() {
            return;
        }
        let Some(conn) = self.conn else {
            return;
        };

        while let Some(service) = self.services.get(self.current_service).copied() {
            if !self.options.matches_service(service.uuid) {
                trace!("[DISCOVERY] Service {:#X} filtered out", service.uuid);
                self.current_service += 1;
                continue;
            }

            observer.on_service_found(conn, &service);
            if !self.options.discover_characteristics {
                self.current_service += 1;
                continue;
            }

            match self.launch_characteristic_discovery(service.handle_range(), transport) {
                Ok(true) => return,
                Ok(false) => self.current_service += 1,
                Err(e) => {
                    self.abort(e, observer);
                    return;
                }
            }
        }

        match self.services.last().map(|service| service.end_handle) {
            Some(end) if end < MAX_HANDLE => {
                self.services.clear();
                self.current_service = 0;
                if let Err(e) = self.request_services(end + 1, transport) {
                    self.abort(e, observer);
                }
            }
            _ => self.complete(observer),
        }
    }

    /// Walk the current characteristic page of the expanded service
    ///
    /// Characteristics passing the filter are reported. Once the page is exhausted
    /// the rest of the service range is requested, or the service phase resumes with
    /// the next service when nothing is left.
    pub fn advance_characteristics<T: DiscoveryTransport, O: DiscoveryObserver>(
        &mut self,
        transport: &mut T,
        observer: &mut O,
    ) {
        let DiscoveryState::DiscoveringCharacteristics { service_index } = self.state else {
            return;
        };
        if self.pending.is_some() {
            return;
        }
        let Some(conn) = self.conn else {
            return;
        };

        while let Some(characteristic) = self.characteristics.get(self.current_characteristic).copied()
        {
            if self.options.matches_characteristic(characteristic.uuid) {
                observer.on_characteristic_found(conn, &characteristic);
            }
            self.current_characteristic += 1;
        }

        // Filtered entries move the cursor too
        let next_start = self
            .characteristics
            .last()
            .and_then(|characteristic| characteristic.value_handle.checked_add(1));
        let service_end = self
            .services
            .get(service_index)
            .map_or(0, |service| service.end_handle);
        self.characteristics.clear();
        self.current_characteristic = 0;

        match next_start.map(|start| HandleRange::new(start, service_end)) {
            Some(range) if !range.is_empty_for_discovery() => {
                if let Err(e) = self.request_characteristics(range, transport) {
                    self.abort(e, observer);
                }
            }
            _ => self.finish_characteristic_discovery(),
        }
    }

    /// Begin the characteristic phase for the current service
    ///
    /// Returns `Ok(false)` without issuing anything when the range cannot hold a
    /// characteristic.
    fn launch_characteristic_discovery<T: DiscoveryTransport>(
        &mut self,
        range: HandleRange,
        transport: &mut T,
    ) -> Result<bool, GattError> {
        if range.is_empty_for_discovery() {
            trace!(
                "[DISCOVERY] No characteristic range in [{}, {}]",
                range.start,
                range.end
            );
            return Ok(false);
        }

        self.characteristics.clear();
        self.current_characteristic = 0;
        self.request_characteristics(range, transport)?;
        self.state = DiscoveryState::DiscoveringCharacteristics {
            service_index: self.current_service,
        };
        Ok(true)
    }

    /// Hand the transport back to the service phase at the next service
    fn finish_characteristic_discovery(&mut self) {
        self.state = DiscoveryState::DiscoveringServices;
        self.current_service += 1;
    }

    fn request_services<T: DiscoveryTransport>(
        &mut self,
        start: Handle,
        transport: &mut T,
    ) -> Result<(), GattError> {
        let conn = self.conn.ok_or(GattError::SessionNotFound)?;
        transport.discover_primary_services(conn, start)?;
        debug!(
            "[DISCOVERY] Requested services from handle {} on connection {}",
            start,
            conn.raw()
        );
        self.pending = Some(PendingRequest::Services { start });
        Ok(())
    }

    fn request_characteristics<T: DiscoveryTransport>(
        &mut self,
        range: HandleRange,
        transport: &mut T,
    ) -> Result<(), GattError> {
        let conn = self.conn.ok_or(GattError::SessionNotFound)?;
        transport.discover_characteristics(conn, range)?;
        debug!(
            "[DISCOVERY] Requested characteristics in [{}, {}] on connection {}",
            range.start,
            range.end,
            conn.raw()
        );
        self.pending = Some(PendingRequest::Characteristics { range });
        Ok(())
    }

    /// Whether a response on `conn` can belong to the running session
    fn accepts(&self, conn: ConnHandle) -> bool {
        self.is_active() && self.conn.is_some_and(|own| own.raw() == conn.raw())
    }

    fn fill<E: Copy, const N: usize>(buffer: &mut Vec<E, N>, entries: &[E]) -> Result<(), GattError> {
        if entries.len() > N {
            warn!(
                "[DISCOVERY] Page of {} entries exceeds capacity {}",
                entries.len(),
                N
            );
            return Err(GattError::CapacityExceeded);
        }
        buffer.clear();
        buffer
            .extend_from_slice(entries)
            .map_err(|()| GattError::CapacityExceeded)
    }

    fn complete<O: DiscoveryObserver>(&mut self, observer: &mut O) {
        self.clear();
        self.state = DiscoveryState::Complete;
        if let Some(conn) = self.conn {
            debug!("[DISCOVERY] Discovery complete on connection {}", conn.raw());
            observer.on_discovery_complete(conn);
        }
    }

    fn abort<O: DiscoveryObserver>(&mut self, error: GattError, observer: &mut O) {
        self.fail(error);
        if let Some(conn) = self.conn {
            error!(
                "[DISCOVERY] Discovery failed on connection {}: {:?}",
                conn.raw(),
                error
            );
            observer.on_discovery_failed(conn, error);
        }
    }

    fn fail(&mut self, error: GattError) {
        self.clear();
        self.state = DiscoveryState::Failed(error);
    }

    fn clear(&mut self) {
        self.services.clear();
        self.current_service = 0;
        self.characteristics.clear();
        self.current_characteristic = 0;
        self.pending = None;
    }
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}
