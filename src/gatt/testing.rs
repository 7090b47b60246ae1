//! Test doubles for the discovery transport and observer

use super::{
    DiscoveredCharacteristic, DiscoveredService, DiscoveryObserver, DiscoveryTransport, Handle,
    HandleRange,
};
use crate::{GattError, TransportError};
use bt_hci::param::ConnHandle;
use heapless::Vec;

/// A request the engine handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Issued {
    Services { conn: u16, start: Handle },
    Characteristics { conn: u16, range: HandleRange },
}

/// Transport that records requests and optionally refuses them
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub issued: Vec<Issued, 32>,
    pub reject_with: Option<TransportError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Issued> {
        self.issued.last().copied()
    }
}

impl DiscoveryTransport for MockTransport {
    fn discover_primary_services(
        &mut self,
        conn: ConnHandle,
        start_handle: Handle,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.reject_with {
            return Err(error);
        }
        self.issued
            .push(Issued::Services {
                conn: conn.raw(),
                start: start_handle,
            })
            .map_err(|_| TransportError::NoResources)
    }

    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        range: HandleRange,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.reject_with {
            return Err(error);
        }
        self.issued
            .push(Issued::Characteristics {
                conn: conn.raw(),
                range,
            })
            .map_err(|_| TransportError::NoResources)
    }
}

/// A callback the engine invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    Service(DiscoveredService),
    Characteristic(DiscoveredCharacteristic),
    Complete,
    Failed(GattError),
}

/// Observer that records every callback with its connection handle
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    pub events: Vec<(u16, Recorded), 64>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> usize {
        self.count(|event| matches!(event, Recorded::Service(_)))
    }

    pub fn characteristics(&self) -> usize {
        self.count(|event| matches!(event, Recorded::Characteristic(_)))
    }

    pub fn completions(&self) -> usize {
        self.count(|event| matches!(event, Recorded::Complete))
    }

    pub fn failures(&self) -> Vec<GattError, 8> {
        self.events
            .iter()
            .filter_map(|(_, event)| match event {
                Recorded::Failed(error) => Some(*error),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.events
            .iter()
            .filter(|(_, event)| predicate(event))
            .count()
    }

    fn record(&mut self, conn: ConnHandle, event: Recorded) {
        self.events
            .push((conn.raw(), event))
            .expect("recording observer overflow");
    }
}

impl DiscoveryObserver for RecordingObserver {
    fn on_service_found(&mut self, conn: ConnHandle, service: &DiscoveredService) {
        self.record(conn, Recorded::Service(*service));
    }

    fn on_characteristic_found(
        &mut self,
        conn: ConnHandle,
        characteristic: &DiscoveredCharacteristic,
    ) {
        self.record(conn, Recorded::Characteristic(*characteristic));
    }

    fn on_discovery_complete(&mut self, conn: ConnHandle) {
        self.record(conn, Recorded::Complete);
    }

    fn on_discovery_failed(&mut self, conn: ConnHandle, error: GattError) {
        self.record(conn, Recorded::Failed(error));
    }
}
