//! Discovery observers
//!
//! Results leave the engine through a [`DiscoveryObserver`]. Entries passed to the
//! callbacks live in buffers that the next page overwrites, so an observer that needs
//! them later has to copy them out.

use super::{DiscoveredCharacteristic, DiscoveredService};
use crate::{DiscoveryReport, GattError, constants::REPORT_BACKLOG_DEPTH};
use bt_hci::param::ConnHandle;
use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    channel::{Sender, TrySendError},
};
use heapless::Deque;

/// Receives discovery results for a session
#[allow(async_fn_in_trait)]
pub trait DiscoveryObserver {
    /// A service passed the service filter
    fn on_service_found(&mut self, conn: ConnHandle, service: &DiscoveredService);

    /// A characteristic passed the characteristic filter
    fn on_characteristic_found(
        &mut self,
        _conn: ConnHandle,
        _characteristic: &DiscoveredCharacteristic,
    ) {
    }

    /// The peer database is exhausted. Fires once per session.
    fn on_discovery_complete(&mut self, conn: ConnHandle);

    /// The session was aborted. Fires once per session.
    fn on_discovery_failed(&mut self, conn: ConnHandle, error: GattError);

    /// Deliver results the callbacks had to hold back
    ///
    /// Called by the processor after every request and event.
    async fn flush(&mut self) {}
}

impl<O: DiscoveryObserver + ?Sized> DiscoveryObserver for &mut O {
    fn on_service_found(&mut self, conn: ConnHandle, service: &DiscoveredService) {
        (**self).on_service_found(conn, service);
    }

    fn on_characteristic_found(
        &mut self,
        conn: ConnHandle,
        characteristic: &DiscoveredCharacteristic,
    ) {
        (**self).on_characteristic_found(conn, characteristic);
    }

    fn on_discovery_complete(&mut self, conn: ConnHandle) {
        (**self).on_discovery_complete(conn);
    }

    fn on_discovery_failed(&mut self, conn: ConnHandle, error: GattError) {
        (**self).on_discovery_failed(conn, error);
    }

    async fn flush(&mut self) {
        (**self).flush().await;
    }
}

/// Observer that forwards every result as a [`DiscoveryReport`] into a channel
///
/// Callbacks cannot wait, so reports that do not fit into the channel are queued in
/// a backlog and sent by [`flush`](DiscoveryObserver::flush). When the backlog is
/// full, item reports are dropped, counted and logged. The last backlog slot is kept
/// for terminal reports, so `Complete` and `Failed` are never dropped.
pub struct ChannelObserver<'a, M: RawMutex, const N: usize> {
    sender: Sender<'a, M, DiscoveryReport, N>,
    backlog: Deque<DiscoveryReport, REPORT_BACKLOG_DEPTH>,
    dropped: usize,
}

impl<'a, M: RawMutex, const N: usize> ChannelObserver<'a, M, N> {
    /// Create an observer sending into `sender`
    #[must_use]
    pub fn new(sender: Sender<'a, M, DiscoveryReport, N>) -> Self {
        Self {
            sender,
            backlog: Deque::new(),
            dropped: 0,
        }
    }

    /// Number of reports dropped because the backlog was full
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Number of reports waiting for room in the channel
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn forward(&mut self, report: DiscoveryReport) {
        // Reports queued earlier go out first
        let report = if self.backlog.is_empty() {
            match self.sender.try_send(report) {
                Ok(()) => return,
                Err(TrySendError::Full(report)) => report,
            }
        } else {
            report
        };

        let limit = if report.is_terminal() {
            REPORT_BACKLOG_DEPTH
        } else {
            REPORT_BACKLOG_DEPTH - 1
        };
        if self.backlog.len() < limit && self.backlog.push_back(report).is_ok() {
            return;
        }

        self.dropped += 1;
        warn!(
            "[OBSERVER] Report backlog full, {} report(s) dropped",
            self.dropped
        );
    }
}

impl<M: RawMutex, const N: usize> DiscoveryObserver for ChannelObserver<'_, M, N> {
    fn on_service_found(&mut self, conn: ConnHandle, service: &DiscoveredService) {
        self.forward(DiscoveryReport::ServiceFound {
            conn,
            service: *service,
        });
    }

    fn on_characteristic_found(
        &mut self,
        conn: ConnHandle,
        characteristic: &DiscoveredCharacteristic,
    ) {
        self.forward(DiscoveryReport::CharacteristicFound {
            conn,
            characteristic: *characteristic,
        });
    }

    fn on_discovery_complete(&mut self, conn: ConnHandle) {
        self.forward(DiscoveryReport::Complete(conn));
    }

    fn on_discovery_failed(&mut self, conn: ConnHandle, error: GattError) {
        self.forward(DiscoveryReport::Failed(conn, error));
    }

    async fn flush(&mut self) {
        while let Some(report) = self.backlog.front().cloned() {
            self.sender.send(report).await;
            self.backlog.pop_front();
        }
    }
}
