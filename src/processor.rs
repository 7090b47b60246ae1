//! Discovery Processor Task
//!
//! Serializes every entry point of GATT discovery through channels so that all
//! session state is mutated from a single task. Application requests (start,
//! terminate) and transport events (service pages, characteristic pages, link loss)
//! arrive on two channels; the processor waits on both at once and applies them in
//! arrival order.
//!
//! # Usage
//!
//! Spawn [`run`] as an Embassy task with the transport that issues discovery requests.
//! The transport posts its responses back with [`api::post_event`](crate::api::post_event),
//! and the application drives discovery through the rest of [`api`](crate::api):
//!
//! ```rust,ignore
//! use gattwren::{DiscoveryOptions, api, processor};
//!
//! #[embassy_executor::task]
//! async fn discovery_task(transport: MyTransport) -> ! {
//!     processor::run(transport).await
//! }
//!
//! async fn discover(conn: ConnHandle) {
//!     api::start_discovery(conn, DiscoveryOptions::default()).await;
//!     loop {
//!         let report = api::next_report().await;
//!         if report.is_terminal() {
//!             break;
//!         }
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! * **Request channel**: `DiscoveryRequest`s from the application
//! * **Event channel**: `GattEvent`s from the transport
//! * **Report channel**: `DiscoveryReport`s to the application, fed by a
//!   [`ChannelObserver`]

use crate::{
    CharacteristicDiscoveryResponse, DiscoveryRequest, EVENT_CHANNEL, GattError, GattEvent,
    REPORT_CHANNEL, REQUEST_CHANNEL, ServiceDiscoveryResponse,
    constants::MAX_SESSIONS,
    gatt::{ChannelObserver, DiscoveryObserver, DiscoveryTransport, SessionRegistry},
};
use embassy_futures::select::{Either, select};
use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Receiver};

/// Owns the session registry together with its transport and observer
pub struct DiscoveryProcessor<T, O, const N: usize = MAX_SESSIONS> {
    registry: SessionRegistry<N>,
    transport: T,
    observer: O,
}

impl<T: DiscoveryTransport, O: DiscoveryObserver, const N: usize> DiscoveryProcessor<T, O, N> {
    /// Create a processor with no sessions
    #[must_use]
    pub fn new(transport: T, observer: O) -> Self {
        Self {
            registry: SessionRegistry::new(),
            transport,
            observer,
        }
    }

    /// Sessions tracked by the processor
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry<N> {
        &self.registry
    }

    /// Transport used to issue requests
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Observer receiving discovery results
    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Apply an application request
    ///
    /// A start that fails is reported to the observer as a discovery failure. A
    /// start on a connection whose session is still running is only logged; that
    /// session keeps running and reports its own outcome.
    pub fn handle_request(&mut self, request: DiscoveryRequest) {
        match request {
            DiscoveryRequest::Start { conn, options } => {
                debug!("[PROCESSOR] Start discovery on connection {}", conn.raw());
                match self.registry.start(conn, options, &mut self.transport) {
                    Ok(()) => {}
                    Err(GattError::SessionAlreadyActive) => {
                        warn!(
                            "[PROCESSOR] Discovery already running on connection {}, start ignored",
                            conn.raw()
                        );
                    }
                    Err(e) => {
                        error!(
                            "[PROCESSOR] Cannot start discovery on connection {}: {:?}",
                            conn.raw(),
                            e
                        );
                        self.observer.on_discovery_failed(conn, e);
                    }
                }
            }
            DiscoveryRequest::Terminate(conn) => {
                debug!("[PROCESSOR] Terminate discovery on connection {}", conn.raw());
                if self.registry.terminate(conn).is_err() {
                    debug!(
                        "[PROCESSOR] No discovery session on connection {}",
                        conn.raw()
                    );
                }
            }
        }
    }

    /// Apply a transport event
    pub fn handle_event(&mut self, event: GattEvent) {
        let result = match event {
            GattEvent::ServicesDiscovered { conn, services } => self.registry.on_service_response(
                &ServiceDiscoveryResponse::new(conn, &services),
                &mut self.transport,
                &mut self.observer,
            ),
            GattEvent::CharacteristicsDiscovered {
                conn,
                characteristics,
            } => self.registry.on_characteristic_response(
                &CharacteristicDiscoveryResponse::new(conn, &characteristics),
                &mut self.transport,
                &mut self.observer,
            ),
            GattEvent::LinkLost(conn) => {
                if !self.registry.on_link_lost(conn, &mut self.observer) {
                    trace!(
                        "[PROCESSOR] Link lost on connection {} without discovery",
                        conn.raw()
                    );
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("[PROCESSOR] Event not applied: {:?}", e);
        }
    }

    /// Wait for the next request or event, apply it and deliver its reports
    ///
    /// Requests are polled first when both are ready. Returns once the observer has
    /// flushed every report the input produced.
    pub async fn process_next<M: RawMutex, const R: usize, const E: usize>(
        &mut self,
        requests: &Receiver<'_, M, DiscoveryRequest, R>,
        events: &Receiver<'_, M, GattEvent, E>,
    ) {
        match select(requests.receive(), events.receive()).await {
            Either::First(request) => self.handle_request(request),
            Either::Second(event) => self.handle_event(event),
        }
        self.observer.flush().await;
    }

    /// Process requests and events forever
    pub async fn run<M: RawMutex, const R: usize, const E: usize>(
        &mut self,
        requests: Receiver<'_, M, DiscoveryRequest, R>,
        events: Receiver<'_, M, GattEvent, E>,
    ) -> ! {
        loop {
            self.process_next(&requests, &events).await;
        }
    }
}

/// Run the discovery processor on the crate channels
///
/// Results are delivered to [`api::next_report`](crate::api::next_report).
pub async fn run<T: DiscoveryTransport>(transport: T) -> ! {
    debug!("[PROCESSOR] Discovery processor started");
    let observer = ChannelObserver::new(REPORT_CHANNEL.sender());
    let mut processor: DiscoveryProcessor<T, _> = DiscoveryProcessor::new(transport, observer);
    processor
        .run(REQUEST_CHANNEL.receiver(), EVENT_CHANNEL.receiver())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DiscoveredCharacteristic, DiscoveredService, DiscoveryOptions, DiscoveryReport,
        TransportError,
        constants::MAX_HANDLE,
        gatt::{
            CharacteristicProperties, DiscoveryState,
            testing::{Issued, MockTransport, Recorded, RecordingObserver},
        },
    };
    use bt_hci::param::ConnHandle;
    use embassy_futures::{block_on, join::join};
    use embassy_sync::{blocking_mutex::raw::NoopRawMutex, channel::Channel};

    type TestProcessor = DiscoveryProcessor<MockTransport, RecordingObserver>;

    fn start(conn: u16) -> DiscoveryRequest {
        DiscoveryRequest::Start {
            conn: ConnHandle::new(conn),
            options: DiscoveryOptions::default(),
        }
    }

    #[test]
    fn test_processor_full_discovery() {
        let mut processor = TestProcessor::new(MockTransport::new(), RecordingObserver::new());
        let conn = ConnHandle::new(7);

        processor.handle_request(start(7));
        processor.handle_event(
            GattEvent::services(conn, &[DiscoveredService::new(0x1800, 1, 3)]).unwrap(),
        );
        processor.handle_event(
            GattEvent::characteristics(
                conn,
                &[DiscoveredCharacteristic::new(
                    0x2A00,
                    CharacteristicProperties::from_raw(0x02),
                    2,
                    3,
                )],
            )
            .unwrap(),
        );
        processor.handle_event(GattEvent::services(conn, &[]).unwrap());

        assert_eq!(
            processor.transport().issued.as_slice(),
            &[
                Issued::Services { conn: 7, start: 1 },
                Issued::Characteristics {
                    conn: 7,
                    range: crate::HandleRange::new(1, 3)
                },
                Issued::Services { conn: 7, start: 4 },
            ]
        );
        assert_eq!(processor.observer().services(), 1);
        assert_eq!(processor.observer().characteristics(), 1);
        assert_eq!(processor.observer().completions(), 1);
        assert_eq!(
            processor
                .registry()
                .session(conn)
                .map(crate::DiscoveryEngine::state),
            Some(DiscoveryState::Complete)
        );
    }

    #[test]
    fn test_processor_reports_failed_start() {
        let mut transport = MockTransport::new();
        transport.reject_with = Some(TransportError::Busy);
        let mut processor = TestProcessor::new(transport, RecordingObserver::new());

        processor.handle_request(start(3));

        assert_eq!(
            processor.observer().events.as_slice(),
            &[(
                3,
                Recorded::Failed(GattError::TransportRejected(TransportError::Busy))
            )]
        );

        processor.handle_request(DiscoveryRequest::Terminate(ConnHandle::new(9)));
        assert_eq!(processor.observer().events.len(), 1);
    }

    #[test]
    fn test_processor_ignores_unsolicited_events() {
        let mut processor = TestProcessor::new(MockTransport::new(), RecordingObserver::new());

        processor.handle_event(
            GattEvent::services(ConnHandle::new(2), &[DiscoveredService::new(0x1800, 1, 3)])
                .unwrap(),
        );
        processor.handle_event(GattEvent::LinkLost(ConnHandle::new(2)));

        assert!(processor.observer().events.is_empty());
        assert!(processor.transport().issued.is_empty());
        assert!(processor.registry().is_empty());
    }

    #[test]
    fn test_processor_link_lost() {
        let mut processor = TestProcessor::new(MockTransport::new(), RecordingObserver::new());

        processor.handle_request(start(5));
        processor.handle_event(GattEvent::LinkLost(ConnHandle::new(5)));

        assert_eq!(
            processor.observer().failures().as_slice(),
            &[GattError::LinkLost]
        );
    }

    #[test]
    fn test_process_next_prefers_requests() {
        let requests: Channel<NoopRawMutex, DiscoveryRequest, 2> = Channel::new();
        let events: Channel<NoopRawMutex, GattEvent, 2> = Channel::new();
        let mut processor = TestProcessor::new(MockTransport::new(), RecordingObserver::new());

        requests.try_send(start(1)).unwrap();
        events
            .try_send(GattEvent::services(ConnHandle::new(1), &[]).unwrap())
            .unwrap();

        block_on(processor.process_next(&requests.receiver(), &events.receiver()));
        assert_eq!(processor.transport().issued.len(), 1);
        assert_eq!(processor.observer().completions(), 0);

        block_on(processor.process_next(&requests.receiver(), &events.receiver()));
        assert_eq!(processor.observer().completions(), 1);
    }

    #[test]
    fn test_processor_with_channel_observer() {
        let reports: Channel<NoopRawMutex, DiscoveryReport, 4> = Channel::new();
        let mut processor: DiscoveryProcessor<_, _> =
            DiscoveryProcessor::new(MockTransport::new(), ChannelObserver::new(reports.sender()));
        let conn = ConnHandle::new(4);

        processor.handle_request(DiscoveryRequest::Start {
            conn,
            options: DiscoveryOptions::default().without_characteristics(),
        });
        processor.handle_event(
            GattEvent::services(conn, &[DiscoveredService::new(0x180F, 1, MAX_HANDLE)]).unwrap(),
        );

        match reports.try_receive() {
            Ok(DiscoveryReport::ServiceFound { conn, service }) => {
                assert_eq!(conn.raw(), 4);
                assert_eq!(service.uuid, 0x180F);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(reports.try_receive().is_ok_and(|report| report.is_terminal()));
        assert_eq!(processor.observer().dropped(), 0);
    }

    #[test]
    fn test_duplicate_start_leaves_running_session_alone() {
        let mut processor = TestProcessor::new(MockTransport::new(), RecordingObserver::new());
        let conn = ConnHandle::new(5);

        processor.handle_request(start(5));
        processor.handle_request(start(5));

        assert!(processor.observer().events.is_empty());
        assert_eq!(processor.transport().issued.len(), 1);
        assert!(
            processor
                .registry()
                .session(conn)
                .is_some_and(crate::DiscoveryEngine::is_active)
        );

        processor.handle_event(GattEvent::services(conn, &[]).unwrap());

        assert_eq!(
            processor.observer().events.as_slice(),
            &[(5, Recorded::Complete)]
        );
    }

    #[test]
    fn test_terminal_report_survives_full_report_channel() {
        let requests: Channel<NoopRawMutex, DiscoveryRequest, 2> = Channel::new();
        let events: Channel<NoopRawMutex, GattEvent, 2> = Channel::new();
        let reports: Channel<NoopRawMutex, DiscoveryReport, 4> = Channel::new();
        let mut processor: DiscoveryProcessor<_, _> =
            DiscoveryProcessor::new(MockTransport::new(), ChannelObserver::new(reports.sender()));
        let conn = ConnHandle::new(6);

        requests
            .try_send(DiscoveryRequest::Start {
                conn,
                options: DiscoveryOptions::default().without_characteristics(),
            })
            .unwrap();
        events
            .try_send(
                GattEvent::services(
                    conn,
                    &[
                        DiscoveredService::new(0x1800, 1, 5),
                        DiscoveredService::new(0x1801, 6, 9),
                        DiscoveredService::new(0x180A, 10, 20),
                        DiscoveredService::new(0x180F, 21, MAX_HANDLE),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        block_on(processor.process_next(&requests.receiver(), &events.receiver()));

        // Four services fill the channel, so the completion waits in the backlog
        let (_, received) = block_on(join(
            processor.process_next(&requests.receiver(), &events.receiver()),
            async {
                let mut services = 0;
                loop {
                    match reports.receive().await {
                        DiscoveryReport::ServiceFound { .. } => services += 1,
                        report => break (services, report),
                    }
                }
            },
        ));

        assert_eq!(received.0, 4);
        assert!(matches!(received.1, DiscoveryReport::Complete(_)));
        assert_eq!(processor.observer().dropped(), 0);
        assert_eq!(processor.observer().backlog_len(), 0);
    }
}
