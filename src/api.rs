//! `Gattwren` API Functions
//!
//! This module provides the public API functions for interacting with the discovery
//! processor task started by [`processor::run`](crate::processor::run). These
//! functions use static channels to communicate with the processor and are designed
//! to be called from application code and from the transport.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gattwren::{DiscoveryOptions, DiscoveryReport, api};
//!
//! // Discover the Battery Service of a freshly connected peer
//! api::start_discovery(conn, DiscoveryOptions::default().with_service_filter(0x180F)).await;
//!
//! loop {
//!     match api::next_report().await {
//!         DiscoveryReport::ServiceFound { service, .. } => { /* ... */ }
//!         DiscoveryReport::CharacteristicFound { characteristic, .. } => { /* ... */ }
//!         DiscoveryReport::Complete(_) | DiscoveryReport::Failed(..) => break,
//!     }
//! }
//! ```
//!
//! On the transport side, every discovery response is posted back as a [`GattEvent`]:
//!
//! ```rust,ignore
//! let event = GattEvent::services(conn, &page)?;
//! api::post_event(event).await;
//! ```

use crate::{
    DiscoveryOptions, DiscoveryReport, DiscoveryRequest, EVENT_CHANNEL, GattError, GattEvent,
    REPORT_CHANNEL, REQUEST_CHANNEL,
};
use bt_hci::param::ConnHandle;

/// Start GATT discovery on a connection.
///
/// Results, including a failure to start, arrive through [`next_report`]. A start on
/// a connection that is already being discovered is ignored.
pub async fn start_discovery(conn: ConnHandle, options: DiscoveryOptions) {
    REQUEST_CHANNEL
        .sender()
        .send(DiscoveryRequest::Start { conn, options })
        .await;
}

/// Terminate GATT discovery on a connection.
///
/// No report is produced for a terminated session.
pub async fn terminate_discovery(conn: ConnHandle) {
    REQUEST_CHANNEL
        .sender()
        .send(DiscoveryRequest::Terminate(conn))
        .await;
}

/// Wait for the next discovery report of any connection.
pub async fn next_report() -> DiscoveryReport {
    REPORT_CHANNEL.receiver().receive().await
}

/// Deliver a transport event to the processor.
pub async fn post_event(event: GattEvent) {
    EVENT_CHANNEL.sender().send(event).await;
}

/// Deliver a transport event without waiting, for use from transport callbacks.
///
/// # Errors
///
/// Returns `GattError::ChannelFull` if the event channel is full; the event is
/// dropped.
pub fn try_post_event(event: GattEvent) -> Result<(), GattError> {
    EVENT_CHANNEL.sender().try_send(event).map_err(|_| {
        warn!("[API] Event channel full, transport event dropped");
        GattError::ChannelFull
    })
}
