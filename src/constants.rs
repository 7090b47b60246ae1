//! `Gattwren` Constants
//!
//! This module contains the constants used throughout the `Gattwren` library.
//! They define buffer capacities, channel depths and the attribute handle bounds
//! used by the discovery procedures.

/// Maximum number of services buffered from one service discovery page
pub const MAX_SERVICES: usize = 4;

/// Maximum number of characteristics buffered from one characteristic discovery page
pub const MAX_CHARACTERISTICS_PER_SERVICE: usize = 4;

/// Maximum number of entries a transport may place in one response event
///
/// Exceeds the engine buffer capacities; pages larger than those buffers are
/// rejected by the engine with `CapacityExceeded`.
pub const MAX_RESPONSE_ENTRIES: usize = 8;

/// Start handle of the first primary service discovery request
pub const SERVICE_DISCOVERY_START_HANDLE: u16 = 0x0001;

/// Highest valid attribute handle
pub const MAX_HANDLE: u16 = 0xFFFF;

/// Maximum number of connections with a tracked discovery session (power of two)
pub const MAX_SESSIONS: usize = 4;

/// Depth of the application request channel
pub const REQUEST_CHANNEL_DEPTH: usize = 4;

/// Depth of the transport event channel
pub const EVENT_CHANNEL_DEPTH: usize = 8;

/// Depth of the discovery report channel
pub const REPORT_CHANNEL_DEPTH: usize = 16;

/// Depth of the report backlog held while the report channel is full
///
/// The last slot is kept for terminal reports.
pub const REPORT_BACKLOG_DEPTH: usize = 16;
