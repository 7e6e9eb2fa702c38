//! Call-tracking core of an RPC relay.
//!
//! A relay forwards request/response frames between a calling service and
//! a destination service without buffering whole RPCs. This crate covers
//! the per-call decisions around that forwarding:
//!
//! - [`CallFrame`]: who is calling what, read straight out of the leading frame.
//! - [`Hosts`]: which peer gets the call ([`HostTable`] bundled).
//! - [`Stats`] / [`CallStats`]: per-call outcome and latency, marked as frames
//!   arrive and ended exactly once ([`RelayStats`] bundled).
//! - [`Relay`] / [`RelayedCall`]: the begin → classify → retry → end sequence.
//!
//! Frame codecs, network I/O and the metrics backend live elsewhere.

pub mod call;
pub mod config;
pub mod error;
pub mod frame;
pub mod hosts;
pub mod stats;

pub use call::{Disposition, ErrorCode, Relay, RelayedCall, ResponseFrame};
pub use config::RelayConfig;
pub use error::{LifecycleError, RelayError};
pub use frame::{display_name, CallFrame, CallIdentity, CallKey};
pub use hosts::{HostSelection, HostTable, Hosts, PeerAddr, PeerInfo, PeerStatus, SelectionReason};
pub use stats::{
    CallOutcome, CallRecord, CallStats, EndpointSnapshot, EndpointStats, NoopStats,
    RelayCallStats, RelayStats, Stats, DEFAULT_MAX_ENDPOINTS, DEFAULT_MAX_FAILURE_REASONS,
    OVERFLOW_NAME, OVERFLOW_REASON,
};
