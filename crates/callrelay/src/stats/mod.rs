//! Per-call statistics for relayed RPCs.
//!
//! Call-res frames don't always carry the OK bit when they arrive, so the
//! relay marks a call succeeded or failed as it sees the relevant frame
//! (possibly several times across retries) and only ends the timer on the
//! last frame of the response.

pub mod record;
pub mod registry;

pub use record::{CallOutcome, CallRecord};
pub use registry::{
    EndpointSnapshot, EndpointStats, RelayCallStats, RelayStats, DEFAULT_MAX_ENDPOINTS,
    DEFAULT_MAX_FAILURE_REASONS, OVERFLOW_NAME, OVERFLOW_REASON,
};

use crate::frame::CallFrame;

/// Reporter for one relayed call.
///
/// Owned by the task relaying the call; never shared between calls.
pub trait CallStats: Send {
    /// The call succeeded (possibly after retrying).
    fn succeeded(&mut self);

    /// The call failed with `reason`.
    fn failed(&mut self, reason: &str);

    /// End stats collection for this call. Called exactly once; later
    /// calls, and marks after it, are ignored.
    fn end(&mut self);
}

/// [`CallStats`] factory, shared by every in-flight call.
pub trait Stats: Send + Sync {
    /// Start tracking a call. Must not block.
    fn begin(&self, call: &dyn CallFrame) -> Box<dyn CallStats>;
}

/// Factory for relays without a metrics backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallStats;

impl CallStats for NoopCallStats {
    fn succeeded(&mut self) {}
    fn failed(&mut self, _reason: &str) {}
    fn end(&mut self) {}
}

impl Stats for NoopStats {
    fn begin(&self, _call: &dyn CallFrame) -> Box<dyn CallStats> {
        Box::new(NoopCallStats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CallIdentity;

    #[test]
    fn noop_handles_accept_any_sequence() {
        let stats = NoopStats;
        let mut handle = stats.begin(&CallIdentity::new(b"a", b"b", b"m"));
        handle.failed("timeout");
        handle.succeeded();
        handle.end();
        handle.end();
    }
}
