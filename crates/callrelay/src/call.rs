/// Call lifecycle glue: begin, classify, retry, end.
///
/// The relay loop owns one [`RelayedCall`] per in-flight call. It feeds
/// every outcome-relevant response frame to [`RelayedCall::observe`], which
/// marks the stats handle and ends it on the last frame of the exchange.
/// Whatever path closes the call (last fragment, terminal error, abort,
/// drop), the stats handle is ended exactly once.
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::frame::{display_name, CallFrame, CallKey};
use crate::hosts::{Hosts, PeerAddr};
use crate::stats::{CallStats, Stats};

/// Failure reason when no peer can take the call.
pub const NO_PEER_REASON: &str = "relay-no-peer";

/// Failure reason for a call-res frame without the OK bit.
pub const APPLICATION_ERROR_REASON: &str = "application-error";

/// Failure reason for a call dropped while still open.
pub const ABANDONED_REASON: &str = "abandoned";

// ── Frames ────────────────────────────────────────────────────────────

/// Error-frame codes of the protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Timeout,
    Cancelled,
    Busy,
    Declined,
    UnexpectedError,
    BadRequest,
    NetworkError,
    ProtocolError,
}

impl ErrorCode {
    /// Map a decoded error-frame code byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ErrorCode::Timeout),
            0x02 => Some(ErrorCode::Cancelled),
            0x03 => Some(ErrorCode::Busy),
            0x04 => Some(ErrorCode::Declined),
            0x05 => Some(ErrorCode::UnexpectedError),
            0x06 => Some(ErrorCode::BadRequest),
            0x07 => Some(ErrorCode::NetworkError),
            0xFF => Some(ErrorCode::ProtocolError),
            _ => None,
        }
    }

    /// Failure reason recorded in call stats.
    pub fn metrics_key(self) -> &'static str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Busy => "busy",
            ErrorCode::Declined => "declined",
            ErrorCode::UnexpectedError => "unexpected-error",
            ErrorCode::BadRequest => "bad-request",
            ErrorCode::NetworkError => "network-error",
            ErrorCode::ProtocolError => "protocol-error",
        }
    }

    /// Whether another peer may still succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::Busy | ErrorCode::Declined | ErrorCode::NetworkError
        )
    }
}

/// Outcome-relevant content of a response-direction frame, already decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFrame {
    /// First frame of a response.
    CallRes { ok: bool, more_fragments: bool },
    /// Continuation of a response.
    CallResContinue { more_fragments: bool },
    /// Error frame in place of a response.
    Error { code: ErrorCode },
}

/// What the relay loop should do after a frame was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Forward the frame; more are expected.
    Forward,
    /// The attempt failed but the call may be retried on another peer.
    RetryAvailable,
    /// The call is complete; its stats have ended.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingResponse,
    Streaming,
    AwaitingRetry,
    Completed,
}

// ── Relay ─────────────────────────────────────────────────────────────

/// Call setup for a relay: peer selection plus stats.
///
/// Shared by all call tasks; the selector and factory synchronize
/// internally.
pub struct Relay<H: ?Sized, S: ?Sized> {
    hosts: Arc<H>,
    stats: Arc<S>,
    config: RelayConfig,
}

impl<H, S> Relay<H, S>
where
    H: Hosts + ?Sized,
    S: Stats + ?Sized,
{
    pub fn new(hosts: Arc<H>, stats: Arc<S>, config: RelayConfig) -> Self {
        Self {
            hosts,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn hosts(&self) -> &Arc<H> {
        &self.hosts
    }

    pub fn stats(&self) -> &Arc<S> {
        &self.stats
    }

    /// Set up a call from its leading frame.
    ///
    /// Stats begin before peer selection so rejected calls are counted too.
    /// Without a peer the handle is failed, ended, and the call rejected.
    pub fn start_call(&self, frame: &dyn CallFrame) -> Result<RelayedCall, RelayError> {
        let mut stats = self.stats.begin(frame);

        let Some(peer) = self.hosts.get(frame) else {
            stats.failed(NO_PEER_REASON);
            stats.end();
            tracing::warn!(
                "relay[{}]: rejecting call, no peer for {}",
                self.config.name,
                display_name(frame.service())
            );
            return Err(RelayError::NoPeerAvailable {
                service: display_name(frame.service()).into_owned(),
            });
        };

        let call = RelayedCall {
            id: uuid::Uuid::new_v4().to_string(),
            relay: self.config.name.clone(),
            key: CallKey::from_frame(frame),
            peer,
            tried: Vec::new(),
            attempts: 1,
            max_attempts: self.config.max_attempts,
            phase: Phase::AwaitingResponse,
            stats,
        };
        tracing::debug!(
            "relay[{}]: call {} {} -> {}",
            call.relay,
            call.id,
            call.key,
            call.peer
        );
        Ok(call)
    }
}

// ── Per-call state ────────────────────────────────────────────────────

/// One relayed call, owned by the task relaying it.
pub struct RelayedCall {
    id: String,
    relay: String,
    key: CallKey,
    peer: PeerAddr,
    /// Peers of earlier attempts, oldest first.
    tried: Vec<PeerAddr>,
    attempts: u32,
    max_attempts: u32,
    phase: Phase,
    stats: Box<dyn CallStats>,
}

impl RelayedCall {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &CallKey {
        &self.key
    }

    /// Peer of the current attempt.
    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    pub fn tried_peers(&self) -> &[PeerAddr] {
        &self.tried
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Classify a response frame and update the call's stats.
    pub fn observe(&mut self, frame: &ResponseFrame) -> Result<Disposition, RelayError> {
        match (self.phase, *frame) {
            (Phase::Completed, _) => Err(RelayError::CallCompleted {
                call_id: self.id.clone(),
            }),
            (Phase::AwaitingRetry, _) => Err(unexpected("attempt failed, retry or finish first")),

            (Phase::AwaitingResponse, ResponseFrame::CallRes { ok, more_fragments }) => {
                if ok {
                    self.stats.succeeded();
                } else {
                    self.stats.failed(APPLICATION_ERROR_REASON);
                }
                Ok(self.after_fragment(more_fragments))
            }
            (Phase::Streaming, ResponseFrame::CallRes { .. }) => {
                Err(unexpected("duplicate call res"))
            }

            (Phase::AwaitingResponse, ResponseFrame::CallResContinue { .. }) => {
                Err(unexpected("continuation before call res"))
            }
            (Phase::Streaming, ResponseFrame::CallResContinue { more_fragments }) => {
                Ok(self.after_fragment(more_fragments))
            }

            (phase, ResponseFrame::Error { code }) => {
                self.stats.failed(code.metrics_key());
                // Once response bytes went to the caller the call can't be replayed.
                let retryable = phase == Phase::AwaitingResponse
                    && code.is_retryable()
                    && self.attempts < self.max_attempts;
                if retryable {
                    tracing::debug!(
                        "relay[{}]: call {} attempt {} on {} failed ({}), retry available",
                        self.relay,
                        self.id,
                        self.attempts,
                        self.peer,
                        code.metrics_key()
                    );
                    self.phase = Phase::AwaitingRetry;
                    Ok(Disposition::RetryAvailable)
                } else {
                    self.complete();
                    Ok(Disposition::Complete)
                }
            }
        }
    }

    /// Start another attempt on `peer`.
    ///
    /// The peer is chosen by the caller; the relay never re-selects
    /// mid-call. The outcome keeps its last mark until the new attempt
    /// reports.
    pub fn retry(&mut self, peer: PeerAddr) -> Result<(), RelayError> {
        match self.phase {
            Phase::Completed => {
                return Err(RelayError::CallCompleted {
                    call_id: self.id.clone(),
                })
            }
            Phase::Streaming => {
                return Err(RelayError::RetryRejected {
                    reason: "response already streaming".to_string(),
                })
            }
            Phase::AwaitingResponse | Phase::AwaitingRetry => {}
        }
        if self.attempts >= self.max_attempts {
            return Err(RelayError::RetriesExhausted {
                attempts: self.attempts,
            });
        }

        let previous = std::mem::replace(&mut self.peer, peer);
        self.tried.push(previous);
        self.attempts += 1;
        self.phase = Phase::AwaitingResponse;
        tracing::debug!(
            "relay[{}]: call {} attempt {} -> {}",
            self.relay,
            self.id,
            self.attempts,
            self.peer
        );
        Ok(())
    }

    /// Abort the call: mark it failed with `reason` and end its stats.
    ///
    /// Returns `false` if the call had already completed.
    pub fn abort(&mut self, reason: &str) -> bool {
        if self.is_complete() {
            return false;
        }
        self.stats.failed(reason);
        self.complete();
        true
    }

    /// End the call with its current outcome (e.g. the caller gave up
    /// retrying). Returns `false` if it had already completed.
    pub fn finish(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.complete();
        true
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn after_fragment(&mut self, more_fragments: bool) -> Disposition {
        if more_fragments {
            self.phase = Phase::Streaming;
            Disposition::Forward
        } else {
            self.complete();
            Disposition::Complete
        }
    }

    fn complete(&mut self) {
        self.stats.end();
        self.phase = Phase::Completed;
        tracing::debug!(
            "relay[{}]: call {} complete after {} attempt(s)",
            self.relay,
            self.id,
            self.attempts
        );
    }
}

impl Drop for RelayedCall {
    fn drop(&mut self) {
        if !self.is_complete() {
            tracing::warn!("relay[{}]: call {} dropped while open", self.relay, self.id);
            self.abort(ABANDONED_REASON);
        }
    }
}

impl std::fmt::Debug for RelayedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayedCall")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("peer", &self.peer)
            .field("attempts", &self.attempts)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

fn unexpected(reason: &str) -> RelayError {
    RelayError::UnexpectedFrame {
        reason: reason.to_string(),
    }
}

// ── Recording stats (tests) ──────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Begin(String),
        Succeeded,
        Failed(String),
        End,
    }

    /// Stats factory that records every call it receives, in order.
    #[derive(Clone, Default)]
    pub struct RecordingStats {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl RecordingStats {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn ends(&self) -> usize {
            self.events().iter().filter(|e| **e == Event::End).count()
        }
    }

    struct RecordingCallStats {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl CallStats for RecordingCallStats {
        fn succeeded(&mut self) {
            self.events.lock().unwrap().push(Event::Succeeded);
        }
        fn failed(&mut self, reason: &str) {
            self.events.lock().unwrap().push(Event::Failed(reason.to_string()));
        }
        fn end(&mut self) {
            self.events.lock().unwrap().push(Event::End);
        }
    }

    impl Stats for RecordingStats {
        fn begin(&self, call: &dyn CallFrame) -> Box<dyn CallStats> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Begin(CallKey::from_frame(call).to_string()));
            Box::new(RecordingCallStats {
                events: Arc::clone(&self.events),
            })
        }
    }
}
