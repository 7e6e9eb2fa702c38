//! Aggregating stats factory.
//!
//! [`RelayStats`] keeps one [`EndpointStats`] per `caller → service::method`
//! and hands out a [`RelayCallStats`] per call. Handles fold their final
//! outcome and latency into the endpoint exactly once, on the first `end`.
//!
//! Endpoint names and failure reasons come off the wire, so both maps are
//! bounded: past the limit, new endpoints fold into the [`OVERFLOW_NAME`]
//! endpoint and new reasons into [`OVERFLOW_REASON`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use callrelay_metrics::{Counter, LatencySnapshot, LatencySummary};
use serde::Serialize;

use crate::error::LifecycleError;
use crate::frame::{display_name, CallFrame, CallKey};
use crate::stats::record::{CallOutcome, CallRecord};
use crate::stats::{CallStats, Stats};

/// Default maximum number of distinct endpoints tracked (DoS protection).
pub const DEFAULT_MAX_ENDPOINTS: usize = 10_000;

/// Default maximum number of distinct failure reasons per endpoint.
pub const DEFAULT_MAX_FAILURE_REASONS: usize = 64;

/// Caller, service and method name of the endpoint collecting overflow.
pub const OVERFLOW_NAME: &[u8] = b"*";

/// Failure reason collecting reasons past the per-endpoint limit.
pub const OVERFLOW_REASON: &str = "other";

/// Aggregated stats of one endpoint (caller, service, method).
#[derive(Debug)]
pub struct EndpointStats {
    started: Counter,
    succeeded: Counter,
    unreported: Counter,
    /// Ended without `end` being called (handle dropped).
    abandoned: Counter,
    /// Late marks and repeated ends that were ignored.
    misuse: Counter,
    failed: Mutex<BTreeMap<String, u64>>,
    latency: LatencySummary,
    max_failure_reasons: usize,
}

impl EndpointStats {
    fn new(max_failure_reasons: usize) -> Self {
        Self {
            started: Counter::new(),
            succeeded: Counter::new(),
            unreported: Counter::new(),
            abandoned: Counter::new(),
            misuse: Counter::new(),
            failed: Mutex::new(BTreeMap::new()),
            latency: LatencySummary::new(),
            max_failure_reasons,
        }
    }

    fn finalize(&self, outcome: &CallOutcome, elapsed: Duration) {
        match outcome {
            CallOutcome::Unreported => self.unreported.inc(),
            CallOutcome::Succeeded => self.succeeded.inc(),
            CallOutcome::Failed(reason) => {
                let mut failed = self.failed.lock().unwrap_or_else(PoisonError::into_inner);
                let reason = if failed.contains_key(reason.as_str())
                    || failed.len() < self.max_failure_reasons
                {
                    reason.clone()
                } else {
                    OVERFLOW_REASON.to_string()
                };
                *failed.entry(reason).or_default() += 1;
            }
        }
        self.latency.record(elapsed);
    }

    fn snapshot(&self, key: &CallKey) -> EndpointSnapshot {
        let failed = self
            .failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        EndpointSnapshot {
            caller: display_name(&key.caller).into_owned(),
            service: display_name(&key.service).into_owned(),
            method: display_name(&key.method).into_owned(),
            started: self.started.get(),
            ended: self.latency.count(),
            succeeded: self.succeeded.get(),
            unreported: self.unreported.get(),
            abandoned: self.abandoned.get(),
            misuse: self.misuse.get(),
            failed,
            latency: self.latency.snapshot(),
        }
    }
}

/// Point-in-time copy of an endpoint's stats, ready for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    pub caller: String,
    pub service: String,
    pub method: String,
    pub started: u64,
    pub ended: u64,
    pub succeeded: u64,
    pub unreported: u64,
    pub abandoned: u64,
    pub misuse: u64,
    /// Failure reason → count.
    pub failed: BTreeMap<String, u64>,
    pub latency: LatencySnapshot,
}

impl EndpointSnapshot {
    pub fn failed_total(&self) -> u64 {
        self.failed.values().sum()
    }

    /// Calls begun but not ended yet.
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.ended)
    }
}

// ── Factory ───────────────────────────────────────────────────────────

/// Stats factory aggregating per endpoint. Cheap to clone; clones share
/// the same aggregates.
#[derive(Debug, Clone)]
pub struct RelayStats {
    endpoints: Arc<Mutex<HashMap<CallKey, Arc<EndpointStats>>>>,
    max_endpoints: usize,
    max_failure_reasons: usize,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ENDPOINTS, DEFAULT_MAX_FAILURE_REASONS)
    }

    /// Factory tracking at most `max_endpoints` endpoints and
    /// `max_failure_reasons` reasons per endpoint, plus one overflow slot each.
    pub fn with_limits(max_endpoints: usize, max_failure_reasons: usize) -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            max_endpoints,
            max_failure_reasons,
        }
    }

    /// Key aggregating calls to endpoints beyond the limit.
    pub fn overflow_key() -> CallKey {
        CallKey {
            caller: OVERFLOW_NAME.to_vec(),
            service: OVERFLOW_NAME.to_vec(),
            method: OVERFLOW_NAME.to_vec(),
        }
    }

    /// Start tracking a call, returning the concrete handle.
    pub fn begin_call(&self, call: &dyn CallFrame) -> RelayCallStats {
        let key = CallKey::from_frame(call);
        let endpoint = {
            let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = if endpoints.contains_key(&key) || endpoints.len() < self.max_endpoints {
                key.clone()
            } else {
                tracing::debug!("stats: endpoint limit reached, folding {key}");
                Self::overflow_key()
            };
            let max_failure_reasons = self.max_failure_reasons;
            Arc::clone(
                endpoints
                    .entry(slot)
                    .or_insert_with(|| Arc::new(EndpointStats::new(max_failure_reasons))),
            )
        };
        endpoint.started.inc();
        tracing::debug!("stats: begin {key}");
        RelayCallStats {
            key,
            record: CallRecord::new(),
            endpoint,
        }
    }

    /// Snapshot of one endpoint, if any call to it was ever begun.
    pub fn endpoint(&self, call: &dyn CallFrame) -> Option<EndpointSnapshot> {
        let key = CallKey::from_frame(call);
        let endpoint = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()?;
        Some(endpoint.snapshot(&key))
    }

    /// Snapshots of all endpoints, ordered by key.
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let mut endpoints: Vec<(CallKey, Arc<EndpointStats>)> = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        endpoints.sort_by(|a, b| a.0.cmp(&b.0));
        endpoints
            .iter()
            .map(|(key, endpoint)| endpoint.snapshot(key))
            .collect()
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats for RelayStats {
    fn begin(&self, call: &dyn CallFrame) -> Box<dyn CallStats> {
        Box::new(self.begin_call(call))
    }
}

// ── Handle ────────────────────────────────────────────────────────────

/// Stats handle for one call.
///
/// Late marks and repeated ends are ignored with a warning and counted as
/// misuse. Dropping an open handle ends it (counted as abandoned).
#[derive(Debug)]
pub struct RelayCallStats {
    key: CallKey,
    record: CallRecord,
    endpoint: Arc<EndpointStats>,
}

impl RelayCallStats {
    pub fn key(&self) -> &CallKey {
        &self.key
    }

    pub fn outcome(&self) -> &CallOutcome {
        self.record.outcome()
    }

    pub fn is_ended(&self) -> bool {
        self.record.is_ended()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.record.elapsed()
    }

    fn misuse(&self, err: LifecycleError) {
        tracing::warn!("stats: {err} ({})", self.key);
        self.endpoint.misuse.inc();
    }
}

impl CallStats for RelayCallStats {
    fn succeeded(&mut self) {
        if let Err(e) = self.record.mark_succeeded() {
            self.misuse(e);
        }
    }

    fn failed(&mut self, reason: &str) {
        if let Err(e) = self.record.mark_failed(reason) {
            self.misuse(e);
        }
    }

    fn end(&mut self) {
        match self.record.end() {
            Ok(elapsed) => {
                self.endpoint.finalize(self.record.outcome(), elapsed);
                tracing::debug!(
                    "stats: end {} outcome={:?} elapsed={elapsed:?}",
                    self.key,
                    self.record.outcome()
                );
            }
            Err(e) => self.misuse(e),
        }
    }
}

impl Drop for RelayCallStats {
    fn drop(&mut self) {
        if !self.record.is_ended() {
            tracing::warn!("stats: handle dropped before end ({})", self.key);
            self.endpoint.abandoned.inc();
            self.end();
        }
    }
}
