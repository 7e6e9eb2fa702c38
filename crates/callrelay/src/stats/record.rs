/// Per-call outcome state machine.
///
/// Outcome: Unreported → Succeeded ⇄ Failed(reason), last mark wins.
/// Finalization: open → ended, exactly once, from any outcome.
///
/// Pure logic, no I/O. Misuse after the end is reported as a
/// [`LifecycleError`] and leaves the record untouched.
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Classified outcome of a relayed call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum CallOutcome {
    /// No response frame classified the call yet.
    Unreported,
    Succeeded,
    Failed(String),
}

impl CallOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, CallOutcome::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CallOutcome::Failed(_))
    }

    /// Failure reason, if failed.
    pub fn reason(&self) -> Option<&str> {
        match self {
            CallOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Outcome and timing of one relayed call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    outcome: CallOutcome,
    started: Instant,
    /// Set by the first `end`; frozen afterwards.
    elapsed: Option<Duration>,
    /// Number of mark calls accepted before the end.
    marks: u32,
}

impl CallRecord {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started: Instant) -> Self {
        Self {
            outcome: CallOutcome::Unreported,
            started,
            elapsed: None,
            marks: 0,
        }
    }

    pub fn mark_succeeded(&mut self) -> Result<(), LifecycleError> {
        self.mark(CallOutcome::Succeeded)
    }

    pub fn mark_failed(&mut self, reason: &str) -> Result<(), LifecycleError> {
        self.mark(CallOutcome::Failed(reason.to_string()))
    }

    /// Finalize at the current instant.
    pub fn end(&mut self) -> Result<Duration, LifecycleError> {
        self.end_at(Instant::now())
    }

    /// Finalize at `now`. Only the first end counts.
    pub fn end_at(&mut self, now: Instant) -> Result<Duration, LifecycleError> {
        if self.elapsed.is_some() {
            return Err(LifecycleError::AlreadyEnded);
        }
        let elapsed = now.saturating_duration_since(self.started);
        self.elapsed = Some(elapsed);
        Ok(elapsed)
    }

    pub fn outcome(&self) -> &CallOutcome {
        &self.outcome
    }

    pub fn is_ended(&self) -> bool {
        self.elapsed.is_some()
    }

    /// Call duration, known only once ended.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn marks(&self) -> u32 {
        self.marks
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn mark(&mut self, outcome: CallOutcome) -> Result<(), LifecycleError> {
        if self.is_ended() {
            return Err(LifecycleError::MarkAfterEnd);
        }
        self.outcome = outcome;
        self.marks = self.marks.saturating_add(1);
        Ok(())
    }
}

impl Default for CallRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_end_is_unreported() {
        let mut rec = CallRecord::new();
        rec.end().unwrap();
        assert!(rec.is_ended());
        assert_eq!(rec.outcome(), &CallOutcome::Unreported);
        assert_eq!(rec.marks(), 0);
    }

    #[test]
    fn failed_then_succeeded() {
        let mut rec = CallRecord::new();
        rec.mark_failed("timeout").unwrap();
        assert_eq!(rec.outcome().reason(), Some("timeout"));

        rec.mark_succeeded().unwrap();
        assert!(rec.outcome().is_succeeded());
        assert_eq!(rec.marks(), 2);
    }

    #[test]
    fn succeeded_then_failed() {
        let mut rec = CallRecord::new();
        rec.mark_succeeded().unwrap();
        rec.mark_failed("busy").unwrap();
        assert_eq!(rec.outcome(), &CallOutcome::Failed("busy".into()));
    }

    #[test]
    fn marking_does_not_end() {
        let mut rec = CallRecord::new();
        rec.mark_succeeded().unwrap();
        rec.mark_succeeded().unwrap();
        assert!(!rec.is_ended());
        assert!(rec.elapsed().is_none());
    }

    #[test]
    fn second_end_is_rejected_and_keeps_duration() {
        let start = Instant::now();
        let mut rec = CallRecord::started_at(start);

        let first = rec.end_at(start + Duration::from_millis(5)).unwrap();
        assert_eq!(first, Duration::from_millis(5));

        let second = rec.end_at(start + Duration::from_millis(50));
        assert_eq!(second, Err(LifecycleError::AlreadyEnded));
        assert_eq!(rec.elapsed(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn marks_after_end_are_rejected() {
        let mut rec = CallRecord::new();
        rec.mark_failed("timeout").unwrap();
        rec.end().unwrap();

        assert_eq!(rec.mark_succeeded(), Err(LifecycleError::MarkAfterEnd));
        assert_eq!(rec.mark_failed("late"), Err(LifecycleError::MarkAfterEnd));
        assert_eq!(rec.outcome().reason(), Some("timeout"));
        assert_eq!(rec.marks(), 1);
    }

    #[test]
    fn clock_going_backwards_saturates() {
        let start = Instant::now() + Duration::from_secs(1);
        let mut rec = CallRecord::started_at(start);
        assert_eq!(rec.end_at(Instant::now()).unwrap(), Duration::ZERO);
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_string(&CallOutcome::Failed("timeout".into())).unwrap();
        assert_eq!(json, r#"{"outcome":"failed","reason":"timeout"}"#);
        let json = serde_json::to_string(&CallOutcome::Unreported).unwrap();
        assert_eq!(json, r#"{"outcome":"unreported"}"#);
    }
}
