//! Pending-call registry: tracks outbound CALLs awaiting a
//! CALLRESULT/CALLERROR, with a bounded size and deadline-based timeout.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::PendingError;

use super::messages::{Action, CallError};

/// Outcome delivered to the waiter of a `SendCall`.
#[derive(Debug)]
pub enum CallOutcome {
    Result(serde_json::Value),
    Error(CallError),
}

pub type Waiter = oneshot::Sender<Result<CallOutcome, PendingError>>;

struct Entry {
    action: Action,
    deadline: DateTime<Utc>,
    waiter: Waiter,
}

/// Per-session map of outbound CALL id → waiter.
pub struct PendingRegistry {
    entries: HashMap<String, Entry>,
    ceiling: usize,
}

impl PendingRegistry {
    pub fn new(ceiling: usize) -> Self {
        Self { entries: HashMap::new(), ceiling }
    }

    /// Register a newly-sent CALL. Must happen-before the frame is written
    /// to the socket so a fast CALLRESULT can never race ahead of
    /// registration.
    pub fn register(
        &mut self,
        message_id: String,
        action: Action,
        now: DateTime<Utc>,
        timeout: Duration,
        waiter: Waiter,
    ) -> Result<(), PendingError> {
        if self.entries.contains_key(&message_id) {
            return Err(PendingError::DuplicateMessageId(message_id));
        }
        if self.entries.len() >= self.ceiling {
            return Err(PendingError::TooManyPending { ceiling: self.ceiling });
        }
        let deadline = now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(30));
        self.entries.insert(message_id, Entry { action, deadline, waiter });
        Ok(())
    }

    /// Deliver a CALLRESULT/CALLERROR to the matching waiter, if any.
    pub fn complete(&mut self, message_id: &str, outcome: CallOutcome) -> bool {
        if let Some(entry) = self.entries.remove(message_id) {
            let _ = entry.waiter.send(Ok(outcome));
            true
        } else {
            false
        }
    }

    /// Fail and remove every entry whose deadline has passed, returning how
    /// many were swept.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = self.entries.remove(id) {
                let _ = entry.waiter.send(Err(PendingError::CallTimeout {
                    message_id: id.clone(),
                    action: entry.action.to_string(),
                }));
            }
        }
        expired.len()
    }

    /// Fail every still-pending CALL with `Cancelled` (session close).
    pub fn cancel_all(&mut self) {
        for (id, entry) in self.entries.drain() {
            let _ = entry.waiter.send(Err(PendingError::Cancelled { message_id: id }));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn rejects_duplicate_message_id() {
        let mut reg = PendingRegistry::new(10);
        let (tx, _rx) = oneshot::channel();
        reg.register("m1".into(), Action::Heartbeat, now(), Duration::from_secs(5), tx)
            .unwrap();

        let (tx2, _rx2) = oneshot::channel();
        let err = reg
            .register("m1".into(), Action::Heartbeat, now(), Duration::from_secs(5), tx2)
            .unwrap_err();
        assert!(matches!(err, PendingError::DuplicateMessageId(_)));
    }

    #[test]
    fn rejects_beyond_ceiling() {
        let mut reg = PendingRegistry::new(1);
        let (tx, _rx) = oneshot::channel();
        reg.register("m1".into(), Action::Heartbeat, now(), Duration::from_secs(5), tx)
            .unwrap();

        let (tx2, _rx2) = oneshot::channel();
        let err = reg
            .register("m2".into(), Action::Heartbeat, now(), Duration::from_secs(5), tx2)
            .unwrap_err();
        assert!(matches!(err, PendingError::TooManyPending { ceiling: 1 }));
    }

    #[tokio::test]
    async fn sweep_delivers_timeout_past_deadline() {
        let mut reg = PendingRegistry::new(10);
        let (tx, rx) = oneshot::channel();
        reg.register("m1".into(), Action::Heartbeat, now(), Duration::from_secs(5), tx)
            .unwrap();

        let swept = reg.sweep_timeouts(now() + chrono::Duration::seconds(6));
        assert_eq!(swept, 1);
        assert!(matches!(rx.await.unwrap(), Err(PendingError::CallTimeout { .. })));
    }

    #[tokio::test]
    async fn cancel_all_fails_every_waiter() {
        let mut reg = PendingRegistry::new(10);
        let (tx, rx) = oneshot::channel();
        reg.register("m1".into(), Action::Heartbeat, now(), Duration::from_secs(5), tx)
            .unwrap();

        reg.cancel_all();
        assert!(reg.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(PendingError::Cancelled { .. })));
    }
}
