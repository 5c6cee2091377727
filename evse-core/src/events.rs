//! Event bus: single-publisher, many-subscriber fan-out per topic.
//! A subscriber that falls behind has its oldest events dropped rather than
//! back-pressuring the publishing session; callers are expected to log the
//! drop via [`recv_or_warn`].

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

use crate::ocpp::session::{ConnectorState, SessionState};

/// Default bound on each subscriber's private buffer.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SessionStateChanged {
    pub session_id: String,
    pub state: SessionState,
    pub connector_id: Option<i32>,
    pub connector_state: Option<ConnectorState>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub session_id: String,
    pub bytes: Vec<u8>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProfileExpired {
    pub session_id: String,
    pub connector_id: i32,
    pub profile_id: i64,
}

#[derive(Debug, Clone)]
pub struct MetricsTick {
    pub active_sessions: u64,
    pub at: DateTime<Utc>,
}

/// One broadcast channel per named topic. Cloning an `EventBus`
/// shares the underlying channels, so every session/pool task publishes to
/// the same fan-out.
#[derive(Clone)]
pub struct EventBus {
    session_event: broadcast::Sender<SessionStateChanged>,
    frame_in: broadcast::Sender<FrameEvent>,
    frame_out: broadcast::Sender<FrameEvent>,
    profile_expired: broadcast::Sender<ProfileExpired>,
    metrics_tick: broadcast::Sender<MetricsTick>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            session_event: broadcast::channel(capacity).0,
            frame_in: broadcast::channel(capacity).0,
            frame_out: broadcast::channel(capacity).0,
            profile_expired: broadcast::channel(capacity).0,
            metrics_tick: broadcast::channel(capacity).0,
        }
    }

    pub fn publish_session_event(&self, event: SessionStateChanged) {
        let _ = self.session_event.send(event);
    }

    pub fn publish_frame_in(&self, event: FrameEvent) {
        let _ = self.frame_in.send(event);
    }

    pub fn publish_frame_out(&self, event: FrameEvent) {
        let _ = self.frame_out.send(event);
    }

    pub fn publish_profile_expired(&self, event: ProfileExpired) {
        let _ = self.profile_expired.send(event);
    }

    pub fn publish_metrics_tick(&self, event: MetricsTick) {
        let _ = self.metrics_tick.send(event);
    }

    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionStateChanged> {
        self.session_event.subscribe()
    }

    pub fn subscribe_frame_in(&self) -> broadcast::Receiver<FrameEvent> {
        self.frame_in.subscribe()
    }

    pub fn subscribe_frame_out(&self) -> broadcast::Receiver<FrameEvent> {
        self.frame_out.subscribe()
    }

    pub fn subscribe_profile_expired(&self) -> broadcast::Receiver<ProfileExpired> {
        self.profile_expired.subscribe()
    }

    pub fn subscribe_metrics_tick(&self) -> broadcast::Receiver<MetricsTick> {
        self.metrics_tick.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// Receive the next event, logging and continuing past `Lagged` errors
/// rather than treating them as fatal. Returns `None` once the publisher
/// side is gone.
pub async fn recv_or_warn<T: Clone>(rx: &mut broadcast::Receiver<T>, topic: &str) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(topic, skipped, "subscriber fell behind, dropping events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_subscriber_observes_lag_not_blocking_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_frame_in();

        for i in 0..5 {
            bus.publish_frame_in(FrameEvent { session_id: "s1".into(), bytes: vec![i], at: Utc::now() });
        }

        // buffer capacity 2 with 5 sent: first recv should report a lag,
        // not block or panic.
        let event = recv_or_warn(&mut rx, "frameIn").await;
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish_metrics_tick(MetricsTick { active_sessions: 0, at: Utc::now() });
    }
}
