//! External control API: the thin surface a harness or CLI drives the
//! simulator through. Everything here forwards to a [`Pool`] and its
//! session handles — this module adds no state of its own beyond the pool.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::clock::SharedClock;
use crate::config::{PoolConfig, SessionConfig};
use crate::error::{CoreError, PoolError};
use crate::events::{EventBus, FrameEvent, MetricsTick, ProfileExpired, SessionStateChanged};
use crate::ocpp::client::SessionHandle;
use crate::ocpp::messages::Action;
use crate::ocpp::pending::CallOutcome;
use crate::ocpp::session::SessionSnapshot;
use crate::ocpp::types::{ChargingProfile, ChargingProfileStatus, ChargingRateUnit, ChargingSchedule, ClearChargingProfileRequest, ClearChargingProfileStatus};
use crate::pool::{MetricsSummary, Pool};

/// Every broadcast subscription `Subscribe` can hand back.
pub struct Subscription {
    pub session_events: broadcast::Receiver<SessionStateChanged>,
    pub frames_in: broadcast::Receiver<FrameEvent>,
    pub frames_out: broadcast::Receiver<FrameEvent>,
    pub profile_expired: broadcast::Receiver<ProfileExpired>,
    pub metrics_tick: broadcast::Receiver<MetricsTick>,
}

/// The external control surface over one pool of simulated charge points.
pub struct Core {
    clock: SharedClock,
    bus: EventBus,
    pool: Pool,
}

impl Core {
    pub fn new(clock: SharedClock, bus: EventBus, target_count: u32) -> Self {
        let pool = Pool::new(clock.clone(), bus.clone(), target_count);
        Self { clock, bus, pool }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Spawns one session without opening its socket.
    /// Callers that want it dialled immediately should call `open_session`
    /// right after, or use `start_batch` for a ramped cohort.
    pub async fn create_session(&mut self, config: SessionConfig) -> Result<SessionHandle, CoreError> {
        self.pool.create_session(config).await.map_err(CoreError::from)
    }

    pub async fn open_session(&self, handle: &SessionHandle) -> Result<(), CoreError> {
        handle.open().await.map_err(CoreError::from)
    }

    pub async fn close_session(&mut self, session_id: &str) -> Result<(), CoreError> {
        self.pool.stop(session_id).await.map_err(CoreError::from)
    }

    pub async fn send_call(&self, session_id: &str, action: Action, payload: serde_json::Value) -> Result<CallOutcome, CoreError> {
        let handle = self.pool.session(session_id).ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;
        handle.send_call(action, payload, Duration::from_secs(30)).await.map_err(CoreError::from)
    }

    pub async fn set_profile(&self, session_id: &str, connector_id: i32, profile: ChargingProfile) -> Result<ChargingProfileStatus, CoreError> {
        let handle = self.pool.session(session_id).ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;
        handle.set_profile(connector_id, profile).await.map_err(CoreError::from)
    }

    pub async fn clear_profile(&self, session_id: &str, criteria: ClearChargingProfileRequest) -> Result<(ClearChargingProfileStatus, Vec<(i32, i64)>), CoreError> {
        let handle = self.pool.session(session_id).ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;
        handle.clear_profile(criteria).await.map_err(CoreError::from)
    }

    pub async fn get_composite_schedule(&self, session_id: &str, connector_id: i32, duration: Duration, unit: ChargingRateUnit) -> Result<Option<ChargingSchedule>, CoreError> {
        let handle = self.pool.session(session_id).ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;
        handle.get_composite_schedule(connector_id, duration, unit).await.map_err(CoreError::from)
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, CoreError> {
        let handle = self.pool.session(session_id).ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;
        handle.snapshot().await.map_err(CoreError::from)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            session_events: self.bus.subscribe_session_events(),
            frames_in: self.bus.subscribe_frame_in(),
            frames_out: self.bus.subscribe_frame_out(),
            profile_expired: self.bus.subscribe_profile_expired(),
            metrics_tick: self.bus.subscribe_metrics_tick(),
        }
    }

    pub async fn start_batch(&mut self, config: PoolConfig) -> Result<(), CoreError> {
        self.pool.start_batch(config).await.map_err(CoreError::from)
    }

    pub async fn stop_all(&mut self) {
        self.pool.stop_all().await;
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.pool.metrics_summary()
    }

    pub fn session_count(&self) -> usize {
        self.pool.session_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    #[tokio::test]
    async fn unknown_session_reports_not_found() {
        let core = Core::new(system_clock(), EventBus::default(), 0);
        let err = core.send_call("ghost", Action::Heartbeat, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CoreError::Pool(PoolError::UnknownSession(_))));
    }

    #[test]
    fn subscribe_returns_live_receivers() {
        let core = Core::new(system_clock(), EventBus::default(), 0);
        let mut sub = core.subscribe();
        core.bus.publish_metrics_tick(MetricsTick { active_sessions: 0, at: chrono::Utc::now() });
        assert!(sub.metrics_tick.try_recv().is_ok());
    }
}
