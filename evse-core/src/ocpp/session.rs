//! Session state: the pure state machine and profile partition owned by
//! one simulated charge point. `Session` itself does no I/O — the socket
//! and inbox loop live in [`super::client`]; this module is what that loop
//! mutates.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::{ConnectorConfig, SessionConfig};
use crate::profile::ProfileStore;

use super::messages::Action;
use super::pending::Waiter;
use super::types::{
    AuthorizationStatus, ChargingProfile, ChargingProfileStatus, ChargingRateUnit, ChargingSchedule,
    ClearChargingProfileRequest, ClearChargingProfileStatus, ConnectorStatus, EffectiveLimit, IdTagInfo, MessageTrigger,
};

/// One `TriggerMessage` request the CSMS asked for, queued by the action
/// handler and drained by the session loop once the CALLRESULT accepting it
/// has gone out.
#[derive(Debug, Clone, Copy)]
pub struct QueuedTrigger {
    pub message: MessageTrigger,
    pub connector_id: Option<i32>,
}

pub type ConnectorState = ConnectorStatus;

/// Overall session state. The connection sub-machine
/// (DISCONNECTED/CONNECTING/CONNECTED/BOOTING/BOOTED) and the
/// transaction-driven sub-machine (AVAILABLE.../FAULTED) share one value
/// here, matching the data model's single `state` field; `ConnectorInfo`
/// tracks the finer per-connector OCPP status alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Booting,
    Booted,
    Available,
    Preparing,
    Charging,
    SuspendedEv,
    SuspendedEvse,
    Finishing,
    Faulted,
}

#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub transaction_id: i32,
    pub connector_id: i32,
    pub id_tag: String,
    pub start_meter_wh: i64,
    pub current_meter_wh: i64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub connector_id: i32,
    pub status: ConnectorState,
    pub transaction: Option<TransactionInfo>,
    pub config: ConnectorConfig,
    pub last_effective_limit: Option<EffectiveLimit>,
}

impl ConnectorInfo {
    fn new(connector_id: i32, config: ConnectorConfig) -> Self {
        Self {
            connector_id,
            status: ConnectorState::Available,
            transaction: None,
            config,
            last_effective_limit: None,
        }
    }
}

/// Immutable point-in-time copy handed to observers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub charge_point_id: String,
    pub state: SessionState,
    pub connectors: Vec<ConnectorInfo>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub heartbeat_interval: Duration,
}

/// The session's pure, single-writer-owned state.
pub struct Session {
    pub session_id: String,
    pub config: SessionConfig,
    pub state: SessionState,
    pub connectors: HashMap<i32, ConnectorInfo>,
    pub profile_store: ProfileStore,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub log_ring: VecDeque<String>,
    pub trigger_queue: VecDeque<QueuedTrigger>,
    next_transaction_id: i32,
}

const LOG_RING_CAPACITY: usize = 1024;

impl Session {
    pub fn new(session_id: impl Into<String>, config: SessionConfig) -> Self {
        let mut connectors = HashMap::new();
        for id in 1..=config.connector_count as i32 {
            connectors.insert(id, ConnectorInfo::new(id, config.connector));
        }

        Self {
            session_id: session_id.into(),
            config,
            state: SessionState::Disconnected,
            connectors,
            profile_store: ProfileStore::new(),
            last_connected_at: None,
            log_ring: VecDeque::with_capacity(LOG_RING_CAPACITY),
            trigger_queue: VecDeque::new(),
            next_transaction_id: 1,
        }
    }

    /// Queues a triggered message for the session loop to send once the
    /// TriggerMessage CALLRESULT itself has gone out.
    pub fn queue_trigger(&mut self, message: MessageTrigger, connector_id: Option<i32>) {
        self.trigger_queue.push_back(QueuedTrigger { message, connector_id });
    }

    fn log(&mut self, line: impl Into<String>) {
        if self.log_ring.len() == LOG_RING_CAPACITY {
            self.log_ring.pop_front();
        }
        self.log_ring.push_back(line.into());
    }

    pub fn transition(&mut self, next: SessionState) {
        debug!(session = %self.session_id, from = ?self.state, to = ?next, "session state transition");
        self.log(format!("{:?} -> {:?}", self.state, next));
        self.state = next;
    }

    pub fn on_connected(&mut self, now: DateTime<Utc>) {
        self.last_connected_at = Some(now);
        self.transition(SessionState::Connected);
    }

    pub fn on_boot_accepted(&mut self, interval_s: i64) {
        self.config.heartbeat_interval = Duration::from_secs(interval_s.max(1) as u64);
        self.transition(SessionState::Booted);
        for connector in self.connectors.values_mut() {
            connector.status = ConnectorState::Available;
        }
        self.transition(SessionState::Available);
        info!(session = %self.session_id, interval_s, "boot accepted");
    }

    pub fn on_disconnected(&mut self) {
        self.transition(SessionState::Disconnected);
    }

    pub fn connector_mut(&mut self, connector_id: i32) -> Option<&mut ConnectorInfo> {
        self.connectors.get_mut(&connector_id)
    }

    pub fn active_transaction_on(&self, connector_id: i32) -> Option<i32> {
        self.connectors.get(&connector_id).and_then(|c| c.transaction.as_ref()).map(|t| t.transaction_id)
    }

    /// Assigns a fresh, session-unique transaction id. Invariant: a
    /// transaction id is assigned exactly once by a successful
    /// StartTransaction.
    pub fn start_transaction(&mut self, connector_id: i32, id_tag: String, meter_start_wh: i64, at: DateTime<Utc>) -> Option<i32> {
        let transaction_id = self.next_transaction_id;
        let connector = self.connectors.get_mut(&connector_id)?;
        if connector.transaction.is_some() {
            return None;
        }
        self.next_transaction_id += 1;
        connector.transaction = Some(TransactionInfo {
            transaction_id,
            connector_id,
            id_tag,
            start_meter_wh: meter_start_wh,
            current_meter_wh: meter_start_wh,
            started_at: at,
        });
        connector.status = ConnectorState::Charging;
        self.transition(SessionState::Charging);
        Some(transaction_id)
    }

    /// Clears the transaction on whichever connector holds it. The caller
    /// is responsible for the invariant that `meterStop >= meterStart`.
    pub fn stop_transaction(&mut self, transaction_id: i32, meter_stop_wh: i64) -> Option<TransactionInfo> {
        for connector in self.connectors.values_mut() {
            if connector.transaction.as_ref().map(|t| t.transaction_id) == Some(transaction_id) {
                let mut info = connector.transaction.take().unwrap();
                info.current_meter_wh = meter_stop_wh;
                connector.status = ConnectorState::Finishing;
                self.transition(SessionState::Finishing);
                return Some(info);
            }
        }
        None
    }

    pub fn finish_to_available(&mut self, connector_id: i32) {
        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            connector.status = ConnectorState::Available;
        }
        self.transition(SessionState::Available);
    }

    pub fn record_meter_reading(&mut self, connector_id: i32, meter_wh: i64) {
        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            if let Some(tx) = connector.transaction.as_mut() {
                tx.current_meter_wh = tx.current_meter_wh.max(meter_wh);
            }
        }
    }

    pub fn publish_effective_limit(&mut self, connector_id: i32, limit: EffectiveLimit) {
        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            connector.last_effective_limit = Some(limit);
        }
    }

    /// Re-evaluates the profile stack for one connector and caches the
    /// result on it. Returns `None` if the connector doesn't exist.
    pub fn recompute_effective_limit(&mut self, connector_id: i32, now: DateTime<Utc>) -> Option<EffectiveLimit> {
        let connector = self.connectors.get(&connector_id)?;
        let config = connector.config;
        let transaction_start = connector.transaction.as_ref().map(|t| t.started_at);
        let profiles = self.profile_store.profiles_for(connector_id);
        let effective = crate::profile::select_effective(&profiles, &config, now, transaction_start);
        self.publish_effective_limit(connector_id, effective);
        Some(effective)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            charge_point_id: self.config.charge_point_id.clone(),
            state: self.state,
            connectors: self.connectors.values().cloned().collect(),
            last_connected_at: self.last_connected_at,
            heartbeat_interval: self.config.heartbeat_interval,
        }
    }

    pub fn default_id_tag_info() -> IdTagInfo {
        IdTagInfo { status: AuthorizationStatus::Accepted, expiry_date: None, parent_id_tag: None }
    }
}

/// Commands accepted on a session's inbox. `SendCall`'s waiter delivers
/// the eventual CALLRESULT/CALLERROR or a registry error.
pub enum SessionCommand {
    Open,
    Close { reason: String },
    SendCall { action: Action, payload: Value, timeout: Duration, respond_to: Waiter },
    FrameIn { bytes: Vec<u8> },
    TimerTick(TimerKind),
    Snapshot { respond_to: oneshot::Sender<SessionSnapshot> },

    /// Control-API operations: apply directly to local session state,
    /// without a wire round trip, for orchestration and test setup.
    SetProfile { connector_id: i32, profile: ChargingProfile, respond_to: oneshot::Sender<ChargingProfileStatus> },
    ClearProfile { criteria: ClearChargingProfileRequest, respond_to: oneshot::Sender<(ClearChargingProfileStatus, Vec<(i32, i64)>)> },
    GetCompositeSchedule { connector_id: i32, duration: Duration, unit: ChargingRateUnit, respond_to: oneshot::Sender<Option<ChargingSchedule>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Heartbeat,
    MeterValues,
    ProfileSweep,
    PendingSweep,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn session() -> Session {
        Session::new("sess-1", SessionConfig::new("ws://h/ocpp", "cp1").with_connector_count(1))
    }

    #[test]
    fn boot_accepted_moves_to_available() {
        let mut s = session();
        s.on_connected(Utc::now());
        s.transition(SessionState::Booting);
        s.on_boot_accepted(30);
        assert_eq!(s.state, SessionState::Available);
        assert_eq!(s.config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn transaction_lifecycle_assigns_id_once() {
        let mut s = session();
        let tx = s.start_transaction(1, "TAG01".into(), 1000, Utc::now()).unwrap();
        assert_eq!(s.state, SessionState::Charging);
        assert_eq!(s.active_transaction_on(1), Some(tx));

        // starting again on the same connector is refused while one is open
        assert!(s.start_transaction(1, "TAG02".into(), 0, Utc::now()).is_none());

        let info = s.stop_transaction(tx, 2000).unwrap();
        assert_eq!(info.start_meter_wh, 1000);
        assert_eq!(s.state, SessionState::Finishing);
        assert!(s.active_transaction_on(1).is_none());

        s.finish_to_available(1);
        assert_eq!(s.state, SessionState::Available);
    }

    #[test]
    fn closing_one_session_does_not_touch_another() {
        let mut a = session();
        let mut b = Session::new("sess-2", SessionConfig::new("ws://h/ocpp", "cp2").with_connector_count(1));
        a.start_transaction(1, "TAG01".into(), 0, Utc::now());
        b.transition(SessionState::Faulted);
        assert_eq!(a.state, SessionState::Charging);
        assert_eq!(b.state, SessionState::Faulted);
    }
}
