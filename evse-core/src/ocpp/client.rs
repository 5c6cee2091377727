//! WebSocket transport and the per-session actor loop.
//!
//! One task owns one [`Session`], its [`PendingRegistry`], and (while
//! connected) the split WebSocket stream. Every external interaction goes
//! through [`SessionCommand`]s delivered on a bounded inbox, so the socket
//! and session state are never touched from more than one place at a time.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        handshake::client::Request,
        http::{header, Uri},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{EventBus, FrameEvent, ProfileExpired, SessionStateChanged};

use super::actions;
use super::messages::{Action, Call, CallError, CallResult, ErrorCode, OcppMessage};
use super::pending::{CallOutcome, PendingRegistry};
use super::session::{Session, SessionCommand, SessionSnapshot, SessionState, TimerKind};
use super::types::{
    BootNotificationRequest, BootNotificationResponse, ChargePointErrorCode, ChargingProfile, ChargingProfileStatus,
    ChargingRateUnit, ChargingSchedule, ClearChargingProfileRequest, ClearChargingProfileStatus, MessageTrigger,
    MeterValue, MeterValuesRequest, RegistrationStatus, SampledValue, StatusNotificationRequest,
};

/// Wire subprotocol this simulator always requests and always requires the
/// CSMS to echo back — unlike a lenient client, a mismatched or absent
/// subprotocol answer fails the handshake outright.
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A handle to a running session actor. Cloning is cheap; every clone
/// shares the same bounded inbox.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    inbox: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn open(&self) -> Result<(), SessionError> {
        self.inbox.send(SessionCommand::Open).await.map_err(|_| SessionError::SocketClosed(self.session_id.clone()))
    }

    pub async fn close(&self, reason: impl Into<String>) -> Result<(), SessionError> {
        self.inbox
            .send(SessionCommand::Close { reason: reason.into() })
            .await
            .map_err(|_| SessionError::SocketClosed(self.session_id.clone()))
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.inbox
            .send(SessionCommand::Snapshot { respond_to })
            .await
            .map_err(|_| SessionError::SocketClosed(self.session_id.clone()))?;
        rx.await.map_err(|_| SessionError::Cancelled)
    }

    pub async fn set_profile(&self, connector_id: i32, profile: ChargingProfile) -> Result<ChargingProfileStatus, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.inbox
            .send(SessionCommand::SetProfile { connector_id, profile, respond_to })
            .await
            .map_err(|_| SessionError::SocketClosed(self.session_id.clone()))?;
        rx.await.map_err(|_| SessionError::Cancelled)
    }

    pub async fn clear_profile(&self, criteria: ClearChargingProfileRequest) -> Result<(ClearChargingProfileStatus, Vec<(i32, i64)>), SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.inbox
            .send(SessionCommand::ClearProfile { criteria, respond_to })
            .await
            .map_err(|_| SessionError::SocketClosed(self.session_id.clone()))?;
        rx.await.map_err(|_| SessionError::Cancelled)
    }

    pub async fn get_composite_schedule(&self, connector_id: i32, duration: Duration, unit: ChargingRateUnit) -> Result<Option<ChargingSchedule>, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.inbox
            .send(SessionCommand::GetCompositeSchedule { connector_id, duration, unit, respond_to })
            .await
            .map_err(|_| SessionError::SocketClosed(self.session_id.clone()))?;
        rx.await.map_err(|_| SessionError::Cancelled)
    }

    pub async fn send_call(&self, action: Action, payload: serde_json::Value, timeout: Duration) -> Result<CallOutcome, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.inbox
            .try_send(SessionCommand::SendCall { action, payload, timeout, respond_to })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionError::Busy,
                mpsc::error::TrySendError::Closed(_) => SessionError::SocketClosed(self.session_id.clone()),
            })?;
        rx.await.map_err(|_| SessionError::Cancelled)?.map_err(SessionError::from)
    }
}

/// Spawns the session actor task and returns a handle to it.
pub fn spawn_session(session_id: impl Into<String>, config: SessionConfig, clock: SharedClock, bus: EventBus) -> (SessionHandle, tokio::task::JoinHandle<()>) {
    let session_id = session_id.into();
    let inbox_capacity = config.inbox_capacity;
    let (tx, rx) = mpsc::channel(inbox_capacity);
    let session = Session::new(session_id.clone(), config);
    let handle = SessionHandle { session_id: session_id.clone(), inbox: tx };
    let join = tokio::spawn(run_session(session, clock, bus, rx));
    (handle, join)
}

/// The session actor: reconnects with backoff until `max_reconnect_attempts`
/// is exhausted, processing inbox commands throughout.
async fn run_session(mut session: Session, clock: SharedClock, bus: EventBus, mut inbox: mpsc::Receiver<SessionCommand>) {
    let mut pending = PendingRegistry::new(session.config.pending_call_ceiling);
    let mut attempt: u32 = 0;

    // Wait for the first Open before dialing out, so callers control when
    // ramp-up actually starts opening sockets.
    loop {
        match inbox.recv().await {
            Some(SessionCommand::Open) => break,
            Some(SessionCommand::Close { .. }) | None => return,
            Some(SessionCommand::Snapshot { respond_to }) => {
                let _ = respond_to.send(session.snapshot());
            }
            Some(_) => {}
        }
    }

    'reconnect: loop {
        session.transition(SessionState::Connecting);
        match connect_and_handshake(&session.config).await {
            Ok(stream) => {
                attempt = 0;
                let now = clock.now();
                session.on_connected(now);
                publish_state(&bus, &session, now);

                match run_connected(&mut session, &mut pending, &clock, &bus, stream, &mut inbox).await {
                    ConnectedExit::Closed => break 'reconnect,
                    ConnectedExit::Disconnected => {}
                }
            }
            Err(e) => {
                warn!(session = %session.session_id, error = %e, attempt, "handshake failed");
            }
        }

        pending.cancel_all();
        session.on_disconnected();
        publish_state(&bus, &session, clock.now());

        attempt += 1;
        if attempt > session.config.max_reconnect_attempts {
            error!(session = %session.session_id, attempts = attempt, "giving up, staying disconnected");
            break 'reconnect;
        }

        let delay = std::cmp::min(session.config.reconnect_delay * attempt, session.config.max_reconnect_delay);
        info!(session = %session.session_id, ?delay, attempt, "reconnecting");

        // keep draining the inbox during backoff so Close/Snapshot are
        // still serviced instead of piling up against a dead socket.
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = inbox.recv() => {
                match cmd {
                    Some(SessionCommand::Close { .. }) | None => break 'reconnect,
                    Some(SessionCommand::Snapshot { respond_to }) => { let _ = respond_to.send(session.snapshot()); }
                    _ => {}
                }
            }
        }
    }
}

enum ConnectedExit {
    Closed,
    Disconnected,
}

fn publish_state(bus: &EventBus, session: &Session, at: chrono::DateTime<Utc>) {
    bus.publish_session_event(SessionStateChanged {
        session_id: session.session_id.clone(),
        state: session.state,
        connector_id: None,
        connector_state: None,
        at,
    });
}

async fn run_connected(
    session: &mut Session,
    pending: &mut PendingRegistry,
    clock: &SharedClock,
    bus: &EventBus,
    stream: WsStream,
    inbox: &mut mpsc::Receiver<SessionCommand>,
) -> ConnectedExit {
    let (mut ws_tx, mut ws_rx) = stream.split();

    session.transition(SessionState::Booting);
    let boot_id = match send_boot_notification(session, pending, clock, bus, &mut ws_tx).await {
        Ok(id) => id,
        Err(e) => {
            error!(session = %session.session_id, error = %e, "failed to send BootNotification");
            return ConnectedExit::Disconnected;
        }
    };

    let mut heartbeat_tick = tokio::time::interval(session.config.heartbeat_interval);
    let mut meter_tick = tokio::time::interval(session.config.meter_values_interval);
    let mut sweep_tick = tokio::time::interval(Duration::from_secs(5));
    heartbeat_tick.tick().await;
    meter_tick.tick().await;
    sweep_tick.tick().await;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let bytes = text.as_bytes().to_vec();
                        bus.publish_frame_in(FrameEvent { session_id: session.session_id.clone(), bytes: bytes.clone(), at: clock.now() });
                        handle_inbound_frame(session, pending, clock, bus, &bytes, &boot_id, &mut ws_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session = %session.session_id, "socket closed by peer");
                        return ConnectedExit::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session = %session.session_id, error = %e, "websocket read error");
                        return ConnectedExit::Disconnected;
                    }
                }
            }

            cmd = inbox.recv() => {
                match cmd {
                    None | Some(SessionCommand::Close { .. }) => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return ConnectedExit::Closed;
                    }
                    Some(SessionCommand::Open) => {}
                    Some(SessionCommand::Snapshot { respond_to }) => {
                        let _ = respond_to.send(session.snapshot());
                    }
                    Some(SessionCommand::SendCall { action, payload, timeout, respond_to }) => {
                        if let Err(e) = send_outbound_call(session, pending, clock, bus, &mut ws_tx, action, payload, timeout, respond_to).await {
                            warn!(session = %session.session_id, error = %e, "failed to send call");
                        }
                    }
                    Some(SessionCommand::FrameIn { bytes }) => {
                        handle_inbound_frame(session, pending, clock, bus, &bytes, &boot_id, &mut ws_tx).await;
                    }
                    Some(SessionCommand::TimerTick(kind)) => {
                        handle_timer(session, pending, clock, bus, &mut ws_tx, kind).await;
                    }
                    Some(SessionCommand::SetProfile { connector_id, profile, respond_to }) => {
                        let active_tx = session.active_transaction_on(connector_id);
                        let status = session.profile_store.accept(connector_id, profile, active_tx);
                        let _ = respond_to.send(status);
                    }
                    Some(SessionCommand::ClearProfile { criteria, respond_to }) => {
                        let result = session.profile_store.clear(&criteria);
                        let _ = respond_to.send(result);
                    }
                    Some(SessionCommand::GetCompositeSchedule { connector_id, duration, unit, respond_to }) => {
                        let schedule = session.connectors.get(&connector_id).map(|connector| {
                            let profiles = session.profile_store.profiles_for(connector_id);
                            let transaction_start = connector.transaction.as_ref().map(|t| t.started_at);
                            crate::profile::composite_schedule(&profiles, &connector.config, clock.now(), transaction_start, chrono::Duration::from_std(duration).unwrap_or_default(), unit)
                        });
                        let _ = respond_to.send(schedule);
                    }
                }
            }

            _ = heartbeat_tick.tick() => { handle_timer(session, pending, clock, bus, &mut ws_tx, TimerKind::Heartbeat).await; }
            _ = meter_tick.tick() => { handle_timer(session, pending, clock, bus, &mut ws_tx, TimerKind::MeterValues).await; }
            _ = sweep_tick.tick() => {
                handle_timer(session, pending, clock, bus, &mut ws_tx, TimerKind::PendingSweep).await;
                handle_timer(session, pending, clock, bus, &mut ws_tx, TimerKind::ProfileSweep).await;
            }
        }
    }
}

type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

async fn send_boot_notification(session: &mut Session, pending: &mut PendingRegistry, clock: &SharedClock, bus: &EventBus, ws_tx: &mut WsSink) -> Result<String, SessionError> {
    let request = BootNotificationRequest {
        charge_point_vendor: session.config.vendor.clone(),
        charge_point_model: session.config.model.clone(),
        charge_point_serial_number: session.config.serial_number.clone(),
        firmware_version: session.config.firmware_version.clone(),
    };
    let call = Call::boot_notification(request)?;
    let message_id = call.message_id.clone();
    let (waiter, _rx) = oneshot::channel();
    pending.register(message_id.clone(), Action::BootNotification, clock.now(), session.config.request_timeout, waiter)?;
    write_frame(session, clock, bus, ws_tx, &OcppMessage::Call(call)).await?;
    Ok(message_id)
}

async fn send_outbound_call(
    session: &mut Session,
    pending: &mut PendingRegistry,
    clock: &SharedClock,
    bus: &EventBus,
    ws_tx: &mut WsSink,
    action: Action,
    payload: serde_json::Value,
    timeout: Duration,
    respond_to: super::pending::Waiter,
) -> Result<(), SessionError> {
    let call = Call::new(action, &payload)?;
    // register before writing to the socket: a reply can never race ahead
    // of its own registration.
    pending.register(call.message_id.clone(), action, clock.now(), timeout, respond_to)?;
    write_frame(session, clock, bus, ws_tx, &OcppMessage::Call(call)).await
}

async fn write_frame(session: &Session, clock: &SharedClock, bus: &EventBus, ws_tx: &mut WsSink, message: &OcppMessage) -> Result<(), SessionError> {
    let bytes = message.to_bytes()?;
    debug!(session = %session.session_id, frame = %String::from_utf8_lossy(&bytes), "sending frame");
    bus.publish_frame_out(FrameEvent { session_id: session.session_id.clone(), bytes: bytes.clone(), at: clock.now() });
    ws_tx
        .send(Message::Text(String::from_utf8_lossy(&bytes).into_owned().into()))
        .await
        .map_err(|e| SessionError::SocketClosed(e.to_string()))
}

async fn handle_inbound_frame(
    session: &mut Session,
    pending: &mut PendingRegistry,
    clock: &SharedClock,
    bus: &EventBus,
    bytes: &[u8],
    boot_id: &str,
    ws_tx: &mut WsSink,
) {
    let message = match OcppMessage::parse(bytes) {
        Ok(m) => m,
        Err(e) => {
            warn!(session = %session.session_id, error = %e, "dropping malformed frame");
            return;
        }
    };

    match message {
        OcppMessage::Call(call) => {
            let now = clock.now();
            let outcome = match actions::dispatch(call.action) {
                Some(handler) => handler(session, call.payload.clone(), now),
                None => Err((ErrorCode::NotImplemented, format!("no handler for {}", call.action))),
            };
            let response = match outcome {
                Ok(payload) => match CallResult::new(call.message_id.clone(), payload) {
                    Ok(result) => OcppMessage::CallResult(result),
                    Err(e) => OcppMessage::CallError(CallError::new(call.message_id, ErrorCode::InternalError, e.to_string())),
                },
                Err((code, description)) => OcppMessage::CallError(CallError::new(call.message_id, code, description)),
            };
            if let Err(e) = write_frame(session, clock, bus, ws_tx, &response).await {
                warn!(session = %session.session_id, error = %e, "failed to answer call");
            }
            send_queued_triggers(session, pending, clock, bus, ws_tx).await;
        }
        OcppMessage::CallResult(result) if result.message_id == boot_id => {
            match result.parse_payload::<BootNotificationResponse>() {
                Ok(resp) => apply_boot_response(session, resp),
                Err(e) => warn!(session = %session.session_id, error = %e, "malformed BootNotification response"),
            }
        }
        OcppMessage::CallResult(result) => {
            pending.complete(&result.message_id, CallOutcome::Result(result.payload));
        }
        OcppMessage::CallError(err) if err.message_id == boot_id => {
            warn!(session = %session.session_id, code = ?err.error_code, "BootNotification rejected at transport level");
            session.transition(SessionState::Faulted);
        }
        OcppMessage::CallError(err) => {
            let message_id = err.message_id.clone();
            pending.complete(&message_id, CallOutcome::Error(err));
        }
    }
}

/// Sends every message a TriggerMessage call queued, in the order the CSMS
/// asked for them, right after the CALLRESULT accepting the trigger. Each
/// one is registered with the pending-call registry like any other
/// outbound CALL, but its eventual CALLRESULT is left uncorrelated to a
/// caller: TriggerMessage is fire-and-forget from the control API's view.
async fn send_queued_triggers(session: &mut Session, pending: &mut PendingRegistry, clock: &SharedClock, bus: &EventBus, ws_tx: &mut WsSink) {
    while let Some(queued) = session.trigger_queue.pop_front() {
        let now = clock.now();
        let call = match queued.message {
            MessageTrigger::BootNotification => Call::boot_notification(BootNotificationRequest {
                charge_point_vendor: session.config.vendor.clone(),
                charge_point_model: session.config.model.clone(),
                charge_point_serial_number: session.config.serial_number.clone(),
                firmware_version: session.config.firmware_version.clone(),
            }),
            MessageTrigger::Heartbeat => Call::heartbeat(),
            MessageTrigger::StatusNotification => {
                let connector_ids: Vec<i32> = match queued.connector_id {
                    Some(id) => vec![id],
                    None => session.connectors.keys().copied().collect(),
                };
                for connector_id in connector_ids {
                    let Some(connector) = session.connectors.get(&connector_id) else { continue };
                    let call = Call::status_notification(StatusNotificationRequest {
                        connector_id,
                        error_code: ChargePointErrorCode::NoError,
                        status: connector.status,
                        info: None,
                        timestamp: Some(now),
                    });
                    fire_and_forget(session, pending, clock, bus, ws_tx, call).await;
                }
                continue;
            }
            MessageTrigger::MeterValues => {
                let connector_ids: Vec<i32> = match queued.connector_id {
                    Some(id) => vec![id],
                    None => session.connectors.keys().copied().collect(),
                };
                for connector_id in connector_ids {
                    let Some(connector) = session.connectors.get(&connector_id) else { continue };
                    let meter_wh = connector.transaction.as_ref().map(|t| t.current_meter_wh).unwrap_or(0);
                    let call = Call::meter_values(MeterValuesRequest {
                        connector_id,
                        transaction_id: connector.transaction.as_ref().map(|t| t.transaction_id),
                        meter_value: vec![MeterValue {
                            timestamp: now,
                            sampled_value: vec![SampledValue { value: meter_wh.to_string(), context: None, measurand: None, unit: None }],
                        }],
                    });
                    fire_and_forget(session, pending, clock, bus, ws_tx, call).await;
                }
                continue;
            }
            MessageTrigger::DiagnosticsStatusNotification | MessageTrigger::FirmwareStatusNotification => continue,
        };
        fire_and_forget(session, pending, clock, bus, ws_tx, call).await;
    }
}

async fn fire_and_forget(session: &mut Session, pending: &mut PendingRegistry, clock: &SharedClock, bus: &EventBus, ws_tx: &mut WsSink, call: Result<Call, crate::error::FrameError>) {
    let Ok(call) = call else { return };
    let action = call.action;
    let (waiter, _rx) = oneshot::channel();
    if pending.register(call.message_id.clone(), action, clock.now(), session.config.request_timeout, waiter).is_err() {
        return;
    }
    if let Err(e) = write_frame(session, clock, bus, ws_tx, &OcppMessage::Call(call)).await {
        warn!(session = %session.session_id, error = %e, "failed to send triggered message");
    }
}

fn apply_boot_response(session: &mut Session, response: BootNotificationResponse) {
    match response.status {
        RegistrationStatus::Accepted => session.on_boot_accepted(response.interval),
        RegistrationStatus::Pending => info!(session = %session.session_id, "boot pending, awaiting retry"),
        RegistrationStatus::Rejected => session.transition(SessionState::Faulted),
    }
}

async fn handle_timer(session: &mut Session, pending: &mut PendingRegistry, clock: &SharedClock, bus: &EventBus, ws_tx: &mut WsSink, kind: TimerKind) {
    let now = clock.now();
    match kind {
        TimerKind::Heartbeat => {
            if let Ok(call) = Call::heartbeat() {
                let (waiter, _rx) = oneshot::channel();
                if pending.register(call.message_id.clone(), Action::Heartbeat, now, session.config.request_timeout, waiter).is_ok() {
                    let _ = write_frame(session, clock, bus, ws_tx, &OcppMessage::Call(call)).await;
                }
            }
        }
        TimerKind::MeterValues => {
            for connector_id in session.connectors.keys().copied().collect::<Vec<_>>() {
                session.recompute_effective_limit(connector_id, now);
            }
        }
        TimerKind::ProfileSweep => {
            for (connector_id, profile_id) in session.profile_store.sweep(now) {
                bus.publish_profile_expired(ProfileExpired { session_id: session.session_id.clone(), connector_id, profile_id });
            }
        }
        TimerKind::PendingSweep => {
            pending.sweep_timeouts(now);
        }
    }
}

/// Opens a WebSocket to `config.csms_url/config.charge_point_id`, requiring
/// the CSMS to echo the `ocpp1.6` subprotocol exactly.
async fn connect_and_handshake(config: &SessionConfig) -> Result<WsStream, SessionError> {
    let url = build_url(&config.csms_url, &config.charge_point_id);
    let uri: Uri = url.parse().map_err(|e| SessionError::HandshakeFailed(format!("{e}")))?;

    let request = Request::builder()
        .uri(&url)
        .header(header::SEC_WEBSOCKET_PROTOCOL, OCPP_SUBPROTOCOL)
        .header(header::HOST, uri.host().unwrap_or("localhost").to_string())
        .body(())
        .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

    let ws_config = WebSocketConfig {
        max_message_size: Some(256 * 1024),
        max_frame_size: Some(64 * 1024),
        ..Default::default()
    };

    #[cfg(feature = "insecure-tls")]
    let connector = if config.trust_all_certs {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;
        Some(tokio_tungstenite::Connector::NativeTls(tls))
    } else {
        None
    };

    #[cfg(feature = "insecure-tls")]
    let (stream, response) = tokio_tungstenite::connect_async_tls_with_config(request, Some(ws_config), false, connector)
        .await
        .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

    #[cfg(not(feature = "insecure-tls"))]
    let (stream, response) = connect_async_with_config(request, Some(ws_config), false)
        .await
        .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

    let accepted = response.headers().get(header::SEC_WEBSOCKET_PROTOCOL).and_then(|v| v.to_str().ok());
    if accepted != Some(OCPP_SUBPROTOCOL) {
        return Err(SessionError::HandshakeFailed(format!(
            "CSMS did not echo required subprotocol {OCPP_SUBPROTOCOL:?}, got {accepted:?}"
        )));
    }

    Ok(stream)
}

fn build_url(csms_url: &str, charge_point_id: &str) -> String {
    format!("{}/{}", csms_url.trim_end_matches('/'), charge_point_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_charge_point_id() {
        assert_eq!(build_url("ws://host:8180/ocpp", "CP-1"), "ws://host:8180/ocpp/CP-1");
        assert_eq!(build_url("ws://host:8180/ocpp/", "CP-1"), "ws://host:8180/ocpp/CP-1");
    }
}
