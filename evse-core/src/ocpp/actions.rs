//! Table-driven dispatch for CSMS→CP actions: one handler per [`Action`],
//! looked up in a flat table rather than a `match` spread across the call
//! site. Each handler validates its own payload and mutates [`Session`]
//! directly — it runs inline on the single-writer session task, so no
//! locking is needed.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::messages::{Action, ErrorCode};
use super::session::{ConnectorState, Session};
use super::types::*;

pub type HandlerResult = Result<Value, (ErrorCode, String)>;
pub type ActionHandler = fn(&mut Session, Value, DateTime<Utc>) -> HandlerResult;

const TABLE: &[(Action, ActionHandler)] = &[
    (Action::Reset, reset),
    (Action::ChangeAvailability, change_availability),
    (Action::ChangeConfiguration, change_configuration),
    (Action::GetConfiguration, get_configuration),
    (Action::RemoteStartTransaction, remote_start_transaction),
    (Action::RemoteStopTransaction, remote_stop_transaction),
    (Action::UnlockConnector, unlock_connector),
    (Action::TriggerMessage, trigger_message),
    (Action::SetChargingProfile, set_charging_profile),
    (Action::ClearChargingProfile, clear_charging_profile),
    (Action::GetCompositeSchedule, get_composite_schedule),
    (Action::DataTransfer, data_transfer),
];

/// Looks up the handler for an inbound action. `None` means the action is
/// either CP→CSMS-only or altogether unsupported by this simulator.
pub fn dispatch(action: Action) -> Option<ActionHandler> {
    TABLE.iter().find(|(a, _)| *a == action).map(|(_, handler)| *handler)
}

fn parse<T: for<'de> serde::Deserialize<'de>>(payload: Value) -> Result<T, (ErrorCode, String)> {
    serde_json::from_value(payload).map_err(|e| (ErrorCode::FormationViolation, e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| (ErrorCode::InternalError, e.to_string()))
}

fn reset(_session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let _req: ResetRequest = parse(payload)?;
    to_value(ResetResponse { status: ResetStatus::Accepted })
}

fn change_availability(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: ChangeAvailabilityRequest = parse(payload)?;

    let target_status = match req.kind {
        AvailabilityType::Operative => ConnectorState::Available,
        AvailabilityType::Inoperative => ConnectorState::Unavailable,
    };

    if req.connector_id == 0 {
        let mut scheduled = false;
        for connector in session.connectors.values_mut() {
            if connector.transaction.is_some() {
                scheduled = true;
            } else {
                connector.status = target_status;
            }
        }
        let status = if scheduled { AvailabilityStatus::Scheduled } else { AvailabilityStatus::Accepted };
        return to_value(ChangeAvailabilityResponse { status });
    }

    match session.connector_mut(req.connector_id) {
        None => to_value(ChangeAvailabilityResponse { status: AvailabilityStatus::Rejected }),
        Some(connector) if connector.transaction.is_some() => {
            to_value(ChangeAvailabilityResponse { status: AvailabilityStatus::Scheduled })
        }
        Some(connector) => {
            connector.status = target_status;
            to_value(ChangeAvailabilityResponse { status: AvailabilityStatus::Accepted })
        }
    }
}

/// Keys this simulator actually honours; everything else is reported back
/// as `NotSupported` on write, `unknownKey` on read.
const MUTABLE_KEYS: &[&str] = &["HeartbeatInterval", "MeterValueSampleInterval"];
const READABLE_KEYS: &[&str] = &["HeartbeatInterval", "MeterValueSampleInterval", "ConnectionTimeOut", "NumberOfConnectors"];

fn change_configuration(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: ChangeConfigurationRequest = parse(payload)?;

    if !MUTABLE_KEYS.contains(&req.key.as_str()) {
        return to_value(ChangeConfigurationResponse { status: ConfigurationStatus::NotSupported });
    }

    let parsed: i64 = match req.value.parse() {
        Ok(v) if v > 0 => v,
        _ => return to_value(ChangeConfigurationResponse { status: ConfigurationStatus::Rejected }),
    };

    match req.key.as_str() {
        "HeartbeatInterval" => session.config.heartbeat_interval = std::time::Duration::from_secs(parsed as u64),
        "MeterValueSampleInterval" => session.config.meter_values_interval = std::time::Duration::from_secs(parsed as u64),
        _ => unreachable!("checked against MUTABLE_KEYS above"),
    }

    to_value(ChangeConfigurationResponse { status: ConfigurationStatus::Accepted })
}

fn get_configuration(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: GetConfigurationRequest = parse(payload)?;

    let value_for = |key: &str| -> Option<String> {
        match key {
            "HeartbeatInterval" => Some(session.config.heartbeat_interval.as_secs().to_string()),
            "MeterValueSampleInterval" => Some(session.config.meter_values_interval.as_secs().to_string()),
            "ConnectionTimeOut" => Some("60".to_string()),
            "NumberOfConnectors" => Some(session.connectors.len().to_string()),
            _ => None,
        }
    };

    let requested: Vec<String> = req.key.unwrap_or_else(|| READABLE_KEYS.iter().map(|s| s.to_string()).collect());
    let mut configuration_key = Vec::new();
    let mut unknown_key = Vec::new();

    for key in requested {
        match value_for(&key) {
            Some(value) => configuration_key.push(KeyValue { key, readonly: !MUTABLE_KEYS.contains(&key.as_str()), value: Some(value) }),
            None => unknown_key.push(key),
        }
    }

    to_value(GetConfigurationResponse { configuration_key, unknown_key })
}

fn remote_start_transaction(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: RemoteStartTransactionRequest = parse(payload)?;

    let connector_id = match req.connector_id {
        Some(id) => id,
        None => {
            let free = session.connectors.values().find(|c| c.transaction.is_none() && c.status == ConnectorState::Available).map(|c| c.connector_id);
            match free {
                Some(id) => id,
                None => return to_value(RemoteStartTransactionResponse { status: RemoteStartStopStatus::Rejected }),
            }
        }
    };

    let accepted = match session.connector_mut(connector_id) {
        Some(connector) if connector.transaction.is_none() && connector.status == ConnectorState::Available => {
            connector.status = ConnectorState::Preparing;
            true
        }
        _ => false,
    };

    if accepted {
        if let Some(profile) = req.charging_profile {
            session.profile_store.accept(connector_id, profile, None);
        }
        to_value(RemoteStartTransactionResponse { status: RemoteStartStopStatus::Accepted })
    } else {
        to_value(RemoteStartTransactionResponse { status: RemoteStartStopStatus::Rejected })
    }
}

fn remote_stop_transaction(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: RemoteStopTransactionRequest = parse(payload)?;

    let exists = session.connectors.values().any(|c| c.transaction.as_ref().map(|t| t.transaction_id) == Some(req.transaction_id));
    let status = if exists { RemoteStartStopStatus::Accepted } else { RemoteStartStopStatus::Rejected };
    to_value(RemoteStopTransactionResponse { status })
}

fn unlock_connector(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: UnlockConnectorRequest = parse(payload)?;

    let status = match session.connector_mut(req.connector_id) {
        Some(connector) if connector.transaction.is_none() => UnlockStatus::Unlocked,
        Some(_) => UnlockStatus::UnlockFailed,
        None => UnlockStatus::NotSupported,
    };
    to_value(UnlockConnectorResponse { status })
}

fn trigger_message(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: TriggerMessageRequest = parse(payload)?;
    if let Some(connector_id) = req.connector_id {
        if session.connectors.get(&connector_id).is_none() {
            return to_value(TriggerMessageResponse { status: TriggerMessageStatus::Rejected });
        }
    }

    let status = match req.requested_message {
        MessageTrigger::DiagnosticsStatusNotification | MessageTrigger::FirmwareStatusNotification => {
            TriggerMessageStatus::NotImplemented
        }
        _ => {
            session.queue_trigger(req.requested_message, req.connector_id);
            TriggerMessageStatus::Accepted
        }
    };
    to_value(TriggerMessageResponse { status })
}

fn set_charging_profile(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: SetChargingProfileRequest = parse(payload)?;
    let active_tx = session.active_transaction_on(req.connector_id);
    let status = session.profile_store.accept(req.connector_id, req.cs_charging_profiles, active_tx);
    to_value(SetChargingProfileResponse { status })
}

fn clear_charging_profile(session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let req: ClearChargingProfileRequest = parse(payload)?;
    let (status, _removed) = session.profile_store.clear(&req);
    to_value(ClearChargingProfileResponse { status })
}

fn get_composite_schedule(session: &mut Session, payload: Value, now: DateTime<Utc>) -> HandlerResult {
    let req: GetCompositeScheduleRequest = parse(payload)?;

    let connector = match session.connectors.get(&req.connector_id) {
        Some(c) => c,
        None => return to_value(GetCompositeScheduleResponse { status: GetCompositeScheduleStatus::Rejected, connector_id: None, schedule_start: None, charging_schedule: None }),
    };

    let config = connector.config;
    let transaction_start = connector.transaction.as_ref().map(|t| t.started_at);
    let profiles = session.profile_store.profiles_for(req.connector_id);
    let unit = req.charging_rate_unit.unwrap_or(ChargingRateUnit::W);
    let schedule = crate::profile::composite_schedule(&profiles, &config, now, transaction_start, chrono::Duration::seconds(req.duration), unit);

    to_value(GetCompositeScheduleResponse {
        status: GetCompositeScheduleStatus::Accepted,
        connector_id: Some(req.connector_id),
        schedule_start: Some(now),
        charging_schedule: Some(schedule),
    })
}

fn data_transfer(_session: &mut Session, payload: Value, _now: DateTime<Utc>) -> HandlerResult {
    let _req: DataTransferRequest = parse(payload)?;
    // no vendor extensions are implemented; every inbound DataTransfer is
    // acknowledged as an unrecognised vendor rather than erroring the call.
    to_value(DataTransferResponse { status: DataTransferStatus::UnknownVendorId, data: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn session() -> Session {
        Session::new("s1", SessionConfig::new("ws://h/ocpp", "cp1").with_connector_count(2))
    }

    #[test]
    fn dispatch_finds_every_inbound_action() {
        for action in [
            Action::Reset, Action::ChangeAvailability, Action::ChangeConfiguration, Action::GetConfiguration,
            Action::RemoteStartTransaction, Action::RemoteStopTransaction, Action::UnlockConnector,
            Action::TriggerMessage, Action::SetChargingProfile, Action::ClearChargingProfile,
            Action::GetCompositeSchedule, Action::DataTransfer,
        ] {
            assert!(dispatch(action).is_some(), "missing handler for {action:?}");
        }
    }

    #[test]
    fn dispatch_returns_none_for_outbound_only_actions() {
        assert!(dispatch(Action::BootNotification).is_none());
        assert!(dispatch(Action::Heartbeat).is_none());
    }

    #[test]
    fn remote_start_rejects_busy_connector() {
        let mut s = session();
        s.start_transaction(1, "TAG".into(), 0, Utc::now());

        let handler = dispatch(Action::RemoteStartTransaction).unwrap();
        let payload = serde_json::json!({ "connectorId": 1, "idTag": "OTHER" });
        let result: RemoteStartTransactionResponse = serde_json::from_value(handler(&mut s, payload, Utc::now()).unwrap()).unwrap();
        assert_eq!(result.status, RemoteStartStopStatus::Rejected);
    }

    #[test]
    fn get_configuration_reports_unknown_keys() {
        let mut s = session();
        let handler = dispatch(Action::GetConfiguration).unwrap();
        let payload = serde_json::json!({ "key": ["HeartbeatInterval", "NoSuchKey"] });
        let result: GetConfigurationResponse = serde_json::from_value(handler(&mut s, payload, Utc::now()).unwrap()).unwrap();
        assert_eq!(result.configuration_key.len(), 1);
        assert_eq!(result.unknown_key, vec!["NoSuchKey".to_string()]);
    }

    #[test]
    fn change_configuration_rejects_unsupported_key() {
        let mut s = session();
        let handler = dispatch(Action::ChangeConfiguration).unwrap();
        let payload = serde_json::json!({ "key": "SupportedFeatureProfiles", "value": "Core" });
        let result: ChangeConfigurationResponse = serde_json::from_value(handler(&mut s, payload, Utc::now()).unwrap()).unwrap();
        assert_eq!(result.status, ConfigurationStatus::NotSupported);
    }
}
