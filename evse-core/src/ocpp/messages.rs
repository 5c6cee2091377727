//! OCPP-J 1.6 frame codec.
//!
//! OCPP-J frames are JSON arrays:
//! - CALL: `[2, messageId, action, payload]`
//! - CALLRESULT: `[3, messageId, payload]`
//! - CALLERROR: `[4, messageId, errorCode, errorDescription, errorDetails]`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FrameError;

use super::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP 1.6 CALLERROR error codes, exactly as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

/// Action names handled by this simulator: the inbound (CSMS→CP) table
/// plus the outbound (CP→CSMS) actions the session itself initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    // CSMS -> CP
    Reset,
    ChangeAvailability,
    ChangeConfiguration,
    GetConfiguration,
    RemoteStartTransaction,
    RemoteStopTransaction,
    UnlockConnector,
    TriggerMessage,
    SetChargingProfile,
    ClearChargingProfile,
    GetCompositeSchedule,

    // CP -> CSMS
    BootNotification,
    Heartbeat,
    StatusNotification,
    Authorize,
    StartTransaction,
    StopTransaction,
    MeterValues,

    // Bidirectional
    DataTransfer,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for Action {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Reset" => Ok(Action::Reset),
            "ChangeAvailability" => Ok(Action::ChangeAvailability),
            "ChangeConfiguration" => Ok(Action::ChangeConfiguration),
            "GetConfiguration" => Ok(Action::GetConfiguration),
            "RemoteStartTransaction" => Ok(Action::RemoteStartTransaction),
            "RemoteStopTransaction" => Ok(Action::RemoteStopTransaction),
            "UnlockConnector" => Ok(Action::UnlockConnector),
            "TriggerMessage" => Ok(Action::TriggerMessage),
            "SetChargingProfile" => Ok(Action::SetChargingProfile),
            "ClearChargingProfile" => Ok(Action::ClearChargingProfile),
            "GetCompositeSchedule" => Ok(Action::GetCompositeSchedule),
            "BootNotification" => Ok(Action::BootNotification),
            "Heartbeat" => Ok(Action::Heartbeat),
            "StatusNotification" => Ok(Action::StatusNotification),
            "Authorize" => Ok(Action::Authorize),
            "StartTransaction" => Ok(Action::StartTransaction),
            "StopTransaction" => Ok(Action::StopTransaction),
            "MeterValues" => Ok(Action::MeterValues),
            "DataTransfer" => Ok(Action::DataTransfer),
            other => Err(FrameError::Framing(format!("unrecognised action {other}"))),
        }
    }
}

/// An outbound CALL message.
#[derive(Debug, Clone)]
pub struct Call {
    pub message_id: String,
    pub action: Action,
    pub payload: Value,
}

impl Call {
    pub fn new(action: Action, payload: impl Serialize) -> Result<Self, FrameError> {
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            action,
            payload: serde_json::to_value(payload)
                .map_err(|e| FrameError::Framing(e.to_string()))?,
        })
    }

    pub fn boot_notification(req: BootNotificationRequest) -> Result<Self, FrameError> {
        Self::new(Action::BootNotification, req)
    }

    pub fn heartbeat() -> Result<Self, FrameError> {
        Self::new(Action::Heartbeat, HeartbeatRequest {})
    }

    pub fn status_notification(req: StatusNotificationRequest) -> Result<Self, FrameError> {
        Self::new(Action::StatusNotification, req)
    }

    pub fn authorize(id_tag: impl Into<String>) -> Result<Self, FrameError> {
        Self::new(Action::Authorize, AuthorizeRequest { id_tag: id_tag.into() })
    }

    pub fn start_transaction(req: StartTransactionRequest) -> Result<Self, FrameError> {
        Self::new(Action::StartTransaction, req)
    }

    pub fn stop_transaction(req: StopTransactionRequest) -> Result<Self, FrameError> {
        Self::new(Action::StopTransaction, req)
    }

    pub fn meter_values(req: MeterValuesRequest) -> Result<Self, FrameError> {
        Self::new(Action::MeterValues, req)
    }

    pub fn data_transfer(req: DataTransferRequest) -> Result<Self, FrameError> {
        Self::new(Action::DataTransfer, req)
    }

    /// Serialize to wire format: `[2, messageId, action, payload]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let array = serde_json::json!([
            MessageType::Call as i32,
            &self.message_id,
            self.action.to_string(),
            &self.payload
        ]);
        serde_json::to_vec(&array).map_err(|e| FrameError::Framing(e.to_string()))
    }
}

/// A CALLRESULT message, either inbound (response to our CALL) or outbound
/// (our response to a CSMS CALL).
#[derive(Debug, Clone)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: impl Serialize) -> Result<Self, FrameError> {
        Ok(Self {
            message_id: message_id.into(),
            payload: serde_json::to_value(payload)
                .map_err(|e| FrameError::Framing(e.to_string()))?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let array = serde_json::json!([
            MessageType::CallResult as i32,
            &self.message_id,
            &self.payload
        ]);
        serde_json::to_vec(&array).map_err(|e| FrameError::Framing(e.to_string()))
    }

    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, FrameError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| FrameError::Framing(e.to_string()))
    }
}

/// A CALLERROR message.
#[derive(Debug, Clone)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(message_id: impl Into<String>, error_code: ErrorCode, error_description: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let code = serde_json::to_value(self.error_code).map_err(|e| FrameError::Framing(e.to_string()))?;
        let array = serde_json::json!([
            MessageType::CallError as i32,
            &self.message_id,
            code,
            &self.error_description,
            &self.error_details
        ]);
        serde_json::to_vec(&array).map_err(|e| FrameError::Framing(e.to_string()))
    }
}

/// Any of the three OCPP-J message kinds, after classification.
#[derive(Debug, Clone)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl OcppMessage {
    /// Parse a frame from raw JSON bytes. Rejects anything that is not a
    /// well-formed OCPP-J array: non-array top level, fewer than 2
    /// elements, a non-integer/unrecognised type tag, or a type-specific
    /// arity mismatch.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let array: Vec<Value> =
            serde_json::from_slice(bytes).map_err(|e| FrameError::Framing(e.to_string()))?;

        if array.len() < 2 {
            return Err(FrameError::Framing("frame has fewer than 2 elements".into()));
        }

        let msg_type = array[0]
            .as_i64()
            .ok_or_else(|| FrameError::Framing("frame type is not an integer".into()))?;

        match msg_type {
            2 => {
                if array.len() != 4 {
                    return Err(FrameError::Framing("CALL must have 4 elements".into()));
                }
                let message_id = non_empty_str(&array[1])?;
                let action_str = array[2]
                    .as_str()
                    .ok_or_else(|| FrameError::Framing("action is not a string".into()))?;
                let action: Action = action_str.parse()?;
                let payload = if array[3].is_null() {
                    Value::Object(serde_json::Map::new())
                } else {
                    array[3].clone()
                };
                Ok(OcppMessage::Call(Call { message_id, action, payload }))
            }
            3 => {
                if array.len() != 3 {
                    return Err(FrameError::Framing("CALLRESULT must have 3 elements".into()));
                }
                let message_id = non_empty_str(&array[1])?;
                Ok(OcppMessage::CallResult(CallResult { message_id, payload: array[2].clone() }))
            }
            4 => {
                if array.len() != 5 {
                    return Err(FrameError::Framing("CALLERROR must have 5 elements".into()));
                }
                let message_id = non_empty_str(&array[1])?;
                let error_code_str = array[2]
                    .as_str()
                    .ok_or_else(|| FrameError::Framing("errorCode is not a string".into()))?;
                let error_code: ErrorCode =
                    serde_json::from_value(Value::String(error_code_str.to_string()))
                        .unwrap_or(ErrorCode::GenericError);
                let error_description = array[3].as_str().unwrap_or("").to_string();
                let error_details = array[4].clone();
                Ok(OcppMessage::CallError(CallError {
                    message_id,
                    error_code,
                    error_description,
                    error_details,
                }))
            }
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            OcppMessage::Call(c) => &c.message_id,
            OcppMessage::CallResult(r) => &r.message_id,
            OcppMessage::CallError(e) => &e.message_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            OcppMessage::Call(c) => c.to_bytes(),
            OcppMessage::CallResult(r) => r.to_bytes(),
            OcppMessage::CallError(e) => e.to_bytes(),
        }
    }
}

fn non_empty_str(value: &Value) -> Result<String, FrameError> {
    match value.as_str() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(FrameError::Framing("message id must not be empty".into())),
        None => Err(FrameError::Framing("message id is not a string".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_call_serializes_compactly() {
        let call = Call::heartbeat().unwrap();
        let bytes = call.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("[2,"));
        assert!(text.contains("\"Heartbeat\""));
        assert!(!text.contains(' '));
    }

    #[test]
    fn call_parses() {
        let json = r#"[2, "msg-123", "Heartbeat", {}]"#;
        match OcppMessage::parse(json.as_bytes()).unwrap() {
            OcppMessage::Call(call) => {
                assert_eq!(call.message_id, "msg-123");
                assert_eq!(call.action, Action::Heartbeat);
            }
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn call_result_parses() {
        let json = r#"[3, "msg-123", {"currentTime": "2026-01-20T12:00:00Z"}]"#;
        match OcppMessage::parse(json.as_bytes()).unwrap() {
            OcppMessage::CallResult(result) => assert_eq!(result.message_id, "msg-123"),
            _ => panic!("expected CallResult"),
        }
    }

    #[test]
    fn call_error_parses_known_code() {
        let json = r#"[4, "msg-123", "NotImplemented", "Action not supported", {}]"#;
        match OcppMessage::parse(json.as_bytes()).unwrap() {
            OcppMessage::CallError(error) => {
                assert_eq!(error.message_id, "msg-123");
                assert_eq!(error.error_code, ErrorCode::NotImplemented);
            }
            _ => panic!("expected CallError"),
        }
    }

    #[test]
    fn rejects_non_array_frame() {
        let err = OcppMessage::parse(br#"{"not":"an array"}"#).unwrap_err();
        assert!(matches!(err, FrameError::Framing(_)));
    }

    #[test]
    fn rejects_unknown_message_type() {
        let json = r#"[9, "msg-1", {}]"#;
        let err = OcppMessage::parse(json.as_bytes()).unwrap_err();
        assert!(matches!(err, FrameError::UnknownFrameType(9)));
    }

    #[test]
    fn set_charging_profile_payload_parses() {
        let json = r#"[2, "uuid-456", "SetChargingProfile", {
            "connectorId": 1,
            "csChargingProfiles": {
                "chargingProfileId": 1,
                "stackLevel": 0,
                "chargingProfilePurpose": "TxDefaultProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": {
                    "chargingRateUnit": "W",
                    "chargingSchedulePeriod": [
                        {"startPeriod": 0, "limit": 22000.0}
                    ]
                }
            }
        }]"#;

        match OcppMessage::parse(json.as_bytes()).unwrap() {
            OcppMessage::Call(call) => {
                assert_eq!(call.action, Action::SetChargingProfile);
                let req: SetChargingProfileRequest = serde_json::from_value(call.payload).unwrap();
                assert_eq!(req.connector_id, 1);
                assert_eq!(req.cs_charging_profiles.id, 1);
            }
            _ => panic!("expected Call"),
        }
    }
}
