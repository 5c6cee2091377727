//! Configuration for a simulated session and for the pool that ramps up
//! many of them.

use std::time::Duration;

/// Per-session configuration: CSMS target, identity, and protocol timers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// CSMS WebSocket URL, without the trailing `/<chargePointId>` segment.
    pub csms_url: String,

    /// Charge point identifier, appended to `csms_url` as the final path
    /// segment.
    pub charge_point_id: String,

    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,

    /// Number of connectors this simulated charge point reports (connector
    /// 0 always denotes the charge point as a whole).
    pub connector_count: u32,

    /// Initial reconnect delay; multiplied by the attempt number, capped at
    /// `max_reconnect_delay`.
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Attempts before the session gives up and stays DISCONNECTED.
    pub max_reconnect_attempts: u32,

    /// Deadline for an outbound CALL awaiting its CALLRESULT/CALLERROR.
    pub request_timeout: Duration,
    /// Ceiling on the pending-call registry.
    pub pending_call_ceiling: usize,
    /// Capacity of the session's command inbox.
    pub inbox_capacity: usize,

    pub heartbeat_interval: Duration,
    pub meter_values_interval: Duration,

    /// Trusts any TLS certificate presented by the CSMS on `wss://` URLs.
    /// Only takes effect when the crate is built with the `insecure-tls`
    /// feature; ignored otherwise.
    pub trust_all_certs: bool,

    pub connector: ConnectorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            csms_url: "ws://localhost:8180/ocpp".to_string(),
            charge_point_id: "CP-001".to_string(),
            vendor: "Elektrokombinacija".to_string(),
            model: "EK-SIM".to_string(),
            serial_number: None,
            firmware_version: Some("0.1.0".to_string()),
            connector_count: 1,
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            request_timeout: Duration::from_secs(30),
            pending_call_ceiling: 256,
            inbox_capacity: 1024,
            heartbeat_interval: Duration::from_secs(30),
            meter_values_interval: Duration::from_secs(60),
            trust_all_certs: cfg!(debug_assertions),
            connector: ConnectorConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(csms_url: impl Into<String>, charge_point_id: impl Into<String>) -> Self {
        Self {
            csms_url: csms_url.into(),
            charge_point_id: charge_point_id.into(),
            ..Default::default()
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self.model = model.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    pub fn with_connector_count(mut self, count: u32) -> Self {
        self.connector_count = count;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connector_config(mut self, connector: ConnectorConfig) -> Self {
        self.connector = connector;
        self
    }
}

/// Electrical parameters used only for A→W limit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectorConfig {
    pub voltage: f64,
    pub phases: u8,
    /// Physical maximum power this connector can deliver; the ceiling all
    /// effective limits are clamped to.
    pub max_power_w: f64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            voltage: 230.0,
            phases: 1,
            max_power_w: 22_000.0,
        }
    }
}

/// Configuration for one `StartBatch` call against the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub scenario: String,
    pub target_count: u32,
    pub ramp_up: Duration,
    pub hold: Duration,
    pub csms_url: String,
    /// Template for charge point ids; `{index}` is substituted, e.g.
    /// `"LOAD-{index}"`.
    pub id_tag_template: String,
    pub meter_values_interval: Duration,
    pub metrics_snapshot_interval: Duration,
    /// Available-memory floor (MiB) below which `StartBatch` is refused.
    pub memory_floor_mb: u64,
    pub session_template: SessionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            scenario: "default".to_string(),
            target_count: 0,
            ramp_up: Duration::from_secs(10),
            hold: Duration::from_secs(60),
            csms_url: "ws://localhost:8180/ocpp".to_string(),
            id_tag_template: "SIM-{index}".to_string(),
            meter_values_interval: Duration::from_secs(60),
            metrics_snapshot_interval: Duration::from_secs(1),
            memory_floor_mb: 256,
            session_template: SessionConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(scenario: impl Into<String>, csms_url: impl Into<String>, target_count: u32) -> Self {
        Self {
            scenario: scenario.into(),
            csms_url: csms_url.into(),
            target_count,
            ..Default::default()
        }
    }

    pub fn with_ramp(mut self, ramp_up: Duration, hold: Duration) -> Self {
        self.ramp_up = ramp_up;
        self.hold = hold;
        self
    }

    pub fn with_id_tag_template(mut self, template: impl Into<String>) -> Self {
        self.id_tag_template = template.into();
        self
    }

    pub fn with_memory_floor_mb(mut self, floor_mb: u64) -> Self {
        self.memory_floor_mb = floor_mb;
        self
    }

    /// Charge point id for the `index`-th session of this batch.
    pub fn charge_point_id(&self, index: u32) -> String {
        self.id_tag_template.replace("{index}", &index.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_builder() {
        let config = SessionConfig::new("ws://localhost:8180/ocpp", "CP-042")
            .with_vendor("EK", "EK3")
            .with_serial("SN001")
            .with_connector_count(2);

        assert_eq!(config.charge_point_id, "CP-042");
        assert_eq!(config.vendor, "EK");
        assert_eq!(config.connector_count, 2);
    }

    #[test]
    fn pool_config_charge_point_id_substitution() {
        let config = PoolConfig::new("ramp", "ws://host/ocpp", 1000).with_id_tag_template("LOAD-{index}");
        assert_eq!(config.charge_point_id(7), "LOAD-7");
    }
}
