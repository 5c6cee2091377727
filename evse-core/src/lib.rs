//! # evse-core
//!
//! OCPP-J 1.6 session runtime for simulating electric vehicle charge points
//! at load-test scale. One [`ocpp::client::SessionHandle`] drives one
//! simulated charge point through the wire protocol; [`pool::Pool`] ramps up
//! many of them against a single CSMS target and aggregates their metrics;
//! [`control::Core`] is the external API a harness or CLI drives both
//! through.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  control::Core                │
//! │   CreateSession / SendCall / SetProfile / ...  │
//! └───────────────────────┬────────────────────────┘
//!                         │
//!                   ┌─────▼─────┐
//!                   │ pool::Pool │  ramp, metrics, inject/broadcast
//!                   └─────┬─────┘
//!                         │ owns many
//!                 ┌───────▼────────┐
//!                 │ SessionHandle   │  bounded inbox per session
//!                 └───────┬────────┘
//!                         │ commands
//!                ┌────────▼─────────┐
//!                │ run_session task  │  single writer: Session + socket
//!                │  Session state    │
//!                │  ProfileStore     │
//!                │  PendingRegistry  │
//!                └────────┬─────────┘
//!                         │ OCPP-J over WebSocket (subprotocol "ocpp1.6")
//!                         ▼
//!                        CSMS
//! ```
//!
//! Every session actor publishes state changes and frames onto a shared
//! [`events::EventBus`], which [`tnr`] and external subscribers observe
//! without ever touching session state directly.
//!
//! ## Usage
//!
//! ```no_run
//! use evse_core::clock::system_clock;
//! use evse_core::config::PoolConfig;
//! use evse_core::control::Core;
//! use evse_core::events::EventBus;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut core = Core::new(system_clock(), EventBus::default(), 1000);
//!     let config = PoolConfig::new("ramp", "ws://localhost:8180/ocpp", 1000);
//!     core.start_batch(config).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod ocpp;
pub mod pool;
pub mod profile;
pub mod tnr;

pub use config::{ConnectorConfig, PoolConfig, SessionConfig};
pub use control::Core;
pub use error::CoreError;
pub use ocpp::{spawn_session, Action, SessionHandle, SessionSnapshot, SessionState};
pub use pool::Pool;
