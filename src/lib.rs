//! Virtual Inverter Library
//!
//! Monitors a Shelly EM on the grid feed and one on the AC loads, publishes the
//! telemetry of a virtual vebus inverter, and drives the grid-tie relay with a
//! zero-export countdown and a low-battery reconnect.

pub mod battery;
pub mod battery_feed;
pub mod charge_state;
pub mod config;
pub mod energy;
pub mod error;
pub mod grid_relay;
pub mod load_balance;
pub mod meter_link;
pub mod phase_flow;
pub mod shared_state;
pub mod shelly_client;
pub mod supervisor;
pub mod telemetry;

// Re-export commonly used types for easier access
pub use config::Config;
pub use error::{ConfigError, CycleError, MeterError};
pub use grid_relay::{GridRelayController, RelayDecisionState};
pub use load_balance::LoadBalanceEstimator;
pub use shared_state::{SharedSoc, Shutdown};
pub use supervisor::Supervisor;
pub use telemetry::{TelemetryPublisher, VirtualInverter};
