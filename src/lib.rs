//! Smart Kissan integration layer.
//!
//! Relays farm events (crop updates, weather alerts, sensor data) to a
//! webhook endpoint, receives them on the other side, lists the persisted
//! event log, and fronts account management against a managed identity
//! provider.

pub mod config;
pub mod error;
pub mod identity;
pub mod receiver;
pub mod relay;
pub mod rpc;
pub mod samples;
pub mod store;
pub mod telemetry;
pub mod types;
