//! Logging and telemetry setup for bot hosts.
//!
//! [`init_telemetry`] installs a `tracing` subscriber (JSON or pretty,
//! filtered by `RUST_LOG`) with optional OTLP export, and
//! [`TracingTelemetryClient`] forwards bot telemetry events into it.

mod client;
mod config;
mod init;

pub use client::{TELEMETRY_TARGET, TracingTelemetryClient};
pub use config::{LogFormat, OtlpProtocol, TelemetryConfig};
pub use init::{init_telemetry, shutdown_telemetry};
