//! Tenant screening reconciliation engine.
//!
//! Talks to the background-check vendor, accepts its webhooks, polls it as a fallback and
//! keeps each rental submission's screening status moving forward.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
