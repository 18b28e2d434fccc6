//! Theater Control - Rust Implementation
//!
//! An MQTT-driven control bridge for a home-theater tablet panel.
//!
//! This library provides:
//! - Per-theater activity/device reconciliation from device telemetry
//! - Device and activity catalogs with priority-ordered signature matching
//! - Selection persistence that survives restarts and self-heals
//! - MQTT message bus client (plus an in-process bus for tests)
//! - HTTP command surface for the view layer

pub mod api;
pub mod bus;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod engine;
pub mod persist;
pub mod telemetry;
