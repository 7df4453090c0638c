//! Integration tests for Cascade
//!
//! These tests run the dispatcher on a real loopback socket and talk to it
//! through the protocol client. Stream processes are replaced by a recording
//! launcher so no external tools are needed.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/catalog_startup.rs"]
mod catalog_startup;
#[path = "integration/dispatcher_sessions.rs"]
mod dispatcher_sessions;
#[path = "integration/usage_stats.rs"]
mod usage_stats;
