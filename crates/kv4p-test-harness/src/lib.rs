//! kv4p-test-harness: Test utilities for kv4p.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! protocol engine without a dongle attached. Tests script the dongle's side
//! of the conversation and inspect what the engine sent.

pub mod mock_serial;

pub use mock_serial::MockTransport;
