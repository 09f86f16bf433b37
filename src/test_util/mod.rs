//! Helpers for testing code built on the transport, both in this crate's tests and in
//!  applications' tests.

pub mod recording_handler;
pub mod recording_peer;
