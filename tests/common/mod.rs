//! Shared test support for recovery source tests
//!
//! - In-memory cluster routing, local shards, and target clients
//! - A harness wiring them into a `RecoveryCoordinator`

#![allow(dead_code)]

pub mod harness;
pub mod mocks;

pub use harness::*;
pub use mocks::*;
