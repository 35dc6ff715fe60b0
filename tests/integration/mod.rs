//! Integration tests for rewind
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod perf_compare;
pub mod restore_flow;
pub mod rolling_checkpoints;
