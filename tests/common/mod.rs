//! Shared test utilities for rewind
//!
//! This module provides common helpers for integration tests:
//! - Source files with distinctive lines for breakpoint remapping
//! - A state session wired to in-memory debugger mocks
