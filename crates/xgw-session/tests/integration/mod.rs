//! Shared helpers for xgw-session integration tests.

pub mod common;
