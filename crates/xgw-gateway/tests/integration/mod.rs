//! Shared helpers for xgw-gateway integration tests.

pub mod common;
