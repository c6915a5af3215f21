//! Helpers shared across the crate.

pub mod http_utils;
