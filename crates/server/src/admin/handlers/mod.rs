//! Admin API handlers.

pub mod dedup;
