//! Authentication abuse tracking infrastructure

pub mod tracker;

pub use tracker::{AbuseConfig, AbuseStats, AbuseTracker};
