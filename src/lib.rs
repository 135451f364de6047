//! Gatewarden - Named-Counter Rate Limiting and Admission Control
//!
//! This crate implements the admission controller a policy-enforcing gateway
//! attaches to request paths. Each call is checked against a named counter's
//! requests-per-second budget and concurrency cap, and over-budget calls may
//! be delayed under a node-wide bound on how many threads can wait at once.
//! Counters are node-local and evicted by a background cleaner once idle.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod simulate;
