//! Turnstile - Per-Identity Admission Control
//!
//! This crate decides, for every request tagged with a caller identity,
//! whether it may proceed under a fixed-window quota. Counters live in a
//! shared store (Redis in production) and are updated with a single atomic
//! increment per request, so any number of service instances can enforce
//! the same limits without coordinating with each other.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
