//! Tollgate - HTTP Admission Control
//!
//! This crate gates incoming HTTP requests by identity (client address or API
//! token) against a fixed-window request ceiling. An identity that exceeds its
//! ceiling is blocked for a configurable duration. Counters live either in
//! process memory or in a shared Redis instance, with identical semantics.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
