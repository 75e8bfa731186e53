//! Tollgate - Request Rate Limiting
//!
//! This crate implements the request rate limiter that sits in front of a
//! multi-tenant marketing dashboard. Requests are classified by route,
//! counted per caller in fixed windows, scaled by subscription plan, and
//! either rejected with a 429 or passed through with standard rate limit
//! headers.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
