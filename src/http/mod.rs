//! HTTP surface: the request interceptor, its response contract and a
//! stand-alone server.

pub mod interceptor;
pub mod response;
mod server;

pub use interceptor::{protect, rate_limit, CallerIdentity};
pub use response::RateLimitExceeded;
pub use server::HttpServer;
