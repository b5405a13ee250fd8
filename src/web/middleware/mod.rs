//! # Web Middleware
//!
//! - [`request_id`] - `X-Request-ID` on every response
//! - [`auth`] - API key check on `/v1` when a key is configured

pub mod auth;
pub mod request_id;
