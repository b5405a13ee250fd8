//! # Web API Handlers

pub mod health;
pub mod operations;
pub mod runs;
