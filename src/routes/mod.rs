//! HTTP routes exposed by the gateway.

pub mod chat;
pub mod health;
