//! HTTP surface and API-facing services for the aria assistants engine.

pub mod http;
pub mod service;
