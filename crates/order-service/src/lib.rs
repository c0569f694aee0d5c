//! # Order Service
//!
//! HTTP front end, configuration and process lifecycle around [`order_pipeline`].
//! Exposed as a library so the integration tests can drive the router in-process.

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
