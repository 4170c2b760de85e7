//! Isohost - isolated script instance host
//!
//! This crate wires the `isohost-runtime` registry to the outside world:
//! - Layered server configuration (figment)
//! - HTTP routes for creating, running and deleting instances (axum)

pub mod config;
pub mod server;
