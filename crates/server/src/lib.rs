//! Replica chat gateway library.
//!
//! This crate provides the gateway as a library so the binary, the
//! maintenance CLI and the integration tests share one implementation.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod upstream;
