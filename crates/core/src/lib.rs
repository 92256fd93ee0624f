//! Replica Chat Core - Shared types library.
//!
//! This crate provides the types shared by every Replica Chat component:
//! - `server` - HTTP gateway in front of the hosted replica platform
//! - `cli` - Maintenance commands and the terminal chat front-end
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no file access. This keeps it lightweight and allows it to be used
//! anywhere, including by a browser-side front-end.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for emails and ids, plus user, replica and message records
//! - [`identity`] - Deterministic user id derivation from an email address
//! - [`session`] - Client-held chat session state

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod identity;
pub mod session;
pub mod types;

pub use session::SessionStore;
pub use types::*;
