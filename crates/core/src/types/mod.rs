//! Core types for Replica Chat.
//!
//! This module provides type-safe wrappers for the domain records exchanged
//! with the hosted replica platform.

pub mod email;
pub mod id;
pub mod message;
pub mod replica;
pub mod user;

pub use email::{Email, EmailError};
pub use id::*;
pub use message::{Message, MessageRole};
pub use replica::{LlmConfig, NewReplica, Replica, ReplicaType};
pub use user::User;
