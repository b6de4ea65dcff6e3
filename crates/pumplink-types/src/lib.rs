//! Shared domain types for the Pumplink conversational gateway.
//!
//! Contains the conversation/message model, the authenticated user
//! identity, the WebSocket wire events, and the error taxonomies.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod identity;
