//! Session state machine and port definitions for Pumplink.
//!
//! This crate defines the "ports" (repository and relay traits) that the
//! infrastructure layer implements, the pure context assembler, and the
//! per-connection session worker. It depends only on `pumplink-types` --
//! never on `pumplink-infra` or any database/IO crate.

pub mod auth;
pub mod context;
pub mod relay;
pub mod repository;
pub mod session;
