//! Infrastructure layer for Pumplink.
//!
//! Contains implementations of the ports defined in `pumplink-core`:
//! SQLite storage (conversations, messages, auth tokens), the HTTP
//! inference relay, and the TOML configuration loader.

pub mod config;
pub mod relay;
pub mod sqlite;
