//! Authenticated user identity.
//!
//! Produced once by the token verifier during the connection handshake.
//! The gateway treats it as read-only; account management lives in the
//! external identity system.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Access role of an authenticated user.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (role IN ('admin', 'operator'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Operator
    }
}

/// Stable identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Opaque stable identifier assigned by the external identity system.
    pub user_id: String,
    pub role: Role,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}
