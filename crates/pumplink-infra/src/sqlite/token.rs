//! SQLite-backed token verification and issuance.
//!
//! Credentials are opaque `plk_<64 hex>` strings. Only the SHA-256 hash
//! is stored; verification hashes the presented credential and looks it
//! up in the `auth_tokens` table, checking the optional expiry.

use chrono::{DateTime, Duration, Utc};
use pumplink_core::auth::TokenVerifier;
use pumplink_types::error::AuthError;
use pumplink_types::identity::{Role, UserIdentity};
use sha2::{Digest, Sha256};
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `TokenVerifier`.
pub struct SqliteTokenVerifier {
    pool: DatabasePool,
}

impl SqliteTokenVerifier {
    /// Create a new verifier backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Compute the SHA-256 hash of a credential (lowercase hex).
pub fn hash_token(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    format!("{digest:x}")
}

fn is_well_formed(credential: &str) -> bool {
    !credential.is_empty()
        && credential
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl TokenVerifier for SqliteTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<UserIdentity, AuthError> {
        if !is_well_formed(credential) {
            return Err(AuthError::Malformed);
        }

        let row = sqlx::query(
            "SELECT user_id, role, expires_at FROM auth_tokens WHERE token_hash = ?",
        )
        .bind(hash_token(credential))
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| AuthError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Err(AuthError::Unknown);
        };

        let expires_at: Option<String> = row
            .try_get("expires_at")
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        if let Some(raw) = expires_at {
            let expiry = DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| AuthError::Storage(format!("invalid expiry: {e}")))?
                .with_timezone(&Utc);
            if expiry < Utc::now() {
                return Err(AuthError::Expired);
            }
        }

        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let role: Role = role.parse().map_err(AuthError::Storage)?;

        Ok(UserIdentity::new(user_id, role))
    }
}

/// Mint a new credential for a user and store its hash.
///
/// Returns the plaintext token (shown once); only the hash is persisted.
pub async fn issue_token(
    pool: &DatabasePool,
    user_id: &str,
    role: Role,
    ttl: Option<Duration>,
) -> anyhow::Result<String> {
    use rand::RngCore;

    let mut token_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token_bytes);
    let credential = format!(
        "plk_{}",
        token_bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    );

    let now = Utc::now();
    let expires_at = ttl.map(|ttl| (now + ttl).to_rfc3339());

    sqlx::query(
        "INSERT INTO auth_tokens (token_hash, user_id, role, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(hash_token(&credential))
    .bind(user_id)
    .bind(role.to_string())
    .bind(now.to_rfc3339())
    .bind(expires_at)
    .execute(&pool.writer)
    .await?;

    Ok(credential)
}
