//! TokenVerifier trait definition.
//!
//! The gateway hands the raw credential (extracted from the query string,
//! cookie, or WebSocket subprotocol) to the verifier before any session
//! exists. Verification failure closes the connection with the
//! policy-violation code; no store adapter call is ever made for an
//! unauthenticated connection.

use pumplink_types::error::AuthError;
use pumplink_types::identity::UserIdentity;

/// Validates a caller-supplied credential and yields a stable identity.
///
/// Implementations live in pumplink-infra (e.g., `SqliteTokenVerifier`).
pub trait TokenVerifier: Send + Sync {
    fn verify(
        &self,
        credential: &str,
    ) -> impl std::future::Future<Output = Result<UserIdentity, AuthError>> + Send;
}
