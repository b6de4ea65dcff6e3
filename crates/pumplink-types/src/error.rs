use thiserror::Error;

/// Errors from credential verification.
///
/// All variants are fatal to the connection: the gateway closes the
/// socket with the policy-violation code (1008) and never creates a
/// session. This is the only error class allowed to terminate a
/// connection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential missing")]
    Missing,

    #[error("credential malformed")]
    Malformed,

    #[error("credential expired")]
    Expired,

    #[error("credential not recognized")]
    Unknown,

    #[error("verifier storage error: {0}")]
    Storage(String),
}

/// Errors from conversation store operations.
///
/// Non-fatal at the session level: reported to the client as an `error`
/// event with the pending flag cleared, leaving the connection usable.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),
}
