//! InferenceRelay trait definition.
//!
//! The external answer-generation backend is consumed through a single
//! `ask` operation. The relay is infallible by contract: timeouts,
//! transport errors, and malformed responses all degrade to
//! [`FALLBACK_ANSWER`], which is persisted like any other assistant
//! turn. A flaky backend must never corrupt or crash a chat session.

/// Canned answer used whenever the inference backend cannot produce one.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a moment.";

/// Synchronous request/response bridge to the inference backend.
///
/// Implementations live in pumplink-infra (e.g., `HttpInferenceRelay`).
pub trait InferenceRelay: Send + Sync {
    /// Send a prompt and return the answer text, or the fallback.
    fn ask(&self, prompt: &str) -> impl std::future::Future<Output = String> + Send;
}
