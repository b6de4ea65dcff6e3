//! HttpInferenceRelay -- concrete [`InferenceRelay`] implementation.
//!
//! Bridges chat turns to the external answer-generation backend over a
//! plain request/response POST with a bounded timeout. The relay never
//! propagates transport errors upward: timeout, non-2xx status, or a
//! malformed body all degrade to the canned fallback answer, which the
//! session persists like any other assistant turn.

use std::time::Duration;

use pumplink_core::relay::{FALLBACK_ANSWER, InferenceRelay};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Serialize)]
struct AskRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct AskResponse {
    answer: String,
}

/// HTTP bridge to the inference backend.
pub struct HttpInferenceRelay {
    client: reqwest::Client,
    url: String,
}

impl HttpInferenceRelay {
    /// Create a relay for the given endpoint with a request timeout.
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

impl InferenceRelay for HttpInferenceRelay {
    async fn ask(&self, prompt: &str) -> String {
        let response = match self
            .client
            .post(&self.url)
            .json(&AskRequest { prompt })
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "Inference backend unreachable, using fallback answer");
                return FALLBACK_ANSWER.to_string();
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "Inference backend returned an error status");
            return FALLBACK_ANSWER.to_string();
        }

        match response.json::<AskResponse>().await {
            Ok(body) if !body.answer.trim().is_empty() => body.answer,
            Ok(_) => {
                warn!("Inference backend returned an empty answer");
                FALLBACK_ANSWER.to_string()
            }
            Err(err) => {
                warn!(error = %err, "Inference backend returned a malformed body");
                FALLBACK_ANSWER.to_string()
            }
        }
    }
}
