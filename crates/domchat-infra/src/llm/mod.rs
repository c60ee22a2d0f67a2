//! Generation backend implementations.
//!
//! [`create_backend`] picks the backend from the `llm` settings: the
//! OpenAI-compatible client when the API key variable is set, otherwise an
//! [`UnconfiguredBackend`] that fails every round so the server still starts.

pub mod openai_compat;

use std::sync::Arc;

use secrecy::SecretString;

use domchat_core::llm::{GenerationBackend, GenerationStream};
use domchat_types::config::LlmSettings;
use domchat_types::llm::{GenerationEvent, GenerationRequest, LlmError};

pub use self::openai_compat::OpenAiCompatibleBackend;

/// Stand-in used when no API key is available.
#[derive(Debug, Clone)]
pub struct UnconfiguredBackend {
    reason: String,
}

impl UnconfiguredBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl GenerationBackend for UnconfiguredBackend {
    fn name(&self) -> &str {
        "unconfigured"
    }

    fn stream(&self, _request: GenerationRequest) -> GenerationStream {
        let err = LlmError::NotConfigured(self.reason.clone());
        Box::pin(futures_util::stream::once(async move {
            Err::<GenerationEvent, _>(err)
        }))
    }
}

/// Build the backend for `settings`, reading the key through `lookup`.
///
/// `lookup` receives `settings.api_key_env`; pass `|k| std::env::var(k).ok()`
/// in production.
pub fn create_backend(
    settings: &LlmSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Arc<dyn GenerationBackend> {
    let key = lookup(&settings.api_key_env).filter(|k| !k.trim().is_empty());
    let Some(key) = key else {
        tracing::warn!(
            env = %settings.api_key_env,
            "API key not set; generation will fail until it is configured"
        );
        return Arc::new(UnconfiguredBackend::new(format!(
            "{} is not set",
            settings.api_key_env
        )));
    };

    match OpenAiCompatibleBackend::new(SecretString::from(key), settings.base_url.clone()) {
        Ok(backend) => {
            tracing::info!(base_url = %backend.base_url(), model = %settings.model, "generation backend ready");
            Arc::new(backend)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to build generation backend");
            Arc::new(UnconfiguredBackend::new(e.to_string()))
        }
    }
}
