//! VLM interaction: send the case prompt and images, retry until a reply is accepted.
//!
//! The provider is reached through the [`VisionClient`] capability so the
//! retry driver can be exercised without a network. [`LlmVisionClient`] is
//! the production implementation over `edgequake_llm`.
//!
//! ## Retry Strategy
//!
//! [`attempt`] performs exactly one call and turns the reply into either a
//! completion or an [`AttemptError`] using the provider's
//! [`ResponseClassifier`]. [`query_with_retries`] folds `attempt` over at most
//! `max_attempts` iterations, shrinking the images between attempts when the
//! classifier asks for it. A fatal outcome (quota exceeded) ends the fold
//! immediately and is surfaced to the caller, which aborts the whole run.

use crate::config::DiagnosisConfig;
use crate::error::CaseDxError;
use crate::pipeline::classify::{Outcome, ResponseClassifier};
use crate::pipeline::encode::{EncodeError, EncodedImage, UploadEncoder};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A completed model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Any failure raised by the provider call itself.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ClientError(pub String);

/// `complete(prompt, images, temperature) -> text | error`.
#[allow(async_fn_in_trait)]
pub trait VisionClient {
    async fn complete(
        &self,
        prompt: &str,
        images: &[EncodedImage],
        temperature: f32,
    ) -> Result<Completion, ClientError>;
}

/// [`VisionClient`] backed by an `edgequake_llm` provider.
pub struct LlmVisionClient {
    provider: Arc<dyn LLMProvider>,
    max_tokens: Option<usize>,
    call_timeout: Duration,
}

impl LlmVisionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, max_tokens: Option<usize>, call_timeout: Duration) -> Self {
        Self {
            provider,
            max_tokens,
            call_timeout,
        }
    }

    /// Build the client the configuration describes.
    ///
    /// The provider's API key must already be in the environment.
    pub fn from_config(config: &DiagnosisConfig) -> Result<Self, CaseDxError> {
        let provider = config.provider;
        let key_var = provider.api_key_var();
        let key_present = std::env::var(key_var).map(|k| !k.is_empty()).unwrap_or(false);
        if !key_present {
            return Err(CaseDxError::ProviderNotConfigured {
                provider: provider.to_string(),
                hint: format!("Set {key_var} in the environment or in the --env-file."),
            });
        }

        let model = config.model.as_deref().unwrap_or(provider.default_model());
        let llm = ProviderFactory::create_llm_provider(provider.factory_name(), model).map_err(|e| {
            CaseDxError::ProviderNotConfigured {
                provider: provider.to_string(),
                hint: format!("{e}"),
            }
        })?;

        Ok(Self::new(
            llm,
            config.max_tokens,
            Duration::from_secs(config.api_timeout_secs),
        ))
    }
}

impl VisionClient for LlmVisionClient {
    async fn complete(
        &self,
        prompt: &str,
        images: &[EncodedImage],
        temperature: f32,
    ) -> Result<Completion, ClientError> {
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            images.iter().map(EncodedImage::to_image_data).collect(),
        )];
        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: self.max_tokens,
            ..Default::default()
        };

        let response = timeout(self.call_timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| ClientError(format!("timed out after {}s", self.call_timeout.as_secs())))?
            .map_err(|e| ClientError(e.to_string()))?;

        Ok(Completion {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

// ── Retry driver ─────────────────────────────────────────────────────────────

/// Bounds of the retry fold.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled after each further one up to
    /// [`MAX_BACKOFF_MS`]. 0 = none.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_ms: 0,
        }
    }
}

/// Longest single wait between attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

impl RetryPolicy {
    /// Delay before attempt `n` (1-based). Saturates and is capped at [`MAX_BACKOFF_MS`].
    pub fn backoff_before(&self, n: u32) -> u64 {
        if n < 2 || self.backoff_ms == 0 {
            return 0;
        }
        let factor = 2u64.checked_pow(n - 2).unwrap_or(u64::MAX);
        self.backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
    }
}

/// Why a single attempt did not produce an accepted completion.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    Retry { reason: String, shrink: Option<f32> },
    Fatal(String),
}

/// Error ending a query before the attempt cap.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("fatal provider error: {0}")]
    Fatal(String),

    #[error("re-encoding images failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Result of the whole retry fold.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Answered { completion: Completion, attempts: u32 },
    /// Every attempt was refused or failed; no answer to persist.
    Exhausted { attempts: u32, last_reason: String },
}

/// One provider call, classified.
pub async fn attempt<C: VisionClient>(
    client: &C,
    classifier: &dyn ResponseClassifier,
    prompt: &str,
    images: &[EncodedImage],
    temperature: f32,
) -> Result<Completion, AttemptError> {
    let (outcome, completion) = match client.complete(prompt, images, temperature).await {
        Ok(c) => (classifier.classify_response(&c.text), Some(c)),
        Err(e) => (classifier.classify_error(&e.0), None),
    };

    match (outcome, completion) {
        (Outcome::Accepted(_), Some(c)) => Ok(c),
        (Outcome::FatalError(msg), _) => Err(AttemptError::Fatal(msg)),
        (other, _) => {
            let shrink = classifier.shrink_factor(&other);
            let reason = match other {
                Outcome::Accepted(s)
                | Outcome::Refused(s)
                | Outcome::RetryableError(s)
                | Outcome::FatalError(s) => s,
            };
            Err(AttemptError::Retry { reason, shrink })
        }
    }
}

/// Query the model until a reply is accepted or `policy.max_attempts` is spent.
#[allow(clippy::too_many_arguments)]
pub async fn query_with_retries<C: VisionClient>(
    client: &C,
    classifier: &dyn ResponseClassifier,
    encoder: &UploadEncoder,
    label: &str,
    prompt: &str,
    mut images: Vec<EncodedImage>,
    temperature: f32,
    policy: &RetryPolicy,
) -> Result<QueryOutcome, QueryError> {
    let mut last_reason = String::from("no attempt made");

    for n in 1..=policy.max_attempts {
        let backoff = policy.backoff_before(n);
        if backoff > 0 {
            debug!("{}: waiting {}ms before attempt {}", label, backoff, n);
            sleep(Duration::from_millis(backoff)).await;
        }

        match attempt(client, classifier, prompt, &images, temperature).await {
            Ok(completion) => {
                debug!(
                    "{}: accepted on attempt {} ({} in / {} out tokens)",
                    label, n, completion.input_tokens, completion.output_tokens
                );
                return Ok(QueryOutcome::Answered {
                    completion,
                    attempts: n,
                });
            }
            Err(AttemptError::Fatal(msg)) => {
                warn!("{}: fatal provider error: {}", label, msg);
                return Err(QueryError::Fatal(msg));
            }
            Err(AttemptError::Retry { reason, shrink }) => {
                warn!(
                    "{}: attempt {}/{} not accepted: {}",
                    label, n, policy.max_attempts, reason
                );
                if let Some(factor) = shrink {
                    if n < policy.max_attempts {
                        images = images
                            .iter()
                            .map(|img| encoder.shrink(img, factor))
                            .collect::<Result<Vec<_>, _>>()?;
                        debug!("{}: re-encoded {} images at ×{}", label, images.len(), factor);
                    }
                }
                last_reason = reason;
            }
        }
    }

    Ok(QueryOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_reason,
    })
}
