//! Response classifiers: map raw provider replies and errors to an [`Outcome`].
//!
//! Each provider signals refusals and hard stops differently (a polite
//! "I'm sorry, but" prefix, a suspiciously short reply, a safety-filter
//! error, a quota message). The string sniffing lives here so the retry
//! driver in [`crate::pipeline::llm`] only ever sees tagged outcomes.

use serde::{Deserialize, Serialize};

/// What a single provider reply means for the retry driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Usable answer; persist it.
    Accepted(String),
    /// The model answered but declined or produced an error-shaped reply.
    Refused(String),
    /// The call failed in a way another attempt may fix.
    RetryableError(String),
    /// The call failed in a way that must stop the whole run.
    FatalError(String),
}

/// Per-provider interpretation of replies and errors.
pub trait ResponseClassifier: Send + Sync {
    /// Classify the text of a successful completion.
    fn classify_response(&self, text: &str) -> Outcome;

    /// Classify the message of a failed call.
    fn classify_error(&self, message: &str) -> Outcome;

    /// Scale factor to re-encode images with before retrying `outcome`,
    /// or `None` to resend the same images.
    fn shrink_factor(&self, outcome: &Outcome) -> Option<f32>;
}

/// Vision provider the requester talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    /// Name understood by `edgequake_llm::ProviderFactory`.
    pub fn factory_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::Gemini => "gemini-1.5-pro",
        }
    }

    /// Prefix of the result folders (`<prefix>_result/…`).
    pub fn result_prefix(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt4v",
            Provider::Gemini => "gemini",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Completion token cap sent with each request.
    pub fn default_max_tokens(self) -> Option<usize> {
        match self {
            Provider::OpenAi => Some(1024),
            Provider::Gemini => None,
        }
    }

    pub fn classifier(self) -> Box<dyn ResponseClassifier> {
        match self {
            Provider::OpenAi => Box::new(OpenAiClassifier),
            Provider::Gemini => Box::new(GeminiClassifier),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.factory_name())
    }
}

fn is_quota_error(message: &str) -> bool {
    message.to_lowercase().contains("exceeded")
}

// ── OpenAI ───────────────────────────────────────────────────────────────────

const OPENAI_REFUSAL_PREFIX: &str = "I'm sorry, but";

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiClassifier;

impl ResponseClassifier for OpenAiClassifier {
    fn classify_response(&self, text: &str) -> Outcome {
        if text.starts_with(OPENAI_REFUSAL_PREFIX) {
            Outcome::Refused(text.to_string())
        } else {
            Outcome::Accepted(text.to_string())
        }
    }

    fn classify_error(&self, message: &str) -> Outcome {
        if is_quota_error(message) {
            Outcome::FatalError(message.to_string())
        } else {
            Outcome::RetryableError(message.to_string())
        }
    }

    fn shrink_factor(&self, outcome: &Outcome) -> Option<f32> {
        match outcome {
            Outcome::Refused(_) => Some(0.9),
            Outcome::RetryableError(msg) if msg.to_lowercase().contains("image_parse_error") => {
                Some(0.9)
            }
            _ => None,
        }
    }
}

// ── Gemini ───────────────────────────────────────────────────────────────────

/// Replies shorter than this are error fragments, not diagnoses.
const GEMINI_MIN_REPLY_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiClassifier;

impl ResponseClassifier for GeminiClassifier {
    fn classify_response(&self, text: &str) -> Outcome {
        if text.chars().count() < GEMINI_MIN_REPLY_CHARS {
            Outcome::Refused(text.to_string())
        } else {
            Outcome::Accepted(text.to_string())
        }
    }

    fn classify_error(&self, message: &str) -> Outcome {
        if is_quota_error(message) {
            Outcome::FatalError(message.to_string())
        } else {
            Outcome::RetryableError(message.to_string())
        }
    }

    fn shrink_factor(&self, outcome: &Outcome) -> Option<f32> {
        match outcome {
            Outcome::Refused(_) => Some(0.9),
            Outcome::RetryableError(msg) if msg.to_lowercase().contains("safety") => Some(0.7),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_refusal_prefix() {
        let c = OpenAiClassifier;
        let out = c.classify_response("I'm sorry, but I can't help with that.");
        assert!(matches!(out, Outcome::Refused(_)));
        assert_eq!(c.shrink_factor(&out), Some(0.9));

        let out = c.classify_response("1. Erdheim-Chester disease (7/10) ...");
        assert!(matches!(out, Outcome::Accepted(_)));
    }

    #[test]
    fn openai_errors() {
        let c = OpenAiClassifier;
        assert!(matches!(
            c.classify_error("You EXCEEDED your current quota"),
            Outcome::FatalError(_)
        ));

        let parse = c.classify_error("400 invalid_request_error: image_parse_error");
        assert!(matches!(parse, Outcome::RetryableError(_)));
        assert_eq!(c.shrink_factor(&parse), Some(0.9));

        let other = c.classify_error("connection reset by peer");
        assert!(matches!(other, Outcome::RetryableError(_)));
        assert_eq!(c.shrink_factor(&other), None);
    }

    #[test]
    fn gemini_short_reply_is_refused() {
        let c = GeminiClassifier;
        let out = c.classify_response("Error");
        assert!(matches!(out, Outcome::Refused(_)));
        assert_eq!(c.shrink_factor(&out), Some(0.9));
        assert!(matches!(
            c.classify_response("Candidate 1: sarcoidosis"),
            Outcome::Accepted(_)
        ));
    }

    #[test]
    fn gemini_safety_block_shrinks_harder() {
        let c = GeminiClassifier;
        let out = c.classify_error("Content blocked: finish_reason=SAFETY");
        assert!(matches!(out, Outcome::RetryableError(_)));
        assert_eq!(c.shrink_factor(&out), Some(0.7));
        assert!(matches!(
            c.classify_error("Resource has been exhausted (quota exceeded)"),
            Outcome::FatalError(_)
        ));
    }

    #[test]
    fn provider_metadata() {
        assert_eq!(Provider::OpenAi.result_prefix(), "gpt4v");
        assert_eq!(Provider::Gemini.factory_name(), "gemini");
        assert_eq!(Provider::OpenAi.default_max_tokens(), Some(1024));
        assert_eq!(Provider::Gemini.to_string(), "gemini");
    }
}
