//! Token accounting
//!
//! Estimates token counts for prompt and completion text. Each model
//! family gets a dedicated counter; families nobody knows about fall back
//! to a coarse character-based estimate.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Model used when the configured OpenAI model is unknown to the tokenizer
pub const TIKTOKEN_FALLBACK_MODEL: &str = "gpt-4o";

/// Errors raised while counting tokens
#[derive(Debug, Error)]
pub enum TokenError {
    /// A known family has no counter registered
    #[error("No tokenizer available for model family {family}")]
    TokenizerUnavailable { family: String },

    /// The family's tokenizer failed
    #[error("Tokenizer for {family} failed: {message}")]
    Tokenizer { family: String, message: String },
}

/// Model family of an agent, taken from its `llm_name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    OpenAi,
    Anthropic,
    Gemini,
    Other(String),
}

impl ModelFamily {
    pub fn from_llm_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "anthropic" | "claude" => Self::Anthropic,
            "gemini" | "google" => Self::Gemini,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Other(name) => name,
        }
    }

    /// Whether the family has a dedicated tokenizer
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts tokens for one model family
#[async_trait]
pub trait TokenCounter: Send + Sync {
    async fn count(&self, model: &str, text: &str) -> Result<usize, TokenError>;
}

/// BPE counter for OpenAI models
#[derive(Default)]
pub struct TiktokenCounter {
    encoders: Mutex<HashMap<String, Arc<CoreBPE>>>,
}

impl TiktokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn encoder(&self, model: &str) -> Result<Arc<CoreBPE>, TokenError> {
        let mut encoders = self
            .encoders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(encoder) = encoders.get(model) {
            return Ok(Arc::clone(encoder));
        }

        let encoder = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(encoder) => encoder,
            Err(e) => {
                debug!(
                    "Tokenizer does not know model {:?} ({}), using {}",
                    model, e, TIKTOKEN_FALLBACK_MODEL
                );
                tiktoken_rs::get_bpe_from_model(TIKTOKEN_FALLBACK_MODEL).map_err(|e| {
                    TokenError::Tokenizer {
                        family: ModelFamily::OpenAi.to_string(),
                        message: e.to_string(),
                    }
                })?
            }
        };

        let encoder = Arc::new(encoder);
        encoders.insert(model.to_string(), Arc::clone(&encoder));
        Ok(encoder)
    }
}

#[async_trait]
impl TokenCounter for TiktokenCounter {
    async fn count(&self, model: &str, text: &str) -> Result<usize, TokenError> {
        let encoder = self.encoder(model)?;
        Ok(encoder.encode_with_special_tokens(text).len())
    }
}

/// Routes token counting to the counter of a model family
pub struct TokenAccountant {
    counters: HashMap<ModelFamily, Arc<dyn TokenCounter>>,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAccountant {
    /// Accountant with the built-in OpenAI tokenizer registered
    pub fn new() -> Self {
        Self::empty().with_counter(ModelFamily::OpenAi, Arc::new(TiktokenCounter::new()))
    }

    /// Accountant without any family counter
    pub fn empty() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }

    /// Register the counter for a family, replacing any previous one
    pub fn with_counter(mut self, family: ModelFamily, counter: Arc<dyn TokenCounter>) -> Self {
        self.counters.insert(family, counter);
        self
    }

    /// `max(1, chars / 4)`
    pub fn coarse_estimate(text: &str) -> u64 {
        (text.chars().count() / 4).max(1) as u64
    }

    /// Count tokens of `text` for `model` in `family`
    pub async fn count(
        &self,
        family: &ModelFamily,
        model: &str,
        text: &str,
    ) -> Result<u64, TokenError> {
        match self.counters.get(family) {
            Some(counter) => {
                let tokens = counter.count(model, text).await?;
                Ok((tokens as u64).max(1))
            }
            None if family.is_known() => Err(TokenError::TokenizerUnavailable {
                family: family.to_string(),
            }),
            None => Ok(Self::coarse_estimate(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCounter(usize);

    #[async_trait]
    impl TokenCounter for FixedCounter {
        async fn count(&self, _model: &str, _text: &str) -> Result<usize, TokenError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_family_from_llm_name() {
        assert_eq!(ModelFamily::from_llm_name("OpenAI"), ModelFamily::OpenAi);
        assert_eq!(ModelFamily::from_llm_name("anthropic"), ModelFamily::Anthropic);
        assert_eq!(ModelFamily::from_llm_name("gemini"), ModelFamily::Gemini);
        assert_eq!(
            ModelFamily::from_llm_name("mistral"),
            ModelFamily::Other("mistral".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_family_uses_coarse_estimate() {
        let accountant = TokenAccountant::new();
        let family = ModelFamily::Other("mistral".into());

        assert_eq!(accountant.count(&family, "m", "abcdefgh").await.unwrap(), 2);
        assert_eq!(accountant.count(&family, "m", "abc").await.unwrap(), 1);
        assert_eq!(accountant.count(&family, "m", "").await.unwrap(), 1);
        let text = "x".repeat(401);
        assert_eq!(accountant.count(&family, "m", &text).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_known_family_without_counter_fails_loudly() {
        let accountant = TokenAccountant::new();
        let err = accountant
            .count(&ModelFamily::Anthropic, "claude-3-5-sonnet", "hello")
            .await
            .unwrap_err();
        match err {
            TokenError::TokenizerUnavailable { family } => assert_eq!(family, "anthropic"),
            e => panic!("Expected TokenizerUnavailable, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_registered_counter_is_clamped_positive() {
        let accountant =
            TokenAccountant::empty().with_counter(ModelFamily::Gemini, Arc::new(FixedCounter(0)));
        let tokens = accountant
            .count(&ModelFamily::Gemini, "gemini-2.0-flash", "")
            .await
            .unwrap();
        assert_eq!(tokens, 1);
    }

    #[tokio::test]
    async fn test_openai_tokenizer_counts_and_falls_back() {
        let accountant = TokenAccountant::new();
        let text = "The quick brown fox jumps over the lazy dog.";

        let known = accountant
            .count(&ModelFamily::OpenAi, "gpt-4o", text)
            .await
            .unwrap();
        let unknown = accountant
            .count(&ModelFamily::OpenAi, "not-a-real-model", text)
            .await
            .unwrap();

        assert!(known > 0);
        assert_eq!(known, unknown);
    }
}
