use anyhow::{Context, Result};
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base};

use crate::infra::llm::ChatMessage;

/// Per-message framing overhead used by OpenAI chat models
const TOKENS_PER_MESSAGE: usize = 4;

/// Tokens that prime the assistant reply
const REPLY_PRIMING_TOKENS: usize = 3;

/// Token counter backed by tiktoken-rs
pub struct TokenCounter {
    /// Byte Pair Encoding (BPE) tokenizer for counting tokens
    bpe: CoreBPE,

    /// Name of the encoding actually in use
    encoding: String,
}

impl TokenCounter {
    /// Create a counter for a model or encoding name.
    ///
    /// Model names (e.g. "gpt-4o") are resolved first, then the encoding
    /// names "o200k_base" and "cl100k_base". Unknown names fall back to
    /// o200k_base, since an estimate is still more useful than none.
    pub fn new(model_or_encoding: &str) -> Result<Self> {
        let lower = model_or_encoding.to_ascii_lowercase();

        if let Ok(bpe) = get_bpe_from_model(&lower) {
            return Ok(Self {
                bpe,
                encoding: lower,
            });
        }

        let (bpe, encoding) = match lower.as_str() {
            "cl100k_base" => (cl100k_base().context("load cl100k_base")?, "cl100k_base"),
            "o200k_base" => (o200k_base().context("load o200k_base")?, "o200k_base"),
            other => {
                tracing::debug!(model = other, "unknown tokenizer, using o200k_base");
                (o200k_base().context("load o200k_base")?, "o200k_base")
            }
        };

        Ok(Self {
            bpe,
            encoding: encoding.to_string(),
        })
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Count tokens in a plain string.
    pub fn count(&self, s: &str) -> usize {
        self.bpe.encode_ordinary(s).len()
    }

    /// Estimate prompt tokens for a chat request.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| TOKENS_PER_MESSAGE + self.count(m.role.as_str()) + self.count(&m.content))
            .sum::<usize>()
            + REPLY_PRIMING_TOKENS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_models_and_encodings() -> Result<()> {
        assert_eq!(TokenCounter::new("cl100k_base")?.encoding(), "cl100k_base");
        assert_eq!(TokenCounter::new("O200K_BASE")?.encoding(), "o200k_base");
        assert_eq!(
            TokenCounter::new("some-local-model")?.encoding(),
            "o200k_base"
        );
        Ok(())
    }

    #[test]
    fn message_estimate_exceeds_raw_text() -> Result<()> {
        let counter = TokenCounter::new("o200k_base")?;
        let msgs = vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("hello world"),
        ];
        let raw = counter.count("You are a helpful assistant.") + counter.count("hello world");
        assert!(counter.count_messages(&msgs) > raw);
        Ok(())
    }
}
