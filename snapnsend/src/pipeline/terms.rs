//! Search term extraction.
//!
//! An OpenAI-compatible chat completion endpoint is asked for image search terms related to the
//! user's prompt, and the free-text reply is parsed into a short list. Extraction never fails:
//! any upstream problem falls back to using the prompt itself as the only term.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{PipelineError, ensure_slash, http_client};
use crate::config::LlmConfig;

/// Upper bound on the number of terms returned.
pub const MAX_TERMS: usize = 10;

/// Candidates of this length or shorter are discarded.
const MIN_TERM_CHARS: usize = 3;

/// Turns a prompt into an ordered, deduplicated list of at most [`MAX_TERMS`] search terms.
#[async_trait]
pub trait ExtractTerms: Send + Sync {
    async fn extract(&self, prompt: &str) -> Vec<String>;
}

/// Used when no LLM API key is configured.
pub struct PassthroughExtractor;

#[async_trait]
impl ExtractTerms for PassthroughExtractor {
    async fn extract(&self, prompt: &str) -> Vec<String> {
        vec![prompt.to_string()]
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

/// Extractor backed by a chat completion API (Perplexity by default).
pub struct LlmTermExtractor {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

impl LlmTermExtractor {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Pick the live extractor when a key is configured, otherwise the passthrough.
    pub fn from_config(config: &LlmConfig) -> Result<Box<dyn ExtractTerms>, PipelineError> {
        match &config.api_key {
            Some(key) => Ok(Box::new(Self::new(config, key.clone())?)),
            None => {
                debug!("No LLM API key configured, prompts are used verbatim as search terms");
                Ok(Box::new(PassthroughExtractor))
            }
        }
    }

    async fn request_reply(&self, prompt: &str) -> anyhow::Result<String> {
        let url = ensure_slash(&self.base_url)
            .join("chat/completions")
            .context("Failed to construct chat completions URL")?;

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: format!("Provide 5-10 search terms related to '{prompt}' that would be good for image search."),
            }],
            temperature: self.temperature,
        };

        let response = self.client.post(url).bearer_auth(&self.api_key).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error: {status} - {body}"));
        }

        let parsed: ChatCompletionResponse = response.json().await.context("error decoding response body")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("LLM reply contained no choices"))
    }
}

#[async_trait]
impl ExtractTerms for LlmTermExtractor {
    #[instrument(skip(self), fields(model = %self.model))]
    async fn extract(&self, prompt: &str) -> Vec<String> {
        match self.request_reply(prompt).await {
            Ok(reply) => {
                let terms = parse_search_terms(&reply);
                if terms.is_empty() {
                    warn!("LLM reply contained no usable search terms, using the prompt");
                    vec![prompt.to_string()]
                } else {
                    debug!(count = terms.len(), "Extracted search terms");
                    terms
                }
            }
            Err(e) => {
                warn!(error = %e, "Search term extraction failed, using the prompt");
                vec![prompt.to_string()]
            }
        }
    }
}

/// Strip a leading list marker such as `3. `, `3) `, `- `, `* ` or `• `.
fn strip_list_marker(line: &str) -> &str {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
        return line;
    }

    for bullet in ['-', '*', '•'] {
        match line.strip_prefix(bullet) {
            Some(rest) if rest.starts_with(char::is_whitespace) => return rest.trim_start(),
            _ => {}
        }
    }
    line
}

/// Parse a free-text LLM reply into search terms.
///
/// Lines are trimmed and stripped of list markers; lines longer than 3 characters are kept. If
/// that yields nothing, the reply is split on commas instead. The result keeps the first
/// occurrence of each term and is truncated to [`MAX_TERMS`].
pub fn parse_search_terms(text: &str) -> Vec<String> {
    let mut candidates: Vec<&str> = text
        .lines()
        .map(|line| strip_list_marker(line.trim()))
        .filter(|term| term.chars().count() > MIN_TERM_CHARS)
        .collect();

    if candidates.is_empty() {
        candidates = text
            .split(',')
            .map(str::trim)
            .filter(|term| term.chars().count() > MIN_TERM_CHARS)
            .collect();
    }

    let mut terms: Vec<String> = Vec::with_capacity(MAX_TERMS);
    for candidate in candidates {
        if terms.len() == MAX_TERMS {
            break;
        }
        if !terms.iter().any(|t| t == candidate) {
            terms.push(candidate.to_string());
        }
    }
    terms
}
