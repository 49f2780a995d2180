//! OpenAI-compatible chat analyzer

use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{Analysis, AnalyzeOptions, RawAnalysis};
use crate::traits::ChunkAnalyzer;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use textloom_config::ProviderConfig;
use tracing::{debug, warn};

/// Retry schedule for transient provider failures
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Document context passed to the model is capped to keep prompts bounded
const DOCUMENT_CONTEXT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You analyze a text chunk in the context of its full document. \
Respond with a single JSON object with these keys: \
sentiment (positive|neutral|negative), category, content_type, \
technical_level (beginner|intermediate|advanced), main_topics (array of up to 5 strings), \
key_concepts (string), emotions (array of strings), tags (comma-separated string), \
key_entities (object with people, organizations, locations arrays). \
When asked for a contextual_summary, add it: at most two sentences describing how the \
chunk fits within the whole document. When asked for a document_summary, add it: a short \
summary of the entire document.";

/// Chunk analyzer backed by an OpenAI-compatible chat completions API
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl OpenAiAnalyzer {
    /// Build an analyzer from provider configuration
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::Network` if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> AnalysisResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.analysis_timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn request_once(&self, prompt: &str) -> AnalysisResult<String> {
        let body = json!({
            "model": self.config.chat_model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout
            } else {
                AnalysisError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(AnalysisError::RateLimited(detail));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AnalysisError::Auth(format!("status {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream {
                status: status.as_u16(),
                message: detail,
            });
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Schema(format!("response envelope: {e}")))?;
        envelope
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AnalysisError::Schema("no choices in response".to_string()))
    }

    /// One request with the analyzer-internal retry schedule applied
    async fn request_with_retry(&self, prompt: &str) -> AnalysisResult<String> {
        let mut attempt = 1u32;
        loop {
            match self.request_once(prompt).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_with_jitter(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Analysis attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChunkAnalyzer for OpenAiAnalyzer {
    async fn analyze(
        &self,
        chunk_text: &str,
        document_text: &str,
        options: &AnalyzeOptions,
    ) -> AnalysisResult<Analysis> {
        let prompt = build_prompt(chunk_text, document_text, options);
        let content = self.request_with_retry(&prompt).await?;

        // Malformed model output degrades to a default analysis instead of
        // failing the chunk
        match serde_json::from_str::<RawAnalysis>(&content) {
            Ok(raw) => Ok(raw.coerce(options)),
            Err(e) => {
                debug!(error = %e, "Model output failed schema parse, using defaults");
                Ok(Analysis::failed(format!("schema parse failed: {e}")))
            }
        }
    }
}

fn build_prompt(chunk_text: &str, document_text: &str, options: &AnalyzeOptions) -> String {
    let context: String = document_text.chars().take(DOCUMENT_CONTEXT_CHARS).collect();
    let mut asks = Vec::new();
    if options.contextual_summary {
        asks.push("include contextual_summary");
    }
    if options.document_summary {
        asks.push("include document_summary");
    }
    let asks = if asks.is_empty() {
        String::new()
    } else {
        format!("\n\nAdditionally: {}.", asks.join(", "))
    };

    format!("DOCUMENT:\n{context}\n\nCHUNK:\n{chunk_text}{asks}")
}

/// Exponential backoff with ±20% jitter: min(base * 2^(k-1), cap)
fn backoff_with_jitter(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: "test-key".to_string(),
            base_url,
            chat_model: "test-model".to_string(),
            embedding_model: "test-embed".to_string(),
            embedding_dimensions: 4,
            batch_size: 10,
            analysis_timeout_secs: 5,
            embedding_timeout_secs: 5,
        }
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [ { "message": { "role": "assistant", "content": content } } ]
        })
    }

    #[tokio::test]
    async fn test_analyze_parses_model_json() {
        let server = MockServer::start().await;
        let analysis_json = json!({
            "sentiment": "positive",
            "category": "science",
            "content_type": "article",
            "technical_level": "advanced",
            "main_topics": ["physics"],
            "key_concepts": "entropy",
            "emotions": ["curiosity"],
            "tags": "physics,entropy",
            "key_entities": { "people": ["Boltzmann"], "organizations": [], "locations": [] },
            "contextual_summary": "Introduces the core idea."
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                &serde_json::to_string(&analysis_json).unwrap(),
            )))
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::new(provider_config(server.uri())).unwrap();
        let options = AnalyzeOptions {
            contextual_summary: true,
            document_summary: false,
        };
        let analysis = analyzer.analyze("chunk", "document", &options).await.unwrap();

        assert_eq!(analysis.sentiment, "positive");
        assert_eq!(analysis.main_topics, vec!["physics"]);
        assert_eq!(analysis.key_entities.people, vec!["Boltzmann"]);
        assert_eq!(
            analysis.contextual_summary.as_deref(),
            Some("Introduces the core idea.")
        );
        assert!(analysis.analysis_error.is_none());
    }

    #[tokio::test]
    async fn test_analyze_coerces_garbage_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("not json at all")))
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::new(provider_config(server.uri())).unwrap();
        let analysis = analyzer
            .analyze("chunk", "document", &AnalyzeOptions::default())
            .await
            .unwrap();

        assert_eq!(analysis.sentiment, "neutral");
        assert!(analysis.analysis_error.is_some());
    }

    #[tokio::test]
    async fn test_analyze_retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{}")))
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::new(provider_config(server.uri())).unwrap();
        let analysis = analyzer
            .analyze("chunk", "document", &AnalyzeOptions::default())
            .await
            .unwrap();
        assert!(analysis.analysis_error.is_none());
    }

    #[tokio::test]
    async fn test_analyze_auth_failure_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::new(provider_config(server.uri())).unwrap();
        let err = analyzer
            .analyze("chunk", "document", &AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Auth(_)));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        for attempt in 1..=10u32 {
            let delay = backoff_with_jitter(attempt);
            assert!(delay <= Duration::from_millis((BACKOFF_CAP_MS as f64 * 1.2) as u64));
        }
        let first = backoff_with_jitter(1);
        assert!(first >= Duration::from_millis(800));
        assert!(first <= Duration::from_millis(1_200));
    }
}
