use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use agora_core::config::ProviderEntry;
use agora_core::traits::{BackendMessage, ChatBackend, ChatCompletion, ChatRequest, MessageRole};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Estimated completion length charged when a call degrades to a fallback.
const FALLBACK_OUTPUT_TOKENS: u64 = 80;

/// One-shot client for OpenAI-compatible `/chat/completions` endpoints.
///
/// Credentials resolve per provider: the per-call `provider_config` first,
/// then the configured registry entry, then `<PROVIDER>_API_KEY` /
/// `<PROVIDER>_BASE_URL` env vars. A missing key degrades to a mock
/// completion; a request failure degrades to a labeled fallback. Neither is
/// ever an error and neither is retried.
pub struct HttpBackend {
    http: reqwest::Client,
    providers: HashMap<String, ProviderEntry>,
}

impl HttpBackend {
    pub fn new(providers: HashMap<String, ProviderEntry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            providers,
        }
    }

    fn resolve(&self, provider: &str, explicit: Option<&ProviderEntry>) -> (Option<String>, String) {
        let registry = self.providers.get(provider);
        let env_key = provider
            .to_uppercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>();

        let api_key = explicit
            .and_then(|e| e.api_key.clone())
            .or_else(|| registry.and_then(|e| e.api_key.clone()))
            .or_else(|| std::env::var(format!("{env_key}_API_KEY")).ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());

        let base_url = explicit
            .and_then(|e| e.base_url.clone())
            .or_else(|| registry.and_then(|e| e.base_url.clone()))
            .or_else(|| std::env::var(format!("{env_key}_BASE_URL")).ok())
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        (api_key, base_url.trim_end_matches('/').to_string())
    }

    async fn complete_inner(&self, request: ChatRequest) -> ChatCompletion {
        let provider = request.options.provider.to_lowercase();
        let (api_key, base_url) = self.resolve(&provider, request.options.provider_config.as_ref());

        let api_key = match (provider.as_str(), api_key) {
            ("mock", _) | (_, None) => {
                debug!(provider = %provider, model = %request.model, "no credentials, mock completion");
                return mock_completion(&request.messages, &request.model);
            }
            (_, Some(key)) => key,
        };

        let body = ApiRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.options.max_tokens,
        };

        let send = self
            .http
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(api_key)
            .json(&body)
            .send();

        // Cancellation is cooperative: an in-flight call observes the token
        // and degrades instead of being torn down.
        let response = tokio::select! {
            _ = request.options.cancel.cancelled() => {
                return fallback_completion(&request.messages, "cancelled");
            }
            response = send => response,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = %provider, error = %e, "backend request failed");
                return fallback_completion(&request.messages, &e.to_string());
            }
        };

        if let Err(e) = response.error_for_status_ref() {
            warn!(provider = %provider, error = %e, "backend returned error status");
            return fallback_completion(&request.messages, &e.to_string());
        }

        let parsed: ApiResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(provider = %provider, error = %e, "backend response parse failed");
                return fallback_completion(&request.messages, &e.to_string());
            }
        };

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();

        ChatCompletion {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            fallback: false,
            provider_error: None,
        }
    }
}

impl ChatBackend for HttpBackend {
    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, ChatCompletion> {
        Box::pin(self.complete_inner(request))
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [BackendMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Accepts both the prompt/completion and input/output usage spellings.
#[derive(Default, Deserialize)]
struct ApiUsage {
    #[serde(default, alias = "input_tokens")]
    prompt_tokens: u64,
    #[serde(default, alias = "output_tokens")]
    completion_tokens: u64,
    #[serde(default)]
    reasoning_tokens: u64,
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn transcript(messages: &[BackendMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", role_label(m.role), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn estimated_usage(messages: &[BackendMessage]) -> (u64, u64) {
    let combined: usize = messages.iter().map(|m| m.content.len() + 10).sum();
    (combined.div_ceil(4) as u64, FALLBACK_OUTPUT_TOKENS)
}

/// Deterministic completion used for the `mock` provider and when no
/// credentials resolve.
pub fn mock_completion(messages: &[BackendMessage], model: &str) -> ChatCompletion {
    let combined = transcript(messages);
    let summary: String = combined.chars().take(150).collect();
    let (input_tokens, output_tokens) = estimated_usage(messages);
    ChatCompletion {
        text: format!("Mock response for model {model}. Summary: {summary}"),
        input_tokens,
        output_tokens,
        reasoning_tokens: 0,
        fallback: true,
        provider_error: None,
    }
}

/// Labeled degraded completion for a failed call. Carries the error marker in
/// `provider_error` so callers can tell it apart from a plain mock.
pub fn fallback_completion(messages: &[BackendMessage], error: &str) -> ChatCompletion {
    let (input_tokens, output_tokens) = estimated_usage(messages);
    ChatCompletion {
        text: format!("Fallback response (agent call failed): {error}"),
        input_tokens,
        output_tokens,
        reasoning_tokens: 0,
        fallback: true,
        provider_error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::traits::CallOptions;
    use tokio_util::sync::CancellationToken;

    fn request(provider: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![
                BackendMessage::system("You are terse."),
                BackendMessage::user("What is 2+2?"),
            ],
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            options: CallOptions {
                provider: provider.to_string(),
                provider_config: None,
                max_tokens: 128,
                cancel: CancellationToken::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() {
        let backend = HttpBackend::new(HashMap::new());
        let completion = backend.complete(request("mock")).await;
        assert!(completion.fallback);
        assert!(completion.provider_error.is_none());
        assert!(completion.text.starts_with("Mock response for model gpt-4o-mini"));
        assert!(completion.input_tokens > 0);
        assert_eq!(completion.output_tokens, FALLBACK_OUTPUT_TOKENS);
    }

    #[tokio::test]
    async fn test_unknown_provider_without_key_degrades_to_mock() {
        std::env::remove_var("NO_SUCH_PROVIDER_API_KEY");
        std::env::remove_var("OPENAI_API_KEY");
        let backend = HttpBackend::new(HashMap::new());
        let completion = backend.complete(request("no-such-provider")).await;
        assert!(completion.fallback);
        assert!(completion.text.contains("Mock response"));
    }

    #[test]
    fn test_fallback_completion_carries_error_marker() {
        let messages = vec![BackendMessage::user("hi")];
        let completion = fallback_completion(&messages, "connection refused");
        assert!(completion.fallback);
        assert_eq!(completion.provider_error.as_deref(), Some("connection refused"));
        assert!(completion.text.starts_with("Fallback response (agent call failed):"));
    }

    #[test]
    fn test_usage_accepts_both_spellings() {
        let openai: ApiUsage =
            serde_json::from_str(r#"{"prompt_tokens": 12, "completion_tokens": 5}"#).unwrap();
        assert_eq!(openai.prompt_tokens, 12);
        assert_eq!(openai.completion_tokens, 5);

        let alt: ApiUsage =
            serde_json::from_str(r#"{"input_tokens": 7, "output_tokens": 3, "reasoning_tokens": 1}"#)
                .unwrap();
        assert_eq!(alt.prompt_tokens, 7);
        assert_eq!(alt.completion_tokens, 3);
        assert_eq!(alt.reasoning_tokens, 1);
    }
}
