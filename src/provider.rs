use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{Message, Model, ModelBackend};

/// Ordered stream of assistant-output fragments for one turn.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// Every backend speaks the OpenAI chat-completions dialect and is addressed
/// by a single logical model name.
const WIRE_MODEL_NAME: &str = "model";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: &'static str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// A resolved, invokable completion backend. Pure data plus a shared HTTP
/// client; safe to construct repeatedly and use concurrently.
#[derive(Clone, Debug)]
pub struct ChatProvider {
    http: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

/// Rewrites the platform base URL the way hosted deployments expect it:
/// plain HTTP against the load balancer, without the `/api` suffix the
/// management API uses.
fn hosted_base(platform_base: &str) -> String {
    let base = platform_base.replacen("https://", "http://", 1);
    let base = base.trim_end_matches('/');
    base.strip_suffix("/api").unwrap_or(base).to_string()
}

impl ChatProvider {
    /// Turns a catalog entry into an invokable provider. The backend shape
    /// is checked here so an unconfigured model can never reach request
    /// construction.
    pub fn resolve(
        model: &Model,
        platform_base: &str,
        http: reqwest::Client,
    ) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let endpoint = match &model.backend {
            ModelBackend::Hosted { deployment: Some(deployment) } => {
                format!(
                    "{}:{}/v1/chat/completions",
                    hosted_base(platform_base),
                    deployment.lb_port
                )
            }
            ModelBackend::Hosted { deployment: None } => {
                return Err(AppError::InvalidModelConfiguration {
                    id: model.id.clone(),
                    reason: "hosted model has no deployment".into(),
                });
            }
            ModelBackend::Custom { uri, api_key } => {
                if uri.trim().is_empty() {
                    return Err(AppError::InvalidModelConfiguration {
                        id: model.id.clone(),
                        reason: "custom endpoint has no uri".into(),
                    });
                }
                if let Some(key) = api_key {
                    let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                        AppError::ProviderConstructionFailed {
                            id: model.id.clone(),
                            reason: format!("invalid api key: {e}"),
                        }
                    })?;
                    headers.insert(AUTHORIZATION, value);
                }
                format!("{}/chat/completions", uri.trim_end_matches('/'))
            }
        };

        Ok(Self { http, endpoint, headers })
    }

    fn wire_history(system_prompt: &str, history: &[Message]) -> Vec<WireMessage> {
        std::iter::once(WireMessage { role: "system".into(), content: system_prompt.into() })
            .chain(history.iter().map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            }))
            .collect()
    }

    async fn post(&self, body: &CompletionRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Provider request to {} failed: {e}", self.endpoint);
                AppError::GenerationFailed { message: e.to_string() }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!("Provider at {} returned {status}: {detail}", self.endpoint);
            return Err(AppError::GenerationFailed {
                message: format!("provider returned {status}"),
            });
        }
        Ok(response)
    }

    /// Invokes the backend with `stream: true` and yields content fragments
    /// in receipt order until the terminating `[DONE]` event.
    pub async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<FragmentStream, AppError> {
        let body = CompletionRequest {
            model: WIRE_MODEL_NAME,
            messages: Self::wire_history(system_prompt, history),
            stream: true,
        };
        let response = self.post(&body).await?;

        let fragments = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => fragment_from_event(&event.data),
                Err(e) => Err(AppError::GenerationFailed {
                    message: format!("stream read error: {e}"),
                }),
            })
            .take_while(|item| {
                let done = matches!(item, Ok(ProviderEvent::Done));
                async move { !done }
            })
            .filter_map(|item| async move {
                match item {
                    Ok(ProviderEvent::Fragment(fragment)) => Some(Ok(fragment)),
                    // role preambles and keep-alive chunks carry no content
                    Ok(ProviderEvent::Empty) | Ok(ProviderEvent::Done) => None,
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Box::pin(fragments))
    }

    /// One non-streaming completion; used by title generation.
    pub async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, AppError> {
        let body = CompletionRequest {
            model: WIRE_MODEL_NAME,
            messages: Self::wire_history(system_prompt, history),
            stream: false,
        };
        let response = self.post(&body).await?;

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            AppError::GenerationFailed { message: format!("malformed completion: {e}") }
        })?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::GenerationFailed { message: "empty completion".into() })
    }
}

/// One decoded provider stream event.
#[derive(Debug, PartialEq)]
enum ProviderEvent {
    Fragment(String),
    /// A chunk carrying no content (role preamble, keep-alive).
    Empty,
    /// The `[DONE]` sentinel.
    Done,
}

fn fragment_from_event(data: &str) -> Result<ProviderEvent, AppError> {
    let data = data.trim();
    if data == "[DONE]" {
        debug!("Provider stream finished");
        return Ok(ProviderEvent::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        AppError::GenerationFailed { message: format!("malformed stream chunk: {e}") }
    })?;
    Ok(match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(fragment) => ProviderEvent::Fragment(fragment),
        None => ProviderEvent::Empty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Deployment, MessageRole};

    fn model(backend: ModelBackend) -> Model {
        Model {
            id: "m1".into(),
            label: "m1".into(),
            api_identifier: "m1".into(),
            description: String::new(),
            backend,
        }
    }

    #[test]
    fn hosted_model_resolves_to_deployment_port() {
        let provider = ChatProvider::resolve(
            &model(ModelBackend::Hosted {
                deployment: Some(Deployment { id: "d1".into(), lb_port: 51100 }),
            }),
            "https://platform.local/api",
            reqwest::Client::new(),
        )
        .unwrap();
        assert_eq!(provider.endpoint, "http://platform.local:51100/v1/chat/completions");
        assert!(!provider.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn hosted_base_strips_only_the_api_suffix() {
        assert_eq!(hosted_base("https://api.example.com/api"), "http://api.example.com");
        assert_eq!(hosted_base("https://platform.local/api/"), "http://platform.local");
        assert_eq!(hosted_base("http://platform.local"), "http://platform.local");
    }

    #[test]
    fn undeployed_hosted_model_is_invalid() {
        let err = ChatProvider::resolve(
            &model(ModelBackend::Hosted { deployment: None }),
            "https://platform.local/api",
            reqwest::Client::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidModelConfiguration { .. }));
    }

    #[test]
    fn custom_model_attaches_bearer_only_when_key_present() {
        let with_key = ChatProvider::resolve(
            &model(ModelBackend::Custom {
                uri: "https://example.com/v1/".into(),
                api_key: Some("sk-test".into()),
            }),
            "https://platform.local/api",
            reqwest::Client::new(),
        )
        .unwrap();
        assert_eq!(with_key.endpoint, "https://example.com/v1/chat/completions");
        assert_eq!(with_key.headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");

        let without_key = ChatProvider::resolve(
            &model(ModelBackend::Custom { uri: "https://example.com/v1".into(), api_key: None }),
            "https://platform.local/api",
            reqwest::Client::new(),
        )
        .unwrap();
        assert!(!without_key.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn custom_model_without_uri_is_invalid() {
        let err = ChatProvider::resolve(
            &model(ModelBackend::Custom { uri: "  ".into(), api_key: None }),
            "https://platform.local/api",
            reqwest::Client::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidModelConfiguration { .. }));
    }

    #[test]
    fn stream_chunks_parse_content_done_and_preamble() {
        let chunk = r#"{"id":"c1","choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            fragment_from_event(chunk).unwrap(),
            ProviderEvent::Fragment("Hel".into())
        );

        let preamble = r#"{"id":"c1","choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(fragment_from_event(preamble).unwrap(), ProviderEvent::Empty);

        assert_eq!(fragment_from_event("[DONE]").unwrap(), ProviderEvent::Done);
        assert!(fragment_from_event("not json").is_err());
    }

    #[test]
    fn wire_history_starts_with_system_prompt() {
        let history = vec![
            Message::new("c1".into(), MessageRole::User, "hi".into()),
            Message::new("c1".into(), MessageRole::Assistant, "hello".into()),
        ];
        let wire = ChatProvider::wire_history("be helpful", &history);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[2].role, "assistant");
    }
}
