use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Users & sessions ──────────────────────────────────────────────────────────

/// Local user row, keyed by the auth platform's external id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Principal returned by the auth platform's token verification endpoint.
/// Only the fields this service reads are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    pub email: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

// ── Conversations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatVisibility {
    Private,
    Public,
}

impl ChatVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatVisibility::Private => "private",
            ChatVisibility::Public => "public",
        }
    }
}

impl TryFrom<String> for ChatVisibility {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "private" => Ok(ChatVisibility::Private),
            "public" => Ok(ChatVisibility::Public),
            other => Err(format!("Unknown visibility: {other}")),
        }
    }
}

/// One conversation. The id is caller-supplied and acts as an idempotency
/// key: the turn controller creates the row at most once per id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: ChatVisibility,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(id: String, user_id: String, title: String) -> Self {
        Self {
            id,
            user_id,
            title,
            visibility: ChatVisibility::Private,
            created_at: Utc::now(),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Append-only message row; never mutated after persistence. Ordering within
/// a chat is by `created_at`, ties broken by insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(chat_id: String, role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id,
            role,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub chat_id: String,
    pub message_id: String,
    pub is_upvoted: bool,
}

// ── Model catalog ─────────────────────────────────────────────────────────────

/// Network location of a model served by the platform's own load-balanced
/// backend, addressed by port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub lb_port: u16,
}

/// Where a model's completions come from. A tagged union so "hosted without
/// a uri" and "custom without a deployment" are the only representable
/// shapes; the resolver still checks that the hosted side actually carries a
/// deployment before building a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelBackend {
    Hosted {
        #[serde(skip_serializing_if = "Option::is_none")]
        deployment: Option<Deployment>,
    },
    Custom {
        uri: String,
        #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
}

/// Catalog entry. Transient: rebuilt on every registry refresh, identified
/// by `id` within one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub label: String,
    pub api_identifier: String,
    pub description: String,
    #[serde(flatten)]
    pub backend: ModelBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomModelEndpoint {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub provider_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Delta protocol ────────────────────────────────────────────────────────────

/// One unit of the incremental generation-output protocol, pushed to the
/// client as an ordered stream of SSE events. Within a turn,
/// `user-message-id` precedes every `text-delta`, which precede `finish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Delta {
    /// Authoritative id of the just-persisted user message, letting the
    /// client correlate its optimistic copy.
    UserMessageId { content: String },
    /// One fragment of assistant output; fragments concatenate in receipt
    /// order to the exact final message content.
    TextDelta { content: String },
    /// Generation complete; the full assistant message is now persisted.
    Finish,
}

// ── Request payloads ──────────────────────────────────────────────────────────

/// Message as submitted by the client in a turn request.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
}

/// Body of `POST /api/chat`. A missing `modelId` means "use the default
/// model": the first catalog entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub id: String,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// Body of `POST /api/model-endpoints`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpointRequest {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Body of `PATCH /api/chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVisibilityRequest {
    pub chat_id: String,
    pub visibility: ChatVisibility,
}

/// Body of `PATCH /api/vote`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub chat_id: String,
    pub message_id: String,
    #[serde(rename = "type")]
    pub direction: VoteDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_wire_shapes() {
        let id = Delta::UserMessageId { content: "m1".into() };
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            r#"{"type":"user-message-id","content":"m1"}"#
        );

        let frag = Delta::TextDelta { content: "Hel".into() };
        assert_eq!(
            serde_json::to_string(&frag).unwrap(),
            r#"{"type":"text-delta","content":"Hel"}"#
        );

        assert_eq!(serde_json::to_string(&Delta::Finish).unwrap(), r#"{"type":"finish"}"#);

        let parsed: Delta =
            serde_json::from_str(r#"{"type":"text-delta","content":"lo"}"#).unwrap();
        assert_eq!(parsed, Delta::TextDelta { content: "lo".into() });
    }

    #[test]
    fn model_serializes_with_backend_tag() {
        let hosted = Model {
            id: "m1".into(),
            label: "Llama".into(),
            api_identifier: "llama@1".into(),
            description: String::new(),
            backend: ModelBackend::Hosted {
                deployment: Some(Deployment { id: "d1".into(), lb_port: 51100 }),
            },
        };
        let json = serde_json::to_value(&hosted).unwrap();
        assert_eq!(json["type"], "hosted");
        assert_eq!(json["deployment"]["lb_port"], 51100);
        assert_eq!(json["apiIdentifier"], "llama@1");

        let custom = Model {
            id: "e1".into(),
            label: "my-endpoint".into(),
            api_identifier: "my-endpoint".into(),
            description: "Custom endpoint: http://example.com/v1".into(),
            backend: ModelBackend::Custom {
                uri: "http://example.com/v1".into(),
                api_key: None,
            },
        };
        let json = serde_json::to_value(&custom).unwrap();
        assert_eq!(json["type"], "custom");
        assert_eq!(json["uri"], "http://example.com/v1");
        assert!(json.get("apiKey").is_none());
    }

    #[test]
    fn roles_round_trip_case_insensitively() {
        assert_eq!(MessageRole::try_from("USER".to_string()).unwrap(), MessageRole::User);
        assert_eq!(
            MessageRole::try_from("assistant".to_string()).unwrap(),
            MessageRole::Assistant
        );
        assert!(MessageRole::try_from("robot".to_string()).is_err());
    }
}
