use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Matches the backend `Chat` model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
}

/// Matches the backend `Message` model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Catalog entry as served by `GET /api/models`. Backend-specific fields
/// (deployment, uri) are not needed client-side and are ignored.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelView {
    pub id: String,
    pub label: String,
    pub api_identifier: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Message as submitted in a turn request.
#[derive(Clone, Debug, Serialize)]
pub struct OutgoingMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /api/chat`. Omitting `model_id` lets the server pick its
/// default model.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub id: String,
    pub messages: Vec<OutgoingMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// Server-pushed delta event. Matches the backend `Delta` enum
/// (internally tagged).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Delta {
    UserMessageId { content: String },
    TextDelta { content: String },
    Finish,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_parse_from_wire_json() {
        let parsed: Delta =
            serde_json::from_str(r#"{"type":"user-message-id","content":"m1"}"#).unwrap();
        assert_eq!(parsed, Delta::UserMessageId { content: "m1".into() });

        let parsed: Delta =
            serde_json::from_str(r#"{"type":"text-delta","content":"Hel"}"#).unwrap();
        assert_eq!(parsed, Delta::TextDelta { content: "Hel".into() });

        let parsed: Delta = serde_json::from_str(r#"{"type":"finish"}"#).unwrap();
        assert_eq!(parsed, Delta::Finish);
    }

    #[test]
    fn model_view_ignores_backend_specific_fields() {
        let json = r#"{
            "id": "m1",
            "label": "Llama",
            "apiIdentifier": "llama@3.2",
            "description": "",
            "type": "hosted",
            "deployment": {"id": "d1", "lb_port": 51100}
        }"#;
        let view: ModelView = serde_json::from_str(json).unwrap();
        assert_eq!(view.kind, "hosted");
        assert_eq!(view.api_identifier, "llama@3.2");
    }
}
