use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::models::{Chat, Delta, Message, ModelView, TurnRequest};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Typed client for the chat server. All calls carry the bearer credential;
/// the server answers 401 when it is missing or stale.
#[derive(Clone)]
pub struct ChatApi {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Api { status, message })
    }

    /// GET `/api/history` — the caller's chats, newest first.
    pub async fn history(&self) -> Result<Vec<Chat>, ClientError> {
        let response = self
            .http
            .get(self.url("/api/history"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// GET `/api/chat/{id}/messages` — finalized messages of one chat, the
    /// channel the reconciler absorbs authoritative messages from.
    pub async fn messages(&self, chat_id: &str) -> Result<Vec<Message>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/chat/{chat_id}/messages")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// GET `/api/models` — the current catalog.
    pub async fn models(&self) -> Result<Vec<ModelView>, ClientError> {
        let response = self
            .http
            .get(self.url("/api/models"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// DELETE `/api/chat?id=<id>`.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url("/api/chat"))
            .query(&[("id", chat_id)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// POST `/api/chat` — submits one turn and returns the server's delta
    /// stream. Dropping the stream aborts the turn server-side; only a
    /// stream consumed through `finish` produces a persisted reply.
    pub async fn send_turn(
        &self,
        request: &TurnRequest,
    ) -> Result<impl Stream<Item = Result<Delta, ClientError>>, ClientError> {
        let response = self
            .http
            .post(self.url("/api/chat"))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let deltas = response.bytes_stream().eventsource().map(|event| match event {
            Ok(event) => serde_json::from_str::<Delta>(&event.data).map_err(ClientError::from),
            Err(e) => Err(ClientError::Stream(e.to_string())),
        });
        Ok(deltas)
    }
}
