use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::db::vote_repository::VoteRepository;
use crate::errors::AppError;
use crate::models::{
    Chat, ChatVisibility, Delta, IncomingMessage, Message, MessageRole, TurnRequest, User, Vote,
    VoteDirection, VoteRequest,
};
use crate::provider::{ChatProvider, FragmentStream};
use crate::registry::ModelRegistry;
use crate::service::title;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
                             Be concise, accurate, and friendly. \
                             If you don't know something, say so.";

const DELTA_CHANNEL_CAPACITY: usize = 64;

/// Persistence seam for chat rows, implemented by `ChatRepository`.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Chat>, AppError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Chat>, AppError>;
    /// Inserts the row; a unique violation on the id yields `Ok(false)`.
    async fn save(&self, chat: &Chat) -> Result<bool, AppError>;
    async fn delete_with_children(&self, id: &str) -> Result<(), AppError>;
    async fn update_visibility(
        &self,
        id: &str,
        visibility: ChatVisibility,
    ) -> Result<(), AppError>;
}

/// Persistence seam for message rows, implemented by `MessageRepository`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_by_chat_id(&self, chat_id: &str) -> Result<Vec<Message>, AppError>;
    async fn save(&self, message: &Message) -> Result<Message, AppError>;
}

/// Sequences one conversational turn: resolve the model, ensure the chat
/// row, persist the inbound message, stream the generation, persist the
/// reply. Everything before the stream starts fails as a plain HTTP error;
/// after that, failures abort the delta stream.
#[derive(Clone)]
pub struct ChatService {
    chats: Arc<dyn ChatStore>,
    messages: Arc<dyn MessageStore>,
    votes: VoteRepository,
    registry: Arc<ModelRegistry>,
    http: reqwest::Client,
    platform_base: String,
}

impl ChatService {
    pub fn new(
        chats: Arc<dyn ChatStore>,
        messages: Arc<dyn MessageStore>,
        votes: VoteRepository,
        registry: Arc<ModelRegistry>,
        http: reqwest::Client,
        platform_base: String,
    ) -> Self {
        Self { chats, messages, votes, registry, http, platform_base }
    }

    pub async fn history(&self, user: &User) -> Result<Vec<Chat>, AppError> {
        self.chats.find_by_user_id(&user.id).await
    }

    /// Messages of one chat. Private chats are readable by their owner
    /// only; public chats by any authenticated caller.
    pub async fn messages(&self, chat_id: &str, user: &User) -> Result<Vec<Message>, AppError> {
        let chat = self
            .chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| AppError::ChatNotFound { id: chat_id.to_string() })?;
        if chat.visibility != ChatVisibility::Public && chat.user_id != user.id {
            return Err(AppError::Unauthorized);
        }
        self.messages.find_by_chat_id(chat_id).await
    }

    pub async fn votes(&self, chat_id: &str) -> Result<Vec<Vote>, AppError> {
        self.votes.find_by_chat_id(chat_id).await
    }

    pub async fn vote(&self, request: &VoteRequest) -> Result<(), AppError> {
        let vote = Vote {
            chat_id: request.chat_id.clone(),
            message_id: request.message_id.clone(),
            is_upvoted: request.direction == VoteDirection::Up,
        };
        self.votes.upsert(&vote).await
    }

    /// Removes the caller's chat and all its messages and votes in one
    /// transaction.
    pub async fn delete_chat(&self, id: &str, user: &User) -> Result<(), AppError> {
        let chat = self
            .chats
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::ChatNotFound { id: id.to_string() })?;
        if chat.user_id != user.id {
            return Err(AppError::Unauthorized);
        }
        self.chats.delete_with_children(id).await
    }

    pub async fn update_visibility(
        &self,
        id: &str,
        user: &User,
        visibility: ChatVisibility,
    ) -> Result<(), AppError> {
        let chat = self
            .chats
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::ChatNotFound { id: id.to_string() })?;
        if chat.user_id != user.id {
            return Err(AppError::Unauthorized);
        }
        self.chats.update_visibility(id, visibility).await
    }

    /// Runs one turn. On success the caller receives the ordered delta
    /// stream for this turn: `user-message-id`, then `text-delta`s in
    /// receipt order, then `finish` once the assistant message is durable.
    pub async fn run_turn(
        &self,
        user: &User,
        request: TurnRequest,
    ) -> Result<mpsc::Receiver<Delta>, AppError> {
        // Validation comes first so a bad request persists nothing.
        let user_text = latest_user_message(&request.messages)
            .ok_or(AppError::NoUserMessage)?
            .to_string();

        // An explicit model id must resolve or the turn is a 404; with no id
        // the default selection picks the first catalog entry.
        let model_id = match request.model_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.registry.valid_model_id(None).await?,
        };
        let model = self.registry.resolve(&model_id, Some(&user.id)).await?;
        let provider = ChatProvider::resolve(&model, &self.platform_base, self.http.clone())?;

        self.ensure_chat(&request.id, &user.id, &provider, &user_text).await?;

        // The user message is durable before generation starts; a crash
        // mid-generation never loses the caller's input.
        let user_message =
            Message::new(request.id.clone(), MessageRole::User, user_text.clone());
        self.messages.save(&user_message).await?;

        let history = self.messages.find_by_chat_id(&request.id).await?;

        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let messages = self.messages.clone();
        let chat_id = request.id.clone();
        let user_message_id = user_message.id.clone();
        tokio::spawn(async move {
            if let Err(e) =
                generate(provider, messages, chat_id, user_message_id, history, tx).await
            {
                error!("Turn generation failed: {e}");
            }
        });

        Ok(rx)
    }

    /// Creates the chat row for `id` at most once. A concurrent or retried
    /// ensure for the same id is a no-op, at the cost of a benign duplicate
    /// title generation.
    async fn ensure_chat(
        &self,
        id: &str,
        user_id: &str,
        provider: &ChatProvider,
        first_message: &str,
    ) -> Result<(), AppError> {
        if self.chats.find_by_id(id).await?.is_some() {
            return Ok(());
        }
        let title = title::generate_title(provider, first_message).await;
        let chat = Chat::new(id.to_string(), user_id.to_string(), title);
        self.chats.save(&chat).await?;
        Ok(())
    }
}

/// Opens the provider stream and forwards it into the delta channel. A
/// dropped receiver before the first delta means the client is already gone.
async fn generate(
    provider: ChatProvider,
    messages: Arc<dyn MessageStore>,
    chat_id: String,
    user_message_id: String,
    history: Vec<Message>,
    tx: mpsc::Sender<Delta>,
) -> Result<(), AppError> {
    if tx.send(Delta::UserMessageId { content: user_message_id }).await.is_err() {
        return Ok(());
    }
    let fragments = provider.stream_chat(SYSTEM_PROMPT, &history).await?;
    forward_stream(fragments, messages, chat_id, tx).await
}

/// Streams fragments into the delta channel, persisting the assistant
/// message only when generation ran to completion. A dropped receiver
/// (client disconnect) abandons the turn with nothing persisted for the
/// assistant side.
async fn forward_stream(
    mut fragments: FragmentStream,
    messages: Arc<dyn MessageStore>,
    chat_id: String,
    tx: mpsc::Sender<Delta>,
) -> Result<(), AppError> {
    let mut full_content = String::new();

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        full_content.push_str(&fragment);
        if tx.send(Delta::TextDelta { content: fragment }).await.is_err() {
            info!("Client disconnected mid-stream for chat {chat_id}, abandoning generation");
            return Ok(());
        }
    }

    let assistant = Message::new(chat_id, MessageRole::Assistant, full_content);
    messages.save(&assistant).await?;

    // The assistant message is durable either way; a client that vanished
    // between the last fragment and here just misses the finish marker.
    let _ = tx.send(Delta::Finish).await;
    Ok(())
}

/// The most recent user message in the submitted history drives title
/// generation and validation.
fn latest_user_message(messages: &[IncomingMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures_util::stream;

    use super::*;
    use crate::models::{Model, ModelBackend};
    use crate::registry::{CustomCatalog, HostedCatalog};

    #[derive(Default)]
    struct StubMessages {
        saved: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageStore for StubMessages {
        async fn find_by_chat_id(&self, chat_id: &str) -> Result<Vec<Message>, AppError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.chat_id == chat_id)
                .cloned()
                .collect())
        }

        async fn save(&self, message: &Message) -> Result<Message, AppError> {
            self.saved.lock().unwrap().push(message.clone());
            Ok(message.clone())
        }
    }

    #[derive(Default)]
    struct StubChats {
        saved: Mutex<Vec<Chat>>,
        // Simulates a row committed by a concurrent ensure that this
        // caller's earlier find_by_id did not see.
        hidden_from_find: bool,
    }

    #[async_trait]
    impl ChatStore for StubChats {
        async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Chat>, AppError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Chat>, AppError> {
            if self.hidden_from_find {
                return Ok(None);
            }
            Ok(self.saved.lock().unwrap().iter().find(|c| c.id == id).cloned())
        }

        async fn save(&self, chat: &Chat) -> Result<bool, AppError> {
            let mut saved = self.saved.lock().unwrap();
            if saved.iter().any(|c| c.id == chat.id) {
                return Ok(false);
            }
            saved.push(chat.clone());
            Ok(true)
        }

        async fn delete_with_children(&self, id: &str) -> Result<(), AppError> {
            self.saved.lock().unwrap().retain(|c| c.id != id);
            Ok(())
        }

        async fn update_visibility(
            &self,
            _id: &str,
            _visibility: ChatVisibility,
        ) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct EmptyHosted;

    #[async_trait]
    impl HostedCatalog for EmptyHosted {
        async fn hosted_models(&self) -> Result<Vec<Model>, AppError> {
            Ok(vec![])
        }
    }

    struct EmptyCustom;

    #[async_trait]
    impl CustomCatalog for EmptyCustom {
        async fn custom_models(&self, _user_id: &str) -> Result<Vec<Model>, AppError> {
            Ok(vec![])
        }
    }

    fn service(chats: Arc<StubChats>, messages: Arc<StubMessages>) -> ChatService {
        let registry =
            Arc::new(ModelRegistry::new(Arc::new(EmptyHosted), Arc::new(EmptyCustom)));
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        ChatService::new(
            chats,
            messages,
            VoteRepository::new(pool),
            registry,
            reqwest::Client::new(),
            "https://platform.local/api".to_string(),
        )
    }

    // Points at a closed local port so any completion call fails fast and
    // title generation exercises its truncation fallback.
    fn unreachable_provider() -> ChatProvider {
        let model = Model {
            id: "m1".into(),
            label: "m1".into(),
            api_identifier: "m1".into(),
            description: String::new(),
            backend: ModelBackend::Custom { uri: "http://127.0.0.1:9/v1".into(), api_key: None },
        };
        ChatProvider::resolve(&model, "https://platform.local/api", reqwest::Client::new())
            .unwrap()
    }

    fn fragment_stream(fragments: &[&str]) -> FragmentStream {
        let items: Vec<Result<String, AppError>> =
            fragments.iter().map(|f| Ok(f.to_string())).collect();
        Box::pin(stream::iter(items))
    }

    fn incoming(role: MessageRole, content: &str) -> IncomingMessage {
        IncomingMessage { id: None, role, content: content.to_string() }
    }

    #[tokio::test]
    async fn dropped_receiver_abandons_assistant_persistence() {
        let messages = Arc::new(StubMessages::default());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        forward_stream(fragment_stream(&["Hel", "lo"]), messages.clone(), "c1".into(), tx)
            .await
            .unwrap();

        assert!(messages.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_stream_persists_one_assistant_message_then_finishes() {
        let messages = Arc::new(StubMessages::default());
        let (tx, mut rx) = mpsc::channel(8);

        forward_stream(fragment_stream(&["Hel", "lo"]), messages.clone(), "c1".into(), tx)
            .await
            .unwrap();

        let mut deltas = Vec::new();
        while let Some(delta) = rx.recv().await {
            deltas.push(delta);
        }
        assert_eq!(deltas.last(), Some(&Delta::Finish));

        let saved = messages.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].role, MessageRole::Assistant);
        assert_eq!(saved[0].content, "Hello");
    }

    #[tokio::test]
    async fn ensure_chat_creates_the_row_at_most_once() {
        let chats = Arc::new(StubChats::default());
        let service = service(chats.clone(), Arc::new(StubMessages::default()));
        let provider = unreachable_provider();

        service.ensure_chat("c1", "u1", &provider, "what is rust?").await.unwrap();
        service.ensure_chat("c1", "u1", &provider, "what is rust?").await.unwrap();

        let saved = chats.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].title, "what is rust?");
    }

    #[tokio::test]
    async fn ensure_chat_tolerates_a_concurrent_insert() {
        let chats = Arc::new(StubChats {
            saved: Mutex::new(vec![Chat::new("c1".into(), "u1".into(), "racer".into())]),
            hidden_from_find: true,
        });
        let service = service(chats.clone(), Arc::new(StubMessages::default()));

        // find_by_id misses, the insert hits the unique key; still Ok.
        service
            .ensure_chat("c1", "u1", &unreachable_provider(), "what is rust?")
            .await
            .unwrap();

        assert_eq!(chats.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn latest_user_message_picks_the_most_recent() {
        let messages = vec![
            incoming(MessageRole::User, "first"),
            incoming(MessageRole::Assistant, "reply"),
            incoming(MessageRole::User, "second"),
        ];
        assert_eq!(latest_user_message(&messages), Some("second"));
    }

    #[test]
    fn missing_user_message_is_detected() {
        assert_eq!(latest_user_message(&[]), None);
        let only_assistant = vec![incoming(MessageRole::Assistant, "hello")];
        assert_eq!(latest_user_message(&only_assistant), None);
    }
}
