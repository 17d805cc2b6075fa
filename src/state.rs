use std::sync::Arc;

use crate::db::endpoint_repository::EndpointRepository;
use crate::db::user_repository::UserRepository;
use crate::platform::PlatformClient;
use crate::registry::ModelRegistry;
use crate::service::chat_service::ChatService;

/// Shared handler state. Everything inside is cheap to clone: repositories
/// wrap a pooled connection, the registry is shared behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub platform: PlatformClient,
    pub users: UserRepository,
    pub endpoints: EndpointRepository,
    pub registry: Arc<ModelRegistry>,
    pub chat: ChatService,
}
