//! Native client for the streaming chat server: typed API calls, the delta
//! protocol, and the reconciler that folds a live token stream into a
//! stable message list.

pub mod api;
pub mod models;
pub mod reconciler;

pub use api::{ChatApi, ClientError};
pub use models::{Chat, Delta, Message, ModelView, OutgoingMessage, TurnRequest};
pub use reconciler::StreamReconciler;
