pub mod chat_repository;
pub mod endpoint_repository;
pub mod message_repository;
pub mod user_repository;
pub mod vote_repository;
