pub mod chat_service;
pub mod title;
