pub mod chat_routes;
pub mod history_routes;
pub mod model_routes;
pub mod vote_routes;
