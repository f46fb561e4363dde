pub mod chat;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use chat::{list_conversations, list_users, send_message, update_avatar};
pub use health::{health_handler, metrics_handler};
pub use websocket::chat_websocket_handler;
