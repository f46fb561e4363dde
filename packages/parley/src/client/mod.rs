//! Client-side synchronization: the event reducer and the connection
//! lifecycle controller.

mod lifecycle;
mod reducer;

pub use lifecycle::{ConnectionController, ConnectionState, parse_server_event};
pub use reducer::{ChatState, ConversationView, Notification, Profile};
