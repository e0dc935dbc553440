pub mod conversation;
pub mod message;
pub mod notice;

pub use conversation::Conversation;
pub use message::{Message, NewMessage, Role};
pub use notice::Notice;
