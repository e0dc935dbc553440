pub mod chat;
pub mod conversation;
pub mod coordinator;
pub mod export;
pub mod ledger;

pub use chat::ChatSession;
pub use conversation::ConversationRegistry;
pub use coordinator::{CoordinatorHandle, CoordinatorSettings, CyclePhase, ResponseCoordinator};
pub use ledger::{MessageLedger, ResponseStatus};
