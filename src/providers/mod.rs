pub mod canned;
pub mod local;
pub mod traits;
pub mod types;

pub use canned::CannedResponder;
pub use local::{LocalProvider, LocalProviderConfig};
pub use traits::ResponseSource;
pub use types::{ChatMessage, ProviderError, ResponseRequest, StreamEvent};
