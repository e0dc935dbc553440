use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ProviderError, ResponseRequest, StreamEvent};

/// Produces assistant replies for the response coordinator.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `stream` delivers real incremental chunks. Sources that only
    /// produce full text get a word-by-word reveal from the coordinator.
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn fetch(&self, request: ResponseRequest) -> Result<String, ProviderError>;

    async fn stream(
        &self,
        request: ResponseRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let content = self.fetch(request).await?;
        if tx.send(StreamEvent::Token(content)).await.is_ok() {
            let _ = tx.send(StreamEvent::Done).await;
        }
        Ok(())
    }
}
