use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::traits::ResponseSource;
use super::types::{ProviderError, ResponseRequest};

pub const DEFAULT_RESPONSES: [&str; 4] = [
    "Short answer!",
    "This is a medium-length response that provides a bit more context.",
    "This is a much longer response that goes into detail about various topics and simulates what a real assistant might say when asked a complex question...",
    "Lorem ipsum dolor sit amet consectetur adipisicing elit. Itaque nisi, quos obcaecati praesentium ut eveniet? Ex explicabo laudantium laboriosam consequuntur mollitia blanditiis asperiores corrupti unde autem magni? Exercitationem, ea eaque.",
];

/// Offline stand-in for a backend: waits a fixed delay, then answers with a
/// random pick from a fixed set of replies.
pub struct CannedResponder {
    delay: Duration,
    responses: Vec<String>,
}

impl CannedResponder {
    pub fn new(delay: Duration) -> Self {
        Self::with_responses(delay, DEFAULT_RESPONSES.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_responses(delay: Duration, responses: Vec<String>) -> Self {
        Self { delay, responses }
    }

    fn pick(&self) -> Option<String> {
        self.responses.choose(&mut rand::thread_rng()).cloned()
    }
}

#[async_trait]
impl ResponseSource for CannedResponder {
    fn name(&self) -> &str {
        "canned"
    }

    async fn fetch(&self, request: ResponseRequest) -> Result<String, ProviderError> {
        tracing::debug!(
            conversation_id = %request.conversation_id,
            delay_ms = self.delay.as_millis() as u64,
            "Simulating response fetch"
        );
        tokio::time::sleep(self.delay).await;
        self.pick()
            .ok_or_else(|| ProviderError::InvalidResponse("No canned responses configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::StreamEvent;

    fn request() -> ResponseRequest {
        ResponseRequest::new("c1", &[])
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_waits_for_delay() {
        let responder = CannedResponder::new(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        let reply = responder.fetch(request()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(DEFAULT_RESPONSES.contains(&reply.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_uses_configured_responses() {
        let responder =
            CannedResponder::with_responses(Duration::from_millis(10), vec!["only one".to_string()]);
        assert_eq!(responder.fetch(request()).await.unwrap(), "only one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_set_fails() {
        let responder = CannedResponder::with_responses(Duration::ZERO, Vec::new());
        let err = responder.fetch(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_default_stream_emits_whole_reply() {
        let responder =
            CannedResponder::with_responses(Duration::ZERO, vec!["hello there".to_string()]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        responder.stream(request(), tx).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Token("hello there".to_string()))
        );
        assert_eq!(rx.recv().await, Some(StreamEvent::Done));
    }
}
