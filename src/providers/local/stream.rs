use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::models::OpenAiStreamChunk;
use crate::providers::types::StreamEvent;

/// Drain every decodable byte of `byte_buf`, leaving a trailing partial code
/// point in place for the next chunk. Invalid sequences become U+FFFD.
fn take_utf8(byte_buf: &mut Vec<u8>) -> String {
    let mut decoded = String::new();
    loop {
        match std::str::from_utf8(byte_buf) {
            Ok(text) => {
                decoded.push_str(text);
                byte_buf.clear();
                return decoded;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                decoded.push_str(&String::from_utf8_lossy(&byte_buf[..valid_up_to]));
                match e.error_len() {
                    Some(invalid) => {
                        decoded.push(char::REPLACEMENT_CHARACTER);
                        byte_buf.drain(..valid_up_to + invalid);
                    }
                    None => {
                        byte_buf.drain(..valid_up_to);
                        return decoded;
                    }
                }
            }
        }
    }
}

/// Parse an OpenAI-style server-sent event body, forwarding content deltas
/// as `StreamEvent::Token` until `[DONE]` or the end of the body.
pub async fn parse_sse_stream<S, E>(stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("Stream error: {}", e)))
                    .await;
                return;
            }
        };

        byte_buf.extend_from_slice(&bytes);
        let decoded = take_utf8(&mut byte_buf);
        if decoded.is_empty() {
            continue;
        }

        buffer.push_str(&decoded.replace("\r\n", "\n"));

        // Events are delimited by a blank line
        while let Some(event_end) = buffer.find("\n\n") {
            let event_text = buffer[..event_end].to_string();
            buffer.drain(..event_end + 2);

            for line in event_text.lines() {
                let payload = if let Some(p) = line.strip_prefix("data: ") {
                    p
                } else if let Some(p) = line.strip_prefix("data:") {
                    p
                } else {
                    continue;
                };

                if payload.trim() == "[DONE]" {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }

                match serde_json::from_str::<OpenAiStreamChunk>(payload) {
                    Ok(chunk) => {
                        let content = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.delta.content);
                        if let Some(content) = content {
                            if !content.is_empty()
                                && tx.send(StreamEvent::Token(content)).await.is_err()
                            {
                                return; // receiver dropped
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse OpenAI SSE data: {}", e);
                    }
                }
            }
        }
    }

    // Body ended without [DONE]; a half-received event means the reply was cut off
    if !buffer.trim().is_empty() || !byte_buf.is_empty() {
        tracing::warn!("OpenAI SSE body ended mid-event");
        let _ = tx
            .send(StreamEvent::Error("Stream ended mid-event".to_string()))
            .await;
        return;
    }
    let _ = tx.send(StreamEvent::Done).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<Result<Bytes, String>>) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        parse_sse_stream(futures::stream::iter(chunks), tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn data(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
            content
        )
    }

    #[tokio::test]
    async fn test_tokens_until_done() {
        let body = format!("{}{}data: [DONE]\n\n", data("Hel"), data("lo"));
        let events = collect(vec![Ok(Bytes::from(body))]).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hel".to_string()),
                StreamEvent::Token("lo".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_event_split_across_chunks_and_crlf() {
        let body = data("world").replace("\n\n", "\r\n\r\n");
        let (head, tail) = body.split_at(10);
        let events = collect(vec![
            Ok(Bytes::from(head.to_string())),
            Ok(Bytes::from(tail.to_string())),
        ])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::Token("world".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let body = data("héllo").into_bytes();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let events = collect(vec![
            Ok(Bytes::copy_from_slice(&body[..split])),
            Ok(Bytes::copy_from_slice(&body[split..])),
        ])
        .await;
        assert_eq!(events[0], StreamEvent::Token("héllo".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stall_later_events() {
        let mut first = data("a?b").into_bytes();
        let bad = first.iter().position(|b| *b == b'?').unwrap();
        first[bad] = 0xFF;
        first.extend_from_slice(data("after").as_bytes());
        let events = collect(vec![
            Ok(Bytes::from(first)),
            Ok(Bytes::from(data("later"))),
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("a\u{FFFD}b".to_string()),
                StreamEvent::Token("after".to_string()),
                StreamEvent::Token("later".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_body_cut_mid_event_is_an_error() {
        let full = data("tail");
        let events = collect(vec![
            Ok(Bytes::from(data("head"))),
            Ok(Bytes::from(full[..20].to_string())),
        ])
        .await;
        assert_eq!(events[0], StreamEvent::Token("head".to_string()));
        assert!(matches!(&events[1], StreamEvent::Error(e) if e.contains("mid-event")));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_forwarded() {
        let events = collect(vec![
            Ok(Bytes::from(data("partial"))),
            Err("connection reset".to_string()),
        ])
        .await;
        assert_eq!(events[0], StreamEvent::Token("partial".to_string()));
        assert!(matches!(&events[1], StreamEvent::Error(e) if e.contains("connection reset")));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let body = format!("data: not json\n\n{}", data("ok"));
        let events = collect(vec![Ok(Bytes::from(body))]).await;
        assert_eq!(
            events,
            vec![StreamEvent::Token("ok".to_string()), StreamEvent::Done]
        );
    }
}
