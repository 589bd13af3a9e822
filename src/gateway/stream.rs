use crate::safe_json::{self, SafeJsonOptions};
use crate::tools::{ChunkStream, Payload, ToolFailure};
use async_stream::stream;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;

const CHUNK_BUFFER: usize = 16;

/// The frame sent once when the producer fails mid-stream.
pub fn error_frame(message: &str) -> String {
    safe_json::to_compact(&json!({
        "chunk_type": "error",
        "error": { "message": message },
        "terminal": true,
    }))
}

fn chunk_events<R>(
    tool: String,
    mut rx: mpsc::Receiver<Result<Payload, ToolFailure>>,
    options: SafeJsonOptions,
    redact: R,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    R: Fn(&str) -> String + Send + 'static,
{
    stream! {
        let mut sent = 0usize;
        let mut failed = false;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(payload) => {
                    sent += 1;
                    yield Ok::<Event, Infallible>(
                        Event::default().data(safe_json::encode(&payload, options)),
                    );
                }
                Err(failure) => {
                    let message = redact(failure.message());
                    tracing::warn!(tool = %tool, chunks = sent, error = %message, "stream ended with error");
                    yield Ok(Event::default().data(error_frame(&message)));
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            tracing::info!(tool = %tool, chunks = sent, "stream finished");
        }
    }
}

/// Bridges a blocking chunk iterator to `text/event-stream`. The producer
/// runs on the blocking pool and stops at the next chunk once the client is
/// gone.
pub fn sse_response<R>(
    tool: String,
    chunks: ChunkStream,
    options: SafeJsonOptions,
    redact: R,
) -> Response
where
    R: Fn(&str) -> String + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Payload, ToolFailure>>(CHUNK_BUFFER);
    let producer_tool = tool.clone();
    tokio::task::spawn_blocking(move || {
        for chunk in chunks {
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() {
                tracing::debug!(tool = %producer_tool, "stream client went away");
                return;
            }
            if failed {
                return;
            }
        }
    });

    let events = chunk_events(tool, rx, options, redact);
    let mut response = Sse::new(events).into_response();
    response.headers_mut().insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn events_stop_after_the_first_failure() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Payload::Int(1))).await.expect("send");
        tx.send(Err(ToolFailure::Execution("token abcd".to_string())))
            .await
            .expect("send");
        tx.send(Ok(Payload::Int(2))).await.expect("send");
        drop(tx);

        let events = chunk_events(
            "t".to_string(),
            rx,
            SafeJsonOptions::default(),
            |message: &str| message.replace("abcd", "[REDACTED]"),
        )
        .collect::<Vec<_>>()
        .await;
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn error_frame_is_compact_and_terminal() {
        assert_eq!(
            error_frame("oops"),
            r#"{"chunk_type":"error","error":{"message":"oops"},"terminal":true}"#
        );
    }
}
