//! Re-emits one complete reply as paced, word-sized chunks.

use futures_util::Stream;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// One event of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// `{"content": "...", "done": false}`
    Token(String),
    /// `{"content": "", "done": true, "session_id": "..."}`
    Done { session_id: String },
    /// `{"error": "...", "done": true}`
    Error(String),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token(_))
    }
}

impl Serialize for StreamChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Token(content) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("content", content)?;
                map.serialize_entry("done", &false)?;
                map.end()
            }
            Self::Done { session_id } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("content", "")?;
                map.serialize_entry("done", &true)?;
                map.serialize_entry("session_id", session_id)?;
                map.end()
            }
            Self::Error(error) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("done", &true)?;
                map.end()
            }
        }
    }
}

/// Split a reply into whitespace-delimited tokens, each followed by one space.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|word| format!("{word} ")).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseSequencer {
    delay: Duration,
}

impl ResponseSequencer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Stream `reply` token by token, run `finish` after the last token, then
    /// emit the terminal event. An upstream error yields a single error event.
    ///
    /// Dropping the stream stops emission; `finish` then never runs.
    pub fn sequence<F>(
        &self,
        reply: Result<String, String>,
        session_id: String,
        finish: F,
    ) -> ChunkStream
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        Box::pin(async_stream::stream! {
            let text = match reply {
                Ok(text) => text,
                Err(error) => {
                    yield StreamChunk::Error(error);
                    return;
                }
            };

            for (position, token) in tokenize(&text).into_iter().enumerate() {
                if position > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield StreamChunk::Token(token);
            }

            finish.await;
            yield StreamChunk::Done { session_id };
        })
    }
}
