//! Consumer for the backend's live system-status event stream.
//!
//! Every event carries the complete list of systems. Consumers replace their
//! state with each snapshot; there is no merging and no reconnect. A
//! transport or decode error ends the stream, and dropping the stream closes
//! the upstream connection.

use super::api::{decode_list, unwrap_envelope, ApiClient, ApiError};
use super::auth::Session;
use crate::models::system::System;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const SYSTEM_STREAM_PATH: &str = "/stream/systems";

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Bytes are buffered until a full
/// line is available, so chunks may split lines and UTF-8 sequences.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                self.event = None;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "event" => self.event = Some(value.to_string()),
                _ => {}
            }
        }
        events
    }
}

pub fn decode_snapshot(data: &str) -> Result<Vec<System>, ApiError> {
    let value = serde_json::from_str(data)?;
    decode_list(unwrap_envelope(value)?)
}

type Body = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

struct StreamState {
    body: Body,
    parser: SseParser,
    pending: VecDeque<Vec<System>>,
    finished: bool,
}

/// Connects to the backend status stream with the session's tokens. The
/// upstream response is awaited here, so a rejected token surfaces as an
/// error before anything is sent to the browser.
pub async fn open_system_stream(
    api: &ApiClient,
    session: &Session,
) -> Result<impl Stream<Item = Vec<System>> + Send + 'static, ApiError> {
    let response = api
        .open_event_stream(&session.credentials, SYSTEM_STREAM_PATH)
        .await?;
    info!("Opened system status stream for {}", session.username);
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map(|b| b.to_vec()))
        .boxed();
    Ok(system_snapshots(body))
}

/// Yields one full system list per event of an open stream body.
fn system_snapshots(body: Body) -> impl Stream<Item = Vec<System>> + Send {
    let state = StreamState {
        body,
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(snapshot) = state.pending.pop_front() {
                return Some((snapshot, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for event in state.parser.push(&chunk) {
                        match decode_snapshot(&event.data) {
                            Ok(systems) => {
                                debug!(
                                    "Status snapshot ({}) with {} systems",
                                    event.event.as_deref().unwrap_or("message"),
                                    systems.len()
                                );
                                state.pending.push_back(systems);
                            }
                            Err(e) => {
                                warn!("Dropping system status stream, bad event: {}", e);
                                state.finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("System status stream failed: {}", e);
                    state.finished = true;
                }
                None => {
                    info!("System status stream closed by backend");
                    state.finished = true;
                }
            }
        }
    })
}
