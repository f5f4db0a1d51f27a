//! Server-Sent Events 디코더 (chat completions 스트림)
//!
//! 네트워크 청크 경계는 줄/UTF-8 경계와 무관하므로 바이트 단위로 버퍼링하고,
//! 완성된 줄만 해석합니다.

use std::collections::VecDeque;

use futures::stream::{self, StreamExt};
use futures::Stream;
use serde::Deserialize;

use crate::error::{RagError, Result};

use super::TokenStream;

/// 스트림 종료 표시
const DONE_MARKER: &str = "[DONE]";

/// 디코딩된 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// 생성된 텍스트 조각
    Delta(String),
    /// `data: [DONE]`
    Done,
    /// 스트림 내 에러 페이로드 또는 해석 불가능한 데이터
    Error(String),
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// 증분 SSE 디코더
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 바이트 조각을 넣고 완성된 줄에서 나온 이벤트를 반환
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// 스트림 종료 시 남은 (개행 없는) 줄 처리
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    // 빈 줄 = 이벤트 구분자, ':' = keep-alive 주석
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == DONE_MARKER {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(ChatChunk {
            error: Some(err), ..
        }) => Some(SseEvent::Error(err.message)),
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Delta),
        Err(e) => Some(SseEvent::Error(format!("Malformed stream event: {}", e))),
    }
}

// ============================================================================
// Token Stream Adapter
// ============================================================================

struct StreamState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> StreamState<S> {
    /// 이벤트를 대기열에 넣고, 종료/에러를 만나면 이후 입력을 무시
    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.pending.push_back(Ok(text)),
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(RagError::Upstream(message)));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// 바이트 스트림을 토큰 스트림으로 변환
///
/// 토큰은 프로바이더가 보낸 순서 그대로 나옵니다.
/// 반환된 스트림을 drop 하면 하위 바이트 스트림(HTTP 연결)도 함께 drop 됩니다.
pub fn token_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.enqueue(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(RagError::Upstream(format!("Completion stream failed: {}", e))));
                }
                None => {
                    let events = state.decoder.finish();
                    state.enqueue(events);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

// ============================================================================
// Tests
// ============================================================================
