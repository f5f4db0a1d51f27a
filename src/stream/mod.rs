//! 답변 스트림 프로토콜
//!
//! 생성 텍스트와 출처 목록을 하나의 순서 있는 텍스트 스트림에 싣습니다.
//!
//! ## Text 프레이밍 (`text/plain`, 기본값)
//! ```text
//! Hel lo ... SOURCES:["resume","projects"]
//! ```
//! 토큰을 받는 즉시 그대로 전달하고, 완성 스트림이 끝나면 `SOURCES:` 마커와
//! JSON 배열 트레일러를 한 번 붙입니다. 스트리밍 중 에러가 나면 트레일러 없이
//! 스트림을 에러로 끝냅니다 (연결 종료).
//!
//! ## NDJSON 프레이밍 (`application/x-ndjson`)
//! ```text
//! {"type":"token","text":"Hel"}
//! {"type":"sources","sources":["resume"]}
//! ```
//! 줄 단위 프레임이라 생성 텍스트에 마커 문자열이 있어도 안전하며,
//! 스트리밍 중 에러는 `{"type":"error",...}` 프레임으로 전달됩니다.

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::completion::TokenStream;
use crate::error::{RagError, Result};

/// 출처 트레일러 마커
pub const SOURCES_MARKER: &str = "SOURCES:";

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

// ============================================================================
// Types
// ============================================================================

/// 와이어 프레이밍 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// 원문 텍스트 + `SOURCES:` 트레일러
    #[default]
    Text,
    /// 줄 단위 JSON 프레임
    Ndjson,
}

impl Framing {
    /// `Accept` 헤더로 프레이밍 결정
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(value) if value.contains(NDJSON_CONTENT_TYPE) => Framing::Ndjson,
            _ => Framing::Text,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Framing::Text => TEXT_CONTENT_TYPE,
            Framing::Ndjson => NDJSON_CONTENT_TYPE,
        }
    }
}

/// NDJSON 프레임
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Token { text: String },
    Sources { sources: Vec<String> },
    Error { message: String },
}

impl Frame {
    fn to_line(&self) -> String {
        // 문자열/배열만 담으므로 직렬화는 실패하지 않음
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// 디코딩된 답변
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    /// `push` 로 아직 내보내지 않은 답변 끝부분
    ///
    /// 생성 텍스트에 마커 문자열이 있으면 그 이후 텍스트는 종료 시점에야 확정됩니다.
    /// 스트리밍 출력 + `unreleased` = `answer`.
    pub unreleased: String,
}

/// 인코딩된 답변 스트림
pub type EncodedStream = BoxStream<'static, Result<String>>;

// ============================================================================
// Encoder
// ============================================================================

/// 텍스트 프레이밍 트레일러 (`SOURCES:` + JSON 배열)
pub fn sources_trailer(sources: &[String]) -> String {
    let json = serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string());
    format!("{}{}", SOURCES_MARKER, json)
}

struct EncoderState {
    tokens: Option<TokenStream>,
    trailer: Option<String>,
    framing: Framing,
}

/// 토큰 스트림에 출처 트레일러를 붙여 인코딩
///
/// 토큰 순서를 유지하며 트레일러는 모든 토큰 뒤에 정확히 한 번 나옵니다.
pub fn encode_answer(tokens: TokenStream, sources: Vec<String>, framing: Framing) -> EncodedStream {
    let trailer = match framing {
        Framing::Text => sources_trailer(&sources),
        Framing::Ndjson => Frame::Sources { sources }.to_line(),
    };

    let state = EncoderState {
        tokens: Some(tokens),
        trailer: Some(trailer),
        framing,
    };

    stream::unfold(state, |mut state| async move {
        while let Some(tokens) = state.tokens.as_mut() {
            match tokens.next().await {
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => {
                    let encoded = match state.framing {
                        Framing::Text => text,
                        Framing::Ndjson => Frame::Token { text }.to_line(),
                    };
                    return Some((Ok(encoded), state));
                }
                Some(Err(e)) => {
                    tracing::warn!("Completion stream failed mid-answer: {}", e);
                    state.tokens = None;
                    state.trailer = None;
                    let item = match state.framing {
                        Framing::Text => Err(e),
                        Framing::Ndjson => Ok(Frame::Error {
                            message: e.to_string(),
                        }
                        .to_line()),
                    };
                    return Some((item, state));
                }
                None => state.tokens = None,
            }
        }

        let trailer = state.trailer.take()?;
        Some((Ok(trailer), state))
    })
    .boxed()
}

// ============================================================================
// Text Decoder
// ============================================================================

/// `SOURCES:` 트레일러 디코더 (소비자 측)
///
/// 마커 이전 텍스트는 도착하는 대로 내보내고, 마커가 조각 경계에 걸쳐
/// 나뉘어 도착해도 마커 일부를 답변으로 내보내지 않습니다.
/// 종료 시 뒤에서부터 JSON 배열 트레일러가 붙은 마커를 찾아 답변/출처를 나눕니다.
/// 첫 마커 이후 텍스트는 [`DecodedAnswer::unreleased`] 로 돌려줍니다.
#[derive(Debug, Default)]
pub struct AnswerDecoder {
    buffer: String,
    emitted: usize,
    pending_bytes: Vec<u8>,
}

impl AnswerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 텍스트 조각 추가, 새로 표시 가능한 답변 텍스트 반환
    pub fn push(&mut self, fragment: &str) -> String {
        self.buffer.push_str(fragment);

        let limit = match self.buffer.find(SOURCES_MARKER) {
            Some(pos) => pos,
            None => self.buffer.len() - partial_marker_len(&self.buffer),
        };

        if limit <= self.emitted {
            return String::new();
        }

        let visible = self.buffer[self.emitted..limit].to_string();
        self.emitted = limit;
        visible
    }

    /// 바이트 조각 추가 (UTF-8 문자가 조각 경계에서 잘려도 됨)
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.pending_bytes) {
            Ok(_) => self.pending_bytes.len(),
            // 끝이 잘린 문자만 남겨둠, 잘못된 바이트는 대체 문자로
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending_bytes.len(),
        };

        let bytes: Vec<u8> = self.pending_bytes.drain(..valid).collect();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.push(&text)
    }

    /// 지금까지 표시된 답변 텍스트
    pub fn visible(&self) -> &str {
        &self.buffer[..self.emitted]
    }

    /// 스트림 종료 처리
    pub fn finish(mut self) -> Result<DecodedAnswer> {
        if !self.pending_bytes.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.buffer.push_str(&rest);
        }

        // 출처 라벨에도 마커가 들어갈 수 있으므로, 뒤에서부터 JSON 배열로
        // 해석되는 첫 마커를 트레일러로 봄
        let mut first_error = None;
        let mut trailer = None;
        for (pos, _) in self.buffer.rmatch_indices(SOURCES_MARKER) {
            let json = self.buffer[pos + SOURCES_MARKER.len()..].trim();
            match serde_json::from_str::<Vec<String>>(json) {
                Ok(sources) => {
                    trailer = Some((pos, sources));
                    break;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let (pos, sources) = match (trailer, first_error) {
            (Some(found), _) => found,
            (None, Some(e)) => {
                return Err(RagError::Protocol(format!("invalid SOURCES trailer: {}", e)))
            }
            (None, None) => {
                return Err(RagError::Protocol("stream ended without SOURCES trailer".into()))
            }
        };

        self.buffer.truncate(pos);
        // 마커 시작 위치는 항상 emitted 이후
        let unreleased = self.buffer.get(self.emitted..).unwrap_or_default().to_string();

        Ok(DecodedAnswer {
            answer: self.buffer,
            sources,
            unreleased,
        })
    }
}

/// 버퍼 끝이 마커의 앞부분과 일치하는 길이 (마커 전체 제외)
fn partial_marker_len(buffer: &str) -> usize {
    (1..SOURCES_MARKER.len())
        .rev()
        .find(|&k| buffer.ends_with(&SOURCES_MARKER[..k]))
        .unwrap_or(0)
}

// ============================================================================
// NDJSON Decoder
// ============================================================================

/// NDJSON 프레임 디코더
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: String,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조각 추가, 완성된 줄의 프레임 반환
    pub fn push(&mut self, fragment: &str) -> Result<Vec<Frame>> {
        self.buffer.push_str(fragment);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(frame) = parse_frame(&line)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// 남은 줄 처리
    pub fn finish(&mut self) -> Result<Vec<Frame>> {
        let line = std::mem::take(&mut self.buffer);
        Ok(parse_frame(&line)?.into_iter().collect())
    }
}

fn parse_frame(line: &str) -> Result<Option<Frame>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| RagError::Protocol(format!("invalid frame {:?}: {}", line, e)))
}

/// 프레임 목록을 답변으로 조립
///
/// 에러 프레임은 [`RagError::Upstream`] 으로, 출처 프레임 누락은 프로토콜 에러로 처리합니다.
pub fn assemble_frames(frames: impl IntoIterator<Item = Frame>) -> Result<DecodedAnswer> {
    let mut answer = String::new();
    let mut sources = None;

    for frame in frames {
        match frame {
            Frame::Token { text } => answer.push_str(&text),
            Frame::Sources { sources: list } => sources = Some(list),
            Frame::Error { message } => return Err(RagError::Upstream(message)),
        }
    }

    let sources =
        sources.ok_or_else(|| RagError::Protocol("stream ended without sources frame".into()))?;
    Ok(DecodedAnswer {
        answer,
        sources,
        unreleased: String::new(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: Vec<Result<String>>) -> TokenStream {
        stream::iter(items).boxed()
    }

    fn ok_tokens(items: &[&str]) -> TokenStream {
        tokens(items.iter().map(|t| Ok(t.to_string())).collect())
    }

    async fn collect(stream: EncodedStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_text_encoding_appends_trailer_last() {
        let encoded = collect(encode_answer(
            ok_tokens(&["Hel", "", "lo"]),
            vec!["resume".into()],
            Framing::Text,
        ))
        .await;

        let parts: Vec<String> = encoded.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(parts, vec!["Hel", "lo", "SOURCES:[\"resume\"]"]);
    }

    #[tokio::test]
    async fn test_text_encoding_error_has_no_trailer() {
        let encoded = collect(encode_answer(
            tokens(vec![Ok("partial".into()), Err(RagError::Upstream("reset".into()))]),
            vec!["resume".into()],
            Framing::Text,
        ))
        .await;

        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0].as_ref().unwrap(), "partial");
        assert!(encoded[1].is_err());
    }

    #[tokio::test]
    async fn test_ndjson_encoding_error_frame() {
        let encoded = collect(encode_answer(
            tokens(vec![Ok("a".into()), Err(RagError::Upstream("reset".into()))]),
            vec!["resume".into()],
            Framing::Ndjson,
        ))
        .await;

        let body: String = encoded.into_iter().map(|r| r.unwrap()).collect();
        let mut decoder = NdjsonDecoder::new();
        let frames = decoder.push(&body).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Token { text: "a".into() });
        assert!(matches!(frames[1], Frame::Error { .. }));
        assert!(matches!(assemble_frames(frames), Err(RagError::Upstream(_))));
    }

    #[test]
    fn test_decode_scenario() {
        let mut decoder = AnswerDecoder::new();
        let mut shown = String::new();
        shown.push_str(&decoder.push("Hel"));
        shown.push_str(&decoder.push("lo"));
        shown.push_str(&decoder.push("SOURCES:[\"resume\"]"));

        assert_eq!(shown, "Hello");
        let decoded = decoder.finish().unwrap();
        assert_eq!(decoded.answer, "Hello");
        assert_eq!(decoded.sources, vec!["resume".to_string()]);
    }

    #[test]
    fn test_decoder_marker_split_across_fragments() {
        let mut decoder = AnswerDecoder::new();
        assert_eq!(decoder.push("Answer SOU"), "Answer ");
        assert_eq!(decoder.push("RCES"), "");
        assert_eq!(decoder.push(":[\"a\","), "");
        assert_eq!(decoder.push("\"b\"]"), "");

        let decoded = decoder.finish().unwrap();
        assert_eq!(decoded.answer, "Answer ");
        assert_eq!(decoded.sources, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_decoder_false_partial_marker_released() {
        let mut decoder = AnswerDecoder::new();
        assert_eq!(decoder.push("SOUP "), "SOUP ");
        assert_eq!(decoder.push("is S"), "is ");
        assert_eq!(decoder.push("tew"), "Stew");
        assert_eq!(decoder.visible(), "SOUP is Stew");
    }

    #[test]
    fn test_decoder_uses_last_marker() {
        let mut decoder = AnswerDecoder::new();
        decoder.push("The log line says SOURCES: none. ");
        decoder.push("SOURCES:[\"projects\"]");

        let decoded = decoder.finish().unwrap();
        assert_eq!(decoded.answer, "The log line says SOURCES: none. ");
        assert_eq!(decoded.sources, vec!["projects".to_string()]);
    }

    #[test]
    fn test_decoder_releases_text_after_literal_marker() {
        let mut decoder = AnswerDecoder::new();
        let mut shown = String::new();
        shown.push_str(&decoder.push("The log says SOURCES: none. "));
        shown.push_str(&decoder.push("Done."));
        shown.push_str(&decoder.push("SOURCES:[\"resume\"]"));
        assert_eq!(shown, "The log says ");

        let decoded = decoder.finish().unwrap();
        assert_eq!(decoded.answer, "The log says SOURCES: none. Done.");
        assert_eq!(decoded.unreleased, "SOURCES: none. Done.");
        assert_eq!(format!("{}{}", shown, decoded.unreleased), decoded.answer);
    }

    #[tokio::test]
    async fn test_decoder_source_label_containing_marker() {
        let encoded = collect(encode_answer(
            ok_tokens(&["Hi"]),
            vec!["SOURCES:notes".into()],
            Framing::Text,
        ))
        .await;
        let body: String = encoded.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(body, "HiSOURCES:[\"SOURCES:notes\"]");

        let mut decoder = AnswerDecoder::new();
        let shown = decoder.push(&body);
        let decoded = decoder.finish().unwrap();
        assert_eq!(shown, "Hi");
        assert_eq!(decoded.answer, "Hi");
        assert_eq!(decoded.sources, vec!["SOURCES:notes".to_string()]);
        assert!(decoded.unreleased.is_empty());
    }

    #[test]
    fn test_decoder_invalid_trailer() {
        let mut decoder = AnswerDecoder::new();
        decoder.push("text SOURCES:[not json");
        assert!(matches!(decoder.finish(), Err(RagError::Protocol(_))));
    }

    #[test]
    fn test_decoder_missing_trailer() {
        let mut decoder = AnswerDecoder::new();
        decoder.push("cut off");
        assert!(matches!(decoder.finish(), Err(RagError::Protocol(_))));
    }

    #[test]
    fn test_decoder_push_bytes_split_utf8() {
        let body = "안녕SOURCES:[\"이력서\"]".as_bytes();
        let mut decoder = AnswerDecoder::new();
        let mut shown = String::new();
        for piece in body.chunks(2) {
            shown.push_str(&decoder.push_bytes(piece));
        }
        assert_eq!(shown, "안녕");
        let decoded = decoder.finish().unwrap();
        assert_eq!(decoded.sources, vec!["이력서".to_string()]);
    }

    #[tokio::test]
    async fn test_ndjson_round_trip_with_marker_in_text() {
        let encoded = collect(encode_answer(
            ok_tokens(&["literal SOURCES:[] ", "text"]),
            vec!["resume".into()],
            Framing::Ndjson,
        ))
        .await;

        let body: String = encoded.into_iter().map(|r| r.unwrap()).collect();
        let mut decoder = NdjsonDecoder::new();
        let mut frames = Vec::new();
        for piece in body.as_bytes().chunks(3) {
            frames.extend(decoder.push(std::str::from_utf8(piece).unwrap()).unwrap());
        }
        frames.extend(decoder.finish().unwrap());

        let decoded = assemble_frames(frames).unwrap();
        assert_eq!(decoded.answer, "literal SOURCES:[] text");
        assert_eq!(decoded.sources, vec!["resume".to_string()]);
    }

    #[test]
    fn test_framing_from_accept() {
        assert_eq!(Framing::from_accept(None), Framing::Text);
        assert_eq!(Framing::from_accept(Some("text/plain")), Framing::Text);
        assert_eq!(
            Framing::from_accept(Some("application/x-ndjson, */*")),
            Framing::Ndjson
        );
        assert_eq!(Framing::Ndjson.content_type(), "application/x-ndjson");
    }

    #[test]
    fn test_ndjson_invalid_line() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push("not json\n").is_err());
        assert!(assemble_frames(vec![Frame::Token { text: "x".into() }]).is_err());
    }
}
