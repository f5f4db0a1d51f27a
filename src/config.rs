//! 설정 모듈 - 환경변수 기반 런타임 설정
//!
//! 프로세스 시작 시 한 번 읽어 [`Config`]로 고정합니다.
//!
//! | 변수 | 기본값 |
//! |---|---|
//! | `OPENAI_API_KEY` (대체: `NEXT_PUBLIC_OPENAI_API_KEY`) | 없음 |
//! | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
//! | `OPENAI_EMBED_MODEL` | `text-embedding-3-small` |
//! | `OPENAI_CHAT_MODEL` | `gpt-4o-mini` |
//! | `RAG_DATA_DIR` | `~/.resume-rag` |
//! | `RAG_CHUNK_SIZE` | 700 |
//! | `RAG_TOP_K` | 5 |
//! | `RAG_MAX_CONTEXT_CHARS` | 6000 |
//! | `RAG_TEMPERATURE` | 0.2 |

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{RagError, Result};
use crate::knowledge::get_data_dir;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CHUNK_SIZE: usize = crate::knowledge::DEFAULT_TARGET_SIZE;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 6000;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// API 키 환경변수 (우선순위 순)
const API_KEY_VARS: [&str; 2] = ["OPENAI_API_KEY", "NEXT_PUBLIC_OPENAI_API_KEY"];

// ============================================================================
// Config
// ============================================================================

/// 런타임 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프로바이더 자격 증명 (없으면 질의/빌드 시 설정 에러)
    pub api_key: Option<String>,
    /// OpenAI 호환 엔드포인트
    pub base_url: String,
    pub embed_model: String,
    pub chat_model: String,
    /// `embeddings.json` 이 위치하는 디렉토리
    pub data_dir: PathBuf,
    /// 청크 목표 크기 (문자 수)
    pub chunk_size: usize,
    /// 질문당 검색 청크 수
    pub top_k: usize,
    /// 프롬프트 컨텍스트 예산 (문자 수)
    pub max_context_chars: usize,
    pub temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            data_dir: get_data_dir(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            top_k: DEFAULT_TOP_K,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl Config {
    /// 프로세스 환경변수에서 읽기
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정 구성 (테스트에서 환경변수 대신 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let api_key = API_KEY_VARS.iter().find_map(|&key| {
            let value = get(key)?;
            tracing::debug!("Using API key from {}", key);
            Some(value)
        });

        let config = Self {
            api_key,
            base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            embed_model: get("OPENAI_EMBED_MODEL").unwrap_or(defaults.embed_model),
            chat_model: get("OPENAI_CHAT_MODEL").unwrap_or(defaults.chat_model),
            data_dir: get("RAG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            chunk_size: parse_var("RAG_CHUNK_SIZE", get("RAG_CHUNK_SIZE"), defaults.chunk_size)?,
            top_k: parse_var("RAG_TOP_K", get("RAG_TOP_K"), defaults.top_k)?,
            max_context_chars: parse_var(
                "RAG_MAX_CONTEXT_CHARS",
                get("RAG_MAX_CONTEXT_CHARS"),
                defaults.max_context_chars,
            )?,
            temperature: parse_var("RAG_TEMPERATURE", get("RAG_TEMPERATURE"), defaults.temperature)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("RAG_CHUNK_SIZE must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RagError::Config(format!(
                "RAG_TEMPERATURE must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// 자격 증명 설정 여부
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// 자격 증명 반환 (없으면 [`RagError::MissingApiKey`])
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or(RagError::MissingApiKey)
    }

    /// 영구 스냅샷 경로
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(crate::knowledge::SNAPSHOT_FILE)
    }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| RagError::Config(format!("{} has an invalid value: {:?}", name, value))),
    }
}

// ============================================================================
// Tests
// ============================================================================
