//! CLI 모듈
//!
//! resume-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;

use crate::config::Config;
use crate::knowledge::IndexOrigin;
use crate::pipeline::RagPipeline;
use crate::server;
use crate::stream::{assemble_frames, AnswerDecoder, Framing, NdjsonDecoder};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "resume-rag")]
#[command(version, about = "이력서/프로젝트 문서 기반 RAG 질의응답", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (RAG_DATA_DIR 대신 사용)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 폴더의 .md / .txt 문서로 embeddings.json 빌드
    Build {
        /// 문서 폴더 (기본: 데이터 디렉토리)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 질문하기 (답변 스트리밍)
    Ask {
        /// 질문
        question: String,

        /// 검색할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// NDJSON 프레이밍 사용
        #[arg(long)]
        ndjson: bool,
    },

    /// HTTP 서버 실행
    Serve {
        /// 바인드 주소
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().context("설정 로드 실패")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Build { dir } => cmd_build(&config, dir).await,
        Commands::Ask {
            question,
            top_k,
            ndjson,
        } => {
            if let Some(k) = top_k {
                config.top_k = k;
            }
            cmd_ask(&config, &question, ndjson).await
        }
        Commands::Serve { addr } => cmd_serve(&config, addr).await,
        Commands::Status => cmd_status(&config).await,
    }
}

fn require_api_key(config: &Config) -> Result<()> {
    if config.require_api_key().is_err() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export OPENAI_API_KEY=your-api-key\n  \
             또는\n  \
             export NEXT_PUBLIC_OPENAI_API_KEY=your-api-key"
        );
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 빌드 명령어 (build)
///
/// 폴더 최상위 문서를 청킹/임베딩하여 스냅샷 파일을 통째로 교체합니다.
async fn cmd_build(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    require_api_key(config)?;

    let dir = dir.unwrap_or_else(|| config.data_dir.clone());
    println!("[*] 문서 수집 중: {}", dir.display());

    let pipeline = RagPipeline::from_config(config).context("파이프라인 초기화 실패")?;
    let report = pipeline
        .index()
        .build_durable_from_dir(&dir)
        .await
        .context("임베딩 빌드 실패")?;

    println!(
        "[OK] {} 문서에서 {} 청크 임베딩 완료 (차원: {})",
        report.documents, report.chunks, report.dimension
    );
    println!("     저장: {}", config.snapshot_path().display());

    Ok(())
}

/// 질문 명령어 (ask)
///
/// 서버와 같은 와이어 포맷으로 인코딩한 뒤 디코더로 읽어 출력합니다.
async fn cmd_ask(config: &Config, question: &str, ndjson: bool) -> Result<()> {
    require_api_key(config)?;

    let pipeline = RagPipeline::from_config(config).context("파이프라인 초기화 실패")?;
    let answer = pipeline.ask(question).await.context("질의 실패")?;

    if !answer.is_grounded() {
        println!("[!] 인덱스가 없어 일반 지식으로 답변합니다.\n");
    }

    let framing = if ndjson { Framing::Ndjson } else { Framing::Text };
    let mut encoded = answer.encode(framing);
    let mut stdout = std::io::stdout();

    let decoded = match framing {
        Framing::Text => {
            let mut decoder = AnswerDecoder::new();
            while let Some(part) = encoded.next().await {
                let part = part.context("답변 스트리밍 실패")?;
                print!("{}", decoder.push(&part));
                stdout.flush()?;
            }
            let decoded = decoder.finish()?;
            // 생성 텍스트 속 마커 때문에 보류된 부분
            print!("{}", decoded.unreleased);
            decoded
        }
        Framing::Ndjson => {
            let mut decoder = NdjsonDecoder::new();
            let mut frames = Vec::new();
            while let Some(part) = encoded.next().await {
                let part = part.context("답변 스트리밍 실패")?;
                for frame in decoder.push(&part)? {
                    println!("{}", serde_json::to_string(&frame)?);
                    frames.push(frame);
                }
            }
            frames.extend(decoder.finish()?);
            assemble_frames(frames).context("답변 스트리밍 실패")?
        }
    };

    println!("\n");
    println!("[OK] 출처: {}", decoded.sources.join(", "));

    Ok(())
}

/// 서버 명령어 (serve)
async fn cmd_serve(config: &Config, addr: SocketAddr) -> Result<()> {
    if !config.has_api_key() {
        println!("[!] API 키 미설정 - 질의/빌드 요청은 500 에러를 반환합니다.");
    }

    let pipeline = RagPipeline::from_config(config).context("파이프라인 초기화 실패")?;
    println!("[*] 서버 시작: http://{}", addr);

    server::serve(Arc::new(pipeline), addr)
        .await
        .context("서버 실행 실패")
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config) -> Result<()> {
    println!("resume-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    if config.has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }
    println!(
        "[*] 모델: {} (임베딩), {} (답변)",
        config.embed_model, config.chat_model
    );

    let pipeline = RagPipeline::from_config(config).context("파이프라인 초기화 실패")?;
    let status = pipeline.index().status().await.context("인덱스 상태 조회 실패")?;

    if status.snapshot_exists {
        let size = tokio::fs::metadata(&status.snapshot_path)
            .await
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        println!(
            "[OK] 스냅샷: {} ({})",
            status.snapshot_path.display(),
            format_bytes(size)
        );
    } else {
        println!("[!] 스냅샷 없음: {}", status.snapshot_path.display());
        println!("    빌드: resume-rag build --dir <문서 폴더>");
    }

    match status.active {
        Some(origin) => {
            let label = match origin {
                IndexOrigin::Session => "세션",
                IndexOrigin::Durable => "스냅샷",
            };
            println!(
                "[OK] 활성 인덱스: {} ({} 청크, 차원 {})",
                label, status.chunk_count, status.dimension
            );
            println!("     문서: {}", status.sources.join(", "));
        }
        None => println!("[!] 활성 인덱스 없음 - 일반 지식으로 답변합니다"),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
