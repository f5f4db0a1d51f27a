//! 프롬프트 빌더
//!
//! - 근거 모드: 검색된 스니펫을 `[source] text` 블록으로 질문 앞에 넣고,
//!   그 정보만 사용하도록 지시
//! - 폴백 모드: 인덱스가 없을 때 컨텍스트 없음을 명시하고 일반 지식 답변 허용

use crate::knowledge::RetrievalHit;

/// 인덱스 없이 답변했을 때의 출처 표시
pub const GENERAL_KNOWLEDGE_SOURCE: &str = "General AI Knowledge";

/// 시스템 프롬프트 (역할, 인용 규칙, 모르면 모른다고 답하기)
pub fn system_prompt() -> &'static str {
    "You are a helpful assistant that answers questions about a candidate using their résumé and project notes.
- Be concise and specific.
- Cite the snippets you used as [source], using the label shown before each snippet.
- If the answer is not in the provided text, say you do not know.
- Always be professional and objective."
}

/// 사용자 프롬프트
///
/// `snippets` 가 `None` 이면 컨텍스트 없는 폴백 프롬프트를 만듭니다.
pub fn user_prompt(question: &str, snippets: Option<&[RetrievalHit]>) -> String {
    match snippets {
        Some(snippets) => format!(
            "Question: {question}

Use this information:
{context}

Answer using only the information above. Give a short, direct answer and mention which parts you used.",
            context = render_context(snippets),
        ),
        None => format!(
            "Please answer this question about the candidate: {question}

Note: No specific context was provided from uploaded documents, so please provide a general response based on your knowledge."
        ),
    }
}

/// `[source] text` 블록을 빈 줄로 구분해 렌더링
pub fn render_context(snippets: &[RetrievalHit]) -> String {
    snippets
        .iter()
        .map(render_snippet)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_snippet(hit: &RetrievalHit) -> String {
    format!("[{}] {}", hit.source, hit.text)
}

/// 컨텍스트 예산 적용
///
/// 순위 순서대로, 렌더링된 컨텍스트가 `max_chars` 를 넘지 않는 동안 추가합니다.
/// 첫 번째 스니펫은 항상 포함하며 필요하면 문자 경계에서 자릅니다.
pub fn fit_context(hits: &[RetrievalHit], max_chars: usize) -> Vec<RetrievalHit> {
    let mut selected: Vec<RetrievalHit> = Vec::new();
    let mut used = 0;

    for hit in hits {
        let separator = if selected.is_empty() { 0 } else { 2 };
        let cost = render_snippet(hit).chars().count();

        if used + separator + cost <= max_chars {
            used += separator + cost;
            selected.push(hit.clone());
            continue;
        }

        if selected.is_empty() {
            let label = hit.source.chars().count() + 3;
            let keep = max_chars.saturating_sub(label);
            let mut truncated = hit.clone();
            truncated.text = hit.text.chars().take(keep).collect();
            tracing::debug!(
                "Truncated top snippet {} from {} to {} chars",
                hit.id,
                hit.text.chars().count(),
                keep
            );
            selected.push(truncated);
        }
        break;
    }

    if selected.len() < hits.len() {
        tracing::debug!(
            "Context budget {} chars: kept {}/{} snippets",
            max_chars,
            selected.len(),
            hits.len()
        );
    }

    selected
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source: &str, text: &str) -> RetrievalHit {
        RetrievalHit {
            id: format!("{}-id", source),
            source: source.to_string(),
            text: text.to_string(),
            score: 0.5,
        }
    }

    #[test]
    fn test_system_prompt_directives() {
        let sys = system_prompt();
        assert!(sys.contains("[source]"));
        assert!(sys.contains("do not know"));
    }

    #[test]
    fn test_grounded_prompt() {
        let hits = vec![hit("resume", "Jane is an engineer."), hit("projects", "Project X.")];
        let prompt = user_prompt("What did Jane do?", Some(&hits));

        assert!(prompt.contains("[resume] Jane is an engineer.\n\n[projects] Project X."));
        assert!(prompt.contains("What did Jane do?"));
        assert!(prompt.contains("only the information above"));
        // 컨텍스트가 질문보다 앞
        assert!(prompt.find("[resume]").unwrap() < prompt.find("Answer using").unwrap());
    }

    #[test]
    fn test_ungrounded_prompt() {
        let prompt = user_prompt("What did Jane do?", None);
        assert!(prompt.contains("What did Jane do?"));
        assert!(prompt.contains("No specific context was provided"));
        assert!(!prompt.contains("Use this information"));
    }

    #[test]
    fn test_render_context() {
        assert_eq!(render_context(&[]), "");
        assert_eq!(render_context(&[hit("a", "x")]), "[a] x");
    }

    #[test]
    fn test_fit_context_respects_budget() {
        let hits = vec![hit("a", "12345"), hit("b", "12345"), hit("c", "12345")];
        // "[a] 12345" = 9 chars, 구분자 2
        assert_eq!(fit_context(&hits, 100).len(), 3);
        assert_eq!(fit_context(&hits, 20).len(), 2);
        assert_eq!(fit_context(&hits, 19).len(), 1);
        assert!(render_context(&fit_context(&hits, 20)).chars().count() <= 20);
    }

    #[test]
    fn test_fit_context_truncates_first_snippet() {
        let hits = vec![hit("resume", "가나다라마바사아자차")];
        let fitted = fit_context(&hits, 13);
        assert_eq!(fitted.len(), 1);
        assert_eq!(fitted[0].text, "가나다라");
        assert_eq!(render_context(&fitted).chars().count(), 13);
    }

    #[test]
    fn test_fit_context_empty() {
        assert!(fit_context(&[], 10).is_empty());
    }
}
