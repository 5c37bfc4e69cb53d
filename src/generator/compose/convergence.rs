//! 撰写/评审收敛循环
//!
//! 每次调用只推进当前文档的一个子步骤：
//! 第 0 轮由写作模型撰写，奇数轮由规划模型评审，偶数轮由写作模型按评审意见重写。
//! 评审通过或达到修订上限时提交文档，游标移到下一篇。

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::generator::context::GeneratorContext;
use crate::generator::research::search_all;
use crate::generator::types::{Document, DocumentPlan, GeneratorRole, ResearchContext, Stage};
use crate::llm::client::utils::{fit_to_budget, input_budget};
use crate::utils::token_estimator::clip_chars;
use crate::utils::truncation::validate_writer_output;

use super::prompts;

const REVIEW_OUTLINE_CHARS: usize = 3_000;
const REVIEW_CONTENT_CHARS: usize = 6_000;
const REVIEW_RESEARCH_CHARS: usize = 10_000;
const REVISION_OUTLINE_CHARS: usize = 5_000;
const REVIEW_MAX_OUTPUT: u32 = 5_000;

const SEARCH_NEEDED_MARKER: &str = "SEARCH_NEEDED:";
const REJECTION_MARKER: &str = "NEEDS REVISION";

static SEARCH_NEEDED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)SEARCH_NEEDED:[ \t]*(.+?)[ \t]*$").ok());

/// 推进当前文档一个子步骤；所有文档提交后进入 Done
pub async fn author_and_refine(generator: &GeneratorContext, context: &mut ResearchContext) {
    let index = context.scratch.current_doc_index;
    let total = context.scratch.document_plans.len();
    let Some(plan) = context.scratch.document_plans.get(index).cloned() else {
        info!(
            session_id = %context.session_id,
            documents = context.scratch.approved_documents.len(),
            "🎉 全部文档已完成"
        );
        context.stage = Stage::Done;
        generator.emit(
            context,
            "orchestrator",
            "Documents complete",
            format!("{} documents approved", context.scratch.approved_documents.len()),
        );
        return;
    };

    let mut document = context.scratch.pending.take().unwrap_or_else(|| Document {
        title: plan.title.clone(),
        content: String::new(),
        outline: plan.outline.clone(),
        revision_round: 0,
    });
    let ceiling = generator.config.workflow.revision_ceiling();
    let progress = format!(
        "doc {}/{}, round {}/{}",
        index + 1,
        total,
        document.revision_round + 1,
        ceiling
    );

    let mut approved = false;
    match document.revision_round {
        0 => {
            generator.emit(context, "writer", "Authoring", format!("{}: {}", plan.title, progress));
            document.content = author(generator, context, &plan).await;
        }
        round if round % 2 == 1 => {
            generator.emit(context, "planner", "Reviewing", format!("{}: {}", plan.title, progress));
            approved = review(generator, context, &document).await;
        }
        _ => {
            generator.emit(context, "writer", "Revising", format!("{}: {}", plan.title, progress));
            revise(generator, context, &mut document).await;
        }
    }
    document.revision_round += 1;

    if approved || document.revision_round >= ceiling {
        if approved {
            info!(session_id = %context.session_id, doc = %document.title, rounds = document.revision_round, "✅ 文档评审通过");
        } else {
            warn!(session_id = %context.session_id, doc = %document.title, rounds = document.revision_round, "⏱️ 达到修订上限，接受当前版本");
        }
        generator.emit(
            context,
            "orchestrator",
            if approved { "Document approved" } else { "Revision ceiling reached" },
            format!("{} after {} rounds", document.title, document.revision_round),
        );
        context.scratch.approved_documents.push(document);
        context.scratch.current_doc_index = index + 1;
        context.scratch.pending = None;
        context.scratch.last_review = None;
    } else {
        context.scratch.pending = Some(document);
    }
}

/// 初稿；写作模型失败时用大纲生成骨架文档
async fn author(generator: &GeneratorContext, context: &mut ResearchContext, plan: &DocumentPlan) -> String {
    let writer = &generator.config.writer;
    let language = generator.config.target_language.prompt_instruction();
    let budget = input_budget(writer.context_window, writer.max_tokens);
    let summary = fit_to_budget(&plan.research_summary, budget / 2);
    let prompt = prompts::author(&context.prompt, plan.number, &plan.title, &plan.outline, &summary, &language);

    match generator.writer.generate(&prompt, writer.max_tokens).await {
        Ok(text) if !text.trim().is_empty() => {
            let content = checked_writer_output(generator, context, &plan.title, &text);
            context.push_message(GeneratorRole::Writer, content.clone());
            content
        }
        Ok(_) => {
            warn!(session_id = %context.session_id, doc = %plan.title, "⚠️ 写作模型返回为空，使用大纲骨架");
            skeleton_document(plan)
        }
        Err(e) => {
            warn!(session_id = %context.session_id, doc = %plan.title, error = %e, "⚠️ 写作模型调用失败，使用大纲骨架");
            skeleton_document(plan)
        }
    }
}

/// 评审，返回是否通过；按需触发定向检索
async fn review(generator: &GeneratorContext, context: &mut ResearchContext, document: &Document) -> bool {
    let workflow = &generator.config.workflow;
    let analysis = context.scratch.research_analysis.clone().unwrap_or_default();
    let summary = generator.research_summary(context, None).await;
    let research = format!("{}\n\n{}", analysis, summary);

    let prompt = prompts::review(
        &document.title,
        clip_chars(&document.outline, REVIEW_OUTLINE_CHARS),
        clip_chars(&document.content, REVIEW_CONTENT_CHARS),
        clip_chars(&research, REVIEW_RESEARCH_CHARS),
        workflow.dynamic_search,
    );
    let max_output = REVIEW_MAX_OUTPUT.min(generator.config.planner.max_tokens);
    let feedback = match generator.planner.generate(&prompt, None, max_output).await {
        Ok(text) => text,
        Err(e) => {
            warn!(session_id = %context.session_id, doc = %document.title, error = %e, "⚠️ 评审失败，本轮视为未通过");
            return false;
        }
    };

    let approved = is_approved(&feedback, &workflow.approval_tokens);
    debug!(session_id = %context.session_id, doc = %document.title, approved, "评审结果");
    context.push_message(GeneratorRole::Planner, feedback.clone());

    if workflow.dynamic_search && feedback.contains(SEARCH_NEEDED_MARKER) {
        let queries = parse_search_requests(&feedback, workflow.max_dynamic_queries);
        if !queries.is_empty() {
            generator.emit(
                context,
                "search",
                "Targeted search",
                format!("{} follow-up queries", queries.len()),
            );
            let batches = search_all(generator, &queries, true).await;
            let added = context.merge_search_results(batches.into_iter().flatten().collect(), true);
            info!(session_id = %context.session_id, queries = queries.len(), added, "🔎 定向检索完成");
            context.push_message(
                GeneratorRole::System,
                format!("Targeted searches for {:?}: {} new sources", queries, added),
            );
        }
    }

    context.scratch.last_review = Some(feedback);
    approved
}

/// 按评审意见重写；失败时保留当前内容
async fn revise(generator: &GeneratorContext, context: &mut ResearchContext, document: &mut Document) {
    let writer = &generator.config.writer;
    let language = generator.config.target_language.prompt_instruction();
    let feedback = context
        .scratch
        .last_review
        .clone()
        .unwrap_or_else(|| "No review feedback is available. Improve completeness and technical accuracy.".to_string());
    let budget = input_budget(writer.context_window, writer.max_tokens);
    let content = fit_to_budget(&document.content, budget / 2);
    let prompt = prompts::revision(
        &document.title,
        clip_chars(&document.outline, REVISION_OUTLINE_CHARS),
        &content,
        &feedback,
        &language,
    );

    match generator.writer.generate(&prompt, writer.max_tokens).await {
        Ok(text) if !text.trim().is_empty() => {
            document.content = checked_writer_output(generator, context, &document.title, &text);
            context.push_message(GeneratorRole::Writer, document.content.clone());
        }
        Ok(_) => {
            warn!(session_id = %context.session_id, doc = %document.title, "⚠️ 重写结果为空，保留上一版本");
        }
        Err(e) => {
            warn!(session_id = %context.session_id, doc = %document.title, error = %e, "⚠️ 重写失败，保留上一版本");
        }
    }
}

fn checked_writer_output(
    generator: &GeneratorContext,
    context: &ResearchContext,
    title: &str,
    text: &str,
) -> String {
    let output = validate_writer_output(text);
    if output.repaired {
        warn!(session_id = %context.session_id, doc = %title, "✂️ 写作输出被截断，已修复");
        generator.emit(context, "writer", "Truncated output repaired", title.to_string());
    }
    output.text
}

fn skeleton_document(plan: &DocumentPlan) -> String {
    format!(
        "# {}\n\n{}\n\n> The writer model was unavailable, so this document only contains the planned outline.",
        plan.title,
        plan.outline.trim()
    )
}

/// 评审是否给出通过标记
///
/// 只看结论行：第一个出现通过标记或 `NEEDS REVISION` 的行。
/// 标记需作为独立单词出现且区分大小写，前面紧跟 `NOT` 的不算通过；结论行含 `NEEDS REVISION` 时不通过。
pub fn is_approved(review: &str, tokens: &[String]) -> bool {
    let tokens: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|token| !token.is_empty())
        .collect();

    review
        .lines()
        .find(|line| {
            line.contains(REJECTION_MARKER)
                || tokens.iter().any(|token| token_positions(line, token).next().is_some())
        })
        .is_some_and(|line| {
            !line.contains(REJECTION_MARKER)
                && tokens.iter().any(|token| {
                    token_positions(line, token)
                        .any(|start| !line[..start].trim_end().to_uppercase().ends_with("NOT"))
                })
        })
}

/// 标记在行内作为独立单词出现的位置
fn token_positions<'a>(line: &'a str, token: &'a str) -> impl Iterator<Item = usize> + 'a {
    line.match_indices(token).filter_map(move |(start, _)| {
        let before = line[..start].chars().next_back();
        let after = line[start + token.len()..].chars().next();
        (!before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)).then_some(start)
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 解析评审中的 `SEARCH_NEEDED: <query>` 行
pub fn parse_search_requests(review: &str, max_queries: usize) -> Vec<String> {
    let Some(re) = SEARCH_NEEDED.as_ref() else {
        return Vec::new();
    };
    let mut queries: Vec<String> = Vec::new();
    for caps in re.captures_iter(review) {
        if queries.len() >= max_queries {
            break;
        }
        let query = caps[1]
            .trim_matches(|c: char| c.is_whitespace() || "[]\"'`*".contains(c))
            .to_string();
        if !query.is_empty() && !queries.iter().any(|q| q.eq_ignore_ascii_case(&query)) {
            queries.push(query);
        }
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Vec<String> {
        vec!["APPROVED".to_string(), "TECHNICALLY_ACCURATE".to_string()]
    }

    #[test]
    fn test_is_approved() {
        assert!(is_approved("Overall Assessment: APPROVED\nMinor nits only.", &tokens()));
        assert!(is_approved("**APPROVED**", &tokens()));
        assert!(is_approved("The guide is TECHNICALLY_ACCURATE.", &tokens()));
        assert!(!is_approved("Overall Assessment: NEEDS REVISION", &tokens()));
        assert!(!is_approved("This is NOT APPROVED yet", &tokens()));
        assert!(!is_approved("Status: not   APPROVED", &tokens()));
        assert!(!is_approved("UNAPPROVED draft", &tokens()));
        assert!(!is_approved("approved", &tokens()));
        assert!(!is_approved("APPROVED", &[]));
    }

    #[test]
    fn test_is_approved_finds_later_standalone_token() {
        assert!(is_approved("NOT APPROVED in draft 1, now APPROVED", &tokens()));
    }

    #[test]
    fn test_is_approved_reads_only_the_verdict_line() {
        assert!(!is_approved(
            "NEEDS REVISION\n- add error handling\nOnce fixed it will be APPROVED.",
            &tokens()
        ));
        assert!(!is_approved("NEEDS REVISION: it will be APPROVED after the fixes", &tokens()));
        assert!(is_approved(
            "## Review of Setup Guide\n\n**APPROVED**\n\nNo NEEDS REVISION items remain.",
            &tokens()
        ));
    }

    #[test]
    fn test_parse_search_requests() {
        let review = "NEEDS REVISION\n\
            SEARCH_NEEDED: postgres row level security examples\n\
            Some feedback\n\
            SEARCH_NEEDED: [redis cache invalidation patterns]\n\
            SEARCH_NEEDED: Postgres row level security examples\n\
            SEARCH_NEEDED: jwt refresh token rotation\n\
            SEARCH_NEEDED: kubernetes readiness probes";
        assert_eq!(
            parse_search_requests(review, 3),
            vec![
                "postgres row level security examples",
                "redis cache invalidation patterns",
                "jwt refresh token rotation",
            ]
        );
        assert!(parse_search_requests("APPROVED", 3).is_empty());
        assert!(parse_search_requests("SEARCH_NEEDED: x", 0).is_empty());
    }

    #[test]
    fn test_skeleton_document_ends_cleanly() {
        let plan = DocumentPlan {
            number: 1,
            title: "Complete Implementation Guide".to_string(),
            outline: "## Setup\n- install tools\n".to_string(),
            research_summary: String::new(),
            filename: "01_complete_implementation_guide.md".to_string(),
            category: crate::generator::types::DocumentCategory::Implementation,
        };
        let content = skeleton_document(&plan);
        assert!(content.starts_with("# Complete Implementation Guide\n\n## Setup"));
        assert!(crate::utils::truncation::is_output_complete(&content));
    }
}
