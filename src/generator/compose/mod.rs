//! 文档阶段：文档规划与撰写/评审收敛循环

use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::generator::context::GeneratorContext;
use crate::generator::types::{DocumentCategory, DocumentPlan, GeneratorRole, ResearchContext, Stage};
use crate::utils::token_estimator::{TokenEstimator, clip_chars};

pub mod convergence;
pub mod prompts;

pub use convergence::author_and_refine;

/// 大纲调用使用的研究材料上限（字符）
const OUTLINE_CONTEXT_CHARS: usize = 15_000;
/// 压缩摘要调用使用的研究材料上限（字符）
const SUMMARY_CONTEXT_CHARS: usize = 20_000;

const OUTLINE_MAX_OUTPUT: u32 = 4_000;
const SUMMARY_MAX_OUTPUT: u32 = 3_000;

static FILENAME_STRIP: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^\w\s-]").ok());
static FILENAME_COLLAPSE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[-\s]+").ok());

/// 文档规划
///
/// 按分析材料的体量选择文档标题，为每篇文档生成大纲与按标题压缩的研究摘要。
pub async fn plan_documents(generator: &GeneratorContext, context: &mut ResearchContext) {
    let workflow = &generator.config.workflow;
    let analysis = context.scratch.research_analysis.clone().unwrap_or_default();
    let full_summary = generator.research_summary(context, None).await;
    let research = format!("{}\n\n{}", analysis, full_summary);

    let volume = analysis.len() + full_summary.len();
    let titles = workflow.select_document_titles(volume);
    generator.emit(
        context,
        "planner",
        "Planning documents",
        format!("{} documents from {} chars of research", titles.len(), volume),
    );

    let writer_budget = workflow.writer_summary_max_tokens;
    let fallback_summary = generator.research_summary(context, Some(writer_budget)).await;
    let planner_cap = generator.config.planner.max_tokens;

    let mut plans = Vec::with_capacity(titles.len());
    for (index, title) in titles.iter().enumerate() {
        let number = index + 1;

        let outline_prompt = prompts::outline(&context.prompt, title);
        let outline = match generator
            .planner
            .generate(
                &outline_prompt,
                Some(clip_chars(&research, OUTLINE_CONTEXT_CHARS)),
                OUTLINE_MAX_OUTPUT.min(planner_cap),
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %context.session_id, doc = %title, error = %e, "⚠️ 大纲生成失败，使用默认大纲");
                prompts::default_outline(title)
            }
        };

        let summary_prompt = prompts::condensed_summary(&context.prompt, title, writer_budget);
        let research_summary = match generator
            .planner
            .generate(
                &summary_prompt,
                Some(clip_chars(&research, SUMMARY_CONTEXT_CHARS)),
                SUMMARY_MAX_OUTPUT.min(planner_cap),
            )
            .await
        {
            Ok(text) => TokenEstimator::new().truncate_to_tokens(&text, writer_budget),
            Err(e) => {
                warn!(session_id = %context.session_id, doc = %title, error = %e, "⚠️ 研究摘要生成失败，使用本地摘要");
                fallback_summary.clone()
            }
        };

        context.push_message(
            GeneratorRole::Planner,
            format!("Outline for {}:\n{}", title, outline),
        );
        plans.push(DocumentPlan {
            number,
            title: title.clone(),
            outline,
            research_summary,
            filename: document_filename(number, title),
            category: DocumentCategory::from_title(title),
        });
        generator.emit(
            context,
            "planner",
            "Document planned",
            format!("{}/{}: {}", number, titles.len(), title),
        );
    }

    info!(session_id = %context.session_id, documents = plans.len(), "📑 文档规划完成");
    context.scratch.document_plans = plans;
    context.scratch.current_doc_index = 0;
    context.scratch.pending = None;
    context.scratch.last_review = None;
    context.stage = Stage::AuthorAndRefineDocuments;
}

/// 文件名：`NN_<标题>.md`
pub fn document_filename(number: usize, title: &str) -> String {
    format!("{:02}_{}.md", number, sanitize_filename(title))
}

/// 去掉非单词字符，空白与连字符合并为下划线，转小写，最长 100 字符
pub fn sanitize_filename(title: &str) -> String {
    let stripped = match FILENAME_STRIP.as_ref() {
        Some(re) => re.replace_all(title, "").into_owned(),
        None => title.to_string(),
    };
    let collapsed = match FILENAME_COLLAPSE.as_ref() {
        Some(re) => re.replace_all(stripped.trim(), "_").into_owned(),
        None => stripped,
    };
    let lowered = collapsed.to_lowercase();
    let name = clip_chars(&lowered, 100).trim_matches('_');
    if name.is_empty() {
        "document".to_string()
    } else {
        name.to_string()
    }
}
