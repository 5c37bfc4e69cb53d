//! 研究阶段：查询拆解、并发检索、分块分析

use tracing::{info, warn};

use crate::generator::context::GeneratorContext;
use crate::generator::types::{GeneratorRole, ResearchContext, SearchResult, Stage};
use crate::utils::json_extractor::extract_string_list;
use crate::utils::threads::FanOutExecutor;
use crate::utils::token_estimator::clip_chars;

pub mod prompts;

/// 分块分析结果拼接后的长度上限
const MAX_COMBINED_ANALYSIS_CHARS: usize = 50_000;

const PLAN_MAX_OUTPUT: u32 = 2_000;
const CHUNK_MAX_OUTPUT: u32 = 3_000;
const SYNTHESIS_MAX_OUTPUT: u32 = 6_000;

/// 洞察的来源标记
pub const ANALYSIS_INSIGHT_SOURCE: &str = "planner_analysis";

/// 查询拆解
///
/// 解析失败或模型调用失败时，用原始需求拼接兜底后缀生成查询，保证流程继续。
pub async fn plan_research(generator: &GeneratorContext, context: &mut ResearchContext) {
    let workflow = &generator.config.workflow;
    generator.emit(context, "planner", "Planning research", "breaking the request into search queries");

    let prompt = prompts::research_plan(&context.prompt, workflow.max_queries);
    let max_output = PLAN_MAX_OUTPUT.min(generator.config.planner.max_tokens);
    let mut queries = match generator.planner.generate(&prompt, None, max_output).await {
        Ok(text) => {
            context.push_message(GeneratorRole::Planner, text.clone());
            dedupe(extract_string_list(&text, "queries"))
        }
        Err(e) => {
            warn!(session_id = %context.session_id, error = %e, "⚠️ 查询拆解失败，使用兜底查询");
            Vec::new()
        }
    };
    queries.truncate(workflow.max_queries.max(1));

    if queries.is_empty() {
        queries = fallback_queries(&context.prompt, &workflow.fallback_query_suffixes);
        generator.emit(
            context,
            "orchestrator",
            "Fallback queries",
            format!("generated {} generic queries", queries.len()),
        );
    }

    info!(session_id = %context.session_id, count = queries.len(), "📋 检索查询已就绪");
    generator.emit(
        context,
        "planner",
        "Research plan ready",
        format!("{} queries", queries.len()),
    );
    context.scratch.research_queries = queries;
    context.stage = Stage::RunSearches;
}

/// 并发执行检索，结果按 URL 去重后并入广泛检索桶
pub async fn run_searches(generator: &GeneratorContext, context: &mut ResearchContext) {
    let workflow = &generator.config.workflow;
    let mut queries = std::mem::take(&mut context.scratch.research_queries);
    if queries.is_empty() {
        queries = fallback_queries(&context.prompt, &workflow.fallback_query_suffixes);
    }

    generator.emit(
        context,
        "search",
        "Running searches",
        format!("{} queries, up to {} in parallel", queries.len(), workflow.search_max_parallels),
    );

    let batches = search_all(generator, &queries, false).await;
    let fetched: usize = batches.iter().map(Vec::len).sum();
    let added = context.merge_search_results(batches.into_iter().flatten().collect(), false);

    context.push_message(
        GeneratorRole::System,
        format!(
            "Completed {} searches: {} results, {} unique sources added",
            queries.len(),
            fetched,
            added
        ),
    );
    generator.emit(
        context,
        "search",
        "Searches complete",
        format!("{} unique sources", context.search_results.len()),
    );
    context.scratch.research_queries = queries;
    context.stage = Stage::AnalyzeResults;
}

/// 并发检索一组查询，返回与查询一一对应的结果
pub(crate) async fn search_all(
    generator: &GeneratorContext,
    queries: &[String],
    targeted: bool,
) -> Vec<Vec<SearchResult>> {
    let max_results = generator.config.search.max_results;
    let units = queries
        .iter()
        .map(|query| {
            let search = generator.search.clone();
            let query = query.clone();
            async move { Ok(search.search(&query, max_results).await) }
        })
        .collect::<Vec<_>>();

    let parallels = if targeted {
        generator.config.workflow.max_dynamic_queries
    } else {
        generator.config.workflow.search_max_parallels
    };
    FanOutExecutor::new(parallels)
        .run(units, |_, _| Vec::new())
        .await
}

/// 分块并发分析，再综合为统一分析并提取洞察
pub async fn analyze_results(generator: &GeneratorContext, context: &mut ResearchContext) {
    let workflow = &generator.config.workflow;
    let sources: Vec<SearchResult> = context
        .search_results
        .iter()
        .take(workflow.analysis_max_sources)
        .cloned()
        .collect();
    let chunk_size = workflow.analysis_chunk_size.max(1);
    let chunks: Vec<&[SearchResult]> = sources.chunks(chunk_size).collect();

    generator.emit(
        context,
        "planner",
        "Analyzing results",
        format!("{} sources in {} chunks", sources.len(), chunks.len()),
    );

    let max_output = CHUNK_MAX_OUTPUT.min(generator.config.planner.max_tokens);
    let units = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let planner = generator.planner.clone();
            let prompt = prompts::chunk_analysis(&context.prompt, index + 1, chunks.len());
            let blob = format_sources(chunk, index * chunk_size);
            async move { planner.generate(&prompt, Some(&blob), max_output).await }
        })
        .collect::<Vec<_>>();

    let partials = FanOutExecutor::new(workflow.analysis_max_parallels)
        .run(units, |index, reason| {
            format!("Error analyzing chunk {}: {}", index + 1, reason)
        })
        .await;

    let combined = partials.join("\n\n---\n\n");
    let combined = clip_chars(&combined, MAX_COMBINED_ANALYSIS_CHARS).to_string();

    let synthesis_prompt = prompts::synthesis(&context.prompt, partials.len());
    let max_output = SYNTHESIS_MAX_OUTPUT.min(generator.config.planner.max_tokens);
    let blob = (!combined.is_empty()).then_some(combined.as_str());
    let analysis = match generator.planner.generate(&synthesis_prompt, blob, max_output).await {
        Ok(text) => text,
        Err(e) => {
            warn!(session_id = %context.session_id, error = %e, "⚠️ 综合分析失败，使用分块分析拼接结果");
            if combined.is_empty() {
                format!("No analysis could be produced for: {}", context.prompt)
            } else {
                combined
            }
        }
    };

    let insights = extract_insights(&analysis, workflow.min_insight_chars, workflow.max_insights);
    info!(
        session_id = %context.session_id,
        chunks = partials.len(),
        insights = insights.len(),
        "📊 分析完成"
    );

    context.push_message(GeneratorRole::Planner, analysis.clone());
    context.add_insights(insights, ANALYSIS_INSIGHT_SOURCE);
    context.scratch.research_analysis = Some(analysis);
    generator.emit(
        context,
        "planner",
        "Analysis complete",
        format!("{} insights extracted", context.insights.len()),
    );
    context.stage = Stage::PlanDocuments;
}

/// 兜底查询：原始需求 + 后缀
pub fn fallback_queries(prompt: &str, suffixes: &[String]) -> Vec<String> {
    let base = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if suffixes.is_empty() {
        return vec![base];
    }
    suffixes
        .iter()
        .map(|suffix| format!("{} {}", base, suffix.trim()))
        .collect()
}

/// 从分析文本中提取洞察：以项目符号或编号开头、去掉装饰后足够长的行
pub fn extract_insights(analysis: &str, min_chars: usize, max_insights: usize) -> Vec<String> {
    analysis
        .lines()
        .map(str::trim)
        .filter(|line| is_list_line(line))
        .map(|line| {
            line.trim_start_matches(|c: char| "-*•0123456789.): ".contains(c))
                .trim()
                .to_string()
        })
        .filter(|text| text.chars().count() > min_chars)
        .take(max_insights)
        .collect()
}

fn is_list_line(line: &str) -> bool {
    if line.starts_with(['-', '*', '•']) {
        return true;
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with(['.', ')', ':'])
}

fn format_sources(chunk: &[SearchResult], offset: usize) -> String {
    chunk
        .iter()
        .enumerate()
        .map(|(i, source)| {
            format!(
                "### Source {}: {}\nURL: {}\nContent: {}\n",
                offset + i + 1,
                source.title,
                source.url,
                source.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}
