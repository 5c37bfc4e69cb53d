//! 研究摘要：给下一次模型调用准备的压缩上下文

use crate::cache::SummaryFingerprint;
use crate::generator::types::ResearchContext;
use crate::utils::token_estimator::{TokenEstimator, clip_chars};

struct SummaryShape {
    insights: usize,
    insight_chars: usize,
    messages: usize,
    message_chars: usize,
}

const FULL: SummaryShape = SummaryShape {
    insights: 30,
    insight_chars: 200,
    messages: 10,
    message_chars: 500,
};

const LIMITED: SummaryShape = SummaryShape {
    insights: 10,
    insight_chars: 200,
    messages: 5,
    message_chars: 300,
};

/// 摘要的缓存指纹
pub fn summary_fingerprint(context: &ResearchContext, max_tokens: Option<usize>) -> SummaryFingerprint {
    SummaryFingerprint {
        session_id: context.session_id.clone(),
        message_count: context.messages.len(),
        insight_count: context.insights.len(),
        search_count: context.search_results.len(),
        size_class: max_tokens.unwrap_or(0),
    }
}

/// 构建研究摘要
///
/// `max_tokens` 为 `None` 时输出完整摘要；否则输出精简摘要并裁剪到预算内。
pub fn build_research_summary(context: &ResearchContext, max_tokens: Option<usize>) -> String {
    let shape = if max_tokens.is_some() { &LIMITED } else { &FULL };
    let mut parts = vec![
        format!("PROJECT: {}", context.prompt),
        format!(
            "RESEARCH: {} searches, {} insights, {} messages",
            context.search_results.len(),
            context.insights.len(),
            context.messages.len()
        ),
    ];

    if !context.insights.is_empty() {
        parts.push(String::new());
        parts.push("KEY INSIGHTS:".to_string());
        parts.extend(
            context
                .insights
                .iter()
                .take(shape.insights)
                .map(|insight| format!("• {}", clip_chars(&insight.text, shape.insight_chars))),
        );
    }

    if !context.messages.is_empty() {
        parts.push(String::new());
        parts.push("RECENT DISCUSSION:".to_string());
        let skip = context.messages.len().saturating_sub(shape.messages);
        parts.extend(context.messages.iter().skip(skip).map(|message| {
            format!(
                "[{}]: {}...",
                message.role,
                clip_chars(&message.text, shape.message_chars)
            )
        }));
    }

    let summary = parts.join("\n");
    match max_tokens {
        Some(tokens) => TokenEstimator::new().truncate_to_tokens(&summary, tokens),
        None => summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::types::GeneratorRole;

    fn context_with(messages: usize, insights: usize) -> ResearchContext {
        let mut ctx = ResearchContext::new("build a todo app");
        for i in 0..messages {
            ctx.push_message(GeneratorRole::Planner, format!("message {}", i));
        }
        ctx.add_insights(
            (0..insights).map(|i| format!("insight number {}", i)).collect(),
            "test",
        );
        ctx
    }

    #[test]
    fn test_full_summary_sections() {
        let summary = build_research_summary(&context_with(12, 3), None);
        assert!(summary.starts_with("PROJECT: build a todo app\nRESEARCH: 0 searches, 3 insights, 12 messages"));
        assert!(summary.contains("KEY INSIGHTS:\n• insight number 0"));
        // 只保留最近 10 条消息
        assert!(!summary.contains("message 1..."));
        assert!(summary.contains("[planner]: message 2..."));
        assert!(summary.contains("[planner]: message 11..."));
    }

    #[test]
    fn test_limited_summary_is_shorter_and_bounded() {
        let ctx = context_with(20, 40);
        let limited = build_research_summary(&ctx, Some(50));
        assert!(limited.chars().count() <= 50 * 4 + 4);
        assert!(limited.ends_with("\n..."));

        let roomy = build_research_summary(&ctx, Some(100_000));
        assert_eq!(roomy.matches('•').count(), 10);
        assert_eq!(roomy.matches("[planner]").count(), 5);
    }

    #[test]
    fn test_fingerprint_tracks_size_class() {
        let ctx = context_with(1, 1);
        assert_ne!(summary_fingerprint(&ctx, None), summary_fingerprint(&ctx, Some(8000)));
        assert_eq!(summary_fingerprint(&ctx, Some(8000)), summary_fingerprint(&ctx, Some(8000)));
    }
}
