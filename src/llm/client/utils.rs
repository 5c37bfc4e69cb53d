use crate::{llm::client::types::TokenUsage, utils::token_estimator::TokenEstimator};

static TOKEN_ESTIMATOR: TokenEstimator = TokenEstimator::new();

/// 估算token使用情况（基于文本长度）
pub fn estimate_token_usage(input_text: &str, output_text: &str) -> TokenUsage {
    TokenUsage::new(
        TOKEN_ESTIMATOR.estimate_tokens(input_text),
        TOKEN_ESTIMATOR.estimate_tokens(output_text),
    )
}

/// 为输出预留空间后，输入还能使用的 token 数
pub fn input_budget(context_window: u32, max_output: u32) -> usize {
    context_window.saturating_sub(max_output) as usize
}

/// 把过长的上下文裁剪到输入预算内
pub fn fit_to_budget(text: &str, budget_tokens: usize) -> String {
    if TOKEN_ESTIMATOR.exceeds_limit(text, budget_tokens) {
        TOKEN_ESTIMATOR.truncate_to_tokens(text, budget_tokens)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_budget() {
        assert_eq!(input_budget(32_768, 8_000), 24_768);
        assert_eq!(input_budget(1_000, 8_000), 0);
    }

    #[test]
    fn test_fit_to_budget() {
        let text = "y".repeat(1000);
        assert_eq!(fit_to_budget(&text, 1000), text);
        assert!(fit_to_budget(&text, 10).len() < 100);
    }

    #[test]
    fn test_estimate_token_usage() {
        let usage = estimate_token_usage("abcd", "abcdefgh");
        assert_eq!(usage, TokenUsage::new(1, 2));
        assert_eq!(usage.total(), 3);
    }
}
