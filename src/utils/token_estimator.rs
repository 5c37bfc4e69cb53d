/// Token估算器
///
/// 没有真实 tokenizer 时的粗略估算：英文约 4 字符/token，中文约 1.5 字符/token。
/// 只用于预算控制（摘要裁剪、写作输出上限），不追求精确。
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    english_chars_per_token: f64,
    cjk_chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub const fn new() -> Self {
        Self {
            english_chars_per_token: 4.0,
            cjk_chars_per_token: 1.5,
        }
    }

    /// 估算文本的token数量
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
            if is_cjk(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });

        (cjk as f64 / self.cjk_chars_per_token).ceil() as usize
            + (other as f64 / self.english_chars_per_token).ceil() as usize
    }

    /// 给定 token 预算对应的字符上限（按英文比例）
    pub fn chars_for_tokens(&self, tokens: usize) -> usize {
        (tokens as f64 * self.english_chars_per_token) as usize
    }

    /// 检查文本是否超过token限制
    pub fn exceeds_limit(&self, text: &str, limit: usize) -> bool {
        self.estimate_tokens(text) > limit
    }

    /// 按 token 预算截断文本，截断时追加 `\n...`
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        let max_chars = self.chars_for_tokens(max_tokens);
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let mut clipped = clip_chars(text, max_chars).to_string();
        clipped.push_str("\n...");
        clipped
    }
}

/// 按字符数截取前缀，保证不切断 UTF-8 字符
pub fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF |  // CJK统一汉字
        0x3400..=0x4DBF |  // CJK扩展A
        0x3040..=0x30FF |  // 平假名/片假名
        0xAC00..=0xD7AF    // 韩文音节
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_english_and_cjk() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimator.estimate_tokens("研究计划"), 3);
        assert_eq!(estimator.estimate_tokens(""), 0);
    }

    #[test]
    fn test_truncate_to_tokens() {
        let estimator = TokenEstimator::new();
        let text = "x".repeat(100);
        let clipped = estimator.truncate_to_tokens(&text, 10);
        assert_eq!(clipped, format!("{}\n...", "x".repeat(40)));
        assert_eq!(estimator.truncate_to_tokens("short", 10), "short");
    }

    #[test]
    fn test_clip_chars_respects_char_boundaries() {
        assert_eq!(clip_chars("文档生成器", 2), "文档");
        assert_eq!(clip_chars("abc", 10), "abc");
    }
}
