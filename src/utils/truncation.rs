//! 写作模型输出的完整性校验与截断修复

/// 检查的尾部窗口长度（字符）
const TAIL_WINDOW: usize = 100;

/// 修复时只在文本最后这一比例内寻找边界
const REPAIR_WINDOW_RATIO: f64 = 0.15;

/// 超过该长度的结尾"单词"被视为被截断的 token
const MAX_PLAUSIBLE_WORD: usize = 25;

/// 找不到安全边界时追加的显式标记
pub const TRUNCATION_MARKER: &str = "\n\n[... output truncated ...]";

const VALID_ENDINGS: &[char] = &['.', '!', '?', '`', '"', '\'', ')', ']', '}', '*', '|', '>', ':'];

const MID_THOUGHT_ENDINGS: &[&str] = &[
    "in order to",
    "for example",
    "such as",
    "as follows",
    "will be",
    "should be",
    "this is",
    "which means",
    "because of",
];

const BOUNDARIES: &[&str] = &[". ", ".\n", "! ", "!\n", "? ", "?\n", "\n\n", "```\n"];

/// 校验后的写作输出
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOutput {
    pub text: String,
    /// 是否经过截断修复
    pub repaired: bool,
}

/// 判断输出是否完整结束
pub fn is_output_complete(text: &str) -> bool {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return false;
    }

    let tail = tail_chars(trimmed, TAIL_WINDOW).to_lowercase();
    let tail_no_colon = tail.trim_end_matches(':');
    if MID_THOUGHT_ENDINGS
        .iter()
        .any(|phrase| tail_no_colon.ends_with(phrase))
    {
        return false;
    }

    if let Some(last_word) = tail.split_whitespace().last()
        && last_word.chars().count() > MAX_PLAUSIBLE_WORD
        && !last_word.contains("://")
    {
        return false;
    }

    trimmed.ends_with(VALID_ENDINGS)
}

/// 修复被截断的输出
///
/// 在最后 15% 的范围内从后向前寻找最近的句子/段落边界并在此截断；找不到时追加显式标记。
/// 返回值一定与截断的输入不同。
pub fn repair_truncated_output(text: &str) -> String {
    let trimmed = text.trim_end();
    let min_cut = (trimmed.len() as f64 * (1.0 - REPAIR_WINDOW_RATIO)) as usize;

    let cut = BOUNDARIES
        .iter()
        .filter_map(|boundary| {
            trimmed
                .rfind(boundary)
                .map(|pos| pos + boundary.trim_end().len())
        })
        .filter(|&end| end >= min_cut && end > 0 && end < trimmed.len())
        .max();

    match cut {
        Some(end) => trimmed[..end].trim_end().to_string(),
        None => format!("{}{}", trimmed, TRUNCATION_MARKER),
    }
}

/// 完整性校验并在需要时修复
pub fn validate_writer_output(text: &str) -> WriterOutput {
    if is_output_complete(text) {
        return WriterOutput {
            text: text.trim_end().to_string(),
            repaired: false,
        };
    }
    WriterOutput {
        text: repair_truncated_output(text),
        repaired: true,
    }
}

fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_sentence() {
        assert!(is_output_complete("The service is deployed behind a load balancer."));
        assert!(is_output_complete("```rust\nfn main() {}\n```"));
    }

    #[test]
    fn test_mid_thought_endings_are_incomplete() {
        assert!(!is_output_complete("We cache the session tokens in order to"));
        assert!(!is_output_complete("Configure the following options, such as"));
        assert!(!is_output_complete("The steps are as follows:"));
    }

    #[test]
    fn test_long_trailing_token_is_incomplete() {
        assert!(!is_output_complete(
            "The handler returns aVeryLongIdentifierThatWasCutOffMidStream"
        ));
    }

    #[test]
    fn test_empty_output_is_incomplete() {
        assert!(!is_output_complete("   \n"));
    }

    #[test]
    fn test_repair_trims_to_last_sentence() {
        let mut text = "A".repeat(50);
        text.push_str(". The second sentence is complete. Then it sto");
        let repaired = repair_truncated_output(&text);
        assert!(repaired.ends_with("The second sentence is complete."));
        assert!(is_output_complete(&repaired));
    }

    #[test]
    fn test_repair_appends_marker_without_boundary() {
        let text = format!("{}. {}", "Intro", "word ".repeat(60).trim_end());
        let repaired = repair_truncated_output(&text);
        assert_ne!(repaired, text);
        assert!(repaired.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_validate_leaves_complete_output_alone() {
        let output = validate_writer_output("Done.\n\n");
        assert_eq!(output.text, "Done.");
        assert!(!output.repaired);
    }

    #[test]
    fn test_validate_never_returns_truncated_input_unchanged() {
        let text = "Step one is finished. Step two configures the databa";
        let output = validate_writer_output(text);
        assert!(output.repaired);
        assert_ne!(output.text, text);
    }
}
