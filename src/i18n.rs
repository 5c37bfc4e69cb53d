use serde::{Deserialize, Serialize};

/// 文档输出语言
///
/// 检索、分析与评审阶段统一使用英文提示词，只有写作与修订阶段会附加语言指令。
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetLanguage {
    #[serde(rename = "en")]
    #[default]
    English,
    #[serde(rename = "zh")]
    Chinese,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "ru")]
    Russian,
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            TargetLanguage::English => "en",
            TargetLanguage::Chinese => "zh",
            TargetLanguage::Japanese => "ja",
            TargetLanguage::Korean => "ko",
            TargetLanguage::German => "de",
            TargetLanguage::French => "fr",
            TargetLanguage::Russian => "ru",
        };
        f.write_str(code)
    }
}

impl std::str::FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" | "english" | "英文" => Ok(TargetLanguage::English),
            "zh" | "chinese" | "中文" => Ok(TargetLanguage::Chinese),
            "ja" | "japanese" | "日本語" => Ok(TargetLanguage::Japanese),
            "ko" | "korean" | "한국어" => Ok(TargetLanguage::Korean),
            "de" | "german" | "deutsch" => Ok(TargetLanguage::German),
            "fr" | "french" | "français" => Ok(TargetLanguage::French),
            "ru" | "russian" | "русский" => Ok(TargetLanguage::Russian),
            _ => Err(format!("Unknown target language: {}", s)),
        }
    }
}

impl TargetLanguage {
    /// 获取语言的描述性名称
    pub fn display_name(&self) -> &'static str {
        match self {
            TargetLanguage::English => "English",
            TargetLanguage::Chinese => "中文",
            TargetLanguage::Japanese => "日本語",
            TargetLanguage::Korean => "한국어",
            TargetLanguage::German => "Deutsch",
            TargetLanguage::French => "Français",
            TargetLanguage::Russian => "Русский",
        }
    }

    /// 写作提示词中附加的语言指令
    ///
    /// 代码块、命令与标识符保持原样，只要求正文使用目标语言。
    pub fn prompt_instruction(&self) -> String {
        match self {
            TargetLanguage::English => {
                "Write the document in English. Keep code, commands and identifiers unchanged."
                    .to_string()
            }
            other => format!(
                "Write the prose of the document in {} ({}). Keep code blocks, shell commands, file paths and identifiers unchanged.",
                other.display_name(),
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("ZH".parse::<TargetLanguage>().unwrap(), TargetLanguage::Chinese);
        assert_eq!("english".parse::<TargetLanguage>().unwrap(), TargetLanguage::English);
        assert!("klingon".parse::<TargetLanguage>().is_err());
    }

    #[test]
    fn test_prompt_instruction_names_language() {
        let instruction = TargetLanguage::German.prompt_instruction();
        assert!(instruction.contains("Deutsch"));
        assert!(instruction.contains("(de)"));
    }
}
