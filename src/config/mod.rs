use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::i18n::TargetLanguage;

/// 规划模型的 API KEY 环境变量
pub const PLANNER_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";
/// 规划模型的 API 基地址环境变量
pub const PLANNER_BASE_URL_ENV: &str = "DEEPSEEK_BASE_URL";
/// 搜索服务的 API KEY 环境变量
pub const SEARCH_API_KEY_ENV: &str = "SERPER_API_KEY";
/// 写作模型（Ollama）基地址环境变量
pub const WRITER_BASE_URL_ENV: &str = "OLLAMA_BASE_URL";
/// 写作模型（Ollama）模型名环境变量
pub const WRITER_MODEL_ENV: &str = "OLLAMA_MODEL";

/// 未显式指定配置文件时尝试加载的默认文件名
pub const DEFAULT_CONFIG_FILE: &str = "devplan.toml";

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "moonshot")]
    Moonshot,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Moonshot => write!(f, "moonshot"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "moonshot" => Ok(LLMProvider::Moonshot),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl LLMProvider {
    /// 本地部署的 provider 不需要 API KEY
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LLMProvider::Ollama)
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 文档输出路径
    pub output_path: PathBuf,

    /// 目标语言
    pub target_language: TargetLanguage,

    /// 规划模型：大输入窗口，用于查询拆解、分析、大纲与评审
    pub planner: LLMConfig,

    /// 写作模型：大输出预算，用于文档撰写与修订
    pub writer: LLMConfig,

    /// 搜索服务配置
    pub search: SearchConfig,

    /// 工作流参数
    pub workflow: WorkflowConfig,

    /// 会话快照配置
    pub session: SessionConfig,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址
    pub api_base_url: String,

    /// 模型名称
    pub model: String,

    /// 单次调用的默认最大输出tokens
    pub max_tokens: u32,

    /// 温度
    pub temperature: f64,

    /// 上下文窗口大小（tokens）
    pub context_window: u32,

    /// 最大尝试次数（含首次）
    pub retry_attempts: u32,

    /// 首次重试间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 重试间隔上限（毫秒）
    pub retry_max_delay_ms: u64,

    /// 随机抖动上限（毫秒）
    pub retry_jitter_ms: u64,

    /// 超时时间（秒）
    pub timeout_seconds: u64,
}

/// 搜索服务配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// 搜索 API KEY
    pub api_key: String,

    /// 搜索接口地址
    pub endpoint: String,

    /// 每个查询返回的最大结果数
    pub max_results: usize,

    /// 超时时间（秒）
    pub timeout_seconds: u64,

    /// 最大尝试次数（含首次）
    pub retry_attempts: u32,

    /// 首次重试间隔（毫秒）
    pub retry_delay_ms: u64,
}

/// 文档数量档位：分析材料超过 `min_chars` 时采用该档的标题列表
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DocumentTier {
    pub min_chars: usize,
    pub titles: Vec<String>,
}

/// 工作流参数
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 轮次上限，到达后强制结束
    pub max_rounds: u32,

    /// 检索查询数量上限
    pub max_queries: usize,

    /// 查询解析失败时拼接在原始需求后的兜底后缀
    pub fallback_query_suffixes: Vec<String>,

    /// 搜索并发数
    pub search_max_parallels: usize,

    /// 每个分析分块包含的搜索结果数
    pub analysis_chunk_size: usize,

    /// 参与分析的搜索结果上限
    pub analysis_max_sources: usize,

    /// 分块分析并发数
    pub analysis_max_parallels: usize,

    /// 洞察条目上限
    pub max_insights: usize,

    /// 洞察条目的最短长度
    pub min_insight_chars: usize,

    /// 单篇文档的修订轮次上限（至少为 2：撰写 + 评审）
    pub max_revisions_per_document: u32,

    /// 评审通过标记
    pub approval_tokens: Vec<String>,

    /// 文档数量档位
    pub document_tiers: Vec<DocumentTier>,

    /// 评审中出现 SEARCH_NEEDED 时是否补充检索
    pub dynamic_search: bool,

    /// 每次评审最多补充的检索数
    pub max_dynamic_queries: usize,

    /// 研究摘要缓存容量
    pub summary_cache_capacity: usize,

    /// 写作模型研究摘要的 token 预算
    pub writer_summary_max_tokens: usize,
}

/// 会话快照存储后端
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// JSON 文件，跨进程可恢复
    #[default]
    File,
    /// 进程内存储，按容量与过期时间淘汰
    Memory,
}

impl std::fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionBackend::File => write!(f, "file"),
            SessionBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(SessionBackend::File),
            "memory" => Ok(SessionBackend::Memory),
            _ => Err(format!("Unknown session backend: {}", s)),
        }
    }
}

/// 会话快照配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// 快照存储后端
    pub backend: SessionBackend,

    /// 快照目录
    pub dir: PathBuf,

    /// 内存快照存储的容量
    pub memory_capacity: usize,

    /// 内存快照存储的过期时间（小时）
    pub memory_ttl_hours: u64,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 未设置 RUST_LOG 时使用的日志级别
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// 校验必需配置，一次性报告所有缺失项
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.planner.provider.requires_api_key() && self.planner.api_key.trim().is_empty() {
            problems.push(format!(
                "planner api_key is empty (set {} or --planner-api-key)",
                PLANNER_API_KEY_ENV
            ));
        }
        if self.writer.provider.requires_api_key() && self.writer.api_key.trim().is_empty() {
            problems.push("writer api_key is empty (set --writer-api-key)".to_string());
        }
        if self.search.api_key.trim().is_empty() {
            problems.push(format!(
                "search api_key is empty (set {} or --serper-api-key)",
                SEARCH_API_KEY_ENV
            ));
        }
        if self.workflow.max_rounds == 0 {
            problems.push("workflow.max_rounds must be positive".to_string());
        }
        if self.workflow.analysis_chunk_size == 0 {
            problems.push("workflow.analysis_chunk_size must be positive".to_string());
        }
        if self.workflow.approval_tokens.iter().all(|t| t.trim().is_empty()) {
            problems.push("workflow.approval_tokens must contain a token".to_string());
        }

        if !problems.is_empty() {
            bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }
}

impl LLMConfig {
    /// 规划模型默认配置（DeepSeek）
    pub fn planner_default() -> Self {
        Self {
            provider: LLMProvider::DeepSeek,
            api_key: std::env::var(PLANNER_API_KEY_ENV).unwrap_or_default(),
            api_base_url: std::env::var(PLANNER_BASE_URL_ENV)
                .unwrap_or_else(|_| String::from("https://api.deepseek.com/v1")),
            model: String::from("deepseek-chat"),
            max_tokens: 8000,
            temperature: 0.3,
            context_window: 128_000,
            retry_attempts: 3,
            retry_delay_ms: 5000,
            retry_max_delay_ms: 30_000,
            retry_jitter_ms: 500,
            timeout_seconds: 300,
        }
    }

    /// 写作模型默认配置（本地 Ollama）
    pub fn writer_default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            api_key: String::new(),
            api_base_url: std::env::var(WRITER_BASE_URL_ENV)
                .unwrap_or_else(|_| String::from("http://localhost:11434")),
            model: std::env::var(WRITER_MODEL_ENV)
                .unwrap_or_else(|_| String::from("qwen3-coder:latest")),
            max_tokens: 16_000,
            temperature: 0.7,
            context_window: 32_768,
            retry_attempts: 2,
            retry_delay_ms: 3000,
            retry_max_delay_ms: 15_000,
            retry_jitter_ms: 500,
            timeout_seconds: 1200,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl WorkflowConfig {
    /// 实际生效的修订上限
    pub fn revision_ceiling(&self) -> u32 {
        self.max_revisions_per_document.max(2)
    }

    /// 按分析材料的体量选择文档标题
    ///
    /// 档位按 `min_chars` 从大到小匹配，体量严格大于阈值才命中；阈值为 0 的档位兜底。
    pub fn select_document_titles(&self, volume: usize) -> Vec<String> {
        let mut tiers: Vec<&DocumentTier> = self
            .document_tiers
            .iter()
            .filter(|tier| !tier.titles.is_empty())
            .collect();
        tiers.sort_by(|a, b| b.min_chars.cmp(&a.min_chars));

        tiers
            .iter()
            .find(|tier| volume > tier.min_chars || tier.min_chars == 0)
            .or(tiers.last())
            .map(|tier| tier.titles.clone())
            .unwrap_or_else(|| vec![String::from("Complete Implementation Guide")])
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("./devplan.docs"),
            target_language: TargetLanguage::default(),
            planner: LLMConfig::planner_default(),
            writer: LLMConfig::writer_default(),
            search: SearchConfig::default(),
            workflow: WorkflowConfig::default(),
            session: SessionConfig::default(),
            verbose: false,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self::planner_default()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var(SEARCH_API_KEY_ENV).unwrap_or_default(),
            endpoint: String::from("https://google.serper.dev/search"),
            max_results: 15,
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            max_queries: 20,
            fallback_query_suffixes: vec![
                "best practices".to_string(),
                "architecture".to_string(),
                "implementation guide".to_string(),
            ],
            search_max_parallels: 10,
            analysis_chunk_size: 30,
            analysis_max_sources: 150,
            analysis_max_parallels: 5,
            max_insights: 20,
            min_insight_chars: 20,
            max_revisions_per_document: 6,
            approval_tokens: vec!["APPROVED".to_string(), "TECHNICALLY_ACCURATE".to_string()],
            document_tiers: vec![
                DocumentTier {
                    min_chars: 20_000,
                    titles: vec![
                        "System Architecture & Implementation Guide".to_string(),
                        "Step-by-Step Implementation Guide".to_string(),
                        "Security, Testing & Operations Implementation".to_string(),
                        "API Documentation & Integration Guide".to_string(),
                    ],
                },
                DocumentTier {
                    min_chars: 10_000,
                    titles: vec![
                        "System Architecture & Implementation Guide".to_string(),
                        "Step-by-Step Implementation Guide".to_string(),
                    ],
                },
                DocumentTier {
                    min_chars: 0,
                    titles: vec!["Complete Implementation Guide".to_string()],
                },
            ],
            dynamic_search: true,
            max_dynamic_queries: 3,
            summary_cache_capacity: 10,
            writer_summary_max_tokens: 8000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::File,
            dir: PathBuf::from("./.devplan/sessions"),
            memory_capacity: 100,
            memory_ttl_hours: 24,
        }
    }
}
