use crate::config::{Config, DEFAULT_CONFIG_FILE, LLMProvider, SessionBackend};
use crate::i18n::TargetLanguage;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

/// DevPlan-RS - 由Rust与AI驱动的开发计划生成引擎
#[derive(Parser, Debug)]
#[command(name = "devplan-rs")]
#[command(
    about = "AI-driven research engine that turns a software project request into a set of reviewed, implementation-ready development documents."
)]
#[command(version)]
pub struct Args {
    /// 项目需求描述
    pub prompt: Option<String>,

    /// 输出路径
    #[arg(short, long)]
    pub output_path: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 恢复指定会话
    #[arg(long, value_name = "SESSION_ID", conflicts_with_all = ["prompt", "list_sessions", "delete_session"])]
    pub resume: Option<String>,

    /// 列出已保存的会话
    #[arg(long, conflicts_with_all = ["prompt", "delete_session"])]
    pub list_sessions: bool,

    /// 删除指定会话
    #[arg(long, value_name = "SESSION_ID", conflicts_with = "prompt")]
    pub delete_session: Option<String>,

    /// 会话快照目录
    #[arg(long)]
    pub session_dir: Option<PathBuf>,

    /// 会话快照存储后端 (file, memory)
    #[arg(long)]
    pub session_backend: Option<String>,

    /// 最大轮次
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// 每篇文档的最大修订轮次（最小为 2）
    #[arg(long)]
    pub max_revisions: Option<u32>,

    /// 规划模型 Provider (openai, deepseek, moonshot, openrouter, anthropic, ollama)
    #[arg(long)]
    pub planner_provider: Option<String>,

    /// 规划模型
    #[arg(long)]
    pub planner_model: Option<String>,

    /// 规划模型 API KEY
    #[arg(long)]
    pub planner_api_key: Option<String>,

    /// 规划模型 API 基地址
    #[arg(long)]
    pub planner_base_url: Option<String>,

    /// 写作模型 Provider
    #[arg(long)]
    pub writer_provider: Option<String>,

    /// 写作模型
    #[arg(long)]
    pub writer_model: Option<String>,

    /// 写作模型 API KEY
    #[arg(long)]
    pub writer_api_key: Option<String>,

    /// 写作模型 API 基地址
    #[arg(long)]
    pub writer_base_url: Option<String>,

    /// Serper 搜索 API KEY
    #[arg(long)]
    pub serper_api_key: Option<String>,

    /// 关闭评审阶段的定向检索
    #[arg(long)]
    pub no_dynamic_search: bool,

    /// 目标语言 (zh, en, ja, ko, de, fr, ru)
    #[arg(long)]
    pub target_language: Option<String>,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,
}

/// 本次运行要执行的操作
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(String),
    Resume(String),
    ListSessions,
    DeleteSession(String),
}

impl Args {
    /// 解析要执行的操作
    pub fn command(&self) -> Result<Command> {
        if self.list_sessions {
            return Ok(Command::ListSessions);
        }
        if let Some(session_id) = &self.delete_session {
            return Ok(Command::DeleteSession(session_id.clone()));
        }
        if let Some(session_id) = &self.resume {
            return Ok(Command::Resume(session_id.clone()));
        }
        match self.prompt.as_deref().map(str::trim) {
            Some(prompt) if !prompt.is_empty() => Ok(Command::Run(prompt.to_string())),
            _ => bail!("a project request is required, e.g. devplan-rs \"build a todo app\""),
        }
    }

    /// 将CLI参数转换为配置
    ///
    /// 显式指定的配置文件读取失败会直接报错；否则尝试当前目录下的默认配置文件。
    pub fn into_config(self) -> Result<Config> {
        let mut config = if let Some(config_path) = &self.config {
            Config::from_file(config_path)
                .with_context(|| format!("无法读取配置文件 {}", config_path.display()))?
        } else {
            let default_config_path = std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_CONFIG_FILE);

            if default_config_path.exists() {
                Config::from_file(&default_config_path).with_context(|| {
                    format!("无法读取默认配置文件 {}", default_config_path.display())
                })?
            } else {
                Config::default()
            }
        };

        if let Some(output_path) = self.output_path {
            config.output_path = output_path;
        }
        if let Some(session_dir) = self.session_dir {
            config.session.dir = session_dir;
        }
        if let Some(backend) = self.session_backend.as_deref() {
            match backend.parse::<SessionBackend>() {
                Ok(backend) => config.session.backend = backend,
                Err(_) => warn!(
                    "⚠️ 未知的会话存储后端: {}，使用 {}",
                    backend, config.session.backend
                ),
            }
        }
        if let Some(max_rounds) = self.max_rounds {
            config.workflow.max_rounds = max_rounds;
        }
        if let Some(max_revisions) = self.max_revisions {
            config.workflow.max_revisions_per_document = max_revisions;
        }
        if self.no_dynamic_search {
            config.workflow.dynamic_search = false;
        }

        // 规划模型
        if let Some(provider) = self.planner_provider.as_deref().and_then(parse_provider) {
            config.planner.provider = provider;
        }
        if let Some(model) = self.planner_model {
            config.planner.model = model;
        }
        if let Some(api_key) = self.planner_api_key {
            config.planner.api_key = api_key;
        }
        if let Some(base_url) = self.planner_base_url {
            config.planner.api_base_url = base_url;
        }

        // 写作模型
        if let Some(provider) = self.writer_provider.as_deref().and_then(parse_provider) {
            config.writer.provider = provider;
        }
        if let Some(model) = self.writer_model {
            config.writer.model = model;
        }
        if let Some(api_key) = self.writer_api_key {
            config.writer.api_key = api_key;
        }
        if let Some(base_url) = self.writer_base_url {
            config.writer.api_base_url = base_url;
        }

        if let Some(api_key) = self.serper_api_key {
            config.search.api_key = api_key;
        }

        // 目标语言配置
        if let Some(target_language_str) = self.target_language {
            match target_language_str.parse::<TargetLanguage>() {
                Ok(target_language) => config.target_language = target_language,
                Err(_) => warn!(
                    "⚠️ 未知的目标语言: {}，使用默认语言 (English)",
                    target_language_str
                ),
            }
        }

        config.verbose = config.verbose || self.verbose;
        Ok(config)
    }
}

fn parse_provider(value: &str) -> Option<LLMProvider> {
    match value.parse::<LLMProvider>() {
        Ok(provider) => Some(provider),
        Err(_) => {
            warn!("⚠️ 未知的provider: {}，使用默认provider", value);
            None
        }
    }
}

// Include tests
#[cfg(test)]
mod tests;
