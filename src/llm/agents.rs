//! 规划模型与写作模型的调用边界
//!
//! 编排器只依赖这两个 trait；生产实现基于 [`LLMClient`] 与 Ollama 流式客户端，
//! 测试中用确定性的假实现替换。

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{LLMConfig, LLMProvider};
use crate::llm::client::LLMClient;
use crate::llm::client::streaming::OllamaStreamingWriter;
use crate::llm::client::utils::{estimate_token_usage, fit_to_budget, input_budget};

const PLANNER_PREAMBLE: &str = "You are a senior software architect and technical research analyst. \
You break down software project requests into research plans, analyse web research, design document outlines \
and review technical documents for accuracy and completeness. Be precise and follow the requested output format exactly.";

const WRITER_PREAMBLE: &str = "You are an expert technical writer who produces complete, implementation-ready \
development documents in Markdown. Always finish every section you start and end the document with a complete sentence.";

/// 规划模型：大输入窗口，中等输出预算
#[async_trait]
pub trait PlannerAgent: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context_blob: Option<&str>,
        max_output: u32,
    ) -> Result<String>;
}

/// 写作模型：中等输入窗口，大输出预算。调用方负责截断校验
#[async_trait]
pub trait WriterAgent: Send + Sync {
    async fn generate(&self, prompt: &str, max_output: u32) -> Result<String>;
}

/// 基于 rig 的规划模型
pub struct RigPlanner {
    client: LLMClient,
}

impl RigPlanner {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        Ok(Self {
            client: LLMClient::new(config.clone(), "planner")?,
        })
    }

    pub fn client(&self) -> &LLMClient {
        &self.client
    }
}

#[async_trait]
impl PlannerAgent for RigPlanner {
    async fn generate(
        &self,
        prompt: &str,
        context_blob: Option<&str>,
        max_output: u32,
    ) -> Result<String> {
        let user_prompt = match context_blob {
            Some(blob) if !blob.trim().is_empty() => {
                let prompt_tokens = estimate_token_usage(prompt, "").input_tokens;
                let budget = input_budget(self.client.config().context_window, max_output)
                    .saturating_sub(prompt_tokens);
                format!("{}\n\n## Context\n\n{}", prompt, fit_to_budget(blob, budget))
            }
            _ => prompt.to_string(),
        };
        Ok(self
            .client
            .prompt(PLANNER_PREAMBLE, &user_prompt, max_output)
            .await?)
    }
}

/// 基于 rig 的写作模型（非 Ollama provider）
pub struct RigWriter {
    client: LLMClient,
}

impl RigWriter {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        Ok(Self {
            client: LLMClient::new(config.clone(), "writer")?,
        })
    }
}

#[async_trait]
impl WriterAgent for RigWriter {
    async fn generate(&self, prompt: &str, max_output: u32) -> Result<String> {
        Ok(self.client.prompt(WRITER_PREAMBLE, prompt, max_output).await?)
    }
}

#[async_trait]
impl WriterAgent for OllamaStreamingWriter {
    async fn generate(&self, prompt: &str, max_output: u32) -> Result<String> {
        Ok(self.stream_generate(prompt, max_output).await?)
    }
}

/// 按配置创建写作模型：Ollama 走流式接口，其余 provider 走 rig
pub fn build_writer(config: &LLMConfig) -> Result<Arc<dyn WriterAgent>> {
    match config.provider {
        LLMProvider::Ollama => Ok(Arc::new(OllamaStreamingWriter::new(config, WRITER_PREAMBLE)?)),
        _ => Ok(Arc::new(RigWriter::new(config)?)),
    }
}
