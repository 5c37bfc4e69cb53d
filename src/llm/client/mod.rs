//! LLM客户端 - 提供统一的LLM服务接口

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::LLMConfig;

pub mod backoff;
mod providers;
pub mod streaming;
pub mod types;
pub mod utils;

use backoff::{BackoffPolicy, CallError, Sleeper, TokioSleeper, retry_with_backoff, with_timeout};
use providers::ProviderClient;
use utils::estimate_token_usage;

/// LLM客户端 - 基于 rig 的一次性对话调用
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    client: ProviderClient,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    /// 日志中区分规划模型与写作模型
    role: &'static str,
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: LLMConfig, role: &'static str) -> Result<Self> {
        let client = ProviderClient::new(&config)?;
        Ok(Self {
            policy: BackoffPolicy::from(&config),
            client,
            config,
            sleeper: Arc::new(TokioSleeper),
            role,
        })
    }

    /// 替换重试等待实现
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self) -> Result<()> {
        info!(role = self.role, model = %self.config.model, "🔄 正在检查模型连接...");
        match self
            .prompt("You are a helpful assistant.", "Reply with OK.", 16)
            .await
        {
            Ok(_) => {
                info!(role = self.role, "✅ 模型连接正常");
                Ok(())
            }
            Err(e) => {
                error!(role = self.role, error = %e, "❌ 模型连接失败");
                Err(e.into())
            }
        }
    }

    /// 单轮对话：每次尝试都带超时，瞬时错误按退避策略重试
    pub async fn prompt(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, CallError> {
        let agent = self
            .client
            .create_agent(&self.config, system_prompt, max_tokens);
        let timeout = self.config.timeout();

        let response = retry_with_backoff(&self.policy, self.sleeper.as_ref(), self.role, || {
            with_timeout(timeout, async {
                agent
                    .prompt(user_prompt)
                    .await
                    .map_err(|e| CallError::classify_message(&format!("{:#}", e)))
            })
        })
        .await?;

        let usage = estimate_token_usage(&format!("{}{}", system_prompt, user_prompt), &response);
        debug!(
            role = self.role,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "模型调用完成"
        );
        Ok(response)
    }
}
