//! 重试退避策略
//!
//! 重试只针对基础设施类的瞬时错误（超时、连接失败、5xx、429），
//! 请求本身被拒绝（4xx）时立即返回。等待通过 [`Sleeper`] 注入，测试中可以替换为记录型实现。

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::LLMConfig;

/// 外部调用错误分类
#[derive(Debug, Error)]
pub enum CallError {
    /// 网络抖动、5xx、限流等，可以重试
    #[error("transient error: {0}")]
    Transient(String),

    /// 请求被拒绝，不应重试
    #[error("permanent error: {0}")]
    Permanent(String),

    /// 单次调用超时
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Transient(_) | CallError::Timeout(_))
    }

    /// 按 HTTP 状态码分类
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, body.chars().take(300).collect::<String>());
        if status == 429 || status >= 500 {
            CallError::Transient(detail)
        } else {
            CallError::Permanent(detail)
        }
    }

    /// 按错误消息分类
    ///
    /// rig 等上游库不暴露结构化状态码，只能从消息里识别。
    /// 出现 4xx 状态码视为永久错误，超时/连接/5xx/限流类描述视为瞬时错误，
    /// 其余无法判断的情况按瞬时错误处理。
    pub fn classify_message(message: &str) -> Self {
        let has_status = |codes: &[&str]| codes.iter().any(|code| contains_code(message, code));
        if has_status(&["400", "401", "403", "404", "413", "422"])
            && !has_status(&["429", "500", "502", "503", "504"])
        {
            return CallError::Permanent(message.to_string());
        }

        CallError::Transient(message.to_string())
    }
}

/// 判断消息中是否出现独立的状态码（前后不是数字）
fn contains_code(message: &str, code: &str) -> bool {
    message.match_indices(code).any(|(pos, _)| {
        let before = message[..pos].chars().next_back();
        let after = message[pos + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
    })
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return CallError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_builder() || err.is_decode() {
            return CallError::Permanent(err.to_string());
        }
        CallError::Transient(err.to_string())
    }
}

/// 等待抽象
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 生产环境使用的 tokio 等待
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 指数退避策略
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// 每次等待叠加的随机抖动上限
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }
}

impl From<&LLMConfig> for BackoffPolicy {
    fn from(config: &LLMConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            initial_delay: Duration::from_millis(config.retry_delay_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(config.retry_max_delay_ms.max(config.retry_delay_ms)),
            jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }
}

impl BackoffPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// 第 `retry`（从 1 开始）次重试前的等待时间
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(64) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let base = Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter.is_zero() {
            return base;
        }
        let jitter = rand::rng().random_range(0.0..self.jitter.as_secs_f64());
        base + Duration::from_secs_f64(jitter)
    }
}

/// 通用重试逻辑
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    operation: F,
) -> Result<T, CallError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    call = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "❌ 调用外部服务出错，稍后重试"
                );
                sleeper.sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// 为单次调用加上超时
pub async fn with_timeout<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, CallError>
where
    Fut: Future<Output = Result<T, CallError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Timeout(timeout)),
    }
}
