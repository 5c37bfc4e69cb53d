//! 写作模型的流式调用（Ollama `/api/generate`）
//!
//! 写作模型一次输出上万 token，必须边收边数：按请求预算的 80% 设定硬上限，
//! 同时用约 4 字符/token 折算出字符上限，任一触顶就停止读取。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, CallError, Sleeper, TokioSleeper, retry_with_backoff, with_timeout};
use crate::config::LLMConfig;

/// 实际执行的输出预算占请求预算的比例
const ENFORCED_RATIO: f64 = 0.8;
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: usize,
    num_ctx: u32,
    temperature: f64,
    top_k: u32,
    top_p: f64,
    repeat_penalty: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// 流式输出的上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCeiling {
    pub max_tokens: usize,
    pub max_chars: usize,
}

impl StreamCeiling {
    pub fn for_budget(requested_tokens: u32) -> Self {
        let max_tokens = ((requested_tokens as f64 * ENFORCED_RATIO) as usize).max(1);
        Self {
            max_tokens,
            max_chars: max_tokens * CHARS_PER_TOKEN,
        }
    }
}

/// 流式收集器：逐行解析 NDJSON，累积文本并检查上限
#[derive(Debug)]
pub struct StreamCollector {
    ceiling: StreamCeiling,
    pending: Vec<u8>,
    text: String,
    char_count: usize,
    token_count: usize,
    done: bool,
    hit_ceiling: bool,
}

impl StreamCollector {
    pub fn new(ceiling: StreamCeiling) -> Self {
        Self {
            ceiling,
            pending: Vec::new(),
            text: String::new(),
            char_count: 0,
            token_count: 0,
            done: false,
            hit_ceiling: false,
        }
    }

    /// 输入一段字节，返回是否应当停止读取
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        self.pending.extend_from_slice(bytes);

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.consume_line(&line);
            if self.should_stop() {
                return true;
            }
        }
        false
    }

    /// 流结束时处理残留的最后一行
    pub fn finish(mut self) -> CollectedStream {
        if !self.should_stop() && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.consume_line(&line);
        }
        CollectedStream {
            text: self.text,
            token_count: self.token_count,
            hit_ceiling: self.hit_ceiling,
        }
    }

    fn consume_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<GenerateChunk>(line) {
            Ok(chunk) => {
                if !chunk.response.is_empty() {
                    self.text.push_str(&chunk.response);
                    self.char_count += chunk.response.chars().count();
                    self.token_count += 1;
                }
                if chunk.done {
                    self.done = true;
                }
                if self.token_count >= self.ceiling.max_tokens
                    || self.char_count >= self.ceiling.max_chars
                {
                    self.hit_ceiling = true;
                }
            }
            Err(e) => debug!(error = %e, "跳过无法解析的流式数据行"),
        }
    }

    fn should_stop(&self) -> bool {
        self.done || self.hit_ceiling
    }
}

/// 流式收集的结果
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedStream {
    pub text: String,
    pub token_count: usize,
    pub hit_ceiling: bool,
}

/// Ollama 流式写作客户端
#[derive(Clone)]
pub struct OllamaStreamingWriter {
    http: reqwest::Client,
    config: LLMConfig,
    system_prompt: String,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl OllamaStreamingWriter {
    pub fn new(config: &LLMConfig, system_prompt: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            system_prompt: system_prompt.into(),
            policy: BackoffPolicy::from(config),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.api_base_url.trim_end_matches('/'))
    }

    /// 带重试与超时的流式生成
    pub async fn stream_generate(&self, prompt: &str, max_tokens: u32) -> Result<String, CallError> {
        let timeout = self.config.timeout();
        retry_with_backoff(&self.policy, self.sleeper.as_ref(), "writer", || {
            with_timeout(timeout, self.stream_once(prompt, max_tokens))
        })
        .await
    }

    async fn stream_once(&self, prompt: &str, max_tokens: u32) -> Result<String, CallError> {
        let ceiling = StreamCeiling::for_budget(max_tokens);
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            system: (!self.system_prompt.is_empty()).then_some(self.system_prompt.as_str()),
            stream: true,
            options: GenerateOptions {
                num_predict: ceiling.max_tokens,
                num_ctx: self.config.context_window,
                temperature: self.config.temperature,
                top_k: 40,
                top_p: 0.9,
                repeat_penalty: 1.2,
            },
        };

        info!(
            model = %self.config.model,
            max_tokens = ceiling.max_tokens,
            max_chars = ceiling.max_chars,
            "✍️ 写作模型开始流式生成"
        );

        let mut response = self.http.post(self.endpoint()).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), &body));
        }

        let mut collector = StreamCollector::new(ceiling);
        while let Some(bytes) = response.chunk().await? {
            if collector.feed(&bytes) {
                break;
            }
        }
        let collected = collector.finish();

        if collected.hit_ceiling {
            warn!(
                tokens = collected.token_count,
                chars = collected.text.chars().count(),
                "⚠️ 写作输出触及上限，已截停"
            );
        } else {
            debug!(tokens = collected.token_count, "写作模型流式生成完成");
        }
        Ok(collected.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(response: &str, done: bool) -> String {
        format!("{}\n", serde_json::json!({ "response": response, "done": done }))
    }

    #[test]
    fn test_ceiling_for_budget() {
        let ceiling = StreamCeiling::for_budget(1000);
        assert_eq!(ceiling.max_tokens, 800);
        assert_eq!(ceiling.max_chars, 3200);
    }

    #[test]
    fn test_collects_until_done() {
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(1000));
        assert!(!collector.feed(line("Hello", false).as_bytes()));
        assert!(collector.feed(line(" world.", true).as_bytes()));

        let collected = collector.finish();
        assert_eq!(collected.text, "Hello world.");
        assert_eq!(collected.token_count, 2);
        assert!(!collected.hit_ceiling);
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(1000));
        let payload = format!("{}{}", line("ab", false), line("cd", false));
        let (first, second) = payload.as_bytes().split_at(7);

        assert!(!collector.feed(first));
        assert!(!collector.feed(second));
        assert_eq!(collector.finish().text, "abcd");
    }

    #[test]
    fn test_stops_at_token_ceiling() {
        // 预算 5 -> 执行上限 4 个 token
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(5));
        let mut stopped_at = None;
        for i in 0..10 {
            if collector.feed(line("x", false).as_bytes()) {
                stopped_at = Some(i);
                break;
            }
        }
        assert_eq!(stopped_at, Some(3));
        let collected = collector.finish();
        assert!(collected.hit_ceiling);
        assert_eq!(collected.text, "xxxx");
    }

    #[test]
    fn test_stops_at_char_ceiling() {
        // 执行上限 8 token / 32 字符
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(10));
        assert!(collector.feed(line(&"y".repeat(40), false).as_bytes()));
        assert!(collector.finish().hit_ceiling);
    }

    #[test]
    fn test_char_ceiling_accumulates_across_lines() {
        // 多字节字符按字符而不是字节计数
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(10));
        for _ in 0..3 {
            assert!(!collector.feed(line(&"界".repeat(10), false).as_bytes()));
        }
        assert!(collector.feed(line("界界界界界", false).as_bytes()));

        let collected = collector.finish();
        assert!(collected.hit_ceiling);
        assert_eq!(collected.token_count, 4);
        assert_eq!(collected.text.chars().count(), 35);
    }

    #[test]
    fn test_trailing_line_without_newline() {
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(100));
        let last = serde_json::json!({ "response": "tail", "done": true }).to_string();
        assert!(!collector.feed(last.as_bytes()));
        assert_eq!(collector.finish().text, "tail");
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let mut collector = StreamCollector::new(StreamCeiling::for_budget(100));
        collector.feed(b"not json\n");
        collector.feed(line("ok", true).as_bytes());
        assert_eq!(collector.finish().text, "ok");
    }
}
