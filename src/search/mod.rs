//! 网页搜索适配层

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::llm::client::backoff::{
    BackoffPolicy, CallError, Sleeper, TokioSleeper, retry_with_backoff, with_timeout,
};

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub score: f64,
}

/// 搜索服务
///
/// 失败不向上抛出：任何错误都记录日志后返回空列表，不能中断整批检索。
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult>;
}

/// Serper（Google 搜索）客户端
#[derive(Clone)]
pub struct SerperClient {
    http: reqwest::Client,
    config: SearchConfig,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperClient {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            policy: BackoffPolicy {
                max_attempts: config.retry_attempts.max(1),
                initial_delay: Duration::from_millis(config.retry_delay_ms),
                ..Default::default()
            },
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    async fn search_once(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, CallError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("X-API-KEY", &self.config.api_key)
            .json(&json!({ "q": query, "num": max_results }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), &body));
        }

        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| CallError::Permanent(format!("invalid search response: {}", e)))?;
        Ok(to_results(query, body, max_results))
    }
}

#[async_trait]
impl SearchProvider for SerperClient {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        let query = normalize_query(query);
        if query.is_empty() {
            return Vec::new();
        }

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let outcome = retry_with_backoff(&self.policy, self.sleeper.as_ref(), "search", || {
            with_timeout(timeout, self.search_once(&query, max_results))
        })
        .await;

        match outcome {
            Ok(results) => {
                debug!(query = %query, count = results.len(), "🔎 搜索完成");
                results
            }
            Err(e) => {
                warn!(query = %query, error = %e, "⚠️ 搜索失败，返回空结果");
                Vec::new()
            }
        }
    }
}

fn to_results(query: &str, body: SerperResponse, max_results: usize) -> Vec<SearchResult> {
    body.organic
        .into_iter()
        .filter(|item| !item.link.is_empty())
        .take(max_results)
        .map(|item| SearchResult {
            score: relevance_score(query, &item.title, &item.snippet),
            title: item.title,
            url: item.link,
            snippet: item.snippet,
        })
        .collect()
}

/// 合并多余空白
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 相关度：0.6 × 标题命中率 + 0.4 × 摘要命中率，上限 1.0
pub fn relevance_score(query: &str, title: &str, snippet: &str) -> f64 {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }

    let hit_ratio = |text: &str| {
        let text = text.to_lowercase();
        terms.iter().filter(|t| text.contains(t.as_str())).count() as f64 / terms.len() as f64
    };

    (0.6 * hit_ratio(title) + 0.4 * hit_ratio(snippet)).min(1.0)
}
