use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::{CachePerformanceReport, SummaryCache};
use crate::config::Config;
use crate::generator::status::{StatusEvent, StatusSink, TracingStatusSink};
use crate::generator::summary::{build_research_summary, summary_fingerprint};
use crate::generator::types::ResearchContext;
use crate::llm::agents::{PlannerAgent, WriterAgent};
use crate::search::SearchProvider;

/// 编排器依赖的服务集合
#[derive(Clone)]
pub struct GeneratorContext {
    /// 配置
    pub config: Config,
    /// 规划模型
    pub planner: Arc<dyn PlannerAgent>,
    /// 写作模型
    pub writer: Arc<dyn WriterAgent>,
    /// 搜索服务
    pub search: Arc<dyn SearchProvider>,
    /// 研究摘要缓存
    pub summary_cache: Arc<RwLock<SummaryCache>>,
    /// 状态事件接收方
    pub status_sink: Arc<dyn StatusSink>,
}

impl GeneratorContext {
    /// 使用给定的模型与搜索实现创建上下文
    pub fn with_agents(
        config: Config,
        planner: Arc<dyn PlannerAgent>,
        writer: Arc<dyn WriterAgent>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        let summary_cache = Arc::new(RwLock::new(SummaryCache::new(
            config.workflow.summary_cache_capacity,
        )));
        Self {
            config,
            planner,
            writer,
            search,
            summary_cache,
            status_sink: Arc::new(TracingStatusSink),
        }
    }

    pub fn with_status_sink(mut self, status_sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = status_sink;
        self
    }

    /// 推送状态事件
    pub fn emit(
        &self,
        context: &ResearchContext,
        actor: &str,
        activity: &str,
        detail: impl Into<String>,
    ) {
        let event = StatusEvent::new(context, actor, activity, detail);
        self.status_sink.on_status(&event, context);
    }

    /// 获取研究摘要，优先读缓存
    pub async fn research_summary(&self, context: &ResearchContext, max_tokens: Option<usize>) -> String {
        let key = summary_fingerprint(context, max_tokens);
        if let Some(summary) = self.summary_cache.read().await.get(&key) {
            return summary;
        }

        let summary = build_research_summary(context, max_tokens);
        self.summary_cache
            .write()
            .await
            .insert(key, summary.clone());
        summary
    }

    pub async fn summary_cache_report(&self) -> CachePerformanceReport {
        self.summary_cache.read().await.report()
    }
}
