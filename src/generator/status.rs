//! 状态事件：阶段处理过程中同步推送给观察者

use tracing::info;

use crate::generator::types::{ResearchContext, Stage};

/// 一条状态事件
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    /// 事件发起方，例如 planner / writer / search / orchestrator
    pub actor: String,
    /// 正在进行的活动
    pub activity: String,
    pub detail: String,
    pub stage: Stage,
    pub round: u32,
}

impl StatusEvent {
    pub fn new(
        context: &ResearchContext,
        actor: impl Into<String>,
        activity: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            activity: activity.into(),
            detail: detail.into(),
            stage: context.stage,
            round: context.round,
        }
    }
}

/// 状态事件接收方
///
/// 在阶段处理函数内部同步调用，实现方不应阻塞。
pub trait StatusSink: Send + Sync {
    fn on_status(&self, event: &StatusEvent, context: &ResearchContext);
}

/// 默认实现：输出为日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn on_status(&self, event: &StatusEvent, context: &ResearchContext) {
        let icon = match event.actor.as_str() {
            "planner" => "🧠",
            "writer" => "✍️",
            "search" => "🔎",
            _ => "🔄",
        };
        info!(
            session_id = %context.session_id,
            stage = %event.stage,
            round = event.round,
            actor = %event.actor,
            "{} {}: {}",
            icon,
            event.activity,
            event.detail
        );
    }
}
