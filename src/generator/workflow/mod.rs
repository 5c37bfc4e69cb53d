use anyhow::{Result, anyhow};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::generator::compose::{author_and_refine, plan_documents};
use crate::generator::context::GeneratorContext;
use crate::generator::outlet::{DevelopmentPlan, DiskOutlet, Outlet};
use crate::generator::research::{analyze_results, plan_research, run_searches};
use crate::generator::types::{ResearchContext, Stage};
use crate::llm::agents::{PlannerAgent, RigPlanner, build_writer};
use crate::search::{SearchProvider, SerperClient};
use crate::session::{SessionSnapshot, SessionStatus, SnapshotStore, open_store};
use crate::utils::threads::panic_reason;

/// 按阶段累计的耗时
#[derive(Debug, Default)]
pub struct TimingScope {
    start_time: Option<std::time::Instant>,
    phase_durations: HashMap<Stage, Duration>,
    phase_order: Vec<Stage>,
}

impl TimingScope {
    pub fn new() -> Self {
        Self {
            start_time: Some(std::time::Instant::now()),
            ..Default::default()
        }
    }

    /// 记录一个阶段子步骤的耗时，同一阶段多轮累加
    pub fn record(&mut self, stage: Stage, duration: Duration) {
        if !self.phase_durations.contains_key(&stage) {
            self.phase_order.push(stage);
        }
        *self.phase_durations.entry(stage).or_default() += duration;
    }

    pub fn get_total_duration(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    pub fn get_phase_duration(&self, stage: Stage) -> Option<Duration> {
        self.phase_durations.get(&stage).copied()
    }

    /// 获取格式化的执行时间报告
    pub fn generate_timing_report(&self) -> String {
        let mut report = String::new();

        if let Some(total_duration) = self.get_total_duration() {
            report.push_str(&format!(
                "总执行时间: {:.2}秒\n",
                total_duration.as_secs_f64()
            ));
        }

        if !self.phase_order.is_empty() {
            report.push_str("\n各阶段执行时间:\n");
            for stage in &self.phase_order {
                let duration = self.phase_durations.get(stage).copied().unwrap_or_default();
                report.push_str(&format!("- {}: {:.3}秒\n", stage, duration.as_secs_f64()));
            }
        }

        report
    }
}

/// 研究流水线的状态机
///
/// 每次 [`execute_round`](Self::execute_round) 只推进一个阶段子步骤，
/// 持久化与观察由外部驱动循环负责。
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    generator: GeneratorContext,
}

impl WorkflowOrchestrator {
    pub fn new(generator: GeneratorContext) -> Self {
        Self { generator }
    }

    pub fn generator(&self) -> &GeneratorContext {
        &self.generator
    }

    /// 创建新会话
    pub fn start_session(&self, prompt: impl Into<String>) -> ResearchContext {
        let context = ResearchContext::new(prompt);
        info!(session_id = %context.session_id, "🚀 新会话已创建");
        self.generator
            .emit(&context, "orchestrator", "Session started", context.prompt.clone());
        context
    }

    /// 推进一个阶段子步骤
    ///
    /// 已完成的会话原样返回；轮次达到上限时直接进入 Done，保留已有产出。
    pub async fn execute_round(&self, mut context: ResearchContext) -> ResearchContext {
        if context.is_done() {
            return context;
        }

        let max_rounds = self.generator.config.workflow.max_rounds;
        if context.round >= max_rounds {
            warn!(
                session_id = %context.session_id,
                round = context.round,
                stage = %context.stage,
                "⏱️ 达到轮次上限，强制结束"
            );
            context.stage = Stage::Done;
            self.generator.emit(
                &context,
                "orchestrator",
                "Round ceiling reached",
                format!("stopped after {} rounds", context.round),
            );
            context.touch();
            return context;
        }

        context.round += 1;
        let generator = &self.generator;
        match context.stage {
            Stage::PlanResearch => plan_research(generator, &mut context).await,
            Stage::RunSearches => run_searches(generator, &mut context).await,
            Stage::AnalyzeResults => analyze_results(generator, &mut context).await,
            Stage::PlanDocuments => plan_documents(generator, &mut context).await,
            Stage::AuthorAndRefineDocuments => author_and_refine(generator, &mut context).await,
            Stage::Done => {}
        }
        context.touch();
        context
    }

    /// 驱动会话直到完成，每轮结束后保存快照
    ///
    /// 阶段内部的失败都已降级处理；这里只会因为 panic 或快照存储失败而返回错误，
    /// 返回前会尽量把会话标记为失败。
    pub async fn run_to_completion(
        &self,
        mut context: ResearchContext,
        store: &dyn SnapshotStore,
    ) -> Result<ResearchContext> {
        let mut timing = TimingScope::new();

        while !context.is_done() {
            let stage = context.stage;
            let round = context.round;
            let before = context.clone();
            let started = std::time::Instant::now();

            context = match AssertUnwindSafe(self.execute_round(context)).catch_unwind().await {
                Ok(next) => next,
                Err(payload) => {
                    let reason = panic_reason(payload.as_ref());
                    error!(session_id = %before.session_id, %stage, round, reason = %reason, "❌ 阶段执行异常");
                    mark_failed(store, &before).await;
                    return Err(anyhow!(
                        "session {} failed in stage {} (round {}): {}",
                        before.session_id,
                        stage,
                        round + 1,
                        reason
                    ));
                }
            };
            timing.record(stage, started.elapsed());

            let status = if context.is_done() {
                SessionStatus::Completed
            } else {
                SessionStatus::InProgress
            };
            if let Err(e) = store.save(&SessionSnapshot::capture(&context, status)).await {
                error!(session_id = %context.session_id, error = %e, "❌ 会话快照保存失败");
                mark_failed(store, &context).await;
                return Err(anyhow!("failed to persist session {}: {}", context.session_id, e));
            }
        }

        let report = self.generator.summary_cache_report().await;
        info!(
            session_id = %context.session_id,
            rounds = context.round,
            documents = context.scratch.approved_documents.len(),
            cache_hit_rate = report.hit_rate,
            "🏁 会话完成"
        );
        info!("\n{}", timing.generate_timing_report());
        Ok(context)
    }
}

async fn mark_failed(store: &dyn SnapshotStore, context: &ResearchContext) {
    if let Err(e) = store
        .save(&SessionSnapshot::capture(context, SessionStatus::Failed))
        .await
    {
        warn!(session_id = %context.session_id, error = %e, "⚠️ 无法标记会话失败");
    }
}

/// 启动方式
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchRequest {
    New(String),
    Resume(String),
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub context: ResearchContext,
    pub plan: DevelopmentPlan,
    pub written: Vec<PathBuf>,
}

/// 启动开发计划生成工作流
pub async fn launch(config: &Config, request: LaunchRequest) -> Result<LaunchOutcome> {
    let planner = RigPlanner::new(&config.planner)?;
    // 启动时检查模型连接
    planner.client().check_connection().await?;

    let planner: Arc<dyn PlannerAgent> = Arc::new(planner);
    let writer = build_writer(&config.writer)?;
    let search: Arc<dyn SearchProvider> = Arc::new(SerperClient::new(&config.search)?);
    let generator = GeneratorContext::with_agents(config.clone(), planner, writer, search);
    let orchestrator = WorkflowOrchestrator::new(generator);
    let store = open_store(&config.session);

    let context = match request {
        LaunchRequest::New(prompt) => orchestrator.start_session(prompt),
        LaunchRequest::Resume(session_id) => {
            let snapshot = store.load(&session_id).await?;
            info!(
                session_id = %session_id,
                stage = %snapshot.context.stage,
                round = snapshot.context.round,
                "♻️ 恢复会话"
            );
            snapshot.into_context()
        }
    };

    let context = orchestrator.run_to_completion(context, store.as_ref()).await?;
    let plan = DevelopmentPlan::from_context(&context);
    let written = DiskOutlet::new(&config.output_path).save(&plan).await?;
    Ok(LaunchOutcome {
        context,
        plan,
        written,
    })
}
