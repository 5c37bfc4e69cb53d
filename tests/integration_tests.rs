use anyhow::Result;
use async_trait::async_trait;
use devplan_rs::config::Config;
use devplan_rs::generator::context::GeneratorContext;
use devplan_rs::generator::outlet::{DevelopmentPlan, DiskOutlet, Outlet};
use devplan_rs::generator::types::Stage;
use devplan_rs::generator::workflow::WorkflowOrchestrator;
use devplan_rs::llm::agents::{PlannerAgent, WriterAgent};
use devplan_rs::search::{SearchProvider, SearchResult};
use devplan_rs::session::{FileSnapshotStore, SessionStatus, SnapshotStore};
use std::sync::Arc;
use tempfile::TempDir;

/// 规划模型总是返回不可解析的文本，评审总是通过
struct StubbornPlanner;

#[async_trait]
impl PlannerAgent for StubbornPlanner {
    async fn generate(&self, prompt: &str, _context_blob: Option<&str>, _max_output: u32) -> Result<String> {
        if prompt.starts_with("Review this implementation guide") {
            return Ok("APPROVED".to_string());
        }
        if prompt.starts_with("Synthesise") {
            return Ok("## Key Insights\n- A todo app needs persistent storage and a sync API".to_string());
        }
        Ok("I would rather describe this in prose than in JSON".to_string())
    }
}

struct CompleteWriter;

#[async_trait]
impl WriterAgent for CompleteWriter {
    async fn generate(&self, _prompt: &str, _max_output: u32) -> Result<String> {
        Ok("# Todo App Guide\n\nEverything needed to build the app is described here.".to_string())
    }
}

struct FixedSearch;

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Vec<SearchResult> {
        vec![SearchResult {
            title: "Building a todo app".to_string(),
            url: "https://example.com/todo".to_string(),
            snippet: "A walkthrough of a todo app".to_string(),
            score: 1.0,
        }]
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.output_path = dir.path().join("docs");
    config.session.dir = dir.path().join("sessions");
    config
}

#[tokio::test]
async fn test_build_a_todo_app_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let generator = GeneratorContext::with_agents(
        config.clone(),
        Arc::new(StubbornPlanner),
        Arc::new(CompleteWriter),
        Arc::new(FixedSearch),
    );
    let orchestrator = WorkflowOrchestrator::new(generator);
    let store = FileSnapshotStore::new(&config.session.dir);

    // 逐阶段推进并检查每一步的产出
    let ctx = orchestrator.start_session("build a todo app");
    let ctx = orchestrator.execute_round(ctx).await;
    assert_eq!(ctx.stage, Stage::RunSearches);
    assert!(!ctx.scratch.research_queries.is_empty());

    let ctx = orchestrator.execute_round(ctx).await;
    assert_eq!(ctx.stage, Stage::AnalyzeResults);
    assert_eq!(ctx.search_results.len(), 1);

    let ctx = orchestrator.execute_round(ctx).await;
    assert_eq!(ctx.stage, Stage::PlanDocuments);
    assert!(ctx.scratch.research_analysis.as_deref().is_some_and(|a| !a.is_empty()));

    let ctx = orchestrator.execute_round(ctx).await;
    assert_eq!(ctx.stage, Stage::AuthorAndRefineDocuments);
    let planned = ctx.scratch.document_plans.len();
    assert!(planned >= 1);

    let ctx = orchestrator.run_to_completion(ctx, &store).await.unwrap();
    assert_eq!(ctx.stage, Stage::Done);
    assert_eq!(ctx.scratch.approved_documents.len(), planned);
    assert!(ctx.round <= config.workflow.max_rounds);

    let saved = store.load(&ctx.session_id).await.unwrap();
    assert_eq!(saved.status, SessionStatus::Completed);
    assert_eq!(saved.context.scratch.approved_documents.len(), planned);

    let plan = DevelopmentPlan::from_context(&ctx);
    let written = DiskOutlet::new(&config.output_path).save(&plan).await.unwrap();
    assert_eq!(written.len(), planned + 1);
    let index = std::fs::read_to_string(config.output_path.join("build_a_todo_app").join("index.md")).unwrap();
    assert!(index.contains("01_complete_implementation_guide.md"));
}

#[tokio::test]
async fn test_session_list_and_delete_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let generator = GeneratorContext::with_agents(
        config.clone(),
        Arc::new(StubbornPlanner),
        Arc::new(CompleteWriter),
        Arc::new(FixedSearch),
    );
    let orchestrator = WorkflowOrchestrator::new(generator);
    let store = FileSnapshotStore::new(&config.session.dir);

    let ctx = orchestrator.start_session("build a todo app");
    let ctx = orchestrator.run_to_completion(ctx, &store).await.unwrap();

    let sessions = store.list().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, ctx.session_id);
    assert_eq!(sessions[0].query, "build a todo app");
    assert_eq!(sessions[0].stage, Stage::Done);

    let restored = store.load(&ctx.session_id).await.unwrap().into_context();
    assert_eq!(restored.messages.len(), ctx.messages.len());

    assert!(store.delete(&ctx.session_id).await.unwrap());
    assert!(store.list().await.unwrap().is_empty());
}
