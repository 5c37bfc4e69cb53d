use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::generator::compose::document_filename;
use crate::generator::types::{DocumentCategory, ResearchContext};

/// 最终开发计划中的一篇文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedDocument {
    pub number: usize,
    pub title: String,
    pub filename: String,
    pub category: DocumentCategory,
    pub content: String,
    pub revision_rounds: u32,
    /// 未完成收敛、从待定文档中带出的草稿
    pub draft: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub rounds: u32,
    pub searches: usize,
    pub insights: usize,
    pub messages: usize,
}

/// 会话产出的开发计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentPlan {
    pub project_name: String,
    pub prompt: String,
    pub session_id: String,
    pub documents: Vec<PlannedDocument>,
    pub metrics: PlanMetrics,
    pub generated_at: DateTime<Utc>,
}

impl DevelopmentPlan {
    /// 从研究上下文汇总开发计划
    ///
    /// 已通过的文档按顺序输出；达到轮次上限时仍在修订的文档作为草稿附在最后。
    pub fn from_context(context: &ResearchContext) -> Self {
        let plans = &context.scratch.document_plans;
        let mut documents: Vec<PlannedDocument> = context
            .scratch
            .approved_documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let plan = plans.get(i).filter(|plan| plan.title == doc.title);
                PlannedDocument {
                    number: i + 1,
                    title: doc.title.clone(),
                    filename: plan
                        .map(|plan| plan.filename.clone())
                        .unwrap_or_else(|| document_filename(i + 1, &doc.title)),
                    category: plan
                        .map(|plan| plan.category)
                        .unwrap_or_else(|| DocumentCategory::from_title(&doc.title)),
                    content: doc.content.clone(),
                    revision_rounds: doc.revision_round,
                    draft: false,
                }
            })
            .collect();

        if let Some(pending) = context
            .scratch
            .pending
            .as_ref()
            .filter(|doc| !doc.content.trim().is_empty())
        {
            let number = documents.len() + 1;
            documents.push(PlannedDocument {
                number,
                title: pending.title.clone(),
                filename: document_filename(number, &pending.title),
                category: DocumentCategory::from_title(&pending.title),
                content: pending.content.clone(),
                revision_rounds: pending.revision_round,
                draft: true,
            });
        }

        Self {
            project_name: project_name(&context.prompt),
            prompt: context.prompt.clone(),
            session_id: context.session_id.clone(),
            documents,
            metrics: PlanMetrics {
                rounds: context.round,
                searches: context.search_results.len(),
                insights: context.insights.len(),
                messages: context.messages.len(),
            },
            generated_at: Utc::now(),
        }
    }

    /// 索引页
    pub fn index_markdown(&self) -> String {
        let mut lines = vec![
            format!("# Development Plan: {}", self.project_name),
            String::new(),
            format!("> {}", self.prompt.trim()),
            String::new(),
            format!("- Session: `{}`", self.session_id),
            format!("- Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
            format!(
                "- Research: {} sources, {} insights, {} rounds",
                self.metrics.searches, self.metrics.insights, self.metrics.rounds
            ),
            String::new(),
            "## Documents".to_string(),
            String::new(),
        ];
        if self.documents.is_empty() {
            lines.push("No documents were produced.".to_string());
        }
        for doc in &self.documents {
            let draft = if doc.draft { " (draft)" } else { "" };
            lines.push(format!(
                "{}. [{}]({}) - {}{}",
                doc.number, doc.title, doc.filename, doc.category, draft
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

/// 项目名：取需求前 5 个词，只保留字母数字
pub fn project_name(prompt: &str) -> String {
    let name = prompt
        .split_whitespace()
        .take(5)
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let name: String = name.chars().take(50).collect();
    if name.is_empty() {
        "project".to_string()
    } else {
        name
    }
}

pub trait Outlet {
    async fn save(&self, plan: &DevelopmentPlan) -> Result<Vec<PathBuf>>;
}

/// 写入本地目录
pub struct DiskOutlet {
    output_path: PathBuf,
}

impl DiskOutlet {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl Outlet for DiskOutlet {
    async fn save(&self, plan: &DevelopmentPlan) -> Result<Vec<PathBuf>> {
        info!(documents = plan.documents.len(), "🖊️ 文档存储中...");
        let output_dir = self.output_path.join(&plan.project_name);
        fs::create_dir_all(&output_dir).await?;

        let mut written = Vec::with_capacity(plan.documents.len() + 1);
        for doc in &plan.documents {
            if doc.content.trim().is_empty() {
                warn!(doc = %doc.title, "⚠️ 文档内容为空，跳过");
                continue;
            }
            let path = output_dir.join(&doc.filename);
            fs::write(&path, &doc.content).await?;
            info!(path = %path.display(), "💾 已保存文档");
            written.push(path);
        }

        let index_path = output_dir.join("index.md");
        fs::write(&index_path, plan.index_markdown()).await?;
        written.push(index_path);

        info!(dir = %output_dir.display(), "💾 文档保存完成");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::types::{Document, DocumentPlan};

    fn context_with_documents() -> ResearchContext {
        let mut ctx = ResearchContext::new("Build a todo app, with sync!");
        ctx.scratch.document_plans = vec![DocumentPlan {
            number: 1,
            title: "Complete Implementation Guide".to_string(),
            outline: String::new(),
            research_summary: String::new(),
            filename: "01_complete_implementation_guide.md".to_string(),
            category: DocumentCategory::Implementation,
        }];
        ctx.scratch.approved_documents = vec![Document {
            title: "Complete Implementation Guide".to_string(),
            content: "# Guide\n\nDone.".to_string(),
            outline: String::new(),
            revision_round: 2,
        }];
        ctx.scratch.pending = Some(Document {
            title: "API Documentation & Integration Guide".to_string(),
            content: "# API\n\nDraft.".to_string(),
            outline: String::new(),
            revision_round: 3,
        });
        ctx
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name("Build a todo app, with sync!"), "Build_a_todo_app_with");
        assert_eq!(project_name("  !!! "), "project");
        assert_eq!(project_name(&"x".repeat(80)).len(), 50);
    }

    #[test]
    fn test_plan_includes_pending_draft() {
        let plan = DevelopmentPlan::from_context(&context_with_documents());
        assert_eq!(plan.documents.len(), 2);
        assert_eq!(plan.documents[0].filename, "01_complete_implementation_guide.md");
        assert!(!plan.documents[0].draft);
        assert_eq!(plan.documents[1].filename, "02_api_documentation_integration_guide.md");
        assert!(plan.documents[1].draft);
        assert!(plan.index_markdown().contains("2. [API Documentation & Integration Guide](02_api_documentation_integration_guide.md) - api (draft)"));
    }

    #[tokio::test]
    async fn test_disk_outlet_writes_documents_and_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let plan = DevelopmentPlan::from_context(&context_with_documents());
        let outlet = DiskOutlet::new(dir.path());

        let written = outlet.save(&plan).await.unwrap();
        assert_eq!(written.len(), 3);

        let project_dir = dir.path().join("Build_a_todo_app_with");
        let guide = std::fs::read_to_string(project_dir.join("01_complete_implementation_guide.md")).unwrap();
        assert_eq!(guide, "# Guide\n\nDone.");
        let index = std::fs::read_to_string(project_dir.join("index.md")).unwrap();
        assert!(index.starts_with("# Development Plan: Build_a_todo_app_with"));
    }
}
