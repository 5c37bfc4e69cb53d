//! 研究上下文：贯穿所有阶段的唯一可变聚合

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::search::SearchResult;

/// 流水线阶段，只前进不后退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PlanResearch,
    RunSearches,
    AnalyzeResults,
    PlanDocuments,
    AuthorAndRefineDocuments,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::PlanResearch => "plan_research",
            Stage::RunSearches => "run_searches",
            Stage::AnalyzeResults => "analyze_results",
            Stage::PlanDocuments => "plan_documents",
            Stage::AuthorAndRefineDocuments => "author_and_refine_documents",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// 消息的产生者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorRole {
    Planner,
    Writer,
    System,
}

impl std::fmt::Display for GeneratorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorRole::Planner => write!(f, "planner"),
            GeneratorRole::Writer => write!(f, "writer"),
            GeneratorRole::System => write!(f, "system"),
        }
    }
}

/// 追加式消息记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: GeneratorRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: GeneratorRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// 搜索结果的两个桶
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// 初始的广泛检索
    pub broad: Vec<SearchResult>,
    /// 评审阶段触发的定向检索
    pub targeted: Vec<SearchResult>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.broad.len() + self.targeted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchResult> {
        self.broad.iter().chain(self.targeted.iter())
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.iter().any(|r| r.url == url)
    }
}

/// 带来源标记的洞察
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// 文档分类，决定索引中的分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Architecture,
    Implementation,
    Operations,
    Api,
    General,
}

impl DocumentCategory {
    pub fn from_title(title: &str) -> Self {
        let lower = title.to_lowercase();
        if lower.contains("architecture") {
            DocumentCategory::Architecture
        } else if ["security", "testing", "operations"]
            .iter()
            .any(|k| lower.contains(k))
        {
            DocumentCategory::Operations
        } else if lower.contains("api") {
            DocumentCategory::Api
        } else if lower.contains("implementation") || lower.contains("step") {
            DocumentCategory::Implementation
        } else {
            DocumentCategory::General
        }
    }
}

impl std::fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DocumentCategory::Architecture => "architecture",
            DocumentCategory::Implementation => "implementation",
            DocumentCategory::Operations => "operations",
            DocumentCategory::Api => "api",
            DocumentCategory::General => "general",
        };
        f.write_str(name)
    }
}

/// 文档规划：大纲与按标题压缩的研究摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub number: usize,
    pub title: String,
    pub outline: String,
    pub research_summary: String,
    pub filename: String,
    pub category: DocumentCategory,
}

/// 正在撰写或已通过的文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    pub outline: String,
    pub revision_round: u32,
}

/// 阶段间的工作数据
///
/// 各字段的去留：
/// - `research_queries`：plan_research 写入，run_searches 消费；之后丢失无影响
/// - `research_analysis`：analyze_results 写入，plan_documents 与评审都会读取，必须保留
/// - `document_plans`：plan_documents 写入，撰写循环逐篇消费，必须保留
/// - `current_doc_index`、`pending`：撰写循环的游标，恢复会话时依赖它们续写
/// - `approved_documents`：最终产出，必须保留
/// - `last_review`：最近一次评审意见，丢失时下一次修订按无意见处理
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scratch {
    #[serde(default)]
    pub research_queries: Vec<String>,
    #[serde(default)]
    pub research_analysis: Option<String>,
    #[serde(default)]
    pub document_plans: Vec<DocumentPlan>,
    #[serde(default)]
    pub current_doc_index: usize,
    #[serde(default)]
    pub pending: Option<Document>,
    #[serde(default)]
    pub approved_documents: Vec<Document>,
    #[serde(default)]
    pub last_review: Option<String>,
}

/// 研究上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub session_id: String,
    pub prompt: String,
    pub stage: Stage,
    pub round: u32,
    /// 消息单独持久化，加载快照时重新挂回
    #[serde(skip)]
    pub messages: Vec<Message>,
    pub search_results: SearchResults,
    pub insights: Vec<Insight>,
    pub scratch: Scratch,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchContext {
    pub fn new(prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            stage: Stage::PlanResearch,
            round: 0,
            messages: Vec::new(),
            search_results: SearchResults::default(),
            insights: Vec::new(),
            scratch: Scratch::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn push_message(&mut self, role: GeneratorRole, text: impl Into<String>) {
        self.messages.push(Message::new(role, text));
    }

    /// 按 URL 去重后并入指定桶，返回新增数量
    pub fn merge_search_results(&mut self, results: Vec<SearchResult>, targeted: bool) -> usize {
        let mut added = 0;
        for result in results {
            if self.search_results.contains_url(&result.url) {
                continue;
            }
            if targeted {
                self.search_results.targeted.push(result);
            } else {
                self.search_results.broad.push(result);
            }
            added += 1;
        }
        added
    }

    pub fn add_insights(&mut self, texts: Vec<String>, source: &str) {
        let now = Utc::now();
        self.insights.extend(texts.into_iter().map(|text| Insight {
            text,
            source: source.to_string(),
            created_at: now,
        }));
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> SearchResult {
        SearchResult {
            title: format!("title {}", url),
            url: url.to_string(),
            snippet: String::new(),
            score: 0.5,
        }
    }

    #[test]
    fn test_new_context_starts_at_plan_research() {
        let ctx = ResearchContext::new("build a todo app");
        assert_eq!(ctx.stage, Stage::PlanResearch);
        assert_eq!(ctx.round, 0);
        assert!(!ctx.session_id.is_empty());
        assert!(ctx.messages.is_empty());
    }

    #[test]
    fn test_merge_dedupes_across_buckets() {
        let mut ctx = ResearchContext::new("p");
        assert_eq!(ctx.merge_search_results(vec![result("a"), result("b"), result("a")], false), 2);
        assert_eq!(ctx.merge_search_results(vec![result("b"), result("c")], true), 1);
        assert_eq!(ctx.search_results.broad.len(), 2);
        assert_eq!(ctx.search_results.targeted.len(), 1);
        assert_eq!(ctx.search_results.len(), 3);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::AuthorAndRefineDocuments).unwrap();
        assert_eq!(json, "\"author_and_refine_documents\"");
    }

    #[test]
    fn test_messages_are_not_serialized_with_context() {
        let mut ctx = ResearchContext::new("p");
        ctx.push_message(GeneratorRole::Planner, "hello");
        let value = serde_json::to_value(&ctx).unwrap();
        assert!(value.get("messages").is_none());
    }

    #[test]
    fn test_document_category_from_title() {
        assert_eq!(
            DocumentCategory::from_title("System Architecture & Implementation Guide"),
            DocumentCategory::Architecture
        );
        assert_eq!(
            DocumentCategory::from_title("Step-by-Step Implementation Guide"),
            DocumentCategory::Implementation
        );
        assert_eq!(
            DocumentCategory::from_title("Security, Testing & Operations Implementation"),
            DocumentCategory::Operations
        );
        assert_eq!(
            DocumentCategory::from_title("API Documentation & Integration Guide"),
            DocumentCategory::Api
        );
        assert_eq!(DocumentCategory::from_title("Notes"), DocumentCategory::General);
    }
}
