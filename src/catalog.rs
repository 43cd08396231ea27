use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::types::IntentCategory;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// One executable tool in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: IntentCategory,
    pub capabilities: Vec<String>,
    pub skill_level: SkillLevel,
    /// Workflow stages this tool is declared compatible with.
    pub stages: Vec<String>,
    /// Short labels for client-side quick actions.
    pub quick_actions: Vec<String>,
}

/// External catalog boundary. Unavailability is an explicit error, never an
/// empty result.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ToolSpec>>;
    async fn by_category(&self, category: IntentCategory) -> Result<Vec<ToolSpec>>;
    async fn by_capabilities(&self, capabilities: &[String]) -> Result<Vec<ToolSpec>>;
    async fn all(&self) -> Result<Vec<ToolSpec>>;
}

/// In-memory catalog used for local serving and tests.
pub struct StaticCatalog {
    tools: Vec<ToolSpec>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_default_tools() -> Self {
        let mut c = Self::new();
        c.register(ToolSpec {
            id: "csv-analyzer".into(),
            name: "CSV Analyzer".into(),
            description: "Profile and summarize tabular data files".into(),
            category: IntentCategory::AnalysisReporting,
            capabilities: vec!["analyze".into(), "transform".into()],
            skill_level: SkillLevel::Beginner,
            stages: vec!["collect".into(), "analyze".into()],
            quick_actions: vec!["Analyze file".into(), "Preview columns".into()],
        });
        c.register(ToolSpec {
            id: "report-builder".into(),
            name: "Report Builder".into(),
            description: "Generate formatted summary reports from analyzed data".into(),
            category: IntentCategory::AnalysisReporting,
            capabilities: vec!["report".into(), "execute".into()],
            skill_level: SkillLevel::Beginner,
            stages: vec!["analyze".into(), "report".into()],
            quick_actions: vec!["Create report".into()],
        });
        c.register(ToolSpec {
            id: "task-runner".into(),
            name: "Task Runner".into(),
            description: "Execute one-off automation tasks".into(),
            category: IntentCategory::TaskExecution,
            capabilities: vec!["execute".into(), "transform".into()],
            skill_level: SkillLevel::Intermediate,
            stages: vec!["execute".into()],
            quick_actions: vec!["Run task".into()],
        });
        c.register(ToolSpec {
            id: "data-importer".into(),
            name: "Data Importer".into(),
            description: "Pull external data into the workspace".into(),
            category: IntentCategory::TaskExecution,
            capabilities: vec!["retrieve".into(), "transform".into()],
            skill_level: SkillLevel::Beginner,
            stages: vec!["collect".into()],
            quick_actions: vec!["Import data".into()],
        });
        c.register(ToolSpec {
            id: "workspace-search".into(),
            name: "Workspace Search".into(),
            description: "Search documents and data across the workspace".into(),
            category: IntentCategory::InformationSeeking,
            capabilities: vec!["search".into(), "retrieve".into()],
            skill_level: SkillLevel::Beginner,
            stages: vec!["collect".into(), "analyze".into()],
            quick_actions: vec!["Search".into()],
        });
        c.register(ToolSpec {
            id: "diagnostics".into(),
            name: "Diagnostics".into(),
            description: "Inspect failing runs and surface likely causes".into(),
            category: IntentCategory::Troubleshooting,
            capabilities: vec!["diagnose".into(), "repair".into()],
            skill_level: SkillLevel::Advanced,
            stages: vec!["execute".into(), "review".into()],
            quick_actions: vec!["Run diagnostics".into()],
        });
        c.register(ToolSpec {
            id: "integration-setup".into(),
            name: "Integration Setup".into(),
            description: "Connect and configure external services".into(),
            category: IntentCategory::Configuration,
            capabilities: vec!["configure".into()],
            skill_level: SkillLevel::Intermediate,
            stages: vec!["collect".into()],
            quick_actions: vec!["Configure".into()],
        });
        c.register(ToolSpec {
            id: "share-center".into(),
            name: "Share Center".into(),
            description: "Share results with teammates and collect review".into(),
            category: IntentCategory::Collaboration,
            capabilities: vec!["share".into(), "notify".into()],
            skill_level: SkillLevel::Beginner,
            stages: vec!["report".into(), "review".into()],
            quick_actions: vec!["Share".into(), "Request review".into()],
        });
        c
    }

    pub fn register(&mut self, tool: ToolSpec) {
        self.tools.push(tool);
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::with_default_tools()
    }
}

#[async_trait]
impl ToolCatalog for StaticCatalog {
    async fn get(&self, id: &str) -> Result<Option<ToolSpec>> {
        Ok(self.tools.iter().find(|t| t.id == id).cloned())
    }

    async fn by_category(&self, category: IntentCategory) -> Result<Vec<ToolSpec>> {
        Ok(self
            .tools
            .iter()
            .filter(|t| t.category == category)
            .cloned()
            .collect())
    }

    async fn by_capabilities(&self, capabilities: &[String]) -> Result<Vec<ToolSpec>> {
        Ok(self
            .tools
            .iter()
            .filter(|t| capabilities.iter().any(|c| t.capabilities.contains(c)))
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<ToolSpec>> {
        Ok(self.tools.clone())
    }
}

/// Catalog stub that is always down; exercises the explicit-error path.
pub struct UnavailableCatalog;

#[async_trait]
impl ToolCatalog for UnavailableCatalog {
    async fn get(&self, _id: &str) -> Result<Option<ToolSpec>> {
        Err(ServiceError::CatalogUnavailable("catalog offline".into()))
    }

    async fn by_category(&self, _category: IntentCategory) -> Result<Vec<ToolSpec>> {
        Err(ServiceError::CatalogUnavailable("catalog offline".into()))
    }

    async fn by_capabilities(&self, _capabilities: &[String]) -> Result<Vec<ToolSpec>> {
        Err(ServiceError::CatalogUnavailable("catalog offline".into()))
    }

    async fn all(&self) -> Result<Vec<ToolSpec>> {
        Err(ServiceError::CatalogUnavailable("catalog offline".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_catalog_lookup_by_id() {
        let c = StaticCatalog::with_default_tools();
        let t = c.get("csv-analyzer").await.unwrap().unwrap();
        assert_eq!(t.category, IntentCategory::AnalysisReporting);
    }

    #[tokio::test]
    async fn category_filter_returns_only_matches() {
        let c = StaticCatalog::with_default_tools();
        let tools = c.by_category(IntentCategory::Troubleshooting).await.unwrap();
        assert!(!tools.is_empty());
        assert!(tools.iter().all(|t| t.category == IntentCategory::Troubleshooting));
    }

    #[tokio::test]
    async fn capability_filter_matches_any() {
        let c = StaticCatalog::with_default_tools();
        let tools = c
            .by_capabilities(&["report".to_string(), "diagnose".to_string()])
            .await
            .unwrap();
        assert!(tools.iter().any(|t| t.id == "report-builder"));
        assert!(tools.iter().any(|t| t.id == "diagnostics"));
    }

    #[tokio::test]
    async fn unavailable_catalog_is_an_error_not_empty() {
        let c = UnavailableCatalog;
        let err = c.all().await.unwrap_err();
        assert_eq!(err.code(), "catalog_unavailable");
    }
}
