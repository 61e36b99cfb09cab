//! Persistence for request contexts and stage outputs.
//!
//! - [`document`] -- the keyed document boundary with in-memory and file
//!   backends
//! - [`context`] -- [`RequestContextStore`]
//! - [`versioned`] -- [`VersionedStore`], one per stage output type
//!
//! [`OutputStores`] bundles the seven versioned stores a pipeline writes to.

pub mod context;
pub mod document;
pub mod versioned;

use std::path::Path;
use std::sync::Arc;

use thoughtline_types::Result;
use thoughtline_types::context::{RequestContext, StageName};
use thoughtline_types::output::{
    ComplexityAssessment, Critique, Execution, MetaAssessment, Plan, StageOutput, Summary, Thought,
    VersionedRecord,
};

pub use context::RequestContextStore;
pub use document::{DocumentStore, FileDocumentStore, InMemoryDocumentStore};
pub use versioned::{OutputFilter, VersionedStore};

/// One versioned store per stage.
#[derive(Clone)]
pub struct OutputStores {
    pub complexity: Arc<VersionedStore<ComplexityAssessment>>,
    pub thought: Arc<VersionedStore<Thought>>,
    pub plan: Arc<VersionedStore<Plan>>,
    pub critique: Arc<VersionedStore<Critique>>,
    pub meta: Arc<VersionedStore<MetaAssessment>>,
    pub execution: Arc<VersionedStore<Execution>>,
    pub summary: Arc<VersionedStore<Summary>>,
}

fn file_store<T: VersionedRecord>(root: &Path) -> Arc<VersionedStore<T>> {
    let dir = root.join("outputs").join(T::STAGE.as_str());
    Arc::new(VersionedStore::new(Arc::new(FileDocumentStore::<T>::new(dir))))
}

impl OutputStores {
    pub fn in_memory() -> Self {
        Self {
            complexity: Arc::new(VersionedStore::in_memory()),
            thought: Arc::new(VersionedStore::in_memory()),
            plan: Arc::new(VersionedStore::in_memory()),
            critique: Arc::new(VersionedStore::in_memory()),
            meta: Arc::new(VersionedStore::in_memory()),
            execution: Arc::new(VersionedStore::in_memory()),
            summary: Arc::new(VersionedStore::in_memory()),
        }
    }

    /// File-backed stores under `<root>/outputs/<stage-name>/`.
    pub fn file_backed(root: &Path) -> Self {
        Self {
            complexity: file_store(root),
            thought: file_store(root),
            plan: file_store(root),
            critique: file_store(root),
            meta: file_store(root),
            execution: file_store(root),
            summary: file_store(root),
        }
    }

    /// Every version of every stage output for `request_id`, in pipeline
    /// stage order, optionally restricted to one stage.
    pub async fn history(
        &self,
        request_id: &str,
        stage: Option<StageName>,
    ) -> Result<Vec<StageOutput>> {
        let wanted = |s: StageName| stage.is_none_or(|w| w == s);
        let mut out = Vec::new();
        if wanted(StageName::ComplexityDetector) {
            out.extend(
                self.complexity
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Complexity),
            );
        }
        if wanted(StageName::ThoughtAgent) {
            out.extend(
                self.thought
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Thought),
            );
        }
        if wanted(StageName::PlannerAgent) {
            out.extend(
                self.plan
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Plan),
            );
        }
        if wanted(StageName::CriticAgent) {
            out.extend(
                self.critique
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Critique),
            );
        }
        if wanted(StageName::MetaAgent) {
            out.extend(
                self.meta
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Meta),
            );
        }
        if wanted(StageName::ExecutorAgent) {
            out.extend(
                self.execution
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Execution),
            );
        }
        if wanted(StageName::SummaryAgent) {
            out.extend(
                self.summary
                    .get_all_versions_by_request_id(request_id)
                    .await?
                    .into_iter()
                    .map(StageOutput::Summary),
            );
        }
        Ok(out)
    }

    /// Empty every stage store.
    pub async fn clear(&self) -> Result<()> {
        self.complexity.clear().await?;
        self.thought.clear().await?;
        self.plan.clear().await?;
        self.critique.clear().await?;
        self.meta.clear().await?;
        self.execution.clear().await?;
        self.summary.clear().await
    }
}

/// Context store under `<root>/contexts/`.
pub fn file_backed_contexts(root: &Path) -> RequestContextStore {
    RequestContextStore::new(Arc::new(FileDocumentStore::<RequestContext>::new(
        root.join("contexts"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoughtline_types::output::{OutputMeta, Step};

    fn plan(ctx: &RequestContext) -> Plan {
        Plan {
            meta: OutputMeta::new(ctx),
            steps: vec![Step {
                order: 1,
                description: "d".into(),
                action: None,
                parameters: Default::default(),
            }],
            rationale: String::new(),
            thought_version: 1,
            revised_from_critique: None,
        }
    }

    #[tokio::test]
    async fn file_backed_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RequestContext::with_id("req-1", Some("q".into()));
        {
            let stores = OutputStores::file_backed(dir.path());
            stores.plan.save(plan(&ctx)).await.unwrap();
            stores.plan.save(plan(&ctx)).await.unwrap();
        }
        let reopened = OutputStores::file_backed(dir.path());
        let history = reopened.history("req-1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].meta().version, 2);
        assert!(dir.path().join("outputs/planner-agent").is_dir());

        let only_thoughts = reopened
            .history("req-1", Some(StageName::ThoughtAgent))
            .await
            .unwrap();
        assert!(only_thoughts.is_empty());
    }
}
