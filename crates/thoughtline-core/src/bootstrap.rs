//! Dependency wiring.
//!
//! [`PipelineBuilder`] turns a [`PipelineConfig`] plus optional collaborator
//! overrides into a ready [`PipelineController`] (or just the
//! [`ComplexityRouter`], which needs no language model unless the LLM
//! strategy is enabled).
//!
//! Defaults: a [`HashEmbedder`] of the configured dimension, in-process
//! example memories, file-backed stores when `data_dir` is set (in-memory
//! otherwise), a static tool catalog from `tools`, and the dry-run invoker.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = PipelineBuilder::new(config)
//!     .with_llm(Arc::new(OpenAiCompatModel::new(&config.llm)))
//!     .build()?;
//! let outcome = controller.run("Show me all facilities").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use thoughtline_llm::{InvokeConfig, LanguageModel};
use thoughtline_types::config::PipelineConfig;
use thoughtline_types::{PipelineError, Result};
use tracing::{debug, info};

use crate::complexity::ComplexityRouter;
use crate::embeddings::Embedder;
use crate::embeddings::hash_embedder::HashEmbedder;
use crate::memory::ExampleMemories;
use crate::pipeline::{PipelineController, Stages};
use crate::stages::{
    CriticStage, ExecutorStage, MetaStage, PlannerStage, StageEnv, SummaryStage, ThoughtStage,
};
use crate::store::{OutputStores, RequestContextStore, file_backed_contexts};
use crate::tools::{DryRunInvoker, StaticToolCatalog, ToolCatalog, ToolInvoker};

/// Builder for a fully wired pipeline.
pub struct PipelineBuilder {
    config: PipelineConfig,
    llm: Option<Arc<dyn LanguageModel>>,
    embedder: Option<Arc<dyn Embedder>>,
    memories: Option<ExampleMemories>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    stores: Option<(RequestContextStore, OutputStores)>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            llm: None,
            embedder: None,
            memories: None,
            catalog: None,
            invoker: None,
            stores: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use pre-populated example memories (they carry their own embedder).
    pub fn with_memories(mut self, memories: ExampleMemories) -> Self {
        self.memories = Some(memories);
        self
    }

    pub fn with_tool_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_tool_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_stores(mut self, contexts: RequestContextStore, outputs: OutputStores) -> Self {
        self.stores = Some((contexts, outputs));
        self
    }

    fn resolve_stores(&mut self) -> (RequestContextStore, OutputStores) {
        if let Some(stores) = self.stores.take() {
            return stores;
        }
        match self.config.data_dir {
            Some(ref dir) => {
                debug!(dir = %dir.display(), "using file-backed stores");
                (file_backed_contexts(dir), OutputStores::file_backed(dir))
            }
            None => (RequestContextStore::in_memory(), OutputStores::in_memory()),
        }
    }

    fn resolve_memories(&mut self) -> ExampleMemories {
        if let Some(memories) = self.memories.take() {
            return memories;
        }
        let embedder = self
            .embedder
            .take()
            .unwrap_or_else(|| Arc::new(HashEmbedder::new(self.config.embedding.dimension)));
        ExampleMemories::in_memory(embedder)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_secs)
    }

    fn router_from(
        &self,
        memories: &ExampleMemories,
        contexts: RequestContextStore,
        outputs: &OutputStores,
    ) -> ComplexityRouter {
        let router = ComplexityRouter::new(
            self.config.complexity.clone(),
            memories.complexity.clone(),
            contexts,
            outputs.complexity.clone(),
        );
        match self.llm {
            Some(ref llm) => router.with_llm(
                llm.clone(),
                InvokeConfig::from_config(&self.config.llm),
                self.timeout(),
            ),
            None => router,
        }
    }

    /// Build only the complexity router.
    pub fn build_router(mut self) -> Result<ComplexityRouter> {
        self.config.validate()?;
        let (contexts, outputs) = self.resolve_stores();
        let memories = self.resolve_memories();
        Ok(self.router_from(&memories, contexts, &outputs))
    }

    /// Build the controller. A language model is required.
    pub fn build(mut self) -> Result<PipelineController> {
        self.config.validate()?;
        let llm = self.llm.clone().ok_or_else(|| PipelineError::ConfigInvalid {
            reason: "no language model configured".into(),
        })?;
        let (contexts, outputs) = self.resolve_stores();
        let memories = self.resolve_memories();
        let catalog = self
            .catalog
            .take()
            .unwrap_or_else(|| Arc::new(StaticToolCatalog::new(self.config.tools.clone())));
        let invoker = self
            .invoker
            .take()
            .unwrap_or_else(|| Arc::new(DryRunInvoker));

        let env = Arc::new(StageEnv::new(
            contexts.clone(),
            outputs.clone(),
            llm.clone(),
            InvokeConfig::from_config(&self.config.llm),
            self.timeout(),
        ));
        let config = &self.config;
        let stages = Stages {
            thought: ThoughtStage::new(
                env.clone(),
                memories.thought.clone(),
                config.retrieval.clone(),
                config.limits.max_reasoning_passes,
            ),
            planner: PlannerStage::new(
                env.clone(),
                memories.plan.clone(),
                config.retrieval.clone(),
                catalog.clone(),
            ),
            critic: CriticStage::new(env.clone(), catalog.clone()),
            meta: MetaStage::new(env.clone(), config.meta.clone()),
            executor: ExecutorStage::new(env.clone(), catalog, invoker),
            summary: SummaryStage::new(env),
        };
        let router = self.router_from(&memories, contexts.clone(), &outputs);

        info!(
            model = llm.name(),
            tools = self.config.tools.len(),
            file_backed = self.config.data_dir.is_some(),
            "pipeline ready"
        );
        Ok(PipelineController::new(
            router,
            stages,
            contexts,
            outputs,
            self.config.limits.clone(),
        ))
    }
}
