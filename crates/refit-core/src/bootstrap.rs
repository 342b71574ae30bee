//! Wiring from configuration to a running orchestrator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use refit_index::{
    ChunkSplitter, ChunkerConfig, CodeRetriever, CorpusIngestor, GitHubClient, GitHubConfig,
    IndexStoreConfig, LazyIndex, RepositoryDiscovery, RepositoryFetcher, RetrievalConfig,
};
use refit_llm::ollama::OllamaProvider;
use refit_llm::{LlmProvider, embed_fn};
use refit_memory::SessionStore;
use refit_tools::{
    CompositeExecutor, IndexRepositoriesExecutor, QualityExecutor, RefactorExecutor, ToolRegistry,
};

use crate::agent::Orchestrator;
use crate::config::Config;

/// The full tool set: ruff/pytest wrappers, then refactor, then repository indexing.
pub type RefitExecutor<P, D, F> = CompositeExecutor<
    QualityExecutor,
    CompositeExecutor<RefactorExecutor<P>, IndexRepositoriesExecutor<D, F>>,
>;

pub type RefitOrchestrator<P, D, F> = Orchestrator<P, RefitExecutor<P, D, F>>;

/// A wired orchestrator plus the shared index handle its tools use.
pub struct App<P: LlmProvider, D: RepositoryDiscovery, F: RepositoryFetcher> {
    pub orchestrator: RefitOrchestrator<P, D, F>,
    pub index: Arc<LazyIndex>,
}

/// Wire the tools, index, and sessions around `provider`.
///
/// Nothing touches the index here; it is opened on the first tool call that needs it.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn assemble<P, D, F>(
    config: &Config,
    provider: P,
    sessions: Arc<SessionStore>,
    discovery: D,
    fetcher: F,
) -> anyhow::Result<App<P, D, F>>
where
    P: LlmProvider + Clone + 'static,
    D: RepositoryDiscovery,
    F: RepositoryFetcher,
{
    config.validate()?;

    let index = Arc::new(LazyIndex::for_store(
        IndexStoreConfig {
            path: config.index.path.clone(),
            collection: config.index.collection.clone(),
        },
        embed_fn(provider.clone()),
    ));

    let retriever = CodeRetriever::new(
        Arc::clone(&index),
        RetrievalConfig {
            top_k: config.index.top_k,
            query_chars: config.index.query_chars,
            ..RetrievalConfig::default()
        },
    );
    let splitter = ChunkSplitter::new(ChunkerConfig {
        max_chars: config.index.chunk_max_chars,
        overlap: config.index.chunk_overlap,
    });
    let ingestor = CorpusIngestor::new(discovery, fetcher, splitter, Arc::clone(&index))
        .with_max_repositories(config.github.max_repositories);

    let llm_timeout = Duration::from_secs(config.agent.llm_timeout_secs);
    let refactor = RefactorExecutor::new(provider.clone(), retriever)
        .with_temperature(config.llm.refactor_temperature)
        .with_timeout(llm_timeout);
    let executor = CompositeExecutor::new(
        QualityExecutor::new(&config.tools),
        CompositeExecutor::new(refactor, IndexRepositoriesExecutor::new(ingestor)),
    );
    let registry = ToolRegistry::new(executor);
    tracing::debug!(
        tools = ?registry.tools().iter().map(|t| t.id).collect::<Vec<_>>(),
        "tool registry ready"
    );

    let mut orchestrator = Orchestrator::new(provider, registry, sessions)
        .with_max_tool_iterations(config.agent.max_tool_iterations)
        .with_llm_timeout(llm_timeout);
    if let Some(prompt) = &config.agent.system_prompt {
        orchestrator = orchestrator.with_system_prompt(prompt.as_str());
    }

    Ok(App {
        orchestrator,
        index,
    })
}

/// Build the production stack: Ollama for chat and embeddings, GitHub for repositories.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a client cannot be built,
/// or the session database cannot be opened.
pub async fn build_app(config: &Config) -> anyhow::Result<App<OllamaProvider, GitHubClient, GitHubClient>> {
    config.validate()?;

    let provider = OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    )
    .context("failed to create Ollama provider")?;

    let language = config
        .language()
        .with_context(|| format!("unsupported language `{}`", config.github.language))?;
    let github = GitHubClient::new(GitHubConfig {
        api_url: config.github.api_url.clone(),
        token: config.github.token.clone(),
        language,
        max_files_per_repo: config.github.max_files_per_repo,
        max_file_bytes: config.github.max_file_bytes,
        timeout: Duration::from_secs(config.github.request_timeout_secs),
    })
    .context("failed to create GitHub client")?;
    if config.github.token.is_none() {
        tracing::info!("no GitHub token configured, repository search is rate-limited");
    }

    let sessions = match &config.memory.sqlite_path {
        Some(path) => {
            tracing::info!(path, "persisting sessions to SQLite");
            SessionStore::open(path)
                .await
                .context("failed to open session database")?
        }
        None => SessionStore::in_memory(),
    };

    tracing::info!(
        model = %config.llm.model,
        embedding_model = %config.llm.embedding_model,
        index = %config.index.path,
        "refit configured"
    );
    assemble(config, provider, Arc::new(sessions), github.clone(), github)
}
