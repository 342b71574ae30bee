//! `index_repositories` tool: grows the retrieval corpus from popular repositories.

use refit_index::ingest::DEFAULT_REPOSITORIES;
use refit_index::{CorpusIngestor, IndexError, IngestReport, RepositoryDiscovery, RepositoryFetcher};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::executor::{ToolCall, ToolError, ToolExecutor, ToolOutput, deserialize_params};
use crate::registry::ToolDef;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IndexRepositoriesParams {
    /// Search terms describing the kind of repositories to find (e.g. "data validation", "CLI tools")
    pub query: String,
    /// Number of top-starred repositories to index (default: 3, capped by configuration)
    #[serde(default)]
    pub max_repos: Option<usize>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct IndexedRepository {
    pub repository: String,
    pub stars: u64,
    pub file_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct IndexingResult {
    pub query: String,
    pub indexed: Vec<IndexedRepository>,
    /// `owner/name: error` for each skipped repository.
    pub skipped: Vec<String>,
}

impl From<&IngestReport> for IndexingResult {
    fn from(report: &IngestReport) -> Self {
        Self {
            query: report.query.clone(),
            indexed: report
                .repositories
                .iter()
                .map(|r| IndexedRepository {
                    repository: r.repository.clone(),
                    stars: r.stars,
                    file_count: r.file_count,
                    chunk_count: r.chunk_count,
                })
                .collect(),
            skipped: report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.repository, f.error))
                .collect(),
        }
    }
}

pub struct IndexRepositoriesExecutor<D, F> {
    ingestor: CorpusIngestor<D, F>,
}

impl<D: RepositoryDiscovery, F: RepositoryFetcher> IndexRepositoriesExecutor<D, F> {
    #[must_use]
    pub fn new(ingestor: CorpusIngestor<D, F>) -> Self {
        Self { ingestor }
    }
}

impl<D: RepositoryDiscovery, F: RepositoryFetcher> ToolExecutor for IndexRepositoriesExecutor<D, F> {
    fn tool_definitions(&self) -> Vec<ToolDef> {
        vec![ToolDef {
            id: "index_repositories",
            description: "Search GitHub for popular Python repositories matching a query and index \
                          their source code so it can be used as context during refactoring",
            schema: schemars::schema_for!(IndexRepositoriesParams),
            result_schema: schemars::schema_for!(IndexingResult),
        }]
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> Result<Option<ToolOutput>, ToolError> {
        if call.tool_id != "index_repositories" {
            return Ok(None);
        }
        let params: IndexRepositoriesParams = deserialize_params(&call.params)?;
        let query = params.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidParams {
                message: "`query` must not be empty".into(),
            });
        }

        let max = params.max_repos.unwrap_or(DEFAULT_REPOSITORIES);
        let report = self.ingestor.ingest(query, max).await.map_err(|e| match e {
            IndexError::Unavailable(msg) => ToolError::IndexUnavailable(msg),
            other => ToolError::Execution(other.to_string()),
        })?;
        Ok(Some(
            ToolOutput::text("index_repositories", report.to_string())
                .with_data(&IndexingResult::from(&report)),
        ))
    }
}
