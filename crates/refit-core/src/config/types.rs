use serde::Deserialize;
use refit_tools::ToolsConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_max_tool_iterations() -> usize {
    10
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Tool dispatch rounds allowed per turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    /// Replaces the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            llm_timeout_secs: default_llm_timeout_secs(),
            system_prompt: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3.1".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_refactor_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_refactor_temperature")]
    pub refactor_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            refactor_temperature: default_refactor_temperature(),
        }
    }
}

fn default_index_path() -> String {
    ".refit/index.db".into()
}

fn default_collection() -> String {
    "python_code".into()
}

fn default_top_k() -> usize {
    3
}

fn default_query_chars() -> usize {
    500
}

fn default_chunk_max_chars() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// `SQLite` file holding chunks and vectors, or `:memory:`.
    #[serde(default = "default_index_path")]
    pub path: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Exemplars retrieved per refactor.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Leading characters of the input used as the retrieval query.
    #[serde(default = "default_query_chars")]
    pub query_chars: usize,
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
            top_k: default_top_k(),
            query_chars: default_query_chars(),
            chunk_max_chars: default_chunk_max_chars(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

fn default_language() -> String {
    "python".into()
}

fn default_max_repositories() -> usize {
    5
}

fn default_max_files_per_repo() -> usize {
    200
}

fn default_max_file_bytes() -> u64 {
    200_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Upper bound on repositories per `index_repositories` call.
    #[serde(default = "default_max_repositories")]
    pub max_repositories: usize,
    #[serde(default = "default_max_files_per_repo")]
    pub max_files_per_repo: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            language: default_language(),
            max_repositories: default_max_repositories(),
            max_files_per_repo: default_max_files_per_repo(),
            max_file_bytes: default_max_file_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryConfig {
    /// Session database; sessions are process-local when unset.
    #[serde(default)]
    pub sqlite_path: Option<String>,
}
