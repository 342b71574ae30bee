use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REFIT_AGENT_MAX_TOOL_ITERATIONS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.agent.max_tool_iterations = n;
        }
        if let Ok(v) = std::env::var("REFIT_TIMEOUT_LLM")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.agent.llm_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("REFIT_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("REFIT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("REFIT_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("REFIT_INDEX_PATH") {
            self.index.path = v;
        }
        if let Ok(v) = std::env::var("REFIT_INDEX_TOP_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.index.top_k = k;
        }
        if let Ok(v) = std::env::var("REFIT_GITHUB_API_URL") {
            self.github.api_url = v;
        }
        if let Ok(v) = std::env::var("GITHUB_ACCESS_TOKEN")
            && !v.trim().is_empty()
        {
            self.github.token = Some(v);
        }
        if let Ok(v) = std::env::var("REFIT_TOOLS_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.tools.timeout = secs;
        }
        if let Ok(v) = std::env::var("REFIT_RUFF_PATH") {
            self.tools.ruff_path = v;
        }
        if let Ok(v) = std::env::var("REFIT_PYTEST_PATH") {
            self.tools.pytest_path = v;
        }
        if let Ok(v) = std::env::var("REFIT_SQLITE_PATH") {
            self.memory.sqlite_path = Some(v);
        }
    }
}
