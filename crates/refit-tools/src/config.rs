use serde::Deserialize;

fn default_timeout() -> u64 {
    60
}

fn default_ruff_path() -> String {
    "ruff".into()
}

fn default_pytest_path() -> String {
    "pytest".into()
}

/// External code-quality tool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Wall-clock limit for each external process, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_ruff_path")]
    pub ruff_path: String,
    #[serde(default = "default_pytest_path")]
    pub pytest_path: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            ruff_path: default_ruff_path(),
            pytest_path: default_pytest_path(),
        }
    }
}
