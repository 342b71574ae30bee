mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};
use refit_index::Lang;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the runtime cannot honor.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.max_tool_iterations == 0 {
            bail!("agent.max_tool_iterations must be at least 1");
        }
        if self.agent.llm_timeout_secs == 0 {
            bail!("agent.llm_timeout_secs must be at least 1");
        }
        if self.index.chunk_max_chars == 0 {
            bail!("index.chunk_max_chars must be at least 1");
        }
        if self.index.chunk_overlap >= self.index.chunk_max_chars {
            bail!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_max_chars ({})",
                self.index.chunk_overlap,
                self.index.chunk_max_chars
            );
        }
        if self.index.top_k == 0 {
            bail!("index.top_k must be at least 1");
        }
        if self.github.max_repositories == 0 {
            bail!("github.max_repositories must be at least 1");
        }
        if self.language().is_none() {
            bail!("github.language `{}` is not supported", self.github.language);
        }
        Ok(())
    }

    /// Source language indexed from repositories.
    #[must_use]
    pub fn language(&self) -> Option<Lang> {
        Lang::from_id(&self.github.language)
    }
}
