use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 13] = [
    "REFIT_AGENT_MAX_TOOL_ITERATIONS",
    "REFIT_TIMEOUT_LLM",
    "REFIT_LLM_BASE_URL",
    "REFIT_LLM_MODEL",
    "REFIT_LLM_EMBEDDING_MODEL",
    "REFIT_INDEX_PATH",
    "REFIT_INDEX_TOP_K",
    "REFIT_GITHUB_API_URL",
    "GITHUB_ACCESS_TOKEN",
    "REFIT_TOOLS_TIMEOUT",
    "REFIT_RUFF_PATH",
    "REFIT_PYTEST_PATH",
    "REFIT_SQLITE_PATH",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.agent.max_tool_iterations, 10);
    assert_eq!(config.agent.llm_timeout_secs, 120);
    assert!(config.agent.system_prompt.is_none());
    assert_eq!(config.llm.base_url, "http://localhost:11434");
    assert_eq!(config.llm.model, "llama3.1");
    assert!((config.llm.refactor_temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(config.index.collection, "python_code");
    assert_eq!(config.index.top_k, 3);
    assert_eq!(config.index.query_chars, 500);
    assert_eq!(config.index.chunk_max_chars, 1000);
    assert_eq!(config.index.chunk_overlap, 100);
    assert_eq!(config.github.max_repositories, 5);
    assert!(config.github.token.is_none());
    assert_eq!(config.tools.timeout, 60);
    assert!(config.memory.sqlite_path.is_none());
    config.validate().unwrap();
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.llm.model, "llama3.1");
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refit.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[agent]
max_tool_iterations = 4
system_prompt = "Be brief."

[llm]
model = "qwen2.5-coder"

[index]
path = "/tmp/refit-test/index.db"
top_k = 5

[github]
max_repositories = 2

[tools]
ruff_path = "/usr/local/bin/ruff"

[memory]
sqlite_path = "./sessions.db"
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.agent.max_tool_iterations, 4);
    assert_eq!(config.agent.system_prompt.as_deref(), Some("Be brief."));
    assert_eq!(config.llm.model, "qwen2.5-coder");
    assert_eq!(config.llm.base_url, "http://localhost:11434");
    assert_eq!(config.index.path, "/tmp/refit-test/index.db");
    assert_eq!(config.index.top_k, 5);
    assert_eq!(config.index.chunk_max_chars, 1000);
    assert_eq!(config.github.max_repositories, 2);
    assert_eq!(config.tools.ruff_path, "/usr/local/bin/ruff");
    assert_eq!(config.tools.pytest_path, "pytest");
    assert_eq!(config.memory.sqlite_path.as_deref(), Some("./sessions.db"));
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[agent\nmax_tool_iterations = ").unwrap();
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refit.toml");
    std::fs::write(&path, "[llm]\nmodel = \"from-file\"\n").unwrap();

    clear_env();
    unsafe {
        std::env::set_var("REFIT_LLM_MODEL", "from-env");
        std::env::set_var("REFIT_AGENT_MAX_TOOL_ITERATIONS", "7");
        std::env::set_var("REFIT_INDEX_TOP_K", "not-a-number");
        std::env::set_var("GITHUB_ACCESS_TOKEN", "ghp_test");
        std::env::set_var("REFIT_SQLITE_PATH", "/tmp/s.db");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.llm.model, "from-env");
    assert_eq!(config.agent.max_tool_iterations, 7);
    assert_eq!(config.index.top_k, 3, "unparsable override is ignored");
    assert_eq!(config.github.token.as_deref(), Some("ghp_test"));
    assert_eq!(config.memory.sqlite_path.as_deref(), Some("/tmp/s.db"));
}

#[test]
#[serial]
fn blank_token_env_is_ignored() {
    clear_env();
    unsafe { std::env::set_var("GITHUB_ACCESS_TOKEN", "  ") };
    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();
    assert!(config.github.token.is_none());
}

#[test]
fn validate_rejects_zero_iteration_cap() {
    let mut config = Config::default();
    config.agent.max_tool_iterations = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("max_tool_iterations"));
}

#[test]
fn validate_rejects_overlap_not_below_max() {
    let mut config = Config::default();
    config.index.chunk_overlap = config.index.chunk_max_chars;
    assert!(config.validate().is_err());
    config.index.chunk_max_chars = 0;
    config.index.chunk_overlap = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_top_k() {
    let mut config = Config::default();
    config.index.top_k = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_unknown_language() {
    let mut config = Config::default();
    config.github.language = "cobol".into();
    assert!(config.validate().is_err());
    config.github.language = "rust".into();
    assert_eq!(config.language(), Some(Lang::Rust));
}
