//! `lint`, `format_code` and `run_tests`: thin wrappers over ruff and pytest.

use std::io::Write as _;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ToolsConfig;
use crate::executor::{ToolCall, ToolError, ToolExecutor, ToolOutput, deserialize_params};
use crate::process::run_process;
use crate::registry::ToolDef;

const STDIN_ARGS: [&str; 3] = ["--stdin-filename", "code.py", "-"];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeParams {
    /// The Python source code
    pub code: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TestParams {
    /// Self-contained, pytest-compatible Python test code
    pub test_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct LintViolation {
    pub code: String,
    pub message: String,
    pub row: u32,
    pub column: u32,
}

impl std::fmt::Display for LintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} {}: {}", self.row, self.column, self.code, self.message)
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LintReport {
    pub violations: Vec<LintViolation>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FormattedCode {
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct TestSummary {
    pub passed: u32,
    /// Failed tests plus collection or fixture errors.
    pub failed: u32,
    pub exit_code: i32,
    /// `FAILED ...` and `ERROR ...` lines from the short summary.
    pub failures: Vec<String>,
}

impl TestSummary {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Deserialize)]
struct RuffLocation {
    row: u32,
    column: u32,
}

#[derive(Deserialize)]
struct RuffDiagnostic {
    code: Option<String>,
    message: String,
    location: RuffLocation,
}

/// Parse `ruff check --output-format json` output.
///
/// # Errors
///
/// Returns `ToolError::Execution` if the output is not a ruff diagnostics array.
pub fn parse_ruff_json(output: &str) -> Result<Vec<LintViolation>, ToolError> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let diagnostics: Vec<RuffDiagnostic> = serde_json::from_str(output)
        .map_err(|e| ToolError::Execution(format!("unreadable ruff output: {e}")))?;
    Ok(diagnostics
        .into_iter()
        .map(|d| LintViolation {
            // Syntax errors carry no rule code.
            code: d.code.unwrap_or_else(|| "E999".into()),
            message: d.message,
            row: d.location.row,
            column: d.location.column,
        })
        .collect())
}

#[must_use]
pub fn render_violations(violations: &[LintViolation]) -> String {
    if violations.is_empty() {
        return "No violations found.".into();
    }
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) passed").expect("passed regex is valid"));
static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (?:failed|errors?)\b").expect("failed regex is valid"));

fn sum_counts(re: &Regex, line: &str) -> u32 {
    re.captures_iter(line)
        .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .sum()
}

/// Extract counts from pytest output. Only the final summary line is counted.
#[must_use]
pub fn parse_pytest_output(output: &str, exit_code: i32) -> TestSummary {
    let summary_line = output
        .lines()
        .rev()
        .find(|l| PASSED_RE.is_match(l) || FAILED_RE.is_match(l))
        .unwrap_or_default();
    let failures = output
        .lines()
        .filter(|l| l.starts_with("FAILED ") || l.starts_with("ERROR "))
        .map(str::to_owned)
        .collect();
    TestSummary {
        passed: sum_counts(&PASSED_RE, summary_line),
        failed: sum_counts(&FAILED_RE, summary_line),
        exit_code,
        failures,
    }
}

/// Runs ruff and pytest as external processes.
#[derive(Debug, Clone)]
pub struct QualityExecutor {
    ruff_path: String,
    pytest_path: String,
    timeout: Duration,
}

impl QualityExecutor {
    #[must_use]
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            ruff_path: config.ruff_path.clone(),
            pytest_path: config.pytest_path.clone(),
            timeout: Duration::from_secs(config.timeout),
        }
    }

    async fn lint(&self, params: &CodeParams) -> Result<ToolOutput, ToolError> {
        let mut args = vec!["check", "--output-format", "json"];
        args.extend(STDIN_ARGS);
        let out = run_process(&self.ruff_path, &args, Some(&params.code), self.timeout).await?;
        // Exit code 1 means violations were found.
        if out.exit_code > 1 || out.exit_code < 0 {
            return Err(ToolError::Execution(format!(
                "ruff check exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        let violations = parse_ruff_json(&out.stdout)?;
        tracing::debug!(violations = violations.len(), "lint finished");
        Ok(ToolOutput::text("lint", render_violations(&violations))
            .with_data(&LintReport { violations }))
    }

    async fn format(&self, params: &CodeParams) -> Result<ToolOutput, ToolError> {
        let mut args = vec!["format"];
        args.extend(STDIN_ARGS);
        let out = run_process(&self.ruff_path, &args, Some(&params.code), self.timeout).await?;
        if !out.success() {
            return Err(ToolError::Execution(format!(
                "ruff format exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(ToolOutput::text("format_code", out.stdout.clone())
            .with_data(&FormattedCode { code: out.stdout }))
    }

    async fn run_tests(&self, params: &TestParams) -> Result<ToolOutput, ToolError> {
        let mut file = tempfile::Builder::new()
            .prefix("refit_")
            .suffix("_test.py")
            .tempfile()?;
        file.write_all(params.test_code.as_bytes())?;
        file.flush()?;
        let path = file.path().to_string_lossy().into_owned();

        let out = run_process(
            &self.pytest_path,
            &[path.as_str(), "-v", "--tb=short"],
            None,
            self.timeout,
        )
        .await?;
        drop(file);

        let output = format!("{}{}", out.stdout, out.stderr);
        let output = output.trim();
        let summary = parse_pytest_output(output, out.exit_code);
        let status = if summary.succeeded() { "PASSED" } else { "FAILED" };
        let text = format!(
            "Tests {status} (exit code {})\npassed: {}, failed: {}\n\n{output}",
            summary.exit_code, summary.passed, summary.failed
        );
        tracing::debug!(
            passed = summary.passed,
            failed = summary.failed,
            exit_code = summary.exit_code,
            "pytest finished"
        );
        Ok(ToolOutput::text("run_tests", text).with_data(&summary))
    }
}

impl ToolExecutor for QualityExecutor {
    fn tool_definitions(&self) -> Vec<ToolDef> {
        vec![
            ToolDef {
                id: "lint",
                description: "Lint Python code with ruff and return the violations",
                schema: schemars::schema_for!(CodeParams),
                result_schema: schemars::schema_for!(LintReport),
            },
            ToolDef {
                id: "format_code",
                description: "Format Python code with ruff and return the formatted version",
                schema: schemars::schema_for!(CodeParams),
                result_schema: schemars::schema_for!(FormattedCode),
            },
            ToolDef {
                id: "run_tests",
                description: "Run pytest on Python test code and return a pass/fail summary",
                schema: schemars::schema_for!(TestParams),
                result_schema: schemars::schema_for!(TestSummary),
            },
        ]
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> Result<Option<ToolOutput>, ToolError> {
        let output = match call.tool_id.as_str() {
            "lint" => self.lint(&deserialize_params(&call.params)?).await?,
            "format_code" => self.format(&deserialize_params(&call.params)?).await?,
            "run_tests" => self.run_tests(&deserialize_params(&call.params)?).await?,
            _ => return Ok(None),
        };
        Ok(Some(output))
    }
}
