//! Tool execution seam, schema-checked registry, and the code-quality tools.

pub mod composite;
pub mod config;
pub mod executor;
pub mod index_repos;
pub mod process;
pub mod quality;
pub mod refactor;
pub mod registry;

pub use composite::CompositeExecutor;
pub use config::ToolsConfig;
pub use executor::{
    MAX_TOOL_OUTPUT_CHARS, ToolCall, ToolError, ToolExecutor, ToolOutput, truncate_tool_output,
};
pub use index_repos::IndexRepositoriesExecutor;
pub use quality::QualityExecutor;
pub use refactor::RefactorExecutor;
pub use registry::{ToolDef, ToolRegistry, ToolResult, ToolStatus};
