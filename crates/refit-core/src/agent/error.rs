#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("input is empty; send some Python code or a question about it")]
    EmptyInput,

    #[error("gave up after {cap} tool rounds without a final answer")]
    IterationCapExceeded { cap: usize },

    #[error("model did not respond within {timeout_secs}s")]
    LlmTimeout { timeout_secs: u64 },

    #[error(transparent)]
    Llm(#[from] refit_llm::LlmError),

    #[error(transparent)]
    Memory(#[from] refit_memory::MemoryError),
}
