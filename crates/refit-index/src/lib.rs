//! Code chunking, a persisted embedding index, similarity retrieval, and
//! corpus ingestion from source repositories.

pub mod chunker;
pub mod error;
pub mod github;
pub mod ingest;
pub mod languages;
pub mod retriever;
pub mod source;
pub mod store;

pub use chunker::{ChunkSplitter, ChunkerConfig, CodeChunk, SplitHints};
pub use error::{IndexError, SourceError};
pub use github::{GitHubClient, GitHubConfig};
pub use ingest::{CorpusIngestor, IngestFailure, IngestReport, RepositorySummary};
pub use languages::Lang;
pub use retriever::{CodeRetriever, RetrievalConfig, format_as_exemplars};
pub use source::{RepositoryDiscovery, RepositoryFetcher, RepositoryRef, SourceFile};
pub use store::{EmbeddingIndex, IndexStoreConfig, LazyIndex, SearchHit};
