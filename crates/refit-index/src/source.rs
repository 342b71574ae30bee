//! Repository discovery and fetch collaborators.

use std::future::Future;

use crate::error::SourceError;

/// A repository found by discovery, ranked by popularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// `owner/name` identifier.
    pub full_name: String,
    pub stars: u64,
    /// Branch to read files from; resolved by the fetcher when absent.
    pub default_branch: Option<String>,
}

impl RepositoryRef {
    #[must_use]
    pub fn new(full_name: impl Into<String>, stars: u64) -> Self {
        Self {
            full_name: full_name.into(),
            stars,
            default_branch: None,
        }
    }
}

/// One fetched source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
}

pub trait RepositoryDiscovery: Send + Sync {
    /// Repositories matching `query`, most popular first, at most `limit`.
    fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RepositoryRef>, SourceError>> + Send;
}

pub trait RepositoryFetcher: Send + Sync {
    /// Source-language files of `repository`. Individual unreadable files are
    /// skipped by the implementation; an error means the repository as a whole failed.
    fn fetch_files(
        &self,
        repository: &RepositoryRef,
    ) -> impl Future<Output = Result<Vec<SourceFile>, SourceError>> + Send;
}
