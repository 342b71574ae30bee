//! Corpus ingestion: discover, fetch, split, embed, store.

use std::fmt;
use std::sync::Arc;

use crate::chunker::{ChunkSplitter, CodeChunk, SplitHints};
use crate::error::{IndexError, Result, SourceError};
use crate::source::{RepositoryDiscovery, RepositoryFetcher, RepositoryRef};
use crate::store::LazyIndex;

/// Default number of repositories per ingestion call.
pub const DEFAULT_REPOSITORIES: usize = 3;

/// Upper bound on repositories per ingestion call.
pub const MAX_REPOSITORIES: usize = 5;

/// One successfully indexed repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySummary {
    pub repository: String,
    pub stars: u64,
    pub file_count: usize,
    pub chunk_count: usize,
}

/// One repository skipped during ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFailure {
    pub repository: String,
    pub error: String,
}

/// Outcome of an ingestion call. Partial success is the normal case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub query: String,
    pub repositories: Vec<RepositorySummary>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.repositories.iter().map(|r| r.chunk_count).sum()
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repositories.is_empty() && self.failures.is_empty() {
            return write!(f, "No repositories found for query: '{}'", self.query);
        }
        write!(
            f,
            "Indexed {} repositories for '{}':",
            self.repositories.len(),
            self.query
        )?;
        for repo in &self.repositories {
            write!(
                f,
                "\n  + {} ({} stars) - {} files, {} chunks",
                repo.repository, repo.stars, repo.file_count, repo.chunk_count
            )?;
        }
        for failure in &self.failures {
            write!(f, "\n  - {} - failed: {}", failure.repository, failure.error)?;
        }
        Ok(())
    }
}

/// Builds the corpus behind retrieval from repositories found by `D` and read by `F`.
pub struct CorpusIngestor<D, F> {
    discovery: D,
    fetcher: F,
    splitter: ChunkSplitter,
    index: Arc<LazyIndex>,
    max_repositories: usize,
}

impl<D: RepositoryDiscovery, F: RepositoryFetcher> CorpusIngestor<D, F> {
    #[must_use]
    pub fn new(discovery: D, fetcher: F, splitter: ChunkSplitter, index: Arc<LazyIndex>) -> Self {
        Self {
            discovery,
            fetcher,
            splitter,
            index,
            max_repositories: MAX_REPOSITORIES,
        }
    }

    #[must_use]
    pub fn with_max_repositories(mut self, max: usize) -> Self {
        self.max_repositories = max.max(1);
        self
    }

    #[must_use]
    pub fn max_repositories(&self) -> usize {
        self.max_repositories
    }

    /// Index up to `max_repositories` repositories matching `query`.
    ///
    /// A repository that fails to fetch or store, or yields no readable files, is
    /// logged and reported in [`IngestReport::failures`]; the others are still indexed.
    /// Only the files fetched in this call replace earlier records.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Unavailable` if the index cannot be constructed and
    /// `IndexError::Source` if discovery itself fails.
    pub async fn ingest(&self, query: &str, max_repositories: usize) -> Result<IngestReport> {
        let index = self.index.get().await?;
        let limit = max_repositories.clamp(1, self.max_repositories);
        let candidates = self.discovery.search(query, limit).await?;
        tracing::info!(query, candidates = candidates.len(), "ingesting repositories");

        let mut report = IngestReport {
            query: query.to_owned(),
            ..IngestReport::default()
        };
        for repo in candidates.into_iter().take(limit) {
            match self.ingest_repository(index, &repo).await {
                Ok(summary) => {
                    tracing::info!(
                        repository = %summary.repository,
                        files = summary.file_count,
                        chunks = summary.chunk_count,
                        "repository indexed"
                    );
                    report.repositories.push(summary);
                }
                Err(e) => {
                    tracing::warn!(repository = %repo.full_name, "skipping repository: {e}");
                    let error = match e {
                        IndexError::Source(source) => source.to_string(),
                        other => other.to_string(),
                    };
                    report.failures.push(IngestFailure {
                        repository: repo.full_name,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    async fn ingest_repository(
        &self,
        index: &crate::store::EmbeddingIndex,
        repo: &RepositoryRef,
    ) -> Result<RepositorySummary> {
        let files = self.fetcher.fetch_files(repo).await?;
        if files.is_empty() {
            return Err(SourceError::NoFiles.into());
        }

        let mut chunks: Vec<CodeChunk> = Vec::new();
        for file in &files {
            let hints = SplitHints::for_file(&repo.full_name, &file.path);
            chunks.extend(
                self.splitter
                    .split(&file.text, &hints)
                    .filter(|c| !c.code.trim().is_empty()),
            );
        }
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let chunk_count = index.replace_files(&repo.full_name, &paths, chunks).await?;

        Ok(RepositorySummary {
            repository: repo.full_name.clone(),
            stars: repo.stars,
            file_count: files.len(),
            chunk_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use refit_llm::embed_fn;
    use refit_llm::mock::MockProvider;

    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::source::SourceFile;
    use crate::store::IndexStoreConfig;

    struct StubDiscovery {
        repos: Vec<RepositoryRef>,
        limits: Mutex<Vec<usize>>,
    }

    impl StubDiscovery {
        fn new(repos: &[(&str, u64)]) -> Self {
            Self {
                repos: repos
                    .iter()
                    .map(|(name, stars)| RepositoryRef::new(*name, *stars))
                    .collect(),
                limits: Mutex::new(Vec::new()),
            }
        }
    }

    impl RepositoryDiscovery for StubDiscovery {
        async fn search(
            &self,
            _query: &str,
            limit: usize,
        ) -> std::result::Result<Vec<RepositoryRef>, SourceError> {
            self.limits.lock().unwrap().push(limit);
            Ok(self.repos.iter().take(limit).cloned().collect())
        }
    }

    struct FailingDiscovery;

    impl RepositoryDiscovery for FailingDiscovery {
        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<RepositoryRef>, SourceError> {
            Err(SourceError::RateLimited)
        }
    }

    /// Serves fixture files per repository; a missing entry fails the fetch.
    struct StubFetcher {
        files: HashMap<String, Vec<SourceFile>>,
    }

    impl RepositoryFetcher for StubFetcher {
        async fn fetch_files(
            &self,
            repository: &RepositoryRef,
        ) -> std::result::Result<Vec<SourceFile>, SourceError> {
            self.files
                .get(&repository.full_name)
                .cloned()
                .ok_or_else(|| SourceError::Status {
                    status: 404,
                    url: format!("stub://{}", repository.full_name),
                })
        }
    }

    /// Returns one scripted file list per fetch, in order.
    struct ScriptedFetcher {
        fetches: Mutex<VecDeque<Vec<SourceFile>>>,
    }

    impl ScriptedFetcher {
        fn new(fetches: Vec<Vec<SourceFile>>) -> Self {
            Self {
                fetches: Mutex::new(fetches.into()),
            }
        }
    }

    impl RepositoryFetcher for ScriptedFetcher {
        async fn fetch_files(
            &self,
            _repository: &RepositoryRef,
        ) -> std::result::Result<Vec<SourceFile>, SourceError> {
            Ok(self.fetches.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn file(path: &str, text: &str) -> SourceFile {
        SourceFile {
            path: path.into(),
            text: text.into(),
        }
    }

    fn lazy() -> Arc<LazyIndex> {
        Arc::new(LazyIndex::for_store(
            IndexStoreConfig {
                path: ":memory:".into(),
                collection: "python_code".into(),
            },
            embed_fn(MockProvider::default()),
        ))
    }

    fn splitter() -> ChunkSplitter {
        ChunkSplitter::new(ChunkerConfig {
            max_chars: 40,
            overlap: 0,
        })
    }

    const MATH_PY: &str = "def add(a, b):\n    return a + b\n\n\ndef sub(a, b):\n    return a - b\n";
    const UTIL_PY: &str = "def ident(x):\n    return x\n";

    #[tokio::test]
    async fn partial_failure_reports_only_successful_repository() {
        let fetcher = StubFetcher {
            files: HashMap::from([(
                "octo/math".to_owned(),
                vec![file("math.py", MATH_PY), file("util.py", UTIL_PY)],
            )]),
        };
        let expected_chunks = [("math.py", MATH_PY), ("util.py", UTIL_PY)]
            .iter()
            .map(|(path, text)| {
                splitter()
                    .split(text, &SplitHints::for_file("octo/math", path))
                    .filter(|c| !c.code.trim().is_empty())
                    .count()
            })
            .sum::<usize>();

        let index = lazy();
        let ingestor = CorpusIngestor::new(
            StubDiscovery::new(&[("octo/math", 900), ("octo/broken", 50)]),
            fetcher,
            splitter(),
            Arc::clone(&index),
        );
        let report = ingestor.ingest("math helpers", 2).await.unwrap();

        assert_eq!(
            report.repositories,
            vec![RepositorySummary {
                repository: "octo/math".into(),
                stars: 900,
                file_count: 2,
                chunk_count: expected_chunks,
            }]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].repository, "octo/broken");
        assert_eq!(index.get().await.unwrap().len(), expected_chunks);
    }

    #[tokio::test]
    async fn max_repositories_is_clamped() {
        let discovery = StubDiscovery::new(&[("a/a", 1)]);
        let ingestor = CorpusIngestor::new(
            discovery,
            StubFetcher {
                files: HashMap::from([("a/a".to_owned(), vec![file("a.py", UTIL_PY)])]),
            },
            splitter(),
            lazy(),
        );
        ingestor.ingest("q", 50).await.unwrap();
        ingestor.ingest("q", 0).await.unwrap();
        assert_eq!(*ingestor.discovery.limits.lock().unwrap(), vec![5, 1]);
    }

    #[tokio::test]
    async fn reingesting_replaces_repository_records() {
        let index = lazy();
        let ingestor = CorpusIngestor::new(
            StubDiscovery::new(&[("octo/math", 1)]),
            StubFetcher {
                files: HashMap::from([("octo/math".to_owned(), vec![file("math.py", MATH_PY)])]),
            },
            splitter(),
            Arc::clone(&index),
        );
        let first = ingestor.ingest("math", 1).await.unwrap();
        let second = ingestor.ingest("math", 1).await.unwrap();
        assert_eq!(first.total_chunks(), second.total_chunks());
        assert_eq!(index.get().await.unwrap().len(), second.total_chunks());
    }

    #[tokio::test]
    async fn reingest_with_no_readable_files_keeps_records() {
        let index = lazy();
        let ingestor = CorpusIngestor::new(
            StubDiscovery::new(&[("octo/math", 1)]),
            ScriptedFetcher::new(vec![
                vec![file("a.py", MATH_PY), file("b.py", UTIL_PY)],
                Vec::new(),
            ]),
            splitter(),
            Arc::clone(&index),
        );
        let first = ingestor.ingest("q", 1).await.unwrap();
        let before = index.get().await.unwrap().len();
        assert_eq!(before, first.total_chunks());

        let second = ingestor.ingest("q", 1).await.unwrap();
        assert!(second.repositories.is_empty());
        assert_eq!(
            second.failures,
            vec![IngestFailure {
                repository: "octo/math".into(),
                error: "no source files could be fetched".into(),
            }]
        );
        assert_eq!(index.get().await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn reingest_keeps_records_of_files_skipped_this_time() {
        let count = |path: &str, text: &str| {
            splitter()
                .split(text, &SplitHints::for_file("octo/math", path))
                .filter(|c| !c.code.trim().is_empty())
                .count()
        };
        let index = lazy();
        let ingestor = CorpusIngestor::new(
            StubDiscovery::new(&[("octo/math", 1)]),
            ScriptedFetcher::new(vec![
                vec![file("a.py", MATH_PY), file("b.py", UTIL_PY)],
                vec![file("a.py", MATH_PY)],
            ]),
            splitter(),
            Arc::clone(&index),
        );
        ingestor.ingest("q", 1).await.unwrap();
        let second = ingestor.ingest("q", 1).await.unwrap();

        assert_eq!(second.repositories[0].file_count, 1);
        assert_eq!(
            index.get().await.unwrap().len(),
            count("a.py", MATH_PY) + count("b.py", UTIL_PY)
        );
    }

    #[tokio::test]
    async fn failure_text_is_the_source_error() {
        let ingestor = CorpusIngestor::new(
            StubDiscovery::new(&[("octo/gone", 1)]),
            StubFetcher {
                files: HashMap::new(),
            },
            splitter(),
            lazy(),
        );
        let report = ingestor.ingest("q", 1).await.unwrap();
        assert_eq!(
            report.failures[0].error,
            "GitHub API returned 404 for stub://octo/gone"
        );
        assert!(
            report
                .to_string()
                .contains("  - octo/gone - failed: GitHub API returned 404")
        );
    }

    #[tokio::test]
    async fn discovery_failure_fails_the_call() {
        let ingestor = CorpusIngestor::new(
            FailingDiscovery,
            StubFetcher {
                files: HashMap::new(),
            },
            splitter(),
            lazy(),
        );
        let err = ingestor.ingest("q", 3).await.unwrap_err();
        assert!(matches!(err, IndexError::Source(SourceError::RateLimited)));
    }

    #[tokio::test]
    async fn unavailable_index_fails_before_discovery() {
        let index = Arc::new(LazyIndex::new(|| async {
            Err(IndexError::Other("embedding backend down".into()))
        }));
        let discovery = StubDiscovery::new(&[("a/a", 1)]);
        let ingestor = CorpusIngestor::new(
            discovery,
            StubFetcher {
                files: HashMap::new(),
            },
            splitter(),
            index,
        );
        let err = ingestor.ingest("q", 3).await.unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
        assert!(ingestor.discovery.limits.lock().unwrap().is_empty());
    }

    #[test]
    fn report_renders_successes_and_failures() {
        let report = IngestReport {
            query: "http".into(),
            repositories: vec![RepositorySummary {
                repository: "psf/requests".into(),
                stars: 10,
                file_count: 3,
                chunk_count: 12,
            }],
            failures: vec![IngestFailure {
                repository: "x/y".into(),
                error: "boom".into(),
            }],
        };
        assert_eq!(
            report.to_string(),
            "Indexed 1 repositories for 'http':\n  + psf/requests (10 stars) - 3 files, 12 chunks\n  - x/y - failed: boom"
        );
    }

    #[test]
    fn empty_report_renders_not_found() {
        let report = IngestReport {
            query: "nothing".into(),
            ..IngestReport::default()
        };
        assert_eq!(report.to_string(), "No repositories found for query: 'nothing'");
    }
}
