//! Per-repository failure classification

use crate::search::{RepositoryStatus, SearchError, SearchResult, Source, Status};

/// Classify the outcome of searching `repo` on `source`.
///
/// - no error: `Searched`
/// - repository missing: `Missing`, or `Cloning` while a clone is running
/// - revision missing: `CommitMissing`
/// - deadline, timeout or temporary failure: `TimedOut`
/// - cancellation: neither a status nor an error, since it reflects a
///   sibling's failure rather than this repository's condition
/// - anything else is returned as the error
pub fn handle_error(
    source: Source,
    repo: &str,
    err: Option<SearchError>,
) -> Result<Option<RepositoryStatus>, SearchError> {
    let status = match err {
        None => Status::Searched,
        Some(SearchError::RepoNotFound {
            clone_in_progress: true,
            ..
        }) => Status::Cloning,
        Some(SearchError::RepoNotFound { .. }) => Status::Missing,
        Some(SearchError::RevisionNotFound { .. }) => Status::CommitMissing,
        Some(err) if err.is_temporary() => Status::TimedOut,
        Some(SearchError::Canceled) => return Ok(None),
        Some(err) => return Err(err),
    };

    Ok(Some(RepositoryStatus {
        repository: repo.to_string(),
        source,
        status,
    }))
}

/// Turn a failed repository search into a status-only result when the
/// failure is classifiable
pub fn status_result(source: Source, repo: &str, err: SearchError) -> Result<SearchResult, SearchError> {
    Ok(handle_error(source, repo, Some(err))?
        .map(SearchResult::with_status)
        .unwrap_or_default())
}
