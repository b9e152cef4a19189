//! # In-Memory Collaborators
//!
//! Query sources, record sources, actions and transaction managers that live
//! entirely in memory. They back the unit and integration tests and are
//! small enough to serve as reference implementations of the collaborator
//! traits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::action::{ActionContext, ActionError, BulkAction, RecordOutcome};
use crate::command::{BulkCommand, Params};
use crate::scroll::{QueryRequest, QuerySource, RecordSource, SourceError, SourcePage};
use crate::transaction::{BatchScope, TransactionError, TransactionManager, TransactionScope};

/// `count` identifiers named `{prefix}-{n}`
pub fn record_ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|n| format!("{prefix}-{n}")).collect()
}

/// Page `ids` from the offset carried in `position`
fn page_of(
    ids: &[String],
    position: Option<String>,
    page_size: usize,
    max_page: Option<usize>,
) -> Result<SourcePage, SourceError> {
    let offset = match position {
        Some(position) => position
            .parse::<usize>()
            .map_err(|_| SourceError::Protocol(format!("bad position token: {position}")))?,
        None => 0,
    };
    let size = max_page.map_or(page_size, |max| page_size.min(max));
    let end = offset.saturating_add(size).min(ids.len());
    let page = ids.get(offset..end).unwrap_or_default().to_vec();
    let next = (end < ids.len()).then(|| end.to_string());
    Ok(SourcePage::new(page, next))
}

#[derive(Debug, Default)]
struct QueryBehavior {
    results: HashMap<String, Vec<String>>,
    rejected: HashSet<String>,
    /// Pages served before the source becomes unavailable
    fail_after_pages: HashMap<String, usize>,
    max_page: Option<usize>,
}

/// Query engine answering fixed result sets by exact query text.
///
/// Unknown queries match nothing.
#[derive(Debug, Default)]
pub struct InMemoryQuerySource {
    behavior: Mutex<QueryBehavior>,
    pages_served: AtomicUsize,
}

impl InMemoryQuerySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(self, query: impl Into<String>, ids: Vec<String>) -> Self {
        self.behavior.lock().results.insert(query.into(), ids);
        self
    }

    /// `validate` fails with `InvalidQuery` for this query
    pub fn rejecting(self, query: impl Into<String>) -> Self {
        self.behavior.lock().rejected.insert(query.into());
        self
    }

    /// Serve `pages` pages of this query, then report the source unreachable
    pub fn failing_after(self, query: impl Into<String>, pages: usize) -> Self {
        self.behavior
            .lock()
            .fail_after_pages
            .insert(query.into(), pages);
        self
    }

    /// Never return more than `size` ids per page
    pub fn with_max_page(self, size: usize) -> Self {
        self.behavior.lock().max_page = Some(size.max(1));
        self
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuerySource for InMemoryQuerySource {
    async fn validate(&self, request: &QueryRequest) -> Result<(), SourceError> {
        if self.behavior.lock().rejected.contains(&request.query) {
            return Err(SourceError::InvalidQuery(request.query.clone()));
        }
        Ok(())
    }

    async fn page(
        &self,
        request: &QueryRequest,
        position: Option<String>,
        page_size: usize,
    ) -> Result<SourcePage, SourceError> {
        let served = self.pages_served.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock();
        if let Some(limit) = behavior.fail_after_pages.get(&request.query) {
            if served >= *limit {
                return Err(SourceError::Unavailable(format!(
                    "source went away after {limit} pages"
                )));
            }
        }
        let ids = behavior
            .results
            .get(&request.query)
            .map(Vec::as_slice)
            .unwrap_or_default();
        page_of(ids, position, page_size, behavior.max_page)
    }
}

/// Named lists scanned by descriptor, for generic scrolling
#[derive(Debug, Default)]
pub struct InMemoryRecordSource {
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(self, descriptor: impl Into<String>, ids: Vec<String>) -> Self {
        self.lists.lock().insert(descriptor.into(), ids);
        self
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn scan(
        &self,
        descriptor: &str,
        _params: &Params,
        position: Option<String>,
        page_size: usize,
    ) -> Result<SourcePage, SourceError> {
        let lists = self.lists.lock();
        let ids = lists
            .get(descriptor)
            .ok_or_else(|| SourceError::InvalidQuery(format!("unknown list: {descriptor}")))?;
        page_of(ids, position, page_size, None)
    }
}

/// Action that records every identifier it is applied to.
///
/// Identifiers registered with [`failing_on`](Self::failing_on) make `apply`
/// stop with [`ActionError::RecordFailed`], the way a real action reports a
/// record it cannot process.
#[derive(Debug, Default)]
pub struct RecordingAction {
    applied: Mutex<Vec<String>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    rejected_param: Option<String>,
    configuration_error: Option<String>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(ids.into_iter().map(Into::into));
        self
    }

    /// `validate` rejects commands that carry this param
    pub fn rejecting_param(mut self, key: impl Into<String>) -> Self {
        self.rejected_param = Some(key.into());
        self
    }

    /// Every `apply` fails with a configuration error
    pub fn misconfigured(mut self, message: impl Into<String>) -> Self {
        self.configuration_error = Some(message.into());
        self
    }

    /// Every `apply` takes (and keeps) one permit of `gate` before running
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Identifiers applied successfully, in application order
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn apply_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkAction for RecordingAction {
    fn validate(&self, command: &BulkCommand) -> Result<(), ActionError> {
        match &self.rejected_param {
            Some(key) if command.param(key).is_some() => Err(ActionError::Configuration(
                format!("param '{key}' is not supported"),
            )),
            _ => Ok(()),
        }
    }

    async fn apply(
        &self,
        _ctx: &ActionContext<'_>,
        ids: &[String],
    ) -> Result<Vec<RecordOutcome>, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(message) = &self.configuration_error {
            return Err(ActionError::Configuration(message.clone()));
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            if self.failing.contains(id) {
                return Err(ActionError::record_failed(id.clone(), "rejected by action"));
            }
            self.applied.lock().push(id.clone());
            outcomes.push(RecordOutcome::success(id.clone()));
        }
        Ok(outcomes)
    }
}

/// Transaction manager whose commit fails for chosen batches
#[derive(Debug, Default)]
pub struct FailingCommitManager {
    failing: HashSet<(u64, usize)>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

impl FailingCommitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the commit of batch `batch_index` within bucket `bucket_sequence`
    pub fn fail_batch(mut self, bucket_sequence: u64, batch_index: usize) -> Self {
        self.failing.insert((bucket_sequence, batch_index));
        self
    }

    /// Successful commits so far
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

struct InMemoryScope {
    fail_commit: bool,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

#[async_trait]
impl TransactionScope for InMemoryScope {
    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        if self.fail_commit {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(TransactionError::Commit("injected commit failure".to_string()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for FailingCommitManager {
    async fn begin(&self, scope: BatchScope) -> Result<Box<dyn TransactionScope>, TransactionError> {
        Ok(Box::new(InMemoryScope {
            fail_commit: self
                .failing
                .contains(&(scope.bucket_sequence, scope.batch_index)),
            commits: self.commits.clone(),
            rollbacks: self.rollbacks.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_source_pages() {
        let source = InMemoryQuerySource::new().with_results("q", record_ids("doc", 5));
        let request = QueryRequest {
            query: "q".to_string(),
            repository: None,
            username: None,
        };

        let first = tokio_test::block_on(source.page(&request, None, 3)).unwrap();
        assert_eq!(first.ids, vec!["doc-0", "doc-1", "doc-2"]);
        assert_eq!(first.next.as_deref(), Some("3"));

        let second = tokio_test::block_on(source.page(&request, first.next, 3)).unwrap();
        assert_eq!(second.ids, vec!["doc-3", "doc-4"]);
        assert!(second.next.is_none());
        assert_eq!(source.pages_served(), 2);
    }

    #[test]
    fn test_query_source_failure_injection() {
        let source = InMemoryQuerySource::new()
            .with_results("q", record_ids("doc", 10))
            .failing_after("q", 1)
            .rejecting("bad");
        let request = |query: &str| QueryRequest {
            query: query.to_string(),
            repository: None,
            username: None,
        };

        assert!(tokio_test::block_on(source.validate(&request("bad"))).is_err());
        assert!(tokio_test::block_on(source.page(&request("q"), None, 4)).is_ok());
        assert!(matches!(
            tokio_test::block_on(source.page(&request("q"), Some("4".into()), 4)),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_recording_action_stops_on_failing_record() {
        let action = RecordingAction::new().failing_on(["b"]);
        let command = BulkCommand::builder("noop", "q").unwrap().build();
        let ctx = ActionContext::from_command(&command);
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        let result = tokio_test::block_on(action.apply(&ctx, &ids));
        assert_eq!(result, Err(ActionError::record_failed("b", "rejected by action")));
        assert_eq!(action.applied(), vec!["a"]);
    }
}
