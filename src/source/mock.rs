//! In-memory source standing in for a live search engine.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::extract::{Page, PageHints, QuerySpec, Record, Source, SourceError};

/// Serves a fixed list of pages and records every call made against it.
///
/// Page `i` is served by the `i`-th successful fetch; fetches past the last
/// page return an empty page. Failures can be scripted per page index and are
/// consumed before the page is served, so a retry receives the same page.
pub struct MockSource {
    name: String,
    pages: Vec<Vec<Record>>,
    exhaust_on_last: bool,
    collections: Option<HashSet<String>>,
    failures: Mutex<HashMap<usize, VecDeque<SourceError>>>,
    release_error: Option<SourceError>,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    served: usize,
    cursor_id: usize,
    current_token: Option<String>,
    search_calls: usize,
    continue_calls: usize,
    continuation_tokens: Vec<String>,
    released_tokens: Vec<String>,
    last_query: Option<QuerySpec>,
    last_hints: Option<PageHints>,
}

impl MockSource {
    pub fn new(pages: Vec<Vec<Record>>) -> Self {
        Self {
            name: "mock".to_string(),
            pages,
            exhaust_on_last: false,
            collections: None,
            failures: Mutex::new(HashMap::new()),
            release_error: None,
            state: Mutex::new(MockState::default()),
        }
    }

    /// `total` hit-shaped documents split into pages of `page_size`.
    pub fn sample(total: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let records: Vec<Record> = (0..total).map(sample_hit).collect();
        Self::new(records.chunks(page_size).map(<[Record]>::to_vec).collect())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Only these collections exist. By default every collection exists.
    pub fn with_collections<I, C>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    /// Flags the last page as exhausted instead of following it with an empty page.
    pub fn exhaust_on_last_page(mut self) -> Self {
        self.exhaust_on_last = true;
        self
    }

    /// Fails the fetch of page `index` once with `error`. Repeatable.
    pub fn fail_page(mut self, index: usize, error: SourceError) -> Self {
        self.failures
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(index)
            .or_default()
            .push_back(error);
        self
    }

    pub fn fail_release(mut self, error: SourceError) -> Self {
        self.release_error = Some(error);
        self
    }

    pub fn search_calls(&self) -> usize {
        self.state().search_calls
    }

    pub fn continue_calls(&self) -> usize {
        self.state().continue_calls
    }

    /// Tokens passed to `continue_page`, in call order.
    pub fn continuation_tokens(&self) -> Vec<String> {
        self.state().continuation_tokens.clone()
    }

    pub fn release_count(&self) -> usize {
        self.state().released_tokens.len()
    }

    pub fn released_tokens(&self) -> Vec<String> {
        self.state().released_tokens.clone()
    }

    pub fn last_query(&self) -> Option<QuerySpec> {
        self.state().last_query.clone()
    }

    pub fn last_hints(&self) -> Option<PageHints> {
        self.state().last_hints.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn knows(&self, collection: &str) -> bool {
        self.collections
            .as_ref()
            .map_or(true, |known| known.contains(collection))
    }

    fn scripted_failure(&self, index: usize) -> Option<SourceError> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&index)
            .and_then(VecDeque::pop_front)
    }

    fn serve(&self, state: &mut MockState, index: usize) -> Page {
        let records = self.pages.get(index).cloned().unwrap_or_default();
        let token = format!("{}-cursor-{}-{}", self.name, state.cursor_id, index + 1);
        state.served = index + 1;
        state.current_token = Some(token.clone());

        let mut page = Page::new(token, records);
        if self.exhaust_on_last && !self.pages.is_empty() && index + 1 >= self.pages.len() {
            page = page.exhausted();
        }
        page
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_exists(&self, collection: &str) -> Result<bool, SourceError> {
        Ok(self.knows(collection))
    }

    async fn search(
        &self,
        collection: &str,
        query: &QuerySpec,
        hints: &PageHints,
    ) -> Result<Page, SourceError> {
        let mut state = self.state();
        state.search_calls += 1;
        state.last_query = Some(query.clone());
        state.last_hints = Some(hints.clone());

        if let Some(error) = self.scripted_failure(0) {
            return Err(error);
        }
        if !self.knows(collection) {
            return Err(SourceError::NotFound(format!("no such index [{collection}]")));
        }

        state.cursor_id += 1;
        Ok(self.serve(&mut state, 0))
    }

    async fn continue_page(&self, token: &str, hints: &PageHints) -> Result<Page, SourceError> {
        let mut state = self.state();
        state.continue_calls += 1;
        state.continuation_tokens.push(token.to_string());
        state.last_hints = Some(hints.clone());

        if state.current_token.as_deref() != Some(token) {
            return Err(SourceError::Protocol(format!(
                "unknown continuation token {token}"
            )));
        }
        let index = state.served;
        if let Some(error) = self.scripted_failure(index) {
            return Err(error);
        }
        Ok(self.serve(&mut state, index))
    }

    async fn release(&self, token: &str) -> Result<(), SourceError> {
        self.state().released_tokens.push(token.to_string());
        match &self.release_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// A document shaped like a search hit, with the payload under `_source`.
pub fn sample_hit(n: usize) -> Record {
    let status = if n % 3 == 0 { "inactive" } else { "active" };
    let value = json!({
        "_index": "events",
        "_id": format!("doc-{n}"),
        "_source": {
            "id": n,
            "timestamp": format!("2025-01-01T00:{:02}:{:02}", (n / 60) % 60, n % 60),
            "status": status,
            "data": {
                "field1": format!("value-{n}"),
                "field2": n * 10,
            },
        },
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::QueryModel;

    #[tokio::test]
    async fn test_serves_pages_then_empty() {
        let source = MockSource::sample(5, 2);
        let spec = QueryModel::match_all().render();
        let hints = PageHints::default();

        let first = source.search("events", &spec, &hints).await.unwrap();
        assert_eq!(first.records.len(), 2);

        let token = first.token.unwrap();
        let second = source.continue_page(&token, &hints).await.unwrap();
        assert_eq!(second.records.len(), 2);

        let third = source
            .continue_page(second.token.as_deref().unwrap(), &hints)
            .await
            .unwrap();
        assert_eq!(third.records.len(), 1);

        let fourth = source
            .continue_page(third.token.as_deref().unwrap(), &hints)
            .await
            .unwrap();
        assert!(fourth.is_empty());
        assert_eq!(source.search_calls(), 1);
        assert_eq!(source.continue_calls(), 3);
    }

    #[tokio::test]
    async fn test_rejects_stale_token() {
        let source = MockSource::sample(4, 2);
        let spec = QueryModel::match_all().render();
        let hints = PageHints::default();

        let first = source.search("events", &spec, &hints).await.unwrap();
        let stale = first.token.unwrap();
        source.continue_page(&stale, &hints).await.unwrap();

        let err = source.continue_page(&stale, &hints).await.unwrap_err();
        assert!(matches!(err, SourceError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let source = MockSource::sample(1, 1).with_collections(["events"]);
        assert!(source.check_exists("events").await.unwrap());
        assert!(!source.check_exists("other").await.unwrap());

        let spec = QueryModel::match_all().render();
        let err = source
            .search("other", &spec, &PageHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_sample_hit_shape() {
        let hit = sample_hit(4);
        assert_eq!(hit["_id"], "doc-4");
        assert_eq!(hit["_source"]["status"], "active");
        assert_eq!(hit["_source"]["data"]["field2"], 40);
    }
}
