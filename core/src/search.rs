/// User search collaborator and the debouncer that feeds it
use crate::chat_types::SearchResult;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use http::{header, Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Stateless fuzzy lookup of users by email/name
#[async_trait]
pub trait UserSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// `GET {base}/user/search?email=<query>` over plain HTTP
pub struct HttpUserSearch {
    base: String,
    client: Client<HttpConnector, Empty<Bytes>>,
    request_timeout: Duration,
}

impl HttpUserSearch {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn url_for(&self, query: &str) -> String {
        format!("{}/user/search?email={}", self.base, urlencoding::encode(query))
    }
}

/// Accepts either a bare array or the usual `{ "data": [...] }` envelope
pub fn parse_search_body(body: &[u8]) -> Result<Vec<SearchResult>> {
    let json: serde_json::Value = serde_json::from_slice(body)?;
    let list = json
        .as_array()
        .cloned()
        .or_else(|| json.get("data").and_then(|v| v.as_array()).cloned())
        .ok_or_else(|| SyncError::Search("unexpected search response shape".to_string()))?;
    let mut out = Vec::with_capacity(list.len());
    for item in list {
        match serde_json::from_value::<SearchResult>(item) {
            Ok(hit) => out.push(hit),
            Err(e) => debug!("Skipping malformed search hit: {}", e),
        }
    }
    Ok(out)
}

#[async_trait]
impl UserSearch for HttpUserSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let uri = self.url_for(query);
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri.as_str())
            .header(header::ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| SyncError::Search(format!("bad request for {}: {}", uri, e)))?;

        let resp = timeout(self.request_timeout, self.client.request(req))
            .await
            .map_err(|_| SyncError::Search("search request timed out".to_string()))?
            .map_err(|e| SyncError::Search(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(SyncError::Search(format!("HTTP {}", resp.status())));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SyncError::Search(e.to_string()))?
            .to_bytes();
        parse_search_body(&body)
    }
}

/// Results of one debounced search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub generation: u64,
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Delays searches and cancels the pending one whenever a newer query arrives
pub struct SearchDebouncer {
    search: Arc<dyn UserSearch>,
    delay: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    outcomes: mpsc::UnboundedSender<SearchOutcome>,
}

impl SearchDebouncer {
    pub fn new(search: Arc<dyn UserSearch>, delay: Duration, outcomes: mpsc::UnboundedSender<SearchOutcome>) -> Self {
        Self {
            search,
            delay,
            generation: 0,
            pending: None,
            outcomes,
        }
    }

    /// Generation of the most recent query; older outcomes are stale
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Schedule `query`. Returns `None` for a blank query, which is never sent.
    pub fn schedule(&mut self, query: &str) -> Option<u64> {
        self.cancel();
        self.generation += 1;
        if query.trim().is_empty() {
            return None;
        }

        let generation = self.generation;
        let query = query.to_string();
        let search = self.search.clone();
        let delay = self.delay;
        let outcomes = self.outcomes.clone();
        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            let results = match search.search(&query).await {
                Ok(results) => results,
                Err(e) => {
                    warn!("Search for {:?} failed: {}", query, e);
                    Vec::new()
                }
            };
            let _ = outcomes.send(SearchOutcome {
                generation,
                query,
                results,
            });
        }));
        Some(generation)
    }

    /// Abort the pending search, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
