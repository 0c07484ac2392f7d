//! Google Tasks v1 REST client.
//!
//! Every call takes the bearer token explicitly; token lifetime is the
//! [`TokenSource`](super::auth::TokenSource)'s concern. HTTP status codes are
//! mapped onto [`SyncError`] so the reconciler can tell record-scoped
//! failures from pass-fatal ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::sync::types::{wire_time, RemoteList, RemoteTask};
use crate::sync::SyncError;

pub const DEFAULT_API_BASE: &str = "https://tasks.googleapis.com/tasks/v1";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGES: usize = 50;

/// One page of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
    /// Items present in the response that could not be decoded.
    pub rejected: usize,
}

/// Every page of a collection, concatenated.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub rejected: usize,
    /// The page cap was hit before the server ran out of pages.
    pub truncated: bool,
}

/// Filters for [`TasksApi::list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct ListTasksQuery {
    pub updated_min: Option<DateTime<Utc>>,
    pub show_completed: bool,
    pub show_deleted: bool,
    pub page_token: Option<String>,
}

impl ListTasksQuery {
    /// Live tasks, completed ones included.
    pub fn live() -> Self {
        Self {
            show_completed: true,
            ..Default::default()
        }
    }
}

/// The remote operations the reconciler needs.
///
/// `create_list` and `insert_task` are not idempotent and must never be
/// retried blindly.
#[async_trait]
pub trait TasksApi: Send + Sync {
    async fn list_lists(
        &self,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<Page<RemoteList>, SyncError>;

    async fn create_list(&self, token: &str, title: &str) -> Result<RemoteList, SyncError>;

    async fn update_list(
        &self,
        token: &str,
        list_id: &str,
        title: &str,
        if_match: Option<&str>,
    ) -> Result<RemoteList, SyncError>;

    async fn delete_list(&self, token: &str, list_id: &str) -> Result<(), SyncError>;

    async fn list_tasks(
        &self,
        token: &str,
        list_id: &str,
        query: &ListTasksQuery,
    ) -> Result<Page<RemoteTask>, SyncError>;

    async fn insert_task(
        &self,
        token: &str,
        list_id: &str,
        task: &RemoteTask,
        parent: Option<&str>,
        previous: Option<&str>,
    ) -> Result<RemoteTask, SyncError>;

    async fn update_task(
        &self,
        token: &str,
        list_id: &str,
        task_id: &str,
        task: &RemoteTask,
        if_match: Option<&str>,
    ) -> Result<RemoteTask, SyncError>;

    async fn move_task(
        &self,
        token: &str,
        list_id: &str,
        task_id: &str,
        parent: Option<&str>,
        previous: Option<&str>,
    ) -> Result<RemoteTask, SyncError>;

    async fn delete_task(&self, token: &str, list_id: &str, task_id: &str)
        -> Result<(), SyncError>;
}

/// Follow `nextPageToken` over all task lists, up to `max_pages` pages.
pub async fn fetch_all_lists(
    api: &dyn TasksApi,
    token: &str,
    max_pages: usize,
) -> Result<Collected<RemoteList>, SyncError> {
    let mut out = Collected {
        items: Vec::new(),
        rejected: 0,
        truncated: false,
    };
    let mut page_token: Option<String> = None;
    for _ in 0..max_pages.max(1) {
        let page = api.list_lists(token, page_token.as_deref()).await?;
        out.items.extend(page.items);
        out.rejected += page.rejected;
        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => return Ok(out),
        }
    }
    tracing::warn!(max_pages, "task list pagination cap reached");
    out.truncated = true;
    Ok(out)
}

/// Follow `nextPageToken` over one list's tasks, up to `max_pages` pages.
pub async fn fetch_all_tasks(
    api: &dyn TasksApi,
    token: &str,
    list_id: &str,
    query: &ListTasksQuery,
    max_pages: usize,
) -> Result<Collected<RemoteTask>, SyncError> {
    let mut out = Collected {
        items: Vec::new(),
        rejected: 0,
        truncated: false,
    };
    let mut query = query.clone();
    for _ in 0..max_pages.max(1) {
        let page = api.list_tasks(token, list_id, &query).await?;
        out.items.extend(page.items);
        out.rejected += page.rejected;
        match page.next_page_token {
            Some(next) => query.page_token = Some(next),
            None => return Ok(out),
        }
    }
    tracing::warn!(list_id, max_pages, "task pagination cap reached");
    out.truncated = true;
    Ok(out)
}

/// reqwest-backed [`TasksApi`].
#[derive(Debug, Clone)]
pub struct GoogleTasksClient {
    http_client: Client,
    base_url: String,
    page_size: u32,
}

impl Default for GoogleTasksClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl GoogleTasksClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// `maxResults` for list calls, clamped to the service maximum.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<url::Url, SyncError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| SyncError::InvalidResponse(format!("bad api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidResponse("api base cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        token: &str,
    ) -> Result<RequestBuilder, SyncError> {
        Ok(self
            .http_client
            .request(method, self.endpoint(segments)?)
            .bearer_auth(token))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, SyncError> {
        let resp = builder.send().await?;
        check_status(resp.status())?;
        Ok(resp)
    }

    /// Single-record responses: anything undecodable is the server's fault.
    async fn record<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, SyncError> {
        let body = Self::send(builder).await?.text().await?;
        serde_json::from_str(&body).map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }

    async fn page<T: DeserializeOwned>(builder: RequestBuilder) -> Result<Page<T>, SyncError> {
        let body = Self::send(builder).await?.text().await?;
        decode_page(&body)
    }
}

/// Map an HTTP status onto the error taxonomy.
pub fn check_status(status: StatusCode) -> Result<(), SyncError> {
    match status.as_u16() {
        200..=299 => Ok(()),
        401 => Err(SyncError::AuthRequired),
        404 => Err(SyncError::NotFound),
        412 => Err(SyncError::PreconditionFailed),
        429 => Err(SyncError::RateLimited),
        code @ 500..=599 => Err(SyncError::ServerError(code)),
        code => Err(SyncError::InvalidResponse(format!("HTTP {code}"))),
    }
}

/// Decode a collection body, skipping (and counting) items that fail to decode.
pub fn decode_page<T: DeserializeOwned>(body: &str) -> Result<Page<T>, SyncError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
    let next_page_token = value
        .get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from);

    let raw_items = match value.get("items") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(SyncError::InvalidResponse("items is not an array".into())),
    };

    let mut items = Vec::with_capacity(raw_items.len());
    let mut rejected = 0;
    for raw in raw_items {
        let id = raw.get("id").and_then(Value::as_str).map(String::from);
        match serde_json::from_value::<T>(raw) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(id = ?id, error = %e, "skipping undecodable item");
                rejected += 1;
            }
        }
    }

    Ok(Page {
        items,
        next_page_token,
        rejected,
    })
}

#[async_trait]
impl TasksApi for GoogleTasksClient {
    async fn list_lists(
        &self,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<Page<RemoteList>, SyncError> {
        let mut req = self
            .request(Method::GET, &["users", "@me", "lists"], token)?
            .query(&[("maxResults", self.page_size.to_string())]);
        if let Some(pt) = page_token {
            req = req.query(&[("pageToken", pt)]);
        }
        Self::page(req).await
    }

    async fn create_list(&self, token: &str, title: &str) -> Result<RemoteList, SyncError> {
        let req = self
            .request(Method::POST, &["users", "@me", "lists"], token)?
            .json(&json!({ "title": title }));
        Self::record(req).await
    }

    async fn update_list(
        &self,
        token: &str,
        list_id: &str,
        title: &str,
        if_match: Option<&str>,
    ) -> Result<RemoteList, SyncError> {
        let mut req = self
            .request(Method::PATCH, &["users", "@me", "lists", list_id], token)?
            .json(&json!({ "id": list_id, "title": title }));
        if let Some(etag) = if_match {
            req = req.header(reqwest::header::IF_MATCH, etag);
        }
        Self::record(req).await
    }

    async fn delete_list(&self, token: &str, list_id: &str) -> Result<(), SyncError> {
        let req = self.request(Method::DELETE, &["users", "@me", "lists", list_id], token)?;
        Self::send(req).await.map(drop)
    }

    async fn list_tasks(
        &self,
        token: &str,
        list_id: &str,
        query: &ListTasksQuery,
    ) -> Result<Page<RemoteTask>, SyncError> {
        let mut params = vec![
            ("maxResults", self.page_size.to_string()),
            ("showCompleted", query.show_completed.to_string()),
            ("showDeleted", query.show_deleted.to_string()),
            // Completed tasks cleared in the web UI are hidden, not deleted.
            ("showHidden", "true".to_string()),
        ];
        if let Some(min) = &query.updated_min {
            params.push(("updatedMin", wire_time::format(min)));
        }
        if let Some(pt) = &query.page_token {
            params.push(("pageToken", pt.clone()));
        }
        let req = self
            .request(Method::GET, &["lists", list_id, "tasks"], token)?
            .query(&params);
        Self::page(req).await
    }

    async fn insert_task(
        &self,
        token: &str,
        list_id: &str,
        task: &RemoteTask,
        parent: Option<&str>,
        previous: Option<&str>,
    ) -> Result<RemoteTask, SyncError> {
        let mut req = self.request(Method::POST, &["lists", list_id, "tasks"], token)?;
        if let Some(p) = parent {
            req = req.query(&[("parent", p)]);
        }
        if let Some(p) = previous {
            req = req.query(&[("previous", p)]);
        }
        Self::record(req.json(task)).await
    }

    async fn update_task(
        &self,
        token: &str,
        list_id: &str,
        task_id: &str,
        task: &RemoteTask,
        if_match: Option<&str>,
    ) -> Result<RemoteTask, SyncError> {
        let mut req = self
            .request(Method::PATCH, &["lists", list_id, "tasks", task_id], token)?
            .json(task);
        if let Some(etag) = if_match {
            req = req.header(reqwest::header::IF_MATCH, etag);
        }
        Self::record(req).await
    }

    async fn move_task(
        &self,
        token: &str,
        list_id: &str,
        task_id: &str,
        parent: Option<&str>,
        previous: Option<&str>,
    ) -> Result<RemoteTask, SyncError> {
        let mut req = self.request(
            Method::POST,
            &["lists", list_id, "tasks", task_id, "move"],
            token,
        )?;
        if let Some(p) = parent {
            req = req.query(&[("parent", p)]);
        }
        if let Some(p) = previous {
            req = req.query(&[("previous", p)]);
        }
        Self::record(req).await
    }

    async fn delete_task(
        &self,
        token: &str,
        list_id: &str,
        task_id: &str,
    ) -> Result<(), SyncError> {
        let req = self.request(Method::DELETE, &["lists", list_id, "tasks", task_id], token)?;
        Self::send(req).await.map(drop)
    }
}
