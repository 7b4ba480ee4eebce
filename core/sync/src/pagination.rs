//! Pagination and delta walking.
//!
//! Two styles are supported behind one lazy page stream:
//!
//! - opaque links, where each page body says where the next page lives and
//!   the last page may carry a delta link to resume from next run
//! - offset/limit, where the walker advances a numeric offset by the page
//!   size and stops on the first short page
//!
//! Every call to [`iterate_pages`] starts a fresh walk; nothing is shared
//! between walks except the fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use airweave_common::{Error, Result};

/// Fetches one page body. Implemented by the HTTP client.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str, params: &[(String, String)]) -> Result<Value>;
}

/// A request for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Replace every value of `key` with `value`.
    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.into()));
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Where items and links live in a link-paginated page body.
pub trait LinkFormat: Send + Sync {
    /// Take the items out of a page body.
    fn items(&self, body: &mut Value) -> Result<Vec<Value>>;

    /// Request for the following page, if any.
    fn next_request(&self, body: &Value, current: &PageRequest, items: &[Value]) -> Option<PageRequest>;

    /// Terminal resumption link, if the provider returned one.
    fn delta_link(&self, _body: &Value) -> Option<String> {
        None
    }

    /// Whether a last page without a delta link is an anomaly.
    fn expects_delta_link(&self) -> bool {
        false
    }
}

/// Offset/limit walk parameters.
#[derive(Debug, Clone)]
pub struct OffsetPaging {
    pub request: PageRequest,
    pub offset_param: String,
    pub limit_param: String,
    pub page_size: usize,
    /// Key holding the item array in each page body.
    pub items_key: String,
}

/// Starting point of a page walk.
#[derive(Clone)]
pub enum PageStart {
    Link {
        request: PageRequest,
        format: Arc<dyn LinkFormat>,
    },
    Offset(OffsetPaging),
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Zero-based position in the walk.
    pub number: usize,
    pub items: Vec<Value>,
    /// Set on the terminal page of a delta walk.
    pub delta_link: Option<String>,
}

pub type PageStream = BoxStream<'static, Result<Page>>;

/// Walk pages from `start` until the provider signals exhaustion.
///
/// The stream ends after the first error.
pub fn iterate_pages(fetcher: Arc<dyn PageFetcher>, start: PageStart) -> PageStream {
    match start {
        PageStart::Link { request, format } => link_pages(fetcher, request, format),
        PageStart::Offset(paging) => offset_pages(fetcher, paging),
    }
}

/// Flatten a page stream into its items.
pub fn iterate_items(pages: PageStream) -> BoxStream<'static, Result<Value>> {
    pages
        .map_ok(|page| stream::iter(page.items.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
}

fn link_pages(fetcher: Arc<dyn PageFetcher>, first: PageRequest, format: Arc<dyn LinkFormat>) -> PageStream {
    stream::unfold(Some((first, 0usize)), move |state| {
        let fetcher = fetcher.clone();
        let format = format.clone();
        async move {
            let (request, number) = state?;

            let mut body = match fetcher.fetch_page(&request.url, &request.params).await {
                Ok(body) => body,
                Err(err) => return Some((Err(err), None)),
            };
            let items = match format.items(&mut body) {
                Ok(items) => items,
                Err(err) => return Some((Err(err), None)),
            };

            if let Some(next) = format.next_request(&body, &request, &items) {
                debug!(page = number, items = items.len(), "Following next link");
                let page = Page {
                    number,
                    items,
                    delta_link: None,
                };
                return Some((Ok(page), Some((next, number + 1))));
            }

            let delta_link = format.delta_link(&body);
            if delta_link.is_none() && format.expects_delta_link() {
                warn!(
                    url = %request.url,
                    "Last page carried neither a next nor a delta link; no new resumption token"
                );
            }

            let page = Page {
                number,
                items,
                delta_link,
            };
            Some((Ok(page), None))
        }
    })
    .boxed()
}

fn offset_pages(fetcher: Arc<dyn PageFetcher>, paging: OffsetPaging) -> PageStream {
    if paging.page_size == 0 {
        return stream::once(async {
            Err(Error::Config("Page size must be greater than zero".to_string()))
        })
        .boxed();
    }

    let paging = Arc::new(paging);
    stream::unfold(Some((0usize, 0usize)), move |state| {
        let fetcher = fetcher.clone();
        let paging = paging.clone();
        async move {
            let (offset, number) = state?;

            let mut params = paging.request.params.clone();
            params.push((paging.offset_param.clone(), offset.to_string()));
            params.push((paging.limit_param.clone(), paging.page_size.to_string()));

            let mut body = match fetcher.fetch_page(&paging.request.url, &params).await {
                Ok(body) => body,
                Err(err) => return Some((Err(err), None)),
            };
            let items = match take_array(&mut body, &paging.items_key) {
                Ok(items) => items,
                Err(err) => return Some((Err(err), None)),
            };

            // A short page is the last one. An exact multiple of the page
            // size costs one extra, empty request.
            let next = (items.len() >= paging.page_size).then(|| (offset + paging.page_size, number + 1));
            let page = Page {
                number,
                items,
                delta_link: None,
            };
            Some((Ok(page), next))
        }
    })
    .boxed()
}

/// Remove and return the array at `key`.
pub fn take_array(body: &mut Value, key: &str) -> Result<Vec<Value>> {
    match body.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(Error::Serialization(format!("Page body has no '{}' array", key))),
        Some(other) => Err(Error::Serialization(format!(
            "Expected '{}' to be an array, got {}",
            key, other
        ))),
    }
}

/// Microsoft Graph OData paging: `value`, `@odata.nextLink`, `@odata.deltaLink`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ODataLinks {
    delta: bool,
}

impl ODataLinks {
    /// Plain collection paging.
    pub fn collection() -> Self {
        Self { delta: false }
    }

    /// Delta query paging; the last page should carry a delta link.
    pub fn delta() -> Self {
        Self { delta: true }
    }
}

impl LinkFormat for ODataLinks {
    fn items(&self, body: &mut Value) -> Result<Vec<Value>> {
        take_array(body, "value")
    }

    fn next_request(&self, body: &Value, _current: &PageRequest, _items: &[Value]) -> Option<PageRequest> {
        // Next links embed the full query string.
        body.get("@odata.nextLink")
            .and_then(Value::as_str)
            .map(PageRequest::new)
    }

    fn delta_link(&self, body: &Value) -> Option<String> {
        body.get("@odata.deltaLink")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn expects_delta_link(&self) -> bool {
        self.delta
    }
}

/// Asana REST paging: `data` and `next_page.uri`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsanaLinks;

impl LinkFormat for AsanaLinks {
    fn items(&self, body: &mut Value) -> Result<Vec<Value>> {
        take_array(body, "data")
    }

    fn next_request(&self, body: &Value, _current: &PageRequest, _items: &[Value]) -> Option<PageRequest> {
        body.get("next_page")
            .and_then(|next| next.get("uri"))
            .and_then(Value::as_str)
            .map(PageRequest::new)
    }
}

/// Asana search paging.
///
/// The search endpoint has no next link. Results are sorted by creation time
/// ascending, so parent tasks come before their subtasks, and a full page
/// continues with `created_at.after` set one second before the last item's
/// creation time. Tasks sharing the boundary second are fetched again on the
/// next page; callers drop the repeats by gid.
#[derive(Debug, Clone, Copy)]
pub struct AsanaSearchLinks {
    pub limit: usize,
}

impl AsanaSearchLinks {
    pub const AFTER_PARAM: &'static str = "created_at.after";
}

impl LinkFormat for AsanaSearchLinks {
    fn items(&self, body: &mut Value) -> Result<Vec<Value>> {
        take_array(body, "data")
    }

    fn next_request(&self, _body: &Value, current: &PageRequest, items: &[Value]) -> Option<PageRequest> {
        if self.limit == 0 || items.len() < self.limit {
            return None;
        }
        let Some(last) = items.last().and_then(|t| t.get("created_at")).and_then(Value::as_str) else {
            warn!("Search page without created_at on its last task, stopping");
            return None;
        };
        let last = match DateTime::parse_from_rfc3339(last) {
            Ok(at) => at.with_timezone(&Utc),
            Err(err) => {
                warn!(created_at = last, error = %err, "Unparseable created_at on search page, stopping");
                return None;
            }
        };

        let after = last - Duration::seconds(1);
        let previous = current
            .get_param(Self::AFTER_PARAM)
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
            .map(|at| at.with_timezone(&Utc));
        if previous.is_some_and(|previous| after <= previous) {
            // A full page created within one second; the rest cannot be reached.
            warn!(after = %after, "Search page did not advance, stopping");
            return None;
        }

        let mut next = current.clone();
        next.set_param(Self::AFTER_PARAM, after.to_rfc3339_opts(SecondsFormat::Millis, true));
        Some(next)
    }
}

/// Use `fallback` if `primary` fails before yielding anything.
///
/// Only the first error is considered, and only when `should_fall_back`
/// accepts it. Errors after the first item pass through unchanged.
pub fn with_fallback<T, F, P>(
    primary: BoxStream<'static, Result<T>>,
    fallback: F,
    should_fall_back: P,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> BoxStream<'static, Result<T>> + Send + 'static,
    P: Fn(&Error) -> bool + Send + 'static,
{
    struct State<T, F, P> {
        current: BoxStream<'static, Result<T>>,
        fallback: Option<F>,
        should_fall_back: P,
        started: bool,
    }

    let state = State {
        current: primary,
        fallback: Some(fallback),
        should_fall_back,
        started: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.current.next().await {
                Some(Err(err)) if !state.started && (state.should_fall_back)(&err) => {
                    match state.fallback.take() {
                        Some(fallback) => {
                            warn!(error = %err, "Primary walk unavailable, using fallback");
                            state.current = fallback();
                        }
                        None => return Some((Err(err), state)),
                    }
                }
                Some(item) => {
                    state.started = true;
                    return Some((item, state));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
