//! Authenticated JSON GETs with refresh-on-401 and bounded retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use airweave_common::{Error, Result};

use crate::auth::TokenProvider;
use crate::config::SyncConfig;
use crate::pagination::PageFetcher;
use crate::retry::{RetryConfig, RetryExecutor};

/// Graph error codes meaning a delta link can no longer be used.
const DELTA_EXPIRED_CODES: &[&str] = &["syncStateNotFound", "resyncRequired", "syncStateInvalid"];

/// OData error envelope returned by Microsoft Graph.
#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP client shared by every request of one connector instance.
///
/// The only state kept between calls is inside the token provider.
pub struct FetchClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryExecutor,
}

impl FetchClient {
    pub fn new(tokens: Arc<dyn TokenProvider>, config: &SyncConfig) -> Result<Self> {
        Self::with_settings(tokens, config.request_timeout(), config.retry.clone())
    }

    pub fn with_settings(tokens: Arc<dyn TokenProvider>, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("Airweave/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            tokens,
            retry: RetryExecutor::new(retry),
        })
    }

    /// GET `url` with `params` and parse the body as JSON.
    ///
    /// A 401 triggers exactly one token refresh per call. Connection errors,
    /// 429 and 5xx are retried with backoff; other 4xx are returned at once.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn authenticated_get(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        let refreshed = AtomicBool::new(false);
        self.retry
            .execute(|| self.get_once(url, params, &refreshed))
            .await
    }

    async fn get_once(&self, url: &str, params: &[(String, String)], refreshed: &AtomicBool) -> Result<Value> {
        let token = self.tokens.get_access_token().await?;
        let response = self.send(url, params, &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return self.handle_response(url, response).await;
        }

        if refreshed.swap(true, Ordering::SeqCst) {
            return Err(Error::Authentication(format!(
                "401 Unauthorized for {} after token refresh",
                url
            )));
        }

        info!("Access token rejected, refreshing once");
        let token = self.tokens.refresh_on_unauthorized().await.map_err(|e| {
            warn!(error = %e, "Token refresh failed");
            Error::Authentication(format!("401 Unauthorized for {} (refresh failed: {})", url, e))
        })?;

        let response = self.send(url, params, &token).await?;
        self.handle_response(url, response).await
    }

    async fn send(&self, url: &str, params: &[(String, String)], token: &str) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::ACCEPT, "application/json");

        if !params.is_empty() {
            request = request.query(params);
        }

        request
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {}", url, e)))
    }

    async fn handle_response(&self, url: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();

        if status.is_success() {
            debug!(%status, "GET {}", url);
            return response
                .json()
                .await
                .map_err(|e| Error::Serialization(format!("Failed to parse response from {}: {}", url, e)));
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let odata = serde_json::from_str::<ODataError>(&body).ok().map(|e| e.error);

        if let Some(error) = &odata {
            if DELTA_EXPIRED_CODES.iter().any(|code| error.code.contains(code)) {
                return Err(Error::DeltaExpired(format!("{}: {}", error.code, error.message)));
            }
        }

        let message = odata
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or(body);

        Err(match status {
            StatusCode::UNAUTHORIZED => Error::Authentication(format!("401 Unauthorized for {}", url)),
            StatusCode::PAYMENT_REQUIRED => Error::NotEntitled(message),
            StatusCode::NOT_FOUND => Error::NotFound(format!("{}: {}", url, message)),
            StatusCode::GONE => Error::DeltaExpired(message),
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
            _ => Error::Http {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl PageFetcher for FetchClient {
    async fn fetch_page(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        self.authenticated_get(url, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use std::sync::atomic::AtomicU32;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out "old" until refreshed, then "new".
    struct RotatingTokens {
        refreshes: AtomicU32,
        fail_refresh: bool,
    }

    impl RotatingTokens {
        fn new(fail_refresh: bool) -> Arc<Self> {
            Arc::new(Self {
                refreshes: AtomicU32::new(0),
                fail_refresh,
            })
        }
    }

    #[async_trait]
    impl TokenProvider for RotatingTokens {
        async fn get_access_token(&self) -> Result<String> {
            Ok(if self.refreshes.load(Ordering::SeqCst) == 0 { "old" } else { "new" }.to_string())
        }

        async fn refresh_on_unauthorized(&self) -> Result<String> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(Error::Authentication("refresh token revoked".to_string()));
            }
            Ok("new".to_string())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false)
    }

    fn client(tokens: Arc<dyn TokenProvider>) -> FetchClient {
        FetchClient::with_settings(tokens, Duration::from_secs(5), fast_retry()).unwrap()
    }

    #[tokio::test]
    async fn test_get_with_query_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("limit", "100"))
            .and(header_is("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": [1, 2]})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(Arc::new(StaticTokenProvider::new("abc")));
        let body = client
            .authenticated_get(&format!("{}/items", server.uri()), &[("limit".to_string(), "100".to_string())])
            .await
            .unwrap();

        assert_eq!(body["data"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_is("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header_is("authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = RotatingTokens::new(false);
        let body = client(tokens.clone()).authenticated_get(&server.uri(), &[]).await.unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_401_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = RotatingTokens::new(false);
        let result = client(tokens.clone()).authenticated_get(&server.uri(), &[]).await;

        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = RotatingTokens::new(true);
        let err = client(tokens).authenticated_get(&server.uri(), &[]).await.unwrap_err();

        assert!(matches!(err, Error::Authentication(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_5xx_retried_up_to_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let result = client(Arc::new(StaticTokenProvider::new("abc")))
            .authenticated_get(&server.uri(), &[])
            .await;

        assert!(matches!(result, Err(Error::Http { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_5xx_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": []})))
            .mount(&server)
            .await;

        let body = client(Arc::new(StaticTokenProvider::new("abc")))
            .authenticated_get(&server.uri(), &[])
            .await
            .unwrap();
        assert_eq!(body["value"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_4xx_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(Arc::new(StaticTokenProvider::new("abc")))
            .authenticated_get(&server.uri(), &[])
            .await;

        assert!(matches!(result, Err(Error::Http { status: 400, ref message }) if message == "bad request"));
    }

    #[tokio::test]
    async fn test_402_is_not_entitled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(402).set_body_string("premium only"))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(Arc::new(StaticTokenProvider::new("abc")))
            .authenticated_get(&server.uri(), &[])
            .await;

        assert!(matches!(result, Err(Error::NotEntitled(_))));
    }

    #[tokio::test]
    async fn test_expired_delta_detection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resync"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": "resyncRequired", "message": "Resync required."}
            })))
            .mount(&server)
            .await;

        let client = client(Arc::new(StaticTokenProvider::new("abc")));
        for endpoint in ["gone", "resync"] {
            let result = client
                .authenticated_get(&format!("{}/{}", server.uri(), endpoint), &[])
                .await;
            assert!(matches!(result, Err(Error::DeltaExpired(_))), "{endpoint}");
        }
    }

    #[tokio::test]
    async fn test_rate_limit_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let result = client(Arc::new(StaticTokenProvider::new("abc")))
            .authenticated_get(&server.uri(), &[])
            .await;
        assert!(result.is_ok());
    }
}
