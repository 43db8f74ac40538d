//! HTTP/JSON gateway.
//!
//! [`HttpGateway`] maps the [`RemoteGateway`] operations onto the REST API.
//! The HTTP client is abstracted via [`HttpClient`] so different libraries
//! (reqwest, hyper, an in-process server) can carry the requests.

use crate::config::EngineConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{RemoteCategory, RemoteExpense, RemoteGateway};
use crate::wire::{self, CategoryDto, ExpenseDto, ListEnvelope};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use walletsync_core::{Category, Expense, RemoteId, UserId};

/// Longest response body kept in a [`GatewayError::ServerRejected`].
const MAX_ERROR_BODY: usize = 512;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Full request URL, path segments percent-encoded.
    pub url: Url,
    /// Endpoint segments relative to the base URL, as given.
    pub endpoint: Vec<String>,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Builds a request for `endpoint` under `base`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Protocol`] if `base` cannot carry a path.
    pub fn new(
        method: Method,
        base: &Url,
        endpoint: &[&str],
        body: Option<Vec<u8>>,
    ) -> GatewayResult<Self> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::protocol(format!("base URL cannot carry a path: {base}")))?
            .pop_if_empty()
            .extend(endpoint);
        Ok(Self {
            method,
            url,
            endpoint: endpoint.iter().map(|s| s.to_string()).collect(),
            body,
        })
    }

    /// Endpoint segments relative to the base URL.
    pub fn segments(&self) -> &[String] {
        &self.endpoint
    }
}

/// A response from the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a response with a JSON body.
    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> GatewayResult<Self> {
        Ok(Self::new(status, wire::encode(value)?))
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations map transport failures onto [`GatewayError`]: a refused or
/// unroutable connection is [`GatewayError::NetworkUnreachable`]. Non-2xx
/// statuses are returned as responses, not errors.
pub trait HttpClient: Send + Sync {
    /// Sends `request` and returns the response.
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = GatewayResult<HttpResponse>> + Send;
}

/// REST implementation of [`RemoteGateway`].
pub struct HttpGateway<C: HttpClient> {
    base_url: Url,
    client: C,
    timeout: Duration,
}

impl<C: HttpClient> HttpGateway<C> {
    /// Creates a gateway for the API at `base_url`, with a 15 second timeout.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Protocol`] if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str, client: C) -> GatewayResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::protocol(format!("invalid base URL {base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(GatewayError::protocol(format!(
                "base URL must be http or https: {base_url}"
            )));
        }
        Ok(Self {
            base_url,
            client,
            timeout: Duration::from_secs(15),
        })
    }

    /// Creates a gateway using the URL and timeout of `config`.
    pub fn from_config(config: &EngineConfig, client: C) -> GatewayResult<Self> {
        Ok(Self::new(&config.base_url, client)?.with_timeout(config.request_timeout))
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn call(
        &self,
        method: Method,
        endpoint: &[&str],
        body: Option<Vec<u8>>,
    ) -> GatewayResult<Vec<u8>> {
        let request = HttpRequest::new(method, &self.base_url, endpoint, body)?;
        let path = request.url.path().to_string();
        debug!(method = %method, path = %path, "remote call");

        let response = match tokio::time::timeout(self.timeout, self.client.send(request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(method = %method, path = %path, timeout = ?self.timeout, "remote call timed out");
                return Err(GatewayError::Timeout);
            }
        };

        if !response.is_success() {
            let body: String = String::from_utf8_lossy(&response.body)
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            debug!(method = %method, path = %path, status = response.status, "remote rejected call");
            return Err(GatewayError::ServerRejected {
                status: response.status,
                body,
            });
        }
        Ok(response.body)
    }
}

impl<C: HttpClient> RemoteGateway for HttpGateway<C> {
    async fn create_expense(&self, expense: &Expense) -> GatewayResult<Option<RemoteId>> {
        let body = wire::encode(&ExpenseDto::from_expense(expense))?;
        let reply = self
            .call(Method::Post, &["add-expense"], Some(body))
            .await?;
        Ok(wire::decode_mutation(&reply)?.remote_id())
    }

    async fn list_expenses(&self, user: &UserId) -> GatewayResult<Vec<RemoteExpense>> {
        let reply = self
            .call(Method::Get, &["get-expenses", user.as_str()], None)
            .await?;
        let envelope: ListEnvelope<ExpenseDto> = wire::decode(&reply)?;
        envelope.data.into_iter().map(ExpenseDto::into_remote).collect()
    }

    async fn update_expense(&self, remote_id: &RemoteId, expense: &Expense) -> GatewayResult<()> {
        let body = wire::encode(&ExpenseDto::from_expense(expense))?;
        self.call(Method::Put, &["update-expense", remote_id.as_str()], Some(body))
            .await
            .map(drop)
    }

    async fn delete_expense(&self, remote_id: &RemoteId, user: &UserId) -> GatewayResult<()> {
        let endpoint = ["delete-expense", remote_id.as_str(), user.as_str()];
        self.call(Method::Delete, &endpoint, None).await.map(drop)
    }

    async fn create_category(&self, category: &Category) -> GatewayResult<Option<RemoteId>> {
        let body = wire::encode(&CategoryDto::from_category(category))?;
        let reply = self
            .call(Method::Post, &["categories", "add"], Some(body))
            .await?;
        Ok(wire::decode_mutation(&reply)?.remote_id())
    }

    async fn list_categories(&self, user: &UserId) -> GatewayResult<Vec<RemoteCategory>> {
        let reply = self
            .call(Method::Get, &["get-categories", user.as_str()], None)
            .await?;
        let envelope: ListEnvelope<CategoryDto> = wire::decode(&reply)?;
        envelope.data.into_iter().map(CategoryDto::into_remote).collect()
    }

    async fn update_category(
        &self,
        remote_id: &RemoteId,
        category: &Category,
    ) -> GatewayResult<()> {
        let body = wire::encode(&CategoryDto::from_category(category))?;
        self.call(Method::Put, &["update-category", remote_id.as_str()], Some(body))
            .await
            .map(drop)
    }

    async fn delete_category(&self, remote_id: &RemoteId, user: &UserId) -> GatewayResult<()> {
        let endpoint = ["delete-category", remote_id.as_str(), user.as_str()];
        self.call(Method::Delete, &endpoint, None).await.map(drop)
    }
}

impl<C: HttpClient> fmt::Debug for HttpGateway<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Servers that can answer requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles `request`. An error stands for a transport failure.
    fn handle(&self, request: &HttpRequest) -> GatewayResult<HttpResponse>;
}

impl<S: LoopbackServer> LoopbackServer for std::sync::Arc<S> {
    fn handle(&self, request: &HttpRequest) -> GatewayResult<HttpResponse> {
        (**self).handle(request)
    }
}

/// An HTTP client that routes requests directly to a [`LoopbackServer`].
///
/// Useful for testing the REST mapping without a network.
#[derive(Debug)]
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, request: HttpRequest) -> GatewayResult<HttpResponse> {
        self.server.handle(&request)
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{HttpClient, HttpRequest, HttpResponse, Method};
    use crate::error::{GatewayError, GatewayResult};
    use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
    use std::time::Duration;

    /// [`HttpClient`] backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Creates a client whose requests give up after `timeout`.
        pub fn new(timeout: Duration) -> GatewayResult<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::protocol(format!("building http client: {e}")))?;
            Ok(Self { client })
        }

        /// Wraps an existing `reqwest` client.
        pub fn from_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl HttpClient for ReqwestClient {
        async fn send(&self, request: HttpRequest) -> GatewayResult<HttpResponse> {
            let url = request.url;
            let builder = match request.method {
                Method::Get => self.client.get(url),
                Method::Post => self.client.post(url),
                Method::Put => self.client.put(url),
                Method::Delete => self.client.delete(url),
            };
            let builder = builder.header(ACCEPT, HeaderValue::from_static("application/json"));
            let builder = match request.body {
                Some(body) => builder
                    .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                    .body(body),
                None => builder,
            };

            let response = builder.send().await.map_err(map_error)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(map_error)?;
            Ok(HttpResponse::new(status, body.to_vec()))
        }
    }

    fn map_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() || err.is_request() {
            GatewayError::unreachable(err.to_string())
        } else {
            GatewayError::protocol(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use walletsync_core::{Decimal, NewExpense, RecordStore};

    /// Records requests and answers with a fixed response.
    struct ScriptedClient {
        response: HttpResponse,
        delay: Option<Duration>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                response: HttpResponse::new(status, body.as_bytes().to_vec()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().last().cloned().unwrap()
        }
    }

    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> GatewayResult<HttpResponse> {
            self.seen.lock().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.response.clone())
        }
    }

    fn sample_expense() -> Expense {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_expense(NewExpense::new(
                UserId::new("user 1"),
                "Mart",
                Decimal::new(450, 2),
                "Food",
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn create_posts_json_and_reads_id() {
        let client = ScriptedClient::replying(201, r#"{"message":"Expense added","id":"doc-7"}"#);
        let gateway = HttpGateway::new("http://api.test/api/", client).unwrap();

        let id = gateway.create_expense(&sample_expense()).await.unwrap();
        assert_eq!(id, Some(RemoteId::new("doc-7")));

        let request = gateway.client().last();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url.as_str(), "http://api.test/api/add-expense");
        let body: serde_json::Value = serde_json::from_slice(&request.body.unwrap()).unwrap();
        assert_eq!(body["storeName"], "Mart");
        assert_eq!(body["price"], 4.5);
        assert_eq!(body["userID"], "user 1");
    }

    #[tokio::test]
    async fn delete_encodes_path_segments() {
        let client = ScriptedClient::replying(200, r#"{"message":"deleted"}"#);
        let gateway = HttpGateway::new("http://api.test", client).unwrap();
        gateway
            .delete_expense(&RemoteId::new("a/b"), &UserId::new("user 1"))
            .await
            .unwrap();

        let request = gateway.client().last();
        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.url.path(), "/delete-expense/a%2Fb/user%201");
        assert_eq!(request.segments(), ["delete-expense", "a/b", "user 1"]);
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let client = ScriptedClient::replying(400, "price must be a number");
        let gateway = HttpGateway::new("http://api.test", client).unwrap();
        let err = gateway
            .update_expense(&RemoteId::new("x"), &sample_expense())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::ServerRejected {
                status: 400,
                body: "price must be a number".into()
            }
        );
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let mut client = ScriptedClient::replying(200, "{}");
        client.delay = Some(Duration::from_secs(5));
        let gateway =
            HttpGateway::new("http://api.test", client).unwrap().with_timeout(Duration::from_millis(20));
        let err = gateway.list_categories(&UserId::new("u")).await.unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
    }

    #[tokio::test]
    async fn garbage_listing_is_a_protocol_error() {
        let client = ScriptedClient::replying(200, "<html>oops</html>");
        let gateway = HttpGateway::new("http://api.test", client).unwrap();
        let err = gateway.list_expenses(&UserId::new("u")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn requests_nest_under_the_base_path() {
        let base = Url::parse("http://api.test/v2/api/").unwrap();
        let request =
            HttpRequest::new(Method::Get, &base, &["get-expenses", "ana maria/ü"], None).unwrap();
        assert_eq!(
            request.url.as_str(),
            "http://api.test/v2/api/get-expenses/ana%20maria%2F%C3%BC"
        );
        assert_eq!(request.segments(), ["get-expenses", "ana maria/ü"]);
    }

    #[test]
    fn base_url_must_be_http() {
        let client = ScriptedClient::replying(200, "{}");
        assert!(matches!(
            HttpGateway::new("mailto:wallet@example.com", client),
            Err(GatewayError::Protocol(_))
        ));
        let client = ScriptedClient::replying(200, "{}");
        assert!(HttpGateway::new("not a url", client).is_err());
    }
}
