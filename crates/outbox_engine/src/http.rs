//! HTTP remote store implementation.
//!
//! This module maps [`WriteOperation`]s onto a PostgREST-style REST
//! interface. The actual HTTP client is abstracted via a trait so request
//! building and status classification can be tested without a network.
//!
//! | operation | request |
//! |-----------|---------|
//! | upsert    | `POST {rest}/{table}?on_conflict={cols}` with `Prefer: resolution=merge-duplicates` |
//! | patch     | `PATCH {rest}/{table}?{col}=eq.{value}&...` |
//! | ping      | `GET {rest}/` (any HTTP answer counts as reachable) |

use crate::config::RemoteConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{ConnectivityProbe, RemoteStore};
use outbox_store::WriteOperation;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// HTTP method used by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PATCH.
    Patch,
}

/// A fully built HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL including query.
    pub url: Url,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
    /// Total time allowed for the exchange.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Returns the value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body as text.
    pub body: String,
}

/// HTTP client abstraction.
///
/// Implement this trait to plug in a different HTTP library or a test stub.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns whatever the server answered.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Timeout`] or [`RemoteError::Connect`] when no
    /// response was received.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError>;
}

/// Blocking `reqwest` client.
///
/// The blocking client is used because deliveries run on the caller's
/// thread or on the dedicated worker thread, neither of which is async.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client with the given connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the TLS backend cannot be initialized.
    pub fn new(connect_timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_builder() {
        RemoteError::malformed(err.to_string())
    } else {
        RemoteError::connect(err.to_string())
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| classify_reqwest_error(&e))?;
        Ok(HttpResponse { status, body })
    }
}

/// Remote store speaking a PostgREST-style REST interface.
pub struct HttpRemoteStore<C: HttpClient = ReqwestClient> {
    rest_url: Url,
    api_key: String,
    client: C,
}

impl HttpRemoteStore<ReqwestClient> {
    /// Connects to the backend described by `config` using `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the base URL is invalid or the client cannot be
    /// built.
    pub fn connect(config: &RemoteConfig) -> SyncResult<Self> {
        let client = ReqwestClient::new(config.connect_timeout)?;
        Self::with_client(config, client)
    }
}

impl<C: HttpClient> HttpRemoteStore<C> {
    /// Creates a remote store over a custom HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the base URL is invalid.
    pub fn with_client(config: &RemoteConfig, client: C) -> SyncResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Config(format!("invalid base URL {:?}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "base URL cannot carry a path: {}",
                config.base_url
            )));
        }

        let mut rest_url = base;
        {
            let mut segments = rest_url
                .path_segments_mut()
                .map_err(|()| SyncError::Config("base URL cannot carry a path".into()))?;
            segments.pop_if_empty();
            for segment in config.rest_path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }

        Ok(Self {
            rest_url,
            api_key: config.api_key.clone(),
            client,
        })
    }

    /// Returns the REST root, e.g. `https://db.example.com/rest/v1`.
    pub fn rest_url(&self) -> &Url {
        &self.rest_url
    }

    /// Returns the underlying HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
        if table.is_empty() {
            return Err(RemoteError::malformed("empty table name"));
        }
        let mut url = self.rest_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::malformed("REST URL cannot carry a path"))?
            .push(table);
        Ok(url)
    }

    fn headers(&self, prefer: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![
            ("apikey".to_string(), self.api_key.clone()),
            ("Authorization".to_string(), format!("Bearer {}", self.api_key)),
        ];
        if let Some(prefer) = prefer {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
            headers.push(("Prefer".to_string(), prefer.to_string()));
        }
        headers
    }

    /// Builds the request for `operation`, or `None` if there is nothing to
    /// send.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for operations the backend could never accept,
    /// such as a patch without a filter.
    pub fn build_request(
        &self,
        operation: &WriteOperation,
        timeout: Duration,
    ) -> Result<Option<HttpRequest>, RemoteError> {
        match operation {
            WriteOperation::Upsert {
                table,
                rows,
                on_conflict,
            } => {
                if rows.is_empty() {
                    return Ok(None);
                }
                let columns = operation.conflict_columns();
                if columns.is_empty() {
                    return Err(RemoteError::malformed(format!(
                        "upsert into {table} has no conflict columns"
                    )));
                }
                for row in rows {
                    if let Some(missing) = columns.iter().find(|c| !row.contains_key(**c)) {
                        return Err(RemoteError::malformed(format!(
                            "upsert into {table} has a row without conflict column {missing} ({on_conflict})"
                        )));
                    }
                }

                let mut url = self.table_url(table)?;
                url.query_pairs_mut()
                    .append_pair("on_conflict", &columns.join(","));
                let body = serde_json::to_vec(rows)
                    .map_err(|e| RemoteError::malformed(e.to_string()))?;

                Ok(Some(HttpRequest {
                    method: HttpMethod::Post,
                    url,
                    headers: self.headers(Some("resolution=merge-duplicates,return=minimal")),
                    body: Some(body),
                    timeout,
                }))
            }
            WriteOperation::Patch {
                table,
                filter,
                patch,
            } => {
                // An empty filter would update every row of the table.
                if filter.is_empty() {
                    return Err(RemoteError::malformed(format!(
                        "patch of {table} has an empty match filter"
                    )));
                }
                if patch.is_empty() {
                    return Ok(None);
                }

                let mut url = self.table_url(table)?;
                {
                    let mut query = url.query_pairs_mut();
                    for (column, value) in filter {
                        query.append_pair(column, &filter_expression(value)?);
                    }
                }
                let body = serde_json::to_vec(patch)
                    .map_err(|e| RemoteError::malformed(e.to_string()))?;

                Ok(Some(HttpRequest {
                    method: HttpMethod::Patch,
                    url,
                    headers: self.headers(Some("return=minimal")),
                    body: Some(body),
                    timeout,
                }))
            }
        }
    }
}

/// Renders one equality filter value in PostgREST syntax.
fn filter_expression(value: &Value) -> Result<String, RemoteError> {
    match value {
        Value::Null => Ok("is.null".to_string()),
        Value::Bool(b) => Ok(format!("is.{b}")),
        Value::Number(n) => Ok(format!("eq.{n}")),
        Value::String(s) => Ok(format!("eq.{s}")),
        Value::Array(_) | Value::Object(_) => Err(RemoteError::malformed(
            "match filter values must be scalars",
        )),
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

impl<C: HttpClient> RemoteStore for HttpRemoteStore<C> {
    fn execute(&self, operation: &WriteOperation, timeout: Duration) -> Result<(), RemoteError> {
        let Some(request) = self.build_request(operation, timeout)? else {
            return Ok(());
        };

        let response = self.client.send(&request)?;
        if (200..300).contains(&response.status) {
            Ok(())
        } else {
            Err(RemoteError::from_status(
                response.status,
                truncate_body(response.body),
            ))
        }
    }
}

impl<C: HttpClient> ConnectivityProbe for HttpRemoteStore<C> {
    fn ping(&self, timeout: Duration) -> bool {
        let mut url = self.rest_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("");
        }
        let request = HttpRequest {
            method: HttpMethod::Get,
            url,
            headers: self.headers(None),
            body: None,
            timeout,
        };

        match self.client.send(&request) {
            Ok(response) => {
                tracing::debug!(status = response.status, "connectivity probe answered");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_store::Row;
    use parking_lot::Mutex;
    use serde_json::json;

    struct TestClient {
        response: Mutex<Result<HttpResponse, RemoteError>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl TestClient {
        fn answering(status: u16, body: &str) -> Self {
            Self {
                response: Mutex::new(Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                })),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: RemoteError) -> Self {
            Self {
                response: Mutex::new(Err(err)),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn last(&self) -> HttpRequest {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    impl HttpClient for TestClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError> {
            self.sent.lock().push(request.clone());
            self.response.lock().clone()
        }
    }

    fn store(client: TestClient) -> HttpRemoteStore<TestClient> {
        let config = RemoteConfig::new("https://db.example.com", "secret");
        HttpRemoteStore::with_client(&config, client).unwrap()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    const T: Duration = Duration::from_secs(4);

    #[test]
    fn rest_url_joins_prefix() {
        let store = store(TestClient::answering(200, ""));
        assert_eq!(store.rest_url().as_str(), "https://db.example.com/rest/v1");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let config = RemoteConfig::new("not a url", "k");
        let result = HttpRemoteStore::with_client(&config, TestClient::answering(200, ""));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn upsert_request_shape() {
        let store = store(TestClient::answering(201, ""));
        let op = WriteOperation::upsert(
            "empresas",
            vec![row(json!({"id": 1, "estado": "Activa"}))],
            "id",
        );
        store.execute(&op, T).unwrap();

        let request = store.client().last();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.url.as_str(),
            "https://db.example.com/rest/v1/empresas?on_conflict=id"
        );
        assert_eq!(request.header("apikey"), Some("secret"));
        assert_eq!(request.header("authorization"), Some("Bearer secret"));
        assert_eq!(
            request.header("Prefer"),
            Some("resolution=merge-duplicates,return=minimal")
        );
        let body: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!([{"id": 1, "estado": "Activa"}]));
        assert_eq!(request.timeout, T);
    }

    #[test]
    fn patch_request_shape() {
        let store = store(TestClient::answering(204, ""));
        let op = WriteOperation::patch(
            "usuarios",
            row(json!({"usuario": "ana", "activo": true})),
            row(json!({"clave": "x"})),
        );
        store.execute(&op, T).unwrap();

        let request = store.client().last();
        assert_eq!(request.method, HttpMethod::Patch);
        let query: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert!(query.contains(&("usuario".into(), "eq.ana".into())));
        assert!(query.contains(&("activo".into(), "is.true".into())));
        assert_eq!(request.header("Prefer"), Some("return=minimal"));
    }

    #[test]
    fn empty_writes_skip_the_network() {
        let store = store(TestClient::answering(500, ""));
        store
            .execute(&WriteOperation::upsert("empresas", vec![], "id"), T)
            .unwrap();
        store
            .execute(
                &WriteOperation::patch("empresas", row(json!({"id": 1})), Row::new()),
                T,
            )
            .unwrap();
        assert!(store.client().sent.lock().is_empty());
    }

    #[test]
    fn unsafe_or_invalid_writes_are_malformed() {
        let store = store(TestClient::answering(200, ""));

        let all_rows = WriteOperation::patch("empresas", Row::new(), row(json!({"estado": "x"})));
        assert!(matches!(store.execute(&all_rows, T), Err(RemoteError::Malformed(_))));

        let missing_key =
            WriteOperation::upsert("empresas", vec![row(json!({"estado": "x"}))], "id");
        assert!(matches!(store.execute(&missing_key, T), Err(RemoteError::Malformed(_))));

        let no_table = WriteOperation::upsert("", vec![row(json!({"id": 1}))], "id");
        assert!(matches!(store.execute(&no_table, T), Err(RemoteError::Malformed(_))));
    }

    #[test]
    fn status_classification() {
        let op = WriteOperation::upsert("empresas", vec![row(json!({"id": 1}))], "id");

        let err = store(TestClient::answering(400, "bad column"))
            .execute(&op, T)
            .unwrap_err();
        assert_eq!(err, RemoteError::from_status(400, "bad column"));
        assert!(!err.is_transient());

        let err = store(TestClient::answering(503, "")).execute(&op, T).unwrap_err();
        assert!(err.is_transient());

        let err = store(TestClient::failing(RemoteError::Timeout))
            .execute(&op, T)
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let op = WriteOperation::upsert("empresas", vec![row(json!({"id": 1}))], "id");
        let body = "é".repeat(MAX_ERROR_BODY);
        let err = store(TestClient::answering(422, &body)).execute(&op, T).unwrap_err();
        match err {
            RemoteError::Http { body, .. } => assert!(body.len() <= MAX_ERROR_BODY),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ping_treats_any_answer_as_reachable() {
        let store_ok = store(TestClient::answering(404, ""));
        assert!(store_ok.ping(Duration::from_secs(1)));
        assert_eq!(
            store_ok.client().last().url.as_str(),
            "https://db.example.com/rest/v1/"
        );

        let store_down = store(TestClient::failing(RemoteError::connect("refused")));
        assert!(!store_down.ping(Duration::from_secs(1)));
    }
}
