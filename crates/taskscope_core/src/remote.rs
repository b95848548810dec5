//! The remote task collection: fetch the whole collection, send updates, complete tasks.

use crate::credentials::Credentials;
use crate::error::AppError;
use crate::model::{Task, extract_list, normalize_task, value_text};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://app.glofox.com";
pub const DEFAULT_NAMESPACE: &str = "task-management-api";
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_FETCH_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub namespace: String,
}

impl Endpoints {
    pub fn new(base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        let namespace = namespace.into().trim().trim_matches('/').to_string();
        Self {
            base_url,
            namespace,
        }
    }

    pub fn tasks_url(&self, location_id: &str) -> String {
        format!(
            "{}/{}/v1/locations/{}/tasks",
            self.base_url, self.namespace, location_id
        )
    }

    pub fn collection_url(&self, location_id: &str, limit: u32) -> String {
        format!("{}?offset=0&limit={limit}", self.tasks_url(location_id))
    }

    pub fn task_url(&self, location_id: &str, task_id: &str) -> String {
        format!("{}/{}", self.tasks_url(location_id), task_id)
    }

    pub fn completion_url(&self, location_id: &str, task_id: &str) -> String {
        format!("{}/completion", self.task_url(location_id, task_id))
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_NAMESPACE)
    }
}

/// A fetched collection plus what was learned about the response shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedCollection {
    pub tasks: Vec<Task>,
    pub http_status: u16,
    pub list_source: &'static str,
    pub list_count: usize,
}

/// Result of a write call. A non-success status is data, not an error, so the
/// executor can decide on a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub ok: bool,
    pub status: u16,
    pub code: String,
    pub message: String,
    pub data: Option<Value>,
}

impl WriteOutcome {
    fn from_response(response: HttpResponse) -> Self {
        if response.is_success() {
            return Self {
                ok: true,
                status: response.status,
                code: String::new(),
                message: String::new(),
                data: response.body,
            };
        }
        let field = |key: &str| {
            response
                .body
                .as_ref()
                .and_then(|body| body.get(key))
                .map(value_text)
                .unwrap_or_default()
        };
        let code = field("code");
        let message = match field("message") {
            message if message.is_empty() && response.body.is_none() => {
                response.text.trim().to_string()
            }
            message => message,
        };
        Self {
            ok: false,
            status: response.status,
            code,
            message,
            data: response.body,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

pub struct RemoteService<T> {
    transport: T,
    endpoints: Endpoints,
    fetch_timeout: Duration,
    fetch_limit: u32,
}

impl<T: HttpTransport> RemoteService<T> {
    pub fn new(transport: T, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_fetch_limit(mut self, limit: u32) -> Self {
        self.fetch_limit = limit;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Full replace of the collection. Abandoned after the fetch timeout.
    pub async fn fetch_tasks(&self, credentials: &Credentials) -> Result<FetchedCollection, AppError> {
        credentials.require_session()?;
        let url = self
            .endpoints
            .collection_url(&credentials.location_id, self.fetch_limit);
        let request = HttpRequest::new(Method::Get, url).bearer(&credentials.token);

        let response = tokio::time::timeout(self.fetch_timeout, self.transport.send(&request))
            .await
            .map_err(|_| {
                warn!("task fetch timed out after {:?}", self.fetch_timeout);
                AppError::timeout(format!(
                    "task fetch took longer than {} ms",
                    self.fetch_timeout.as_millis()
                ))
            })??;

        if response.is_unauthorized() {
            return Err(AppError::session(format!(
                "unauthorized (HTTP {}); refresh the session and try again",
                response.status
            )));
        }
        if !response.is_success() {
            return Err(AppError::transport(format!(
                "task fetch failed with HTTP {}",
                response.status
            )));
        }

        let payload = response
            .body
            .ok_or_else(|| AppError::invalid_data("task collection is not JSON"))?;
        let (items, list_source) = extract_list(&payload);
        if list_source == "unknown" {
            warn!("task collection has no recognizable list");
        }
        let tasks: Vec<Task> = items.iter().map(normalize_task).collect();
        info!("fetched {} tasks (source: {list_source})", tasks.len());

        Ok(FetchedCollection {
            list_count: items.len(),
            tasks,
            http_status: response.status,
            list_source,
        })
    }

    pub async fn send_write(
        &self,
        method: Method,
        url: &str,
        token: &str,
        payload: &Value,
    ) -> Result<WriteOutcome, AppError> {
        debug!("{} {url}", method.as_str());
        let request = HttpRequest::new(method, url)
            .bearer(token)
            .json(payload.clone());
        let response = self.transport.send(&request).await?;
        Ok(WriteOutcome::from_response(response))
    }

    /// Marks a task completed, which is how the remote service deletes.
    pub async fn complete_task(
        &self,
        credentials: &Credentials,
        task_id: &str,
        completed_at: i64,
    ) -> Result<WriteOutcome, AppError> {
        credentials.require_session()?;
        let url = self
            .endpoints
            .completion_url(&credentials.location_id, task_id);
        let payload = json!({
            "_id": task_id,
            "location_id": credentials.location_id,
            "completion_date": completed_at,
            "completed_by": credentials.actor_id,
        });
        self.send_write(Method::Patch, &url, &credentials.token, &payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{Endpoints, RemoteService, WriteOutcome};
    use crate::credentials::Credentials;
    use crate::transport::{HttpResponse, ReqwestTransport};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            token: "tok".to_string(),
            location_id: "loc-1".to_string(),
            actor_id: "actor-1".to_string(),
        }
    }

    #[test]
    fn endpoints_build_collection_urls() {
        let endpoints = Endpoints::new("https://app.example/", "/task-management-api/");
        assert_eq!(
            endpoints.collection_url("loc", 10_000),
            "https://app.example/task-management-api/v1/locations/loc/tasks?offset=0&limit=10000"
        );
        assert_eq!(
            endpoints.completion_url("loc", "t1"),
            "https://app.example/task-management-api/v1/locations/loc/tasks/t1/completion"
        );
    }

    #[test]
    fn write_outcome_reads_error_code_and_message() {
        let outcome = WriteOutcome::from_response(HttpResponse::new(
            400,
            r#"{"code":"TASKS_CORE_API_MEMBER_DELETED","message":"member gone"}"#,
        ));
        assert!(!outcome.ok);
        assert_eq!(outcome.code, "TASKS_CORE_API_MEMBER_DELETED");
        assert_eq!(outcome.message, "member gone");

        let plain = WriteOutcome::from_response(HttpResponse::new(502, "upstream down\n"));
        assert_eq!(plain.message, "upstream down");
        assert!(plain.code.is_empty());
    }

    #[tokio::test]
    async fn fetch_normalizes_wrapped_collections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task-management-api/v1/locations/loc-1/tasks"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "10000"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"_id": "t1", "name": "first"}, {"_id": "t2", "name": "second"}]
            })))
            .mount(&server)
            .await;

        let remote = RemoteService::new(
            ReqwestTransport::new(),
            Endpoints::new(server.uri(), "task-management-api"),
        );
        let fetched = remote.fetch_tasks(&credentials()).await.unwrap();

        assert_eq!(fetched.list_source, "items");
        assert_eq!(fetched.tasks.len(), 2);
        assert_eq!(fetched.tasks[1].name, "second");
    }

    #[tokio::test]
    async fn fetch_maps_unauthorized_to_session_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let remote = RemoteService::new(
            ReqwestTransport::new(),
            Endpoints::new(server.uri(), "task-management-api"),
        );
        let err = remote.fetch_tasks(&credentials()).await.unwrap_err();
        assert_eq!(err.code(), "no_session");
    }

    #[tokio::test]
    async fn fetch_reports_other_statuses_as_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let remote = RemoteService::new(
            ReqwestTransport::new(),
            Endpoints::new(server.uri(), "task-management-api"),
        );
        let err = remote.fetch_tasks(&credentials()).await.unwrap_err();
        assert_eq!(err.code(), "transport_error");
        assert!(err.message().contains("500"));
    }

    #[tokio::test]
    async fn fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let remote = RemoteService::new(
            ReqwestTransport::new(),
            Endpoints::new(server.uri(), "task-management-api"),
        )
        .with_fetch_timeout(Duration::from_millis(50));
        let err = remote.fetch_tasks(&credentials()).await.unwrap_err();
        assert_eq!(err.code(), "timeout");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_without_session_never_hits_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let remote = RemoteService::new(
            ReqwestTransport::new(),
            Endpoints::new(server.uri(), "task-management-api"),
        );
        let err = remote.fetch_tasks(&Credentials::default()).await.unwrap_err();
        assert_eq!(err.code(), "no_session");
    }

    #[tokio::test]
    async fn complete_task_sends_completion_payload() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/task-management-api/v1/locations/loc-1/tasks/t1/completion"))
            .and(body_json(json!({
                "_id": "t1",
                "location_id": "loc-1",
                "completion_date": 1_700_000_000,
                "completed_by": "actor-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = RemoteService::new(
            ReqwestTransport::new(),
            Endpoints::new(server.uri(), "task-management-api"),
        );
        let outcome = remote
            .complete_task(&credentials(), "t1", 1_700_000_000)
            .await
            .unwrap();
        assert!(outcome.ok);
    }
}
