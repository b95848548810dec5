//! Learns the shape of an "update task" request from calls the host application makes.

use crate::contract::{ContractStatus, FieldPaths, SemanticField, WriteContract};
use crate::convert::ValueKind;
use crate::path::{find_first_path, get_by_path, leaf_paths, path_contains_any};
use crate::transport::Method;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use time::OffsetDateTime;

static URL_ENTITY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/tasks/([a-f0-9]{24})(?:[/?#]|$)").unwrap());
static HEX_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-f0-9]{24}$").unwrap());

const ID_PATH_HINTS: [&str; 3] = ["id", "_id", "task"];

/// One outgoing call as seen by the observation hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedCall {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub status: u16,
}

pub fn entity_id_from_url(url: &str) -> Option<String> {
    URL_ENTITY_ID
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

/// Every `(path, id)` whose path hints at an identifier and whose value is a 24-hex string.
pub fn id_candidates(body: &Value) -> Vec<(String, String)> {
    leaf_paths(body)
        .into_iter()
        .filter(|path| path_contains_any(path, &ID_PATH_HINTS))
        .filter_map(|path| match get_by_path(body, &path) {
            Some(Value::String(value)) if HEX_ID.is_match(value) => {
                let value = value.clone();
                Some((path, value))
            }
            _ => None,
        })
        .collect()
}

pub fn entity_id_from_body(body: &Value) -> Option<String> {
    id_candidates(body).into_iter().next().map(|(_, id)| id)
}

pub fn guess_field_paths(body: &Value) -> FieldPaths {
    let mut paths = FieldPaths::default();
    for field in SemanticField::ALL {
        paths.set(field, find_first_path(body, field.keywords()));
    }
    paths
}

#[derive(Debug, Clone)]
pub struct ContractInference {
    namespace: String,
}

impl ContractInference {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn qualifies(&self, call: &ObservedCall) -> bool {
        if !call.method.is_write() || !(200..300).contains(&call.status) {
            return false;
        }
        if self.namespace.is_empty() || !call.url.contains(&self.namespace) {
            return false;
        }
        if !has_tasks_segment(&call.url) {
            return false;
        }
        match call.body.as_ref() {
            Some(body @ Value::Object(_)) => SemanticField::ALL
                .iter()
                .any(|field| find_first_path(body, field.keywords()).is_some()),
            _ => false,
        }
    }

    /// A contract learned from `call`, or `None` when the call is not an entity update.
    pub fn extract(&self, call: &ObservedCall) -> Option<WriteContract> {
        if !self.qualifies(call) {
            return None;
        }
        let body = call.body.as_ref()?;
        let field_paths = guess_field_paths(body);
        let done_value_type = field_paths
            .done
            .as_deref()
            .and_then(|path| get_by_path(body, path))
            .map(ValueKind::of);
        let sample_entity_id = entity_id_from_url(&call.url)
            .or_else(|| entity_id_from_body(body))
            .unwrap_or_default();

        Some(WriteContract {
            status: ContractStatus::Ready,
            method: call.method,
            url: call.url.clone(),
            sample_entity_id,
            body_template: Some(body.clone()),
            field_paths,
            done_value_type,
            captured_at: Some(OffsetDateTime::now_utc()),
            last_error: None,
        })
    }
}

fn has_tasks_segment(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').any(|segment| segment == "tasks")
}

#[cfg(test)]
mod tests {
    use super::{
        ContractInference, ObservedCall, entity_id_from_body, entity_id_from_url,
        guess_field_paths,
    };
    use crate::contract::ContractStatus;
    use crate::convert::ValueKind;
    use crate::transport::Method;
    use serde_json::{Value, json};

    const ID: &str = "65a1b2c3d4e5f60718293a4b";

    fn call(url: &str, body: Value) -> ObservedCall {
        ObservedCall {
            method: Method::Patch,
            url: url.to_string(),
            headers: Vec::new(),
            body: Some(body),
            status: 200,
        }
    }

    #[test]
    fn learns_from_a_task_update() {
        let inference = ContractInference::new("task-management-api");
        let observed = call(
            &format!("https://host/task-management-api/v1/locations/l/tasks/{ID}"),
            json!({"title": "X", "due": 1_700_000_000, "status": "OPEN"}),
        );

        let contract = inference.extract(&observed).unwrap();
        assert_eq!(contract.status, ContractStatus::Ready);
        assert_eq!(contract.field_paths.name.as_deref(), Some("title"));
        assert_eq!(contract.field_paths.due_date.as_deref(), Some("due"));
        assert_eq!(contract.field_paths.done.as_deref(), Some("status"));
        assert_eq!(contract.field_paths.notes, None);
        assert_eq!(contract.done_value_type, Some(ValueKind::String));
        assert_eq!(contract.sample_entity_id, ID);
        assert_eq!(contract.method, Method::Patch);
    }

    #[test]
    fn rejects_unrelated_api_paths() {
        let inference = ContractInference::new("task-management-api");
        let observed = call(
            &format!("https://host/members-api/v1/users/{ID}"),
            json!({"title": "X", "due": 1_700_000_000, "status": "OPEN"}),
        );
        assert!(!inference.qualifies(&observed));
        assert!(inference.extract(&observed).is_none());
    }

    #[test]
    fn rejects_failed_reads_and_bodiless_calls() {
        let inference = ContractInference::new("task-management-api");
        let url = format!("https://host/task-management-api/v1/tasks/{ID}");

        let mut failed = call(&url, json!({"name": "x"}));
        failed.status = 422;
        assert!(!inference.qualifies(&failed));

        let mut read = call(&url, json!({"name": "x"}));
        read.method = Method::Get;
        assert!(!inference.qualifies(&read));

        let mut empty = call(&url, json!({"name": "x"}));
        empty.body = None;
        assert!(!inference.qualifies(&empty));

        assert!(!inference.qualifies(&call(&url, json!({"color": "red"}))));
        assert!(!inference.qualifies(&call(&url, json!(["name"]))));
        assert!(!inference.qualifies(&call(
            "https://host/task-management-api/v1/taskset",
            json!({"name": "x"})
        )));
    }

    #[test]
    fn entity_id_prefers_url_then_body() {
        assert_eq!(
            entity_id_from_url(&format!("https://h/tasks/{ID}?x=1")).as_deref(),
            Some(ID)
        );
        assert_eq!(entity_id_from_url(&format!("https://h/tasks/{ID}extra")), None);
        assert_eq!(
            entity_id_from_body(&json!({"task": {"_id": ID}, "owner": "65a1b2c3d4e5f60718293a4c"}))
                .as_deref(),
            Some(ID)
        );
        assert_eq!(entity_id_from_body(&json!({"_id": "short"})), None);
    }

    #[test]
    fn body_id_is_used_when_url_has_none() {
        let inference = ContractInference::new("task-management-api");
        let observed = call(
            "https://host/task-management-api/v1/tasks/update",
            json!({"task_id": ID, "data": {"name": "x"}}),
        );
        let contract = inference.extract(&observed).unwrap();
        assert_eq!(contract.sample_entity_id, ID);
        assert_eq!(contract.field_paths.name.as_deref(), Some("data.name"));
    }

    #[test]
    fn guesses_nested_paths_in_document_order() {
        let paths = guess_field_paths(&json!({
            "fields": [{"description": "n"}, {"execution_date": "2024-01-01"}],
            "is_done": false
        }));
        assert_eq!(paths.notes.as_deref(), Some("fields.0.description"));
        assert_eq!(paths.due_date.as_deref(), Some("fields.1.execution_date"));
        assert_eq!(paths.done.as_deref(), Some("is_done"));
        assert_eq!(paths.name, None);
    }
}
