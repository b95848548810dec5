//! Builds and sends entity updates against whichever write contract is active.

use crate::contract::{ActiveContract, SemanticField, StaticContract, WriteContract};
use crate::convert::{convert_done, convert_due_date};
use crate::credentials::Credentials;
use crate::error::AppError;
use crate::model::{StatusUi, Task, map_status, value_text};
use crate::path::{get_by_path, replace_string_everywhere, set_by_path};
use crate::remote::{RemoteService, WriteOutcome};
use crate::temporal::{end_of_day, format_dmy, parse_date_input};
use crate::transport::{HttpTransport, Method};
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{info, warn};

pub const MEMBER_DELETED: &str = "TASKS_CORE_API_MEMBER_DELETED";
pub const STAFF_DELETED: &str = "TASKS_CORE_API_STAFF_DELETED";

const DEFAULT_STATIC_TYPE: &str = "To-Do";

/// What the user typed into the editor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditDraft {
    pub name: String,
    pub due_date_input: String,
    pub notes: String,
    pub mark_done: bool,
}

impl EditDraft {
    pub fn from_task(task: &Task, offset: UtcOffset) -> Self {
        Self {
            name: task.name.clone(),
            due_date_input: task
                .due_date
                .map(|due| format_dmy(due.to_offset(offset).date()))
                .unwrap_or_default(),
            notes: task.notes.clone(),
            mark_done: task.is_done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDraft {
    pub name: String,
    pub due_date: Option<Date>,
    pub notes: String,
    pub mark_done: bool,
}

pub fn validate_draft(draft: &EditDraft) -> Result<ValidDraft, AppError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(AppError::invalid_input("task name must not be empty"));
    }
    Ok(ValidDraft {
        name: name.to_string(),
        due_date: parse_date_input(&draft.due_date_input)?,
        notes: draft.notes.trim().to_string(),
        mark_done: draft.mark_done,
    })
}

/// A fully built update, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWrite {
    pub method: Method,
    pub url: String,
    pub payload: Value,
    /// Sent once if the first attempt is rejected with [`MEMBER_DELETED`].
    pub fallback: Option<Value>,
    /// The due date the entity carries once the write succeeds.
    pub due_after: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub attempts: u8,
    pub outcome: WriteOutcome,
    /// The body of the attempt that succeeded.
    pub payload: Value,
}

pub fn build_static_payload(
    task: &Task,
    draft: &ValidDraft,
    actor_id: &str,
    now: OffsetDateTime,
    offset: UtcOffset,
    include_customer: bool,
) -> Value {
    let due_date = match draft.due_date {
        Some(date) => Value::from(end_of_day(date, offset).unix_timestamp()),
        None => task
            .due_date
            .map(|due| Value::from(due.unix_timestamp()))
            .unwrap_or(Value::Null),
    };
    let task_type = task
        .raw
        .get("type")
        .map(value_text)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| DEFAULT_STATIC_TYPE.to_string());
    let staff_id = if actor_id.is_empty() {
        task.staff_id.clone()
    } else {
        actor_id.to_string()
    };

    let mut payload = Map::new();
    payload.insert("name".to_string(), Value::from(draft.name.clone()));
    payload.insert("type".to_string(), Value::from(task_type));
    payload.insert("notes".to_string(), Value::from(draft.notes.clone()));
    payload.insert("due_date".to_string(), due_date);
    if include_customer {
        payload.insert("customer_id".to_string(), Value::from(task.customer_id.clone()));
        payload.insert(
            "customer_first_name".to_string(),
            Value::from(task.customer_first_name.clone()),
        );
        payload.insert(
            "customer_last_name".to_string(),
            Value::from(task.customer_last_name.clone()),
        );
    }
    payload.insert("staff_id".to_string(), Value::from(staff_id));
    if draft.mark_done && !task.is_done {
        payload.insert(
            "completion_date".to_string(),
            Value::from(now.unix_timestamp()),
        );
        payload.insert("completed_by".to_string(), Value::from(actor_id));
    }
    Value::Object(payload)
}

pub fn build_inferred_url(contract: &WriteContract, task_id: &str) -> Result<String, AppError> {
    if contract.url.trim().is_empty() {
        return Err(AppError::contract("write contract has no url"));
    }
    if contract.sample_entity_id.is_empty() {
        return Ok(contract.url.clone());
    }
    Ok(contract.url.replacen(&contract.sample_entity_id, task_id, 1))
}

/// Clones the observed body, swaps in the entity id and overwrites every mapped field
/// that the template actually carries.
pub fn build_inferred_payload(
    contract: &WriteContract,
    task_id: &str,
    draft: &ValidDraft,
) -> Result<Value, AppError> {
    let mut payload = match contract.body_template.as_ref() {
        Some(template @ (Value::Object(_) | Value::Array(_))) => template.clone(),
        _ => return Err(AppError::contract("write contract has no body template")),
    };
    replace_string_everywhere(&mut payload, &contract.sample_entity_id, task_id);

    for field in SemanticField::ALL {
        let Some(path) = contract.field_paths.get(field) else {
            continue;
        };
        let Some(current) = get_by_path(&payload, path) else {
            continue;
        };
        let value = match field {
            SemanticField::Name => Value::from(draft.name.clone()),
            SemanticField::Notes => Value::from(draft.notes.clone()),
            SemanticField::DueDate => convert_due_date(current, draft.due_date),
            SemanticField::Done => convert_done(current, draft.mark_done),
        };
        set_by_path(&mut payload, path, value);
    }
    Ok(payload)
}

/// Drops every object key mentioning a customer. `None` when nothing was dropped.
pub fn reduce_inferred_payload(payload: &Value) -> Option<Value> {
    let mut reduced = payload.clone();
    if strip_customer_keys(&mut reduced) {
        Some(reduced)
    } else {
        None
    }
}

fn strip_customer_keys(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !key.to_lowercase().contains("customer"));
            let mut stripped = map.len() != before;
            for item in map.values_mut() {
                stripped |= strip_customer_keys(item);
            }
            stripped
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |stripped, item| strip_customer_keys(item) || stripped),
        _ => false,
    }
}

fn template_carries(contract: &WriteContract, field: SemanticField) -> bool {
    match (contract.field_paths.get(field), contract.body_template.as_ref()) {
        (Some(path), Some(template)) => get_by_path(template, path).is_some(),
        _ => false,
    }
}

pub fn prepare_update(
    contract: &ActiveContract,
    task: &Task,
    draft: &ValidDraft,
    credentials: &Credentials,
    now: OffsetDateTime,
    offset: UtcOffset,
) -> Result<PreparedWrite, AppError> {
    credentials.require_session()?;
    let chosen_due = draft.due_date.map(|date| end_of_day(date, offset));

    match contract {
        ActiveContract::Static(declared) => Ok(prepare_static(
            declared,
            task,
            draft,
            credentials,
            now,
            offset,
            chosen_due,
        )),
        ActiveContract::Inferred(learned) => {
            let payload = build_inferred_payload(learned, &task.id, draft)?;
            let due_after = if template_carries(learned, SemanticField::DueDate) {
                chosen_due
            } else {
                task.due_date
            };
            Ok(PreparedWrite {
                method: learned.method,
                url: build_inferred_url(learned, &task.id)?,
                fallback: reduce_inferred_payload(&payload),
                payload,
                due_after,
            })
        }
    }
}

fn prepare_static(
    declared: &StaticContract,
    task: &Task,
    draft: &ValidDraft,
    credentials: &Credentials,
    now: OffsetDateTime,
    offset: UtcOffset,
    chosen_due: Option<OffsetDateTime>,
) -> PreparedWrite {
    let actor = credentials.actor_id.as_str();
    PreparedWrite {
        method: declared.method,
        url: declared.update_url(&credentials.location_id, &task.id),
        payload: build_static_payload(task, draft, actor, now, offset, true),
        fallback: Some(build_static_payload(task, draft, actor, now, offset, false)),
        due_after: chosen_due.or(task.due_date),
    }
}

/// Sends the update, retrying once with the reduced body on [`MEMBER_DELETED`].
pub async fn execute_update<T: HttpTransport>(
    remote: &RemoteService<T>,
    prepared: &PreparedWrite,
    credentials: &Credentials,
) -> Result<WriteReport, AppError> {
    let token = credentials.token.as_str();
    let mut attempts = 1;
    let mut sent = &prepared.payload;
    let mut outcome = remote
        .send_write(prepared.method, &prepared.url, token, sent)
        .await?;

    if !outcome.ok
        && outcome.code == MEMBER_DELETED
        && let Some(fallback) = prepared.fallback.as_ref()
    {
        warn!("update rejected with {MEMBER_DELETED}; retrying without customer fields");
        attempts += 1;
        sent = fallback;
        outcome = remote
            .send_write(prepared.method, &prepared.url, token, sent)
            .await?;
    }

    if outcome.ok {
        info!(
            "update accepted (HTTP {}, {attempts} attempt(s))",
            outcome.status
        );
        return Ok(WriteReport {
            attempts,
            outcome,
            payload: sent.clone(),
        });
    }
    Err(update_rejection(&outcome, sent, &credentials.actor_id))
}

fn update_rejection(outcome: &WriteOutcome, sent: &Value, actor_id: &str) -> AppError {
    if outcome.is_unauthorized() {
        return unauthorized(outcome.status);
    }
    let sent_text = |key: &str| {
        let text = sent.get(key).map(value_text).unwrap_or_default();
        if text.is_empty() { "-".to_string() } else { text }
    };
    let detail = match outcome.code.as_str() {
        MEMBER_DELETED => format!("sent customer_id={}", sent_text("customer_id")),
        STAFF_DELETED => format!(
            "sent staff_id={}, actor_id={}",
            sent_text("staff_id"),
            if actor_id.is_empty() { "-" } else { actor_id }
        ),
        _ => outcome.message.clone(),
    };
    warn!(
        "update rejected: HTTP {} {}",
        outcome.status,
        if outcome.code.is_empty() { "-" } else { outcome.code.as_str() }
    );
    AppError::rejected(outcome.status, outcome.code.clone(), detail)
}

fn unauthorized(status: u16) -> AppError {
    AppError::session(format!(
        "unauthorized (HTTP {status}); refresh the session and try again"
    ))
}

/// Completes the task remotely. Never retried.
pub async fn execute_delete<T: HttpTransport>(
    remote: &RemoteService<T>,
    credentials: &Credentials,
    task_id: &str,
    now: OffsetDateTime,
) -> Result<WriteOutcome, AppError> {
    if task_id.trim().is_empty() {
        return Err(AppError::invalid_input("task id is required"));
    }
    let outcome = remote
        .complete_task(credentials, task_id, now.unix_timestamp())
        .await?;
    if outcome.ok {
        info!("task {task_id} completed (HTTP {})", outcome.status);
        return Ok(outcome);
    }
    if outcome.is_unauthorized() {
        return Err(unauthorized(outcome.status));
    }
    let message = if outcome.message.is_empty() {
        "task delete failed".to_string()
    } else {
        outcome.message.clone()
    };
    Err(AppError::rejected(outcome.status, outcome.code.clone(), message))
}

/// Applies a successful update to the in-memory entity.
pub fn local_patch(
    task: &mut Task,
    draft: &ValidDraft,
    due_after: Option<OffsetDateTime>,
    now: OffsetDateTime,
) {
    task.name = draft.name.clone();
    task.notes = draft.notes.clone();
    task.due_date = due_after;
    task.is_done = draft.mark_done;
    if draft.mark_done {
        task.completion_date = task.completion_date.or(Some(now));
        task.status_ui = StatusUi::Done;
    } else {
        task.completion_date = None;
        task.status_ui = match map_status(&task.status_raw) {
            StatusUi::Done => StatusUi::Pending,
            other => other,
        };
    }
}
