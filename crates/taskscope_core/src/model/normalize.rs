use super::task::{StatusUi, Task};
use crate::convert::is_closed_token;
use crate::temporal::parse_instant;
use serde_json::Value;

const NOTE_FIELDS: [&str; 8] = [
    "notes",
    "note",
    "description",
    "comment",
    "remarks",
    "details",
    "message",
    "body",
];

/// Trimmed textual form of a scalar. Containers and `null` read as empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    }
}

fn field_text(raw: &Value, key: &str) -> String {
    raw.get(key).map(value_text).unwrap_or_default()
}

fn first_text<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    values
        .into_iter()
        .flatten()
        .map(value_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(_) => true,
    }
}

pub fn map_status(raw: &str) -> StatusUi {
    match raw.trim().to_uppercase().as_str() {
        "DONE" | "COMPLETED" | "COMPLETE" => StatusUi::Done,
        "TODAY" => StatusUi::Today,
        "OVERDUE" => StatusUi::Overdue,
        _ => StatusUi::Pending,
    }
}

fn derive_done(raw: &Value) -> bool {
    if ["completion_date", "completed_at", "closed_at"]
        .iter()
        .any(|key| truthy(raw.get(*key)))
    {
        return true;
    }
    if let Some(Value::Bool(flag)) = raw.get("completed") {
        return *flag;
    }
    if let Some(Value::Bool(flag)) = raw.get("done") {
        return *flag;
    }
    is_closed_token(&field_text(raw, "status"))
}

fn derive_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(object @ Value::Object(_)) => first_text([
            object.get("_id"),
            object.get("id"),
            object.get("original_user_id"),
        ]),
        _ => String::new(),
    }
}

pub fn person_name(person: Option<&Value>) -> String {
    let name = match person {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(object @ Value::Object(_)) => match object.get("name") {
            Some(name) if truthy(Some(name)) => value_text(name),
            _ => format!(
                "{} {}",
                field_text(object, "first_name"),
                field_text(object, "last_name")
            )
            .trim()
            .to_string(),
        },
        _ => String::new(),
    };
    if name.is_empty() { "-".to_string() } else { name }
}

fn extract_notes(raw: &Value) -> String {
    let direct = NOTE_FIELDS.iter().map(|key| raw.get(*key));
    let nested = ["meta", "metadata"]
        .iter()
        .map(|key| raw.get(*key).and_then(|inner| inner.get("notes")));
    first_text(direct.chain(nested))
}

pub fn normalize_task(raw: &Value) -> Task {
    let customer = raw.get("customer");
    let customer_id = {
        let top = first_text([raw.get("customer_id"), raw.get("original_customer_id")]);
        if top.is_empty() {
            customer
                .map(|inner| {
                    first_text([
                        inner.get("original_user_id"),
                        inner.get("_id"),
                        inner.get("id"),
                    ])
                })
                .unwrap_or_default()
        } else {
            top
        }
    };
    let staff_id = {
        let top = first_text([raw.get("original_staff_id"), raw.get("staff_id")]);
        if !top.is_empty() {
            top
        } else {
            let from_staff = derive_id(raw.get("staff"));
            if from_staff.is_empty() {
                derive_id(raw.get("created_by"))
            } else {
                from_staff
            }
        }
    };

    let task_type = field_text(raw, "type");
    let status_raw = field_text(raw, "status");
    let is_done = derive_done(raw);
    let mapped = map_status(&status_raw);
    let completion_date = raw.get("completion_date").and_then(parse_instant);

    Task {
        id: field_text(raw, "_id"),
        name: field_text(raw, "name"),
        task_type: if task_type.is_empty() {
            "Unknown".to_string()
        } else {
            task_type
        },
        notes: extract_notes(raw),
        status_ui: if is_done || completion_date.is_some() {
            StatusUi::Done
        } else {
            mapped
        },
        status_raw,
        due_date: raw.get("due_date").and_then(parse_instant),
        completion_date,
        is_done,
        customer_id,
        customer_first_name: first_text([
            raw.get("customer_first_name"),
            customer.and_then(|inner| inner.get("first_name")),
        ]),
        customer_last_name: first_text([
            raw.get("customer_last_name"),
            customer.and_then(|inner| inner.get("last_name")),
        ]),
        staff_id,
        customer_name: person_name(customer),
        created_by_name: person_name(raw.get("created_by")),
        staff_name: person_name(raw.get("staff")),
        raw: raw.clone(),
    }
}

/// The entity array inside a collection response, with the shape it was found in.
pub fn extract_list(payload: &Value) -> (&[Value], &'static str) {
    if let Value::Array(items) = payload {
        return (items, "array");
    }
    for key in ["items", "tasks", "data"] {
        if let Some(Value::Array(items)) = payload.get(key) {
            return (items, key);
        }
    }
    (&[], "unknown")
}
