use crate::convert::ValueKind;
use crate::error::AppError;
use crate::remote::Endpoints;
use crate::storage::contract_file;
use crate::transport::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Marker substituted with the entity id in a static contract's URL.
pub const STATIC_ID_MARKER: &str = "__TASK_ID__";

pub type SharedContractStore = Rc<RefCell<ContractStore>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Unknown,
    Capturing,
    Ready,
    Failed,
}

impl ContractStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Capturing => "capturing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticField {
    Name,
    DueDate,
    Notes,
    Done,
}

impl SemanticField {
    pub const ALL: [SemanticField; 4] = [Self::Name, Self::DueDate, Self::Notes, Self::Done];

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Name => &["name", "title"],
            Self::Notes => &["notes", "note", "description", "comment", "remarks", "uwag"],
            Self::DueDate => &[
                "due_date",
                "duedate",
                "due",
                "execution_date",
                "executiondate",
                "date",
            ],
            Self::Done => &["done", "completed", "is_done", "isdone", "completion", "status"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::DueDate => "dueDate",
            Self::Notes => "notes",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPaths {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub done: Option<String>,
}

impl FieldPaths {
    pub fn get(&self, field: SemanticField) -> Option<&str> {
        match field {
            SemanticField::Name => self.name.as_deref(),
            SemanticField::DueDate => self.due_date.as_deref(),
            SemanticField::Notes => self.notes.as_deref(),
            SemanticField::Done => self.done.as_deref(),
        }
    }

    pub fn set(&mut self, field: SemanticField, path: Option<String>) {
        let slot = match field {
            SemanticField::Name => &mut self.name,
            SemanticField::DueDate => &mut self.due_date,
            SemanticField::Notes => &mut self.notes,
            SemanticField::Done => &mut self.done,
        };
        *slot = path;
    }

    pub fn has_any(&self) -> bool {
        SemanticField::ALL
            .iter()
            .any(|field| self.get(*field).is_some_and(|path| !path.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteContract {
    pub status: ContractStatus,
    pub method: Method,
    pub url: String,
    /// Literal id inside `url` and `body_template` replaced on every request.
    pub sample_entity_id: String,
    #[serde(default)]
    pub body_template: Option<Value>,
    #[serde(default)]
    pub field_paths: FieldPaths,
    #[serde(default)]
    pub done_value_type: Option<ValueKind>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub captured_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for WriteContract {
    fn default() -> Self {
        Self {
            status: ContractStatus::Unknown,
            method: Method::Patch,
            url: String::new(),
            sample_entity_id: String::new(),
            body_template: None,
            field_paths: FieldPaths::default(),
            done_value_type: None,
            captured_at: None,
            last_error: None,
        }
    }
}

impl WriteContract {
    pub fn is_ready(&self) -> bool {
        self.status == ContractStatus::Ready
    }
}

/// The fixed update shape of the remote service, used instead of an observed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticContract {
    pub endpoints: Endpoints,
    pub method: Method,
}

impl StaticContract {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            method: Method::Patch,
        }
    }

    pub fn update_url(&self, location_id: &str, task_id: &str) -> String {
        self.endpoints.task_url(location_id, task_id)
    }

    /// The static contract in the shape of an observed one, for display.
    pub fn describe(&self, location_id: &str) -> WriteContract {
        WriteContract {
            status: ContractStatus::Ready,
            method: self.method,
            url: self.update_url(location_id, STATIC_ID_MARKER),
            sample_entity_id: STATIC_ID_MARKER.to_string(),
            body_template: None,
            field_paths: FieldPaths {
                name: Some("name".to_string()),
                due_date: Some("due_date".to_string()),
                notes: Some("notes".to_string()),
                done: Some("completion_date".to_string()),
            },
            done_value_type: Some(ValueKind::Number),
            captured_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActiveContract {
    Static(StaticContract),
    Inferred(WriteContract),
}

#[derive(Debug, Default)]
pub struct ContractStore {
    inferred: WriteContract,
    static_contract: Option<StaticContract>,
    path: Option<PathBuf>,
}

impl ContractStore {
    pub fn new(static_contract: Option<StaticContract>) -> Self {
        Self {
            inferred: WriteContract::default(),
            static_contract,
            path: None,
        }
    }

    /// Loads the persisted contract. A corrupt file leaves the store `failed`, not broken.
    pub fn open(path: PathBuf, static_contract: Option<StaticContract>) -> Self {
        let inferred = match contract_file::load_contract(&path) {
            Ok(Some(contract)) => contract,
            Ok(None) => WriteContract::default(),
            Err(err) => {
                warn!("discarding stored write contract: {err}");
                WriteContract {
                    status: ContractStatus::Failed,
                    last_error: Some(err.to_string()),
                    ..WriteContract::default()
                }
            }
        };
        Self {
            inferred,
            static_contract,
            path: Some(path),
        }
    }

    pub fn shared(self) -> SharedContractStore {
        Rc::new(RefCell::new(self))
    }

    pub fn inferred(&self) -> &WriteContract {
        &self.inferred
    }

    pub fn static_contract(&self) -> Option<&StaticContract> {
        self.static_contract.as_ref()
    }

    /// Observation is attached; nothing has been learned yet.
    pub fn arm(&mut self) {
        if self.inferred.status == ContractStatus::Unknown {
            self.inferred.status = ContractStatus::Capturing;
        }
    }

    /// Replaces the inferred contract wholesale and persists it.
    pub fn record(&mut self, contract: WriteContract) {
        info!(
            "write contract captured: {} {} ({})",
            contract.method.as_str(),
            contract.url,
            mapped_summary(&contract.field_paths)
        );
        self.inferred = contract;
        self.inferred.last_error = None;
        if let Some(path) = self.path.as_ref()
            && let Err(err) = contract_file::save_contract(path, &self.inferred)
        {
            warn!("write contract not persisted: {err}");
            self.inferred.last_error = Some(err.to_string());
        }
    }

    pub fn reset(&mut self) -> Result<(), AppError> {
        self.inferred = WriteContract::default();
        match self.path.as_ref() {
            Some(path) => contract_file::remove_contract(path),
            None => Ok(()),
        }
    }

    /// The contract a write must use right now, or why there is none.
    pub fn resolve(&self) -> Result<ActiveContract, AppError> {
        if let Some(declared) = self.static_contract.as_ref() {
            return Ok(ActiveContract::Static(declared.clone()));
        }
        if !self.inferred.is_ready() {
            return Err(AppError::contract(
                "no write contract yet; save any task once in the host application",
            ));
        }
        if !self.inferred.field_paths.has_any() {
            return Err(AppError::contract(
                "captured write contract maps no editable field; save another task in the host application",
            ));
        }
        Ok(ActiveContract::Inferred(self.inferred.clone()))
    }

    /// What the user should be told about write readiness.
    pub fn help_text(&self) -> String {
        if self.static_contract.is_some() {
            return "static write contract".to_string();
        }
        match self.inferred.status {
            ContractStatus::Ready => format!(
                "learned write contract ({})",
                mapped_summary(&self.inferred.field_paths)
            ),
            ContractStatus::Capturing => {
                "listening for a task save in the host application".to_string()
            }
            ContractStatus::Failed => format!(
                "write contract unavailable: {}",
                self.inferred.last_error.as_deref().unwrap_or("unknown error")
            ),
            ContractStatus::Unknown => "no write contract".to_string(),
        }
    }
}

fn mapped_summary(paths: &FieldPaths) -> String {
    let mapped: Vec<String> = SemanticField::ALL
        .iter()
        .filter_map(|field| {
            paths
                .get(*field)
                .map(|path| format!("{}→{}", field.label(), path))
        })
        .collect();
    if mapped.is_empty() {
        "no mapped fields".to_string()
    } else {
        mapped.join(", ")
    }
}
