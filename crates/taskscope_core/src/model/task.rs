use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusUi {
    Pending,
    Today,
    Overdue,
    Done,
}

impl StatusUi {
    pub const ALL: [StatusUi; 4] = [Self::Pending, Self::Today, Self::Overdue, Self::Done];

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Today => "TODAY",
            Self::Overdue => "OVERDUE",
            Self::Done => "DONE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        Self::ALL.into_iter().find(|status| status.label() == upper)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub notes: String,
    pub status_raw: String,
    pub status_ui: StatusUi,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completion_date: Option<OffsetDateTime>,
    pub is_done: bool,
    pub customer_id: String,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub staff_id: String,
    pub customer_name: String,
    pub created_by_name: String,
    pub staff_name: String,
    /// Record exactly as the remote service returned it.
    #[serde(default)]
    pub raw: Value,
}
