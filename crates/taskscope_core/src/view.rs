use crate::model::Task;
use crate::query::QueryState;
use crate::writer::EditDraft;
use time::OffsetDateTime;

/// How many filtered tasks the safe and hard-fallback renders list.
pub const SAFE_SAMPLE_SIZE: usize = 20;

/// What the last fetch told us about the response, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchMeta {
    pub http_status: Option<u16>,
    pub list_source: String,
    pub list_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorView {
    pub task_id: String,
    pub task_name: String,
    pub draft: EditDraft,
    pub saving: bool,
    pub deleting: bool,
    pub blocked: bool,
    pub error: Option<String>,
}

/// Everything a render target needs for one frame. Built fresh for every draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorerView {
    pub page_tasks: Vec<Task>,
    pub safe_sample: Vec<Task>,
    pub total_count: usize,
    pub filtered_count: usize,
    pub page: usize,
    pub pages: usize,
    pub pages_window: Vec<usize>,
    /// `(from, to, total)` of the visible slice.
    pub range: (usize, usize, usize),
    pub query: QueryState,
    pub types: Vec<String>,
    pub loading: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub contract_help: String,
    pub fetched_at: Option<OffsetDateTime>,
    pub fetch_meta: FetchMeta,
    pub editor: Option<EditorView>,
}

impl ExplorerView {
    /// A frame with nothing in it; what a closed session shows.
    pub fn empty() -> Self {
        Self {
            page_tasks: Vec::new(),
            safe_sample: Vec::new(),
            total_count: 0,
            filtered_count: 0,
            page: 1,
            pages: 1,
            pages_window: vec![1],
            range: (0, 0, 0),
            query: QueryState::default(),
            types: Vec::new(),
            loading: false,
            error: None,
            notice: None,
            contract_help: String::new(),
            fetched_at: None,
            fetch_meta: FetchMeta::default(),
            editor: None,
        }
    }

    /// Escalation is not judged while a fetch runs or an error is on screen.
    pub fn suppresses_health_checks(&self) -> bool {
        self.loading || self.error.is_some()
    }
}
