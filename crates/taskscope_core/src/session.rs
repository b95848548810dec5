//! One open explorer: the fetched collection, the query, the editor and the render loop.
//!
//! Everything runs on a single thread. State lives behind `RefCell`s that are never
//! borrowed across an await, so a second operation can start while the first one waits
//! on the network. That is what the in-flight guards are for.

use crate::contract::SharedContractStore;
use crate::credentials::{CredentialChain, CredentialSource, Credentials, HeaderHarvester};
use crate::error::AppError;
use crate::inference::{ContractInference, ObservedCall};
use crate::model::Task;
use crate::query::{
    Filters, QueryState, Sort, SortKey, apply_query, page_items, page_range, pages_window,
    task_types, total_pages,
};
use crate::remote::{Endpoints, RemoteService};
use crate::storage::preferences::{load_preferences, preferences_path, save_preferences};
use crate::traffic::{ObservingTransport, OwnRequestFlag, TrafficTap};
use crate::transport::HttpTransport;
use crate::view::{EditorView, ExplorerView, FetchMeta, SAFE_SAMPLE_SIZE};
use crate::watchdog::{RenderMode, RenderTarget, Watchdog};
use crate::writer::{
    EditDraft, MEMBER_DELETED, PreparedWrite, ValidDraft, WriteReport, execute_delete,
    execute_update, local_patch, prepare_update, validate_draft,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct EditorState {
    task_id: String,
    draft: EditDraft,
    saving: bool,
    deleting: bool,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    open: bool,
    tasks: Vec<Task>,
    query: QueryState,
    filtered: Vec<usize>,
    loading: bool,
    error: Option<String>,
    notice: Option<String>,
    fetched_at: Option<OffsetDateTime>,
    fetch_meta: FetchMeta,
    editor: Option<EditorState>,
    /// Tasks the remote service refused because their member is gone.
    blocked: BTreeSet<String>,
}

impl SessionState {
    fn refilter(&mut self, offset: UtcOffset) {
        self.filtered = apply_query(&self.tasks, &mut self.query, offset);
    }

    fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    fn editor_for(&mut self, task_id: &str) -> Option<&mut EditorState> {
        self.editor
            .as_mut()
            .filter(|editor| editor.task_id == task_id)
    }
}

/// Clears an in-flight flag however the operation ends.
struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct ExplorerSession<T> {
    remote: RemoteService<ObservingTransport<T>>,
    credentials: CredentialChain,
    contracts: SharedContractStore,
    own_request: OwnRequestFlag,
    tap: TrafficTap,
    state: RefCell<SessionState>,
    fetch_in_flight: Cell<bool>,
    fetch_generation: Cell<u64>,
    write_in_flight: Cell<bool>,
    render_requested: Cell<bool>,
    watchdog: RefCell<Watchdog>,
    offset: UtcOffset,
    preferences_dir: Option<PathBuf>,
}

impl<T: HttpTransport> ExplorerSession<T> {
    /// Wraps `transport` with the observation hook. `declared` credentials win over
    /// anything harvested from traffic.
    pub fn new(
        transport: T,
        endpoints: Endpoints,
        contracts: SharedContractStore,
        declared: impl CredentialSource + 'static,
    ) -> Self {
        let harvester = HeaderHarvester::new();
        let own_request = OwnRequestFlag::new();
        let tap = TrafficTap::new(
            ContractInference::new(endpoints.namespace.clone()),
            contracts.clone(),
            own_request.clone(),
            harvester.clone(),
        );
        Self {
            remote: RemoteService::new(ObservingTransport::new(transport, tap.clone()), endpoints),
            credentials: CredentialChain::new().with(declared).with(harvester),
            contracts,
            own_request,
            tap,
            state: RefCell::new(SessionState::default()),
            fetch_in_flight: Cell::new(false),
            fetch_generation: Cell::new(0),
            write_in_flight: Cell::new(false),
            render_requested: Cell::new(false),
            watchdog: RefCell::new(Watchdog::new()),
            offset: UtcOffset::UTC,
            preferences_dir: None,
        }
    }

    pub fn with_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_preferences_dir(mut self, dir: PathBuf) -> Self {
        self.preferences_dir = Some(dir);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.remote = self.remote.with_fetch_timeout(timeout);
        self
    }

    pub fn with_fetch_limit(mut self, limit: u32) -> Self {
        self.remote = self.remote.with_fetch_limit(limit);
        self
    }

    pub fn transport(&self) -> &T {
        self.remote.transport().inner()
    }

    pub fn tap(&self) -> &TrafficTap {
        &self.tap
    }

    pub fn contracts(&self) -> &SharedContractStore {
        &self.contracts
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.credentials()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().tasks.clone()
    }

    pub fn filtered_tasks(&self) -> Vec<Task> {
        let state = self.state.borrow();
        state
            .filtered
            .iter()
            .filter_map(|index| state.tasks.get(*index))
            .cloned()
            .collect()
    }

    pub fn query(&self) -> QueryState {
        self.state.borrow().query.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn is_blocked(&self, task_id: &str) -> bool {
        self.state.borrow().blocked.contains(task_id)
    }

    /// Feeds a host call through the observation hook, as if it had crossed the wire.
    pub fn observe(&self, call: &ObservedCall) -> bool {
        self.tap.observe(call)
    }

    pub async fn open(&self) -> Result<(), AppError> {
        {
            let mut state = self.state.borrow_mut();
            if state.open {
                return Ok(());
            }
            state.open = true;
            state.query = self.load_query();
        }
        self.watchdog.borrow_mut().reset();
        self.request_render();
        self.refresh(false).await
    }

    /// Drops the collection and forgets safe mode. A write already on the wire finishes,
    /// but its result no longer reaches the editor.
    pub fn close(&self) {
        *self.state.borrow_mut() = SessionState::default();
        self.fetch_generation.set(self.fetch_generation.get() + 1);
        self.fetch_in_flight.set(false);
        self.watchdog.borrow_mut().reset();
        self.render_requested.set(false);
    }

    /// Replaces the collection. A refresh while another runs is a no-op unless forced.
    pub async fn refresh(&self, force: bool) -> Result<(), AppError> {
        if !self.is_open() {
            return Err(AppError::invalid_input("explorer is not open"));
        }
        if self.fetch_in_flight.get() && !force {
            debug!("refresh skipped; a fetch is already running");
            return Ok(());
        }
        let generation = self.fetch_generation.get() + 1;
        self.fetch_generation.set(generation);
        self.fetch_in_flight.set(true);
        {
            let mut state = self.state.borrow_mut();
            state.loading = true;
            state.error = None;
        }
        self.request_render();

        let credentials = self.credentials.credentials();
        let result = self.remote.fetch_tasks(&credentials).await;

        if self.fetch_generation.get() != generation {
            debug!("discarding superseded fetch");
            return Ok(());
        }
        self.fetch_in_flight.set(false);
        self.request_render();

        let mut state = self.state.borrow_mut();
        state.loading = false;
        match result {
            Ok(fetched) => {
                state.tasks = fetched.tasks;
                state.fetch_meta = FetchMeta {
                    http_status: Some(fetched.http_status),
                    list_source: fetched.list_source.to_string(),
                    list_count: fetched.list_count,
                };
                state.fetched_at = Some(OffsetDateTime::now_utc());
                state.query.page = 1;
                state.refilter(self.offset);
                Ok(())
            }
            Err(err) => {
                warn!("task fetch failed: {err}");
                state.filtered.clear();
                state.error = Some(err.to_string());
                state.fetch_meta = FetchMeta {
                    http_status: None,
                    list_source: "error".to_string(),
                    list_count: 0,
                };
                Err(err)
            }
        }
    }

    fn change_query(&self, reset_page: bool, change: impl FnOnce(&mut QueryState)) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.query.clone();
        change(&mut state.query);
        state.query.sanitize();
        if state.query == before {
            return false;
        }
        if reset_page {
            state.query.page = 1;
        }
        state.refilter(self.offset);
        self.save_query(&state.query);
        drop(state);
        self.request_render();
        true
    }

    pub fn set_filters(&self, filters: Filters) -> bool {
        self.change_query(true, |query| query.filters = filters)
    }

    pub fn set_sort(&self, sort: Sort) -> bool {
        self.change_query(false, |query| query.sort = sort)
    }

    pub fn toggle_sort(&self, key: SortKey) -> bool {
        self.change_query(false, |query| query.toggle_sort(key))
    }

    pub fn set_page_size(&self, page_size: usize) -> bool {
        self.change_query(true, |query| query.page_size = page_size)
    }

    pub fn set_page(&self, page: usize) -> bool {
        self.change_query(false, |query| query.page = page)
    }

    pub fn reset_filters(&self) -> bool {
        self.change_query(true, QueryState::reset_filters)
    }

    fn load_query(&self) -> QueryState {
        match self.preferences_location() {
            Some(path) => load_preferences(&path),
            None => QueryState::default(),
        }
    }

    fn save_query(&self, query: &QueryState) {
        if let Some(path) = self.preferences_location()
            && let Err(err) = save_preferences(&path, query)
        {
            warn!("preferences not saved: {err}");
        }
    }

    fn preferences_location(&self) -> Option<PathBuf> {
        let dir = self.preferences_dir.as_ref()?;
        let location = self.credentials.credentials().location_id;
        Some(preferences_path(dir, &location))
    }

    pub fn open_editor(&self, task_id: &str) -> Result<(), AppError> {
        let mut state = self.state.borrow_mut();
        let draft = state
            .task(task_id)
            .map(|task| EditDraft::from_task(task, self.offset))
            .ok_or_else(|| AppError::invalid_input(format!("unknown task: {task_id}")))?;
        state.editor = Some(EditorState {
            task_id: task_id.to_string(),
            draft,
            saving: false,
            deleting: false,
            error: None,
        });
        drop(state);
        self.request_render();
        Ok(())
    }

    /// Returns `false` when no editor is open or nothing changed.
    pub fn update_draft(&self, change: impl FnOnce(&mut EditDraft)) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(editor) = state.editor.as_mut() else {
            return false;
        };
        let before = editor.draft.clone();
        change(&mut editor.draft);
        if editor.draft == before {
            return false;
        }
        editor.error = None;
        drop(state);
        self.request_render();
        true
    }

    pub fn close_editor(&self) {
        if self.state.borrow_mut().editor.take().is_some() {
            self.request_render();
        }
    }

    fn prepare_edit(
        &self,
    ) -> Result<(Task, ValidDraft, PreparedWrite, Credentials, OffsetDateTime), AppError> {
        let (task, draft) = {
            let state = self.state.borrow();
            let editor = state
                .editor
                .as_ref()
                .ok_or_else(|| AppError::invalid_input("no task is being edited"))?;
            let task = state.task(&editor.task_id).cloned().ok_or_else(|| {
                AppError::invalid_input(format!("unknown task: {}", editor.task_id))
            })?;
            (task, editor.draft.clone())
        };
        let valid = validate_draft(&draft)?;
        let contract = self.contracts.borrow().resolve()?;
        let credentials = self.credentials.credentials();
        let now = OffsetDateTime::now_utc();
        let prepared = prepare_update(&contract, &task, &valid, &credentials, now, self.offset)?;
        Ok((task, valid, prepared, credentials, now))
    }

    fn editor_failed(&self, task_id: &str, err: &AppError) {
        let mut state = self.state.borrow_mut();
        if let Some(editor) = state.editor_for(task_id) {
            editor.saving = false;
            editor.deleting = false;
            editor.error = Some(err.to_string());
        }
        drop(state);
        self.request_render();
    }

    /// Saves the open editor. Nothing reaches the network unless every precondition holds.
    pub async fn save_edit(&self) -> Result<WriteReport, AppError> {
        let Some(_writing) = InFlight::enter(&self.write_in_flight) else {
            return Err(AppError::busy("another write is still in flight"));
        };
        let editing = self
            .state
            .borrow()
            .editor
            .as_ref()
            .map(|editor| editor.task_id.clone())
            .unwrap_or_default();
        let (task, valid, prepared, credentials, now) = match self.prepare_edit() {
            Ok(ready) => ready,
            Err(err) => {
                self.editor_failed(&editing, &err);
                return Err(err);
            }
        };

        if let Some(editor) = self.state.borrow_mut().editor_for(&task.id) {
            editor.saving = true;
            editor.error = None;
        }
        self.request_render();

        let result = {
            let _own = self.own_request.raise();
            execute_update(&self.remote, &prepared, &credentials).await
        };

        match result {
            Ok(report) => {
                let mut state = self.state.borrow_mut();
                if let Some(target) = state.tasks.iter_mut().find(|entry| entry.id == task.id) {
                    local_patch(target, &valid, prepared.due_after, now);
                }
                state.refilter(self.offset);
                if state.editor_for(&task.id).is_some() {
                    state.editor = None;
                    state.notice = Some(format!("saved \"{}\"", valid.name));
                }
                drop(state);
                self.request_render();
                Ok(report)
            }
            Err(err) => {
                if let AppError::Rejected { code, .. } = &err
                    && code == MEMBER_DELETED
                {
                    self.state.borrow_mut().blocked.insert(task.id.clone());
                }
                self.editor_failed(&task.id, &err);
                Err(err)
            }
        }
    }

    /// Completes the task remotely and drops it from the collection.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), AppError> {
        let Some(_writing) = InFlight::enter(&self.write_in_flight) else {
            return Err(AppError::busy("another write is still in flight"));
        };
        if self.state.borrow().task(task_id).is_none() {
            return Err(AppError::invalid_input(format!("unknown task: {task_id}")));
        }
        let credentials = self.credentials.credentials();
        if let Err(err) = credentials.require_session() {
            self.editor_failed(task_id, &err);
            return Err(err);
        }

        if let Some(editor) = self.state.borrow_mut().editor_for(task_id) {
            editor.deleting = true;
            editor.error = None;
        }
        self.request_render();

        let result = {
            let _own = self.own_request.raise();
            execute_delete(&self.remote, &credentials, task_id, OffsetDateTime::now_utc()).await
        };

        match result {
            Ok(_) => {
                let mut state = self.state.borrow_mut();
                state.tasks.retain(|task| task.id != task_id);
                state.refilter(self.offset);
                if state.editor_for(task_id).is_some() {
                    state.editor = None;
                }
                state.notice = Some("task deleted".to_string());
                drop(state);
                self.request_render();
                Ok(())
            }
            Err(err) => {
                self.editor_failed(task_id, &err);
                Err(err)
            }
        }
    }

    pub fn request_render(&self) {
        self.render_requested.set(true);
    }

    pub fn render_pending(&self) -> bool {
        self.render_requested.get()
    }

    /// Runs one render pass if anything asked for one since the last flush.
    pub fn flush_render(&self, target: &mut dyn RenderTarget) -> Option<RenderMode> {
        if !self.render_requested.replace(false) {
            return None;
        }
        Some(self.render_now(target))
    }

    pub fn render_now(&self, target: &mut dyn RenderTarget) -> RenderMode {
        let view = self.view();
        self.watchdog.borrow_mut().run(target, &view)
    }

    pub fn safe_mode(&self) -> bool {
        self.watchdog.borrow().safe_mode()
    }

    pub fn view(&self) -> ExplorerView {
        let state = self.state.borrow();
        if !state.open {
            return ExplorerView::empty();
        }
        let pick = |indexes: &[usize]| -> Vec<Task> {
            indexes
                .iter()
                .filter_map(|index| state.tasks.get(*index))
                .cloned()
                .collect()
        };
        let pages = total_pages(state.filtered.len(), state.query.page_size);
        let sample_len = state.filtered.len().min(SAFE_SAMPLE_SIZE);
        let editor = state.editor.as_ref().map(|editor| EditorView {
            task_id: editor.task_id.clone(),
            task_name: state
                .task(&editor.task_id)
                .map(|task| task.name.clone())
                .unwrap_or_default(),
            draft: editor.draft.clone(),
            saving: editor.saving,
            deleting: editor.deleting,
            blocked: state.blocked.contains(&editor.task_id),
            error: editor.error.clone(),
        });

        ExplorerView {
            page_tasks: pick(page_items(&state.filtered, &state.query)),
            safe_sample: pick(&state.filtered[..sample_len]),
            total_count: state.tasks.len(),
            filtered_count: state.filtered.len(),
            page: state.query.page,
            pages,
            pages_window: pages_window(state.query.page, pages),
            range: page_range(state.filtered.len(), &state.query),
            query: state.query.clone(),
            types: task_types(&state.tasks),
            loading: state.loading,
            error: state.error.clone(),
            notice: state.notice.clone(),
            contract_help: self.contracts.borrow().help_text(),
            fetched_at: state.fetched_at,
            fetch_meta: state.fetch_meta.clone(),
            editor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExplorerSession;
    use crate::contract::{ContractStatus, ContractStore, StaticContract};
    use crate::credentials::{Credentials, StaticCredentials};
    use crate::error::AppError;
    use crate::inference::ObservedCall;
    use crate::model::StatusUi;
    use crate::query::{Filters, Sort, SortDirection, SortKey};
    use crate::remote::Endpoints;
    use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
    use crate::view::ExplorerView;
    use crate::watchdog::{Diagnostics, RenderMode, RenderSnapshot, RenderTarget, StyleSummary};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::cell::RefCell;
    use std::time::{SystemTime, UNIX_EPOCH};

    const OVERDUE: &str = "65a1b2c3d4e5f60718293a01";
    const TODAY: &str = "65a1b2c3d4e5f60718293a02";
    const UNDATED: &str = "65a1b2c3d4e5f60718293a03";
    const SAMPLE: &str = "65a1b2c3d4e5f60718293aff";
    const BASE: &str = "https://tasks.test";

    /// Serves a fixed collection and accepts every write. Yields before answering so
    /// concurrent operations interleave.
    struct FakeRemote {
        collection: Value,
        requests: RefCell<Vec<HttpRequest>>,
    }

    impl FakeRemote {
        fn new() -> Self {
            Self {
                collection: json!({"items": [
                    {"_id": OVERDUE, "name": "Chase invoice", "status": "OVERDUE", "due_date": 1_704_153_600, "type": "Billing"},
                    {"_id": TODAY, "name": "Call Ann", "status": "TODAY", "due_date": 1_710_072_000, "type": "Phone"},
                    {"_id": UNDATED, "name": "Tidy notes", "status": "PENDING", "type": "Admin"}
                ]}),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<HttpRequest> {
            self.requests
                .borrow()
                .iter()
                .filter(|request| request.method != Method::Get)
                .cloned()
                .collect()
        }
    }

    #[async_trait(?Send)]
    impl HttpTransport for FakeRemote {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
            tokio::task::yield_now().await;
            self.requests.borrow_mut().push(request.clone());
            match request.method {
                Method::Get => Ok(HttpResponse::new(200, self.collection.to_string())),
                _ => Ok(HttpResponse::new(200, r#"{"success":true}"#)),
            }
        }
    }

    fn credentials() -> StaticCredentials {
        StaticCredentials::new(Credentials {
            token: "tok".to_string(),
            location_id: "loc-1".to_string(),
            actor_id: "actor-1".to_string(),
        })
    }

    fn endpoints() -> Endpoints {
        Endpoints::new(BASE, "task-management-api")
    }

    fn static_session() -> ExplorerSession<FakeRemote> {
        let store = ContractStore::new(Some(StaticContract::new(endpoints()))).shared();
        ExplorerSession::new(FakeRemote::new(), endpoints(), store, credentials())
    }

    fn learning_session() -> ExplorerSession<FakeRemote> {
        let store = ContractStore::new(None).shared();
        ExplorerSession::new(FakeRemote::new(), endpoints(), store, credentials())
    }

    fn ids(session: &ExplorerSession<FakeRemote>) -> Vec<String> {
        session
            .filtered_tasks()
            .into_iter()
            .map(|task| task.id)
            .collect()
    }

    #[tokio::test]
    async fn filters_and_sorts_the_fetched_collection() {
        let session = static_session();
        session.open().await.unwrap();
        assert_eq!(session.tasks().len(), 3);

        assert!(session.set_filters(Filters {
            statuses: vec![StatusUi::Overdue],
            ..Filters::default()
        }));
        assert_eq!(ids(&session), vec![OVERDUE]);

        session.reset_filters();
        session.set_sort(Sort {
            key: SortKey::DueDate,
            direction: SortDirection::Asc,
        });
        assert_eq!(ids(&session), vec![OVERDUE, TODAY, UNDATED]);

        session.toggle_sort(SortKey::DueDate);
        assert_eq!(ids(&session).last().map(String::as_str), Some(UNDATED));
    }

    #[tokio::test]
    async fn unchanged_query_is_a_no_op() {
        let session = static_session();
        session.open().await.unwrap();
        assert!(!session.set_filters(Filters::default()));
        assert!(session.set_page_size(25));
        assert!(!session.set_page_size(25));
    }

    #[tokio::test]
    async fn second_write_while_one_is_in_flight_is_refused() {
        let session = static_session();
        session.open().await.unwrap();
        session.open_editor(OVERDUE).unwrap();
        session.update_draft(|draft| draft.name = "Chase invoice again".to_string());

        let (first, second) = tokio::join!(session.save_edit(), session.save_edit());

        assert_eq!(first.unwrap().attempts, 1);
        assert_eq!(second.unwrap_err().code(), "write_in_progress");
        assert_eq!(session.transport().writes().len(), 1);
    }

    #[tokio::test]
    async fn saved_edit_patches_the_local_task() {
        let session = static_session();
        session.open().await.unwrap();
        session.open_editor(TODAY).unwrap();
        session.update_draft(|draft| {
            draft.name = "Call Ann back".to_string();
            draft.mark_done = true;
        });

        session.save_edit().await.unwrap();

        let task = session
            .tasks()
            .into_iter()
            .find(|task| task.id == TODAY)
            .unwrap();
        assert_eq!(task.name, "Call Ann back");
        assert_eq!(task.status_ui, StatusUi::Done);
        assert!(session.view().editor.is_none());

        let writes = session.transport().writes();
        assert_eq!(
            writes[0].url,
            format!("{BASE}/task-management-api/v1/locations/loc-1/tasks/{TODAY}")
        );
        assert_eq!(writes[0].body.as_ref().unwrap()["completed_by"], json!("actor-1"));
    }

    #[tokio::test]
    async fn invalid_drafts_never_reach_the_network() {
        let session = static_session();
        session.open().await.unwrap();
        session.open_editor(TODAY).unwrap();
        session.update_draft(|draft| draft.due_date_input = "99-99-2024".to_string());

        let err = session.save_edit().await.unwrap_err();

        assert_eq!(err.code(), "invalid_input");
        assert!(session.transport().writes().is_empty());
        assert!(session.view().editor.unwrap().error.is_some());
    }

    #[tokio::test]
    async fn edits_wait_for_a_learned_contract() {
        let session = learning_session();
        session.open().await.unwrap();
        assert_eq!(
            session.contracts().borrow().inferred().status,
            ContractStatus::Capturing
        );

        session.open_editor(OVERDUE).unwrap();
        session.update_draft(|draft| draft.name = "Renamed".to_string());
        let err = session.save_edit().await.unwrap_err();
        assert_eq!(err.code(), "contract_not_ready");
        assert!(session.transport().writes().is_empty());

        let host_save = ObservedCall {
            method: Method::Patch,
            url: format!("{BASE}/task-management-api/v1/locations/loc-1/tasks/{SAMPLE}"),
            headers: Vec::new(),
            body: Some(json!({"_id": SAMPLE, "title": "X", "status": "OPEN"})),
            status: 200,
        };
        assert!(session.observe(&host_save));

        session.save_edit().await.unwrap();

        let writes = session.transport().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0].url,
            format!("{BASE}/task-management-api/v1/locations/loc-1/tasks/{OVERDUE}")
        );
        assert_eq!(
            writes[0].body,
            Some(json!({"_id": OVERDUE, "title": "Renamed", "status": "OPEN"}))
        );
        // Our own write must not replace what the host taught us.
        assert_eq!(
            session.contracts().borrow().inferred().sample_entity_id,
            SAMPLE
        );
    }

    #[tokio::test]
    async fn delete_removes_the_task() {
        let session = static_session();
        session.open().await.unwrap();

        session.delete_task(UNDATED).await.unwrap();

        assert_eq!(session.tasks().len(), 2);
        let writes = session.transport().writes();
        assert!(writes[0].url.ends_with(&format!("/tasks/{UNDATED}/completion")));
        assert_eq!(session.view().notice.as_deref(), Some("task deleted"));
    }

    #[tokio::test]
    async fn close_drops_everything() {
        let session = static_session();
        session.open().await.unwrap();
        session.close();
        assert!(!session.is_open());
        assert!(session.tasks().is_empty());
        assert_eq!(session.view(), ExplorerView::empty());
        assert_eq!(session.refresh(false).await.unwrap_err().code(), "invalid_input");
    }

    #[tokio::test]
    async fn preferences_survive_reopening() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("taskscope_session_prefs_{nanos}"));
        let session = static_session().with_preferences_dir(dir.clone());
        session.open().await.unwrap();
        session.set_page_size(50);
        session.close();

        session.open().await.unwrap();
        assert_eq!(session.query().page_size, 50);
        let _ = std::fs::remove_dir_all(dir);
    }

    /// Draws nothing in normal mode and a healthy list in safe mode.
    struct BlankTable {
        mode: RenderMode,
        draws: usize,
    }

    impl RenderTarget for BlankTable {
        fn draw(&mut self, mode: RenderMode, _view: &ExplorerView, _diagnostics: Option<&Diagnostics>) {
            self.mode = mode;
            self.draws += 1;
        }

        fn inspect(&self) -> RenderSnapshot {
            RenderSnapshot {
                output_len: 200,
                has_container: true,
                has_header: true,
                width: 80,
                height: 24,
                row_count: if self.mode == RenderMode::Normal { 0 } else { 3 },
                text_length: 150,
                style: Some(StyleSummary::visible()),
            }
        }
    }

    #[tokio::test]
    async fn render_requests_coalesce_and_safe_mode_sticks() {
        let session = static_session();
        session.open().await.unwrap();
        session.set_page_size(25);
        session.set_page_size(50);

        let mut target = BlankTable {
            mode: RenderMode::Normal,
            draws: 0,
        };
        assert_eq!(session.flush_render(&mut target), Some(RenderMode::Safe));
        assert_eq!(target.draws, 2);
        assert_eq!(session.flush_render(&mut target), None);

        session.set_page_size(100);
        assert_eq!(session.flush_render(&mut target), Some(RenderMode::Safe));
        assert!(session.safe_mode());

        session.close();
        session.open().await.unwrap();
        assert!(!session.safe_mode());
    }
}
