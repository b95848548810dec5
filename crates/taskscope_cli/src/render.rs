//! Terminal render target. Every draw replaces the frame; the caller prints whatever the
//! watchdog settled on.

use tabled::settings::Style;
use tabled::{Table, Tabled};
use taskscope_core::model::Task;
use taskscope_core::query::SortDirection;
use taskscope_core::temporal::format_dmy;
use taskscope_core::view::ExplorerView;
use taskscope_core::watchdog::{Diagnostics, RenderMode, RenderSnapshot, RenderTarget, StyleSummary};
use time::UtcOffset;

const DEFAULT_WIDTH: u32 = 120;
const DEFAULT_HEIGHT: u32 = 40;

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    task_type: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Due")]
    due: String,
    #[tabled(rename = "Customer")]
    customer: String,
    #[tabled(rename = "Created by")]
    creator: String,
    #[tabled(rename = "Assignee")]
    assignee: String,
}

pub struct TerminalTarget {
    width: u32,
    height: u32,
    offset: UtcOffset,
    frame: String,
    has_container: bool,
    has_header: bool,
    rows: usize,
}

impl TerminalTarget {
    pub fn new(width: u32, height: u32, offset: UtcOffset) -> Self {
        Self {
            width,
            height,
            offset,
            frame: String::new(),
            has_container: false,
            has_header: false,
            rows: 0,
        }
    }

    /// Sized from `COLUMNS` / `LINES` when the shell exports them.
    pub fn from_env(offset: UtcOffset) -> Self {
        let read = |name: &str, fallback: u32| {
            std::env::var(name)
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(fallback)
        };
        Self::new(read("COLUMNS", DEFAULT_WIDTH), read("LINES", DEFAULT_HEIGHT), offset)
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    fn due_text(&self, task: &Task) -> String {
        task.due_date
            .map(|due| format_dmy(due.to_offset(self.offset).date()))
            .unwrap_or_else(|| "-".to_string())
    }

    fn plain_line(&self, task: &Task) -> String {
        format!(
            "{} | {} | {} | {}",
            task.id,
            task.name,
            task.status_ui.label(),
            self.due_text(task)
        )
    }

    fn status_lines(&mut self, view: &ExplorerView) {
        if view.loading {
            self.frame.push_str("loading...\n");
        }
        if let Some(error) = view.error.as_ref() {
            self.frame.push_str(&format!("ERROR: {error}\n"));
        }
        if let Some(notice) = view.notice.as_ref() {
            self.frame.push_str(&format!("{notice}\n"));
        }
    }

    fn draw_normal(&mut self, view: &ExplorerView) {
        let (from, to, total) = view.range;
        self.frame.push_str(&format!(
            "Tasks {from}-{to} of {total} (loaded {}) | sort: {} {} | write: {}\n",
            view.total_count,
            view.query.sort.key.as_str(),
            if view.query.sort.direction == SortDirection::Desc {
                "desc"
            } else {
                "asc"
            },
            view.contract_help
        ));
        if view.query.filters.is_active() {
            self.frame.push_str(&format!("filters: {}\n", filter_summary(view)));
        }
        self.status_lines(view);

        let rows: Vec<TaskRow> = view
            .page_tasks
            .iter()
            .map(|task| TaskRow {
                id: task.id.clone(),
                name: task.name.clone(),
                task_type: task.task_type.clone(),
                status: task.status_ui.label(),
                due: self.due_text(task),
                customer: task.customer_name.clone(),
                creator: task.created_by_name.clone(),
                assignee: task.staff_name.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::psql());
        // The first record is the header.
        self.rows = table.count_rows().saturating_sub(1);
        self.has_header = table.count_rows() > 0;
        self.has_container = true;
        self.frame.push_str(&table.to_string());
        self.frame.push('\n');

        let window: Vec<String> = view
            .pages_window
            .iter()
            .map(|page| {
                if *page == view.page {
                    format!("[{page}]")
                } else {
                    page.to_string()
                }
            })
            .collect();
        self.frame.push_str(&format!(
            "page {}/{}: {} | page size {}\n",
            view.page,
            view.pages,
            window.join(" "),
            view.query.page_size
        ));
    }

    fn draw_safe(&mut self, view: &ExplorerView) {
        self.frame.push_str(&format!(
            "Tasks (safe view): first {} of {} matching\n",
            view.safe_sample.len(),
            view.filtered_count
        ));
        self.has_header = true;
        self.status_lines(view);
        for task in &view.safe_sample {
            let line = self.plain_line(task);
            self.frame.push_str(&format!("- {line}\n"));
        }
        self.rows = view.safe_sample.len();
        self.has_container = true;
    }

    fn draw_fallback(&mut self, view: &ExplorerView, diagnostics: Option<&Diagnostics>) {
        self.frame.push_str("taskscope fallback view\n");
        if let Some(diagnostics) = diagnostics {
            let snapshot = &diagnostics.snapshot;
            self.frame.push_str(&format!(
                "reason: {} | output={} rows={} text={} area={} style={}\n",
                diagnostics.reason.label(),
                snapshot.output_len,
                snapshot.row_count,
                snapshot.text_length,
                snapshot.rect(),
                snapshot
                    .style
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
        self.frame.push_str(&format!(
            "matching {} of {} | fetch: HTTP {} source={} count={}\n",
            view.filtered_count,
            view.total_count,
            view.fetch_meta
                .http_status
                .map(|status| status.to_string())
                .unwrap_or_else(|| "-".to_string()),
            if view.fetch_meta.list_source.is_empty() {
                "-"
            } else {
                view.fetch_meta.list_source.as_str()
            },
            view.fetch_meta.list_count
        ));
        for task in &view.safe_sample {
            let line = self.plain_line(task);
            self.frame.push_str(&line);
            self.frame.push('\n');
        }
        self.rows = view.safe_sample.len();
    }
}

fn filter_summary(view: &ExplorerView) -> String {
    let filters = &view.query.filters;
    let mut parts = Vec::new();
    for (label, value) in [
        ("name", &filters.q_name),
        ("customer", &filters.q_customer),
        ("creator", &filters.q_creator),
        ("assignee", &filters.q_assignee),
    ] {
        if !value.trim().is_empty() {
            parts.push(format!("{label}~{}", value.trim()));
        }
    }
    if !filters.statuses.is_empty() {
        let statuses: Vec<&str> = filters.statuses.iter().map(|status| status.label()).collect();
        parts.push(format!("status={}", statuses.join(",")));
    }
    if !filters.types.is_empty() {
        parts.push(format!("type={}", filters.types.join(",")));
    }
    if filters.due_from.is_some() || filters.due_to.is_some() {
        parts.push(format!(
            "due {}..{}",
            filters.due_from.as_deref().unwrap_or(""),
            filters.due_to.as_deref().unwrap_or("")
        ));
    }
    parts.join(" ")
}

impl RenderTarget for TerminalTarget {
    fn draw(&mut self, mode: RenderMode, view: &ExplorerView, diagnostics: Option<&Diagnostics>) {
        self.frame.clear();
        self.has_container = false;
        self.has_header = false;
        self.rows = 0;
        match mode {
            RenderMode::Normal => self.draw_normal(view),
            RenderMode::Safe => self.draw_safe(view),
            RenderMode::HardFallback => self.draw_fallback(view, diagnostics),
        }
    }

    fn inspect(&self) -> RenderSnapshot {
        RenderSnapshot {
            output_len: self.frame.len(),
            has_container: self.has_container,
            has_header: self.has_header,
            width: self.width,
            height: self.height,
            row_count: self.rows,
            text_length: self
                .frame
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .count(),
            style: Some(StyleSummary::visible()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TerminalTarget;
    use serde_json::json;
    use taskscope_core::model::normalize_task;
    use taskscope_core::view::ExplorerView;
    use taskscope_core::watchdog::{RenderMode, RenderTarget, Watchdog};
    use time::UtcOffset;

    fn view() -> ExplorerView {
        let tasks = vec![
            normalize_task(&json!({"_id": "t1", "name": "Call Ann", "status": "TODAY"})),
            normalize_task(&json!({"_id": "t2", "name": "Chase invoice", "status": "OVERDUE"})),
        ];
        let mut view = ExplorerView::empty();
        view.total_count = 2;
        view.filtered_count = 2;
        view.range = (1, 2, 2);
        view.safe_sample = tasks.clone();
        view.page_tasks = tasks;
        view
    }

    #[test]
    fn normal_render_reports_table_rows() {
        let mut target = TerminalTarget::new(120, 40, UtcOffset::UTC);
        target.draw(RenderMode::Normal, &view(), None);
        let snapshot = target.inspect();

        assert_eq!(snapshot.row_count, 2);
        assert!(snapshot.has_header);
        assert!(target.frame().contains("Chase invoice"));
        assert!(target.frame().contains("Tasks 1-2 of 2"));
    }

    #[test]
    fn healthy_terminal_stays_normal() {
        let mut target = TerminalTarget::new(120, 40, UtcOffset::UTC);
        assert_eq!(Watchdog::new().run(&mut target, &view()), RenderMode::Normal);
    }

    #[test]
    fn lost_rows_fall_back_to_the_safe_list() {
        let mut target = TerminalTarget::new(120, 40, UtcOffset::UTC);
        let mut broken = view();
        broken.page_tasks.clear();

        assert_eq!(Watchdog::new().run(&mut target, &broken), RenderMode::Safe);
        assert!(target.frame().starts_with("Tasks (safe view)"));
        assert!(target.frame().contains("- t1 | Call Ann | TODAY | -"));
    }

    #[test]
    fn zero_width_terminal_gets_the_fallback() {
        let mut target = TerminalTarget::new(0, 40, UtcOffset::UTC);

        assert_eq!(
            Watchdog::new().run(&mut target, &view()),
            RenderMode::HardFallback
        );
        assert!(target.frame().contains("reason: zero_area"));
        assert!(target.frame().contains("t2 | Chase invoice | OVERDUE | -"));
    }
}
