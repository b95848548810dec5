//! Filter, sort and paginate the in-memory collection.
//!
//! Results are index lists into the collection so the session can patch or remove
//! entities without invalidating what the query engine handed out.

use crate::model::{StatusUi, Task};
use crate::temporal::{end_of_day, instant_millis, parse_iso_date, start_of_day};
use icu_collator::{Collator, CollatorOptions, Strength};
use icu_locid::locale;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use time::UtcOffset;
use tracing::warn;

pub const PAGE_SIZES: [usize; 4] = [25, 50, 100, 200];
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const PAGES_WINDOW: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    #[serde(rename = "dueDate")]
    DueDate,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "customerName")]
    Customer,
    #[serde(rename = "createdByName")]
    Creator,
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "statusUi")]
    Status,
}

impl SortKey {
    pub const ALL: [SortKey; 6] = [
        Self::DueDate,
        Self::Name,
        Self::Customer,
        Self::Creator,
        Self::Type,
        Self::Status,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DueDate => "dueDate",
            Self::Name => "name",
            Self::Customer => "customerName",
            Self::Creator => "createdByName",
            Self::Type => "type",
            Self::Status => "statusUi",
        }
    }

    /// Accepts the stored names plus the short forms the CLI offers.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "due" | "duedate" | "due_date" => Some(Self::DueDate),
            "name" => Some(Self::Name),
            "customer" | "customername" => Some(Self::Customer),
            "creator" | "createdbyname" | "created_by" => Some(Self::Creator),
            "type" => Some(Self::Type),
            "status" | "statusui" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub q_name: String,
    pub q_customer: String,
    pub q_creator: String,
    pub q_assignee: String,
    pub statuses: Vec<StatusUi>,
    pub types: Vec<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub due_from: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`; covers the whole day.
    pub due_to: Option<String>,
}

impl Filters {
    pub fn is_active(&self) -> bool {
        *self != Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryState {
    pub filters: Filters,
    pub sort: Sort,
    pub page_size: usize,
    #[serde(skip)]
    pub page: usize,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            filters: Filters::default(),
            sort: Sort::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
        }
    }
}

impl QueryState {
    /// Repairs anything a stored or hand-edited state could get wrong.
    pub fn sanitize(&mut self) {
        if !PAGE_SIZES.contains(&self.page_size) {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.page == 0 {
            self.page = 1;
        }
        let mut seen = BTreeSet::new();
        self.filters.statuses.retain(|status| seen.insert(*status));
        let mut seen_types = BTreeSet::new();
        self.filters
            .types
            .retain(|task_type| seen_types.insert(task_type.clone()));
        for bound in [&mut self.filters.due_from, &mut self.filters.due_to] {
            if bound.as_deref().and_then(parse_iso_date).is_none() {
                *bound = None;
            }
        }
    }

    /// Same key flips the direction; a new key starts ascending.
    pub fn toggle_sort(&mut self, key: SortKey) {
        if self.sort.key == key {
            self.sort.direction = self.sort.direction.flipped();
        } else {
            self.sort = Sort {
                key,
                direction: SortDirection::Asc,
            };
        }
    }

    /// Clears filters and sort; the page size is a preference and survives.
    pub fn reset_filters(&mut self) {
        self.filters = Filters::default();
        self.sort = Sort::default();
        self.page = 1;
    }
}

pub fn total_pages(filtered: usize, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    filtered.div_ceil(page_size).max(1)
}

fn contains_folded(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn bounds(filters: &Filters, offset: UtcOffset) -> (Option<i64>, Option<i64>) {
    let from = filters
        .due_from
        .as_deref()
        .and_then(parse_iso_date)
        .map(|date| instant_millis(start_of_day(date, offset)));
    let to = filters
        .due_to
        .as_deref()
        .and_then(parse_iso_date)
        .map(|date| instant_millis(end_of_day(date, offset)));
    (from, to)
}

fn matches(task: &Task, filters: &Filters, from: Option<i64>, to: Option<i64>) -> bool {
    if !contains_folded(&task.name, &filters.q_name)
        || !contains_folded(&task.customer_name, &filters.q_customer)
        || !contains_folded(&task.created_by_name, &filters.q_creator)
        || !contains_folded(&task.staff_name, &filters.q_assignee)
    {
        return false;
    }
    if !filters.statuses.is_empty() && !filters.statuses.contains(&task.status_ui) {
        return false;
    }
    if !filters.types.is_empty() && !filters.types.contains(&task.task_type) {
        return false;
    }
    if from.is_some() || to.is_some() {
        let Some(due) = task.due_date.map(instant_millis) else {
            return false;
        };
        if from.is_some_and(|from| due < from) || to.is_some_and(|to| due > to) {
            return false;
        }
    }
    true
}

/// Polish collation at secondary strength: accents count, case does not.
struct TextOrder(Option<Collator>);

impl TextOrder {
    fn new() -> Self {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Secondary);
        let collator = Collator::try_new(&locale!("pl").into(), options)
            .map_err(|err| warn!("collation data unavailable, sorting by code point: {err}"))
            .ok();
        Self(collator)
    }

    fn compare(&self, left: &str, right: &str) -> Ordering {
        match self.0.as_ref() {
            Some(collator) => collator.compare(left, right),
            None => left.to_lowercase().cmp(&right.to_lowercase()),
        }
    }
}

fn compare(left: &Task, right: &Task, sort: Sort, text: &TextOrder) -> Ordering {
    let directed = |ordering: Ordering| match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    };
    let primary = match sort.key {
        SortKey::DueDate => match (left.due_date, right.due_date) {
            (Some(a), Some(b)) => directed(a.cmp(&b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        SortKey::Name => directed(text.compare(&left.name, &right.name)),
        SortKey::Customer => directed(text.compare(&left.customer_name, &right.customer_name)),
        SortKey::Creator => directed(text.compare(&left.created_by_name, &right.created_by_name)),
        SortKey::Type => directed(text.compare(&left.task_type, &right.task_type)),
        SortKey::Status => directed(left.status_ui.label().cmp(right.status_ui.label())),
    };
    primary.then_with(|| left.id.cmp(&right.id))
}

/// Filtered and sorted indices into `tasks`. Clamps `state.page` into range.
pub fn apply_query(tasks: &[Task], state: &mut QueryState, offset: UtcOffset) -> Vec<usize> {
    let (from, to) = bounds(&state.filters, offset);
    let mut indices: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, task)| matches(task, &state.filters, from, to))
        .map(|(index, _)| index)
        .collect();
    let text = TextOrder::new();
    indices.sort_by(|a, b| compare(&tasks[*a], &tasks[*b], state.sort, &text));

    let pages = total_pages(indices.len(), state.page_size);
    state.page = state.page.clamp(1, pages);
    indices
}

pub fn page_items<'a>(filtered: &'a [usize], state: &QueryState) -> &'a [usize] {
    let start = (state.page.max(1) - 1).saturating_mul(state.page_size);
    if start >= filtered.len() {
        return &[];
    }
    let end = (start + state.page_size).min(filtered.len());
    &filtered[start..end]
}

/// `(from, to, total)` for a "showing from-to of total" line; `(0, 0, 0)` when empty.
pub fn page_range(filtered: usize, state: &QueryState) -> (usize, usize, usize) {
    if filtered == 0 {
        return (0, 0, 0);
    }
    let start = (state.page.max(1) - 1) * state.page_size;
    let end = (start + state.page_size).min(filtered);
    (start + 1, end, filtered)
}

/// At most [`PAGES_WINDOW`] page numbers centred on `page`.
pub fn pages_window(page: usize, pages: usize) -> Vec<usize> {
    if pages <= PAGES_WINDOW {
        return (1..=pages.max(1)).collect();
    }
    let half = PAGES_WINDOW / 2;
    let page = page.clamp(1, pages);
    let mut start = page.saturating_sub(half).max(1);
    let mut end = start + PAGES_WINDOW - 1;
    if end > pages {
        end = pages;
        start = end + 1 - PAGES_WINDOW;
    }
    (start..=end).collect()
}

pub fn task_types(tasks: &[Task]) -> Vec<String> {
    let mut types: Vec<String> = tasks
        .iter()
        .map(|task| {
            if task.task_type.is_empty() {
                "Unknown".to_string()
            } else {
                task.task_type.clone()
            }
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let text = TextOrder::new();
    types.sort_by(|a, b| text.compare(a, b).then_with(|| a.cmp(b)));
    types
}
