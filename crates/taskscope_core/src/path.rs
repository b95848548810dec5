//! Dotted/indexed paths into JSON bodies, e.g. `task.fields[2].value` or `task.fields.2.value`.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static INDEX_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

pub fn normalize_path(path: &str) -> String {
    let dotted = INDEX_SEGMENT.replace_all(path.trim(), ".$1");
    dotted.trim_start_matches('.').to_string()
}

pub fn split_path(path: &str) -> Vec<String> {
    normalize_path(path)
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |index| items.get_mut(index)),
        _ => None,
    }
}

pub fn get_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = split_path(path);
    if segments.is_empty() {
        return None;
    }
    segments
        .iter()
        .try_fold(value, |current, segment| child(current, segment))
}

/// Writes `new_value` at `path`. Every intermediate container must already exist;
/// returns `false` without touching anything when it does not.
pub fn set_by_path(value: &mut Value, path: &str, new_value: Value) -> bool {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = value;
    for segment in parents {
        match child_mut(current, segment) {
            Some(next) if !next.is_null() => current = next,
            _ => return false,
        }
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), new_value);
            true
        }
        Value::Array(items) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items[index] = new_value;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// Every leaf path in document order. Arrays expand to indices, records to keys.
/// `null` is not a leaf.
pub fn leaf_paths(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk(value, String::new(), &mut out);
    out
}

fn walk(value: &Value, path: String, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk(item, join(&path, &index.to_string()), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                walk(item, join(&path, key), out);
            }
        }
        _ => {
            if !path.is_empty() {
                out.push(path);
            }
        }
    }
}

fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

/// First leaf whose last segment contains any keyword, case-insensitively.
pub fn find_first_path(value: &Value, keywords: &[&str]) -> Option<String> {
    leaf_paths(value)
        .into_iter()
        .find(|path| segment_matches(last_segment(path), keywords))
}

pub fn segment_matches(segment: &str, keywords: &[&str]) -> bool {
    let lowered = segment.to_lowercase();
    keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
}

pub fn path_contains_any(path: &str, keywords: &[&str]) -> bool {
    let lowered = path.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

/// Replaces every string equal to `old` anywhere in the tree.
pub fn replace_string_everywhere(value: &mut Value, old: &str, new: &str) {
    if old.is_empty() {
        return;
    }
    match value {
        Value::String(text) if text == old => *text = new.to_string(),
        Value::Array(items) => {
            for item in items {
                replace_string_everywhere(item, old, new);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_string_everywhere(item, old, new);
            }
        }
        _ => {}
    }
}
