//! Per-invocation fact set.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// Fact values gathered or derived for one invocation.
///
/// Values are keyed by fact name. Names may contain dots, so path
/// resolution matches the longest stored name that is a dotted prefix of
/// the requested path and navigates into the remainder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSet {
    values: BTreeMap<String, Value>,
    absent: BTreeSet<String>,
}

impl FactSet {
    pub fn new() -> Self {
        FactSet::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.absent.remove(&name);
        self.values.insert(name, value);
    }

    /// Record that `name` could not be obtained and was skipped.
    pub fn mark_absent(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.values.remove(&name);
        self.absent.insert(name);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_absent(&self, name: &str) -> bool {
        self.absent.contains(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn absent_facts(&self) -> impl Iterator<Item = &str> {
        self.absent.iter().map(String::as_str)
    }

    /// Resolve a dotted path such as `payment.amount.value`.
    ///
    /// Exact names win. Otherwise the longest stored prefix is used and the
    /// remaining segments navigate objects by key and arrays by index.
    /// Returns `None` when nothing matches, navigation fails, or the walk
    /// reaches a prefix that was skipped as absent.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.values.get(path) {
            return Some(v);
        }
        if self.absent.contains(path) {
            return None;
        }
        let mut end = path.len();
        while let Some(dot) = path[..end].rfind('.') {
            let prefix = &path[..dot];
            if self.absent.contains(prefix) {
                return None;
            }
            if let Some(base) = self.values.get(prefix) {
                return navigate(base, &path[dot + 1..]);
            }
            end = dot;
        }
        None
    }

    /// JSON object of every present fact, for dry-run responses and audit.
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

fn navigate<'a>(mut current: &'a Value, rest: &str) -> Option<&'a Value> {
    for segment in rest.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
