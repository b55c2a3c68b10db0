//! Deterministic cache key encoding for query parameters.

use std::collections::BTreeMap;

/// Filter value as supplied by a caller.
///
/// A filter that was explicitly passed without a value is distinct from one
/// set to null, and both are distinct from a filter that was never mentioned.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Explicitly present but unset.
    Unset,
    /// Explicitly null.
    Null,
    /// Concrete JSON value, possibly nested.
    Value(serde_json::Value),
}

/// Builder for a deterministic, order-independent cache key.
///
/// Encoding is a pure function of the collected parameters: fields are
/// flattened into `name=value` segments, sorted by name, and joined. Two
/// semantically identical queries always produce the same key regardless of
/// the order in which parameters were supplied.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyParams {
    table: Option<String>,
    room: Option<String>,
    count: Option<usize>,
    unique: Option<bool>,
    match_threshold: Option<f32>,
    filters: BTreeMap<String, FilterValue>,
    embedding: Option<Vec<f32>>,
    extra: BTreeMap<String, String>,
}

impl CacheKeyParams {
    /// Start a key for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    /// Scope the key to a room identifier.
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Requested record count.
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Unique-record flag.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    /// Similarity match threshold.
    pub fn match_threshold(mut self, threshold: f32) -> Self {
        self.match_threshold = Some(threshold);
        self
    }

    /// Add a named filter.
    pub fn filter(mut self, name: impl Into<String>, value: FilterValue) -> Self {
        self.filters.insert(name.into(), value);
        self
    }

    /// Attach a query embedding vector.
    pub fn embedding(mut self, values: &[f32]) -> Self {
        self.embedding = Some(values.to_vec());
        self
    }

    /// Add an opaque extra segment, namespaced apart from the built-in
    /// parameter names.
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Encode the collected parameters into a stable key string.
    pub fn encode(&self) -> String {
        let mut segments: BTreeMap<String, String> = BTreeMap::new();
        if let Some(table) = &self.table {
            segments.insert("table".to_string(), table.clone());
        }
        if let Some(room) = &self.room {
            segments.insert("room".to_string(), room.clone());
        }
        if let Some(count) = self.count {
            segments.insert("count".to_string(), count.to_string());
        }
        if let Some(unique) = self.unique {
            segments.insert("unique".to_string(), unique.to_string());
        }
        if let Some(threshold) = self.match_threshold {
            segments.insert("threshold".to_string(), format!("{threshold}"));
        }
        if let Some(embedding) = &self.embedding {
            segments.insert("embedding".to_string(), encode_vector(embedding));
        }
        for (name, value) in &self.filters {
            segments.insert(format!("filters.{name}"), encode_filter(value));
        }
        for (name, value) in &self.extra {
            segments.insert(format!("extra.{name}"), value.clone());
        }

        segments
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Render a numeric vector into a stable textual form.
fn encode_vector(values: &[f32]) -> String {
    let parts = values
        .iter()
        .map(|value| format!("{value}"))
        .collect::<Vec<_>>();
    format!("[{}]", parts.join(","))
}

/// Render a filter value, keeping the unset/null distinction.
fn encode_filter(value: &FilterValue) -> String {
    match value {
        FilterValue::Unset => "<unset>".to_string(),
        FilterValue::Null => "null".to_string(),
        // serde_json keeps object keys sorted, so nested values are stable.
        FilterValue::Value(value) => value.to_string(),
    }
}
