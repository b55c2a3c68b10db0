//! Memory record model and query parameters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mnemo_cache::{CacheKeyParams, FilterValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of knowledge a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Conversation message.
    Message,
    /// Extracted fact.
    Facts,
    /// Ingested document chunk.
    Document,
    /// Entity note.
    Entity,
    /// Caller-defined content.
    Custom,
}

impl MemoryKind {
    /// Store table conventionally holding this kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            MemoryKind::Message => "messages",
            MemoryKind::Facts => "facts",
            MemoryKind::Document => "documents",
            MemoryKind::Entity => "entities",
            MemoryKind::Custom => "custom",
        }
    }
}

/// Textual payload of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    /// Record text.
    pub text: String,
    /// Origin of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Actions attached to the content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// Typed metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Record kind.
    pub kind: MemoryKind,
    /// Origin of the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Persisted unit of agent knowledge. Owned by the external store; this
/// layer holds only transient copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Identifier, assigned by the store on create.
    pub id: Option<Uuid>,
    /// Entity the record belongs to.
    pub entity_id: Uuid,
    /// Room the record belongs to.
    pub room_id: Uuid,
    /// Record content.
    pub content: MemoryContent,
    /// Record metadata.
    pub metadata: MemoryMetadata,
    /// Optional fixed-length embedding vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Deduplicate on create when true.
    #[serde(default)]
    pub unique: bool,
    /// Creation timestamp, assigned by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Build a record of the given kind with defaults for the rest.
    pub fn new(entity_id: Uuid, room_id: Uuid, kind: MemoryKind, text: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_id,
            room_id,
            content: MemoryContent {
                text: text.into(),
                source: None,
                actions: Vec::new(),
            },
            metadata: MemoryMetadata {
                kind,
                source: None,
                timestamp: Utc::now(),
            },
            embedding: None,
            unique: false,
            created_at: None,
        }
    }

    /// True when the record carries a non-empty embedding.
    pub fn has_embedding(&self) -> bool {
        self.embedding
            .as_ref()
            .map_or(false, |embedding| !embedding.is_empty())
    }
}

/// Parameters for a store retrieval or search.
///
/// Filter values are tri-state: a key absent from `filters` was never
/// mentioned, `None` means explicitly unset, `Some(Value::Null)` means null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Store table to query.
    pub table_name: String,
    /// Optional room scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    /// Maximum records to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Restrict to unique records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    /// Named filters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, Option<serde_json::Value>>,
    /// Query embedding for semantic search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Minimum similarity for search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_threshold: Option<f32>,
}

impl MemoryQuery {
    /// Query against the given table.
    pub fn table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            room_id: None,
            count: None,
            unique: None,
            filters: BTreeMap::new(),
            embedding: None,
            match_threshold: None,
        }
    }

    /// Scope to a room.
    pub fn room(mut self, room_id: Uuid) -> Self {
        self.room_id = Some(room_id);
        self
    }

    /// Limit the record count.
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Restrict to unique records.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    /// Add a named filter.
    pub fn filter(mut self, name: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        self.filters.insert(name.into(), value);
        self
    }

    /// Attach a query embedding.
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the similarity threshold.
    pub fn match_threshold(mut self, threshold: f32) -> Self {
        self.match_threshold = Some(threshold);
        self
    }

    /// Deterministic cache key for this query.
    pub fn cache_key(&self) -> String {
        let mut params = CacheKeyParams::new(&self.table_name);
        if let Some(room_id) = self.room_id {
            params = params.room(room_id.to_string());
        }
        if let Some(count) = self.count {
            params = params.count(count);
        }
        if let Some(unique) = self.unique {
            params = params.unique(unique);
        }
        if let Some(threshold) = self.match_threshold {
            params = params.match_threshold(threshold);
        }
        if let Some(embedding) = &self.embedding {
            params = params.embedding(embedding);
        }
        for (name, value) in &self.filters {
            let filter = match value {
                None => FilterValue::Unset,
                Some(serde_json::Value::Null) => FilterValue::Null,
                Some(value) => FilterValue::Value(value.clone()),
            };
            params = params.filter(name.clone(), filter);
        }
        params.encode()
    }
}

/// Partial record for an update; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    /// Record to update.
    pub id: Uuid,
    /// Replacement content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MemoryContent>,
    /// Replacement metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MemoryMetadata>,
    /// Replacement embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryUpdate {
    /// Update carrying only an embedding.
    pub fn embedding_only(id: Uuid, embedding: Vec<f32>) -> Self {
        Self {
            id,
            content: None,
            metadata: None,
            embedding: Some(embedding),
        }
    }
}
