//! Lazy embedding policy and backfill.

use std::sync::Arc;

use futures_util::future::join_all;
use log::warn;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::model::{MemoryKind, MemoryRecord, MemoryUpdate};
use crate::store::{EmbeddingModel, MemoryStore};

/// Thresholds steering which records embed at create time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EmbeddingPolicyConfig {
    /// Messages longer than this many characters embed immediately.
    pub message_min_chars: usize,
    /// Custom records longer than this many characters embed immediately.
    pub custom_min_chars: usize,
}

impl Default for EmbeddingPolicyConfig {
    /// Default embedding policy settings.
    fn default() -> Self {
        Self {
            message_min_chars: 20,
            custom_min_chars: 50,
        }
    }
}

/// Decides when a record is worth embedding at create time.
///
/// Facts and documents always embed; they exist to be searched. Entities
/// never embed at create time. Messages and custom records embed only past
/// the configured length, and messages addressed with `@` or issued as `/`
/// commands are skipped outright.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingPolicy {
    config: EmbeddingPolicyConfig,
}

impl EmbeddingPolicy {
    /// Policy with the given thresholds.
    pub fn new(config: EmbeddingPolicyConfig) -> Self {
        Self { config }
    }

    /// True when a record of this kind and text should embed now.
    pub fn should_embed_now(&self, kind: MemoryKind, text: &str) -> bool {
        match kind {
            MemoryKind::Facts | MemoryKind::Document => true,
            MemoryKind::Entity => false,
            MemoryKind::Message => {
                text.chars().count() > self.config.message_min_chars
                    && !text.starts_with(['@', '/'])
            }
            MemoryKind::Custom => text.chars().count() > self.config.custom_min_chars,
        }
    }
}

/// Creates records with policy-gated embedding and backfills vectors for
/// records surfaced without one.
pub struct LazyEmbedder {
    store: Arc<dyn MemoryStore>,
    model: Arc<dyn EmbeddingModel>,
    policy: EmbeddingPolicy,
}

impl LazyEmbedder {
    /// Wire an embedder over the given collaborators.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        model: Arc<dyn EmbeddingModel>,
        policy: EmbeddingPolicy,
    ) -> Self {
        Self {
            store,
            model,
            policy,
        }
    }

    /// Persist the record, embedding it first when the policy says so.
    ///
    /// A failed or empty embedding never blocks the create; the record is
    /// persisted without a vector and picked up later by backfill.
    pub async fn create_with_lazy_embedding(
        &self,
        mut record: MemoryRecord,
        table: &str,
        unique: bool,
    ) -> Result<Uuid, MemoryError> {
        if !record.has_embedding()
            && self
                .policy
                .should_embed_now(record.metadata.kind, &record.content.text)
        {
            match self.model.embed(&record.content.text).await {
                Ok(embedding) if !embedding.is_empty() => {
                    record.embedding = Some(embedding);
                }
                Ok(_) => {
                    warn!("model returned empty embedding, persisting without vector (table={table})");
                }
                Err(err) => {
                    warn!(
                        "embedding failed, persisting without vector (table={table}, error={err})"
                    );
                }
            }
        }
        self.store.create_memory(&record, table, unique).await
    }

    /// Embed and persist vectors for the records that lack one.
    ///
    /// Returns the input set with successfully embedded records updated in
    /// place. Individual failures leave the record unchanged; this call
    /// never errors.
    pub async fn backfill_embeddings(&self, mut records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
        let pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.has_embedding())
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            return records;
        }
        let results = join_all(pending.iter().map(|&index| {
            let text = records[index].content.text.clone();
            async move { (index, self.model.embed(&text).await) }
        }))
        .await;
        for (index, result) in results {
            let record = &mut records[index];
            match result {
                Ok(embedding) if !embedding.is_empty() => {
                    record.embedding = Some(embedding.clone());
                    if let Some(id) = record.id {
                        let update = MemoryUpdate::embedding_only(id, embedding);
                        match self.store.update_memory(&update).await {
                            Ok(_) => {}
                            Err(err) => {
                                warn!("backfill persist failed (id={id}, error={err})");
                            }
                        }
                    }
                }
                Ok(_) => {
                    warn!("backfill produced empty embedding, leaving record as is");
                }
                Err(err) => {
                    warn!("backfill embedding failed, leaving record as is (error={err})");
                }
            }
        }
        records
    }
}
