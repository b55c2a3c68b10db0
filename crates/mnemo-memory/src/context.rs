//! Contextual aggregation of memories for prompt assembly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use log::warn;
use uuid::Uuid;

use crate::embedding::LazyEmbedder;
use crate::error::MemoryError;
use crate::model::{MemoryQuery, MemoryRecord};
use crate::retrieval::{CachedRetriever, elapsed_ms};
use crate::store::EmbeddingModel;

/// Shaping knobs for a context request.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContextOptions {
    /// Recent messages to fetch.
    pub message_count: usize,
    /// Relevant facts to fetch.
    pub fact_count: usize,
    /// Entities to fetch.
    pub entity_count: usize,
    /// Minimum similarity for the fact search.
    pub match_threshold: f32,
    /// Backfill missing embeddings on the returned records.
    pub backfill_embeddings: bool,
}

impl Default for ContextOptions {
    /// Default context shaping settings.
    fn default() -> Self {
        Self {
            message_count: 10,
            fact_count: 5,
            entity_count: 5,
            match_threshold: 0.75,
            backfill_embeddings: false,
        }
    }
}

/// How a context was assembled.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ContextMetadata {
    /// Records across all sections.
    pub total_memories: usize,
    /// Every issued sub-retrieval was answered from cache.
    pub cache_hit: bool,
    /// Wall time spent assembling, in milliseconds.
    pub query_time_ms: f64,
}

/// Aggregated context ready for prompt assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContext {
    /// Recent conversation messages, most recent first.
    pub messages: Vec<MemoryRecord>,
    /// Facts relevant to the query text.
    pub facts: Vec<MemoryRecord>,
    /// Entities known in the room.
    pub entities: Vec<MemoryRecord>,
    /// Prompt-ready rendering of the sections and the query.
    pub formatted_context: String,
    /// Assembly metadata.
    pub metadata: ContextMetadata,
}

/// Assembles room context from concurrent sub-retrievals.
///
/// Individual sub-retrieval failures degrade to an empty section; only a
/// wholesale failure surfaces as an error.
pub struct ContextAggregator {
    retriever: Arc<CachedRetriever>,
    model: Arc<dyn EmbeddingModel>,
    lazy: Arc<LazyEmbedder>,
}

impl ContextAggregator {
    /// Wire an aggregator over the given collaborators.
    pub fn new(
        retriever: Arc<CachedRetriever>,
        model: Arc<dyn EmbeddingModel>,
        lazy: Arc<LazyEmbedder>,
    ) -> Self {
        Self {
            retriever,
            model,
            lazy,
        }
    }

    /// Assemble context for the room around the query text.
    ///
    /// Messages, facts, and entities are fetched concurrently. The fact
    /// search is skipped entirely when the query text cannot be embedded.
    pub async fn get_context(
        &self,
        room_id: Uuid,
        query_text: &str,
        options: &ContextOptions,
    ) -> Result<MemoryContext, MemoryError> {
        let started = Instant::now();

        let query_embedding = match self.model.embed(query_text).await {
            Ok(embedding) if !embedding.is_empty() => Some(embedding),
            Ok(_) => {
                warn!("query embedding came back empty, skipping fact search (room={room_id})");
                None
            }
            Err(err) => {
                warn!("query embedding failed, skipping fact search (room={room_id}, error={err})");
                None
            }
        };

        let message_query = MemoryQuery::table("messages")
            .room(room_id)
            .count(options.message_count);
        let entity_query = MemoryQuery::table("entities")
            .room(room_id)
            .count(options.entity_count);

        let ((messages, message_hit), (facts, fact_hit), (entities, entity_hit)) = tokio::join!(
            self.recall(message_query, "messages"),
            self.search_facts(room_id, query_embedding, options),
            self.recall(entity_query, "entities"),
        );

        let cache_hit = [message_hit, fact_hit, entity_hit]
            .into_iter()
            .flatten()
            .all(|hit| hit);

        let (messages, facts, entities) = if options.backfill_embeddings {
            self.backfill_sections(messages, facts, entities).await?
        } else {
            (messages, facts, entities)
        };

        let formatted_context = format_context(&messages, &facts, &entities, query_text);
        let total_memories = messages.len() + facts.len() + entities.len();
        Ok(MemoryContext {
            messages,
            facts,
            entities,
            formatted_context,
            metadata: ContextMetadata {
                total_memories,
                cache_hit,
                query_time_ms: elapsed_ms(started),
            },
        })
    }

    /// Fetch one table across several filter sets at once.
    ///
    /// Every requested table appears in the result; a failed retrieval
    /// yields an empty section rather than dropping the key.
    pub async fn get_by_multiple_criteria(
        &self,
        tables: &[String],
        filters: &BTreeMap<String, Option<serde_json::Value>>,
        count: usize,
    ) -> HashMap<String, Vec<MemoryRecord>> {
        let results = join_all(tables.iter().map(|table| {
            let mut query = MemoryQuery::table(table.clone()).count(count);
            for (name, value) in filters {
                query = query.filter(name.clone(), value.clone());
            }
            async move { (table.clone(), self.retriever.get_cached_memories(&query).await) }
        }))
        .await;
        let mut sections = HashMap::with_capacity(tables.len());
        for (table, result) in results {
            let records = match result {
                Ok(records) => records,
                Err(err) => {
                    warn!("criteria retrieval failed, returning empty section (table={table}, error={err})");
                    Vec::new()
                }
            };
            sections.insert(table, records);
        }
        sections
    }

    async fn recall(&self, query: MemoryQuery, section: &str) -> (Vec<MemoryRecord>, Option<bool>) {
        match self.retriever.get_cached_with_flag(&query).await {
            Ok((records, hit)) => (records, Some(hit)),
            Err(err) => {
                warn!("context retrieval failed, using empty section (section={section}, error={err})");
                (Vec::new(), Some(false))
            }
        }
    }

    async fn search_facts(
        &self,
        room_id: Uuid,
        query_embedding: Option<Vec<f32>>,
        options: &ContextOptions,
    ) -> (Vec<MemoryRecord>, Option<bool>) {
        let Some(embedding) = query_embedding else {
            return (Vec::new(), None);
        };
        let query = MemoryQuery::table("facts")
            .room(room_id)
            .count(options.fact_count)
            .embedding(embedding)
            .match_threshold(options.match_threshold);
        match self.retriever.search_cached_with_flag(&query).await {
            Ok((records, hit)) => (records, Some(hit)),
            Err(err) => {
                warn!("fact search failed, using empty section (room={room_id}, error={err})");
                (Vec::new(), Some(false))
            }
        }
    }

    async fn backfill_sections(
        &self,
        messages: Vec<MemoryRecord>,
        facts: Vec<MemoryRecord>,
        entities: Vec<MemoryRecord>,
    ) -> Result<(Vec<MemoryRecord>, Vec<MemoryRecord>, Vec<MemoryRecord>), MemoryError> {
        let (message_len, fact_len, entity_len) = (messages.len(), facts.len(), entities.len());
        let mut merged = messages;
        merged.extend(facts);
        merged.extend(entities);
        let mut merged = self.lazy.backfill_embeddings(merged).await;
        if merged.len() != message_len + fact_len + entity_len {
            return Err(MemoryError::Context {
                stage: "embedding-backfill".to_string(),
                message: "backfill changed the record count".to_string(),
            });
        }
        let entities = merged.split_off(message_len + fact_len);
        let facts = merged.split_off(message_len);
        Ok((merged, facts, entities))
    }
}

fn format_context(
    messages: &[MemoryRecord],
    facts: &[MemoryRecord],
    entities: &[MemoryRecord],
    query_text: &str,
) -> String {
    let mut sections = Vec::new();
    if !messages.is_empty() {
        let mut section = String::from("Recent conversation:");
        for message in messages.iter().take(3) {
            section.push_str("\n- ");
            section.push_str(&message.content.text);
        }
        sections.push(section);
    }
    if !facts.is_empty() {
        let mut section = String::from("Relevant facts:");
        for fact in facts {
            section.push_str("\n- ");
            section.push_str(&fact.content.text);
        }
        sections.push(section);
    }
    if !entities.is_empty() {
        let mut section = String::from("Known entities:");
        for entity in entities {
            section.push_str("\n- ");
            section.push_str(&entity.content.text);
        }
        sections.push(section);
    }
    sections.push(query_text.to_string());
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::{ContextAggregator, ContextOptions};
    use crate::embedding::{EmbeddingPolicy, LazyEmbedder};
    use crate::model::{MemoryKind, MemoryRecord};
    use crate::retrieval::{CachedRetriever, MemoryCache};
    use mnemo_cache::{CacheConfig, OperationMetrics};
    use crate::testing::{CountingStore, FailingEmbedder, StubEmbedder};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn records(kind: MemoryKind, n: usize) -> Vec<MemoryRecord> {
        (0..n)
            .map(|i| {
                MemoryRecord::new(
                    Uuid::new_v4(),
                    Uuid::new_v4(),
                    kind,
                    format!("{} {i}", kind.table_name()),
                )
            })
            .collect()
    }

    fn aggregator_over(
        store: Arc<CountingStore>,
        model: Arc<StubEmbedder>,
    ) -> ContextAggregator {
        let cache = Arc::new(MemoryCache::new(CacheConfig::default()));
        let metrics = Arc::new(OperationMetrics::new());
        let retriever = Arc::new(CachedRetriever::new(store.clone(), cache, metrics));
        let lazy = Arc::new(LazyEmbedder::new(
            store,
            model.clone(),
            EmbeddingPolicy::default(),
        ));
        ContextAggregator::new(retriever, model, lazy)
    }

    #[tokio::test]
    async fn totals_cover_every_section() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Message, 2));
        store.set_search(records(MemoryKind::Facts, 3));
        let aggregator = aggregator_over(store, Arc::new(StubEmbedder::new(vec![0.1])));

        let context = aggregator
            .get_context(Uuid::new_v4(), "what do we know", &ContextOptions::default())
            .await
            .expect("context");

        // The canned recall answers both the message and the entity query.
        assert_eq!(context.messages.len(), 2);
        assert_eq!(context.facts.len(), 3);
        assert_eq!(context.entities.len(), 2);
        assert_eq!(context.metadata.total_memories, 7);
        assert!(!context.metadata.cache_hit);
    }

    #[tokio::test]
    async fn formatted_context_ends_with_the_query_text() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Message, 1));
        let aggregator = aggregator_over(store, Arc::new(StubEmbedder::new(vec![0.1])));

        let context = aggregator
            .get_context(Uuid::new_v4(), "the question at hand", &ContextOptions::default())
            .await
            .expect("context");

        assert!(context.formatted_context.ends_with("the question at hand"));
        assert!(context.formatted_context.starts_with("Recent conversation:"));
    }

    #[tokio::test]
    async fn conversation_section_caps_at_three_messages() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Message, 5));
        let aggregator = aggregator_over(store, Arc::new(StubEmbedder::new(vec![0.1])));

        let context = aggregator
            .get_context(Uuid::new_v4(), "q", &ContextOptions::default())
            .await
            .expect("context");

        let listed = context
            .formatted_context
            .split("\n\n")
            .next()
            .map(|section| section.matches("\n- ").count());
        assert_eq!(listed, Some(3));
    }

    #[tokio::test]
    async fn failed_embedding_skips_the_fact_search() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Message, 1));
        let cache = Arc::new(MemoryCache::new(CacheConfig::default()));
        let metrics = Arc::new(OperationMetrics::new());
        let retriever = Arc::new(CachedRetriever::new(store.clone(), cache, metrics));
        let lazy = Arc::new(LazyEmbedder::new(
            store.clone(),
            Arc::new(FailingEmbedder),
            EmbeddingPolicy::default(),
        ));
        let aggregator = ContextAggregator::new(retriever, Arc::new(FailingEmbedder), lazy);

        let context = aggregator
            .get_context(Uuid::new_v4(), "q", &ContextOptions::default())
            .await
            .expect("context despite embedding failure");

        assert_eq!(context.facts, Vec::new());
        assert_eq!(store.counts().search_memories, 0);
    }

    #[tokio::test]
    async fn failed_fact_search_degrades_to_empty_section() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Message, 1));
        store.fail_search();
        let aggregator = aggregator_over(store.clone(), Arc::new(StubEmbedder::new(vec![0.1])));

        let context = aggregator
            .get_context(Uuid::new_v4(), "q", &ContextOptions::default())
            .await
            .expect("context despite search failure");

        assert_eq!(context.facts, Vec::new());
        assert_eq!(store.counts().search_memories, 1);
        assert!(!context.metadata.cache_hit);
    }

    #[tokio::test]
    async fn second_identical_request_is_a_full_cache_hit() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Message, 1));
        store.set_search(records(MemoryKind::Facts, 1));
        let aggregator = aggregator_over(store.clone(), Arc::new(StubEmbedder::new(vec![0.1])));

        let room = Uuid::new_v4();
        let first = aggregator
            .get_context(room, "q", &ContextOptions::default())
            .await
            .expect("first");
        let second = aggregator
            .get_context(room, "q", &ContextOptions::default())
            .await
            .expect("second");

        assert!(!first.metadata.cache_hit);
        assert!(second.metadata.cache_hit);
        assert_eq!(store.counts().get_memories, 2);
        assert_eq!(store.counts().search_memories, 1);
    }

    #[tokio::test]
    async fn backfill_option_fills_missing_vectors() {
        let store = Arc::new(CountingStore::new());
        let mut recalled = records(MemoryKind::Message, 2);
        for record in &mut recalled {
            record.id = Some(Uuid::new_v4());
        }
        store.set_recall(recalled);
        let aggregator = aggregator_over(store, Arc::new(StubEmbedder::new(vec![0.4])));

        let options = ContextOptions {
            backfill_embeddings: true,
            ..ContextOptions::default()
        };
        let context = aggregator
            .get_context(Uuid::new_v4(), "q", &options)
            .await
            .expect("context");

        assert!(context.messages.iter().all(|record| record.has_embedding()));
        assert!(context.entities.iter().all(|record| record.has_embedding()));
    }

    #[tokio::test]
    async fn criteria_retrieval_keeps_failing_tables_as_empty_sections() {
        let store = Arc::new(CountingStore::new());
        store.set_recall(records(MemoryKind::Facts, 2));
        store.fail_get_for_table("documents");
        let aggregator = aggregator_over(store, Arc::new(StubEmbedder::new(vec![0.1])));

        let tables = vec!["facts".to_string(), "documents".to_string()];
        let sections = aggregator
            .get_by_multiple_criteria(&tables, &BTreeMap::new(), 10)
            .await;

        assert_eq!(sections.len(), 2);
        assert_eq!(sections["facts"].len(), 2);
        assert_eq!(sections["documents"], Vec::new());
    }
}
