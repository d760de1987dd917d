//! Self-reflection generation.
//!
//! A reflection ties a trigger and a situation summary to the memories most
//! relevant to that summary. The text is rendered from a fixed template, so
//! the same inputs over the same store state yield the same text.

use tracing::{debug, instrument, warn};

use crate::clock::SharedClock;
use crate::config::{MemoryConfig, RecallWeights};
use crate::error::{Error, Result};
use crate::memory::{MemoryRecord, ReflectionId, ReflectionRecord, SqliteMemoryStore};
use crate::retrieval::{RecallRequest, RetrievalEngine, ScoredMemory};

/// Memory type used when a reflection is mirrored into the memory table.
pub const REFLECTION_MEMORY_TYPE: &str = "reflection";

/// Generates and persists reflections.
pub struct ReflexionGenerator {
    store: SqliteMemoryStore,
    retrieval: RetrievalEngine,
    clock: SharedClock,
    related_limit: i64,
    weights: RecallWeights,
    mirror_as_memory: bool,
    mirror_importance: f64,
}

impl ReflexionGenerator {
    pub fn new(store: SqliteMemoryStore, clock: SharedClock, config: &MemoryConfig) -> Self {
        Self {
            retrieval: RetrievalEngine::new(store.clone(), clock.clone(), config),
            store,
            clock,
            related_limit: config.reflection_related_limit as i64,
            weights: config.reflection_weights,
            mirror_as_memory: config.mirror_reflections_as_memories,
            mirror_importance: config.reflection_importance,
        }
    }

    /// Gather related memories, render the reflection and persist it.
    ///
    /// Only memories with some textual relevance to the summary count as
    /// related; finding none is not an error.
    #[instrument(skip(self, situation_summary), fields(trigger = %reflection_trigger))]
    pub fn generate_self_reflection(
        &self,
        reflection_trigger: &str,
        situation_summary: &str,
    ) -> Result<ReflectionRecord> {
        if reflection_trigger.trim().is_empty() {
            return Err(Error::invalid_argument(
                "reflection_trigger",
                "must not be empty",
            ));
        }

        let request = RecallRequest::new(situation_summary, self.weights, self.related_limit)
            .require_relevance(true);
        let related = self.retrieval.recall(&request)?;
        let text = render_reflection(reflection_trigger, situation_summary, &related);
        let now = self.clock.now();

        let mut reflection = ReflectionRecord {
            id: ReflectionId::new(),
            reflection_trigger: reflection_trigger.to_string(),
            situation_summary: situation_summary.to_string(),
            generated_reflection_text: text,
            generated_at: now,
            related_memory_ids: related.iter().map(|s| s.record.id.clone()).collect(),
            memory_id: None,
        };

        if self.mirror_as_memory {
            let mirror = MemoryRecord::new(
                REFLECTION_MEMORY_TYPE,
                reflection.generated_reflection_text.clone(),
                self.mirror_importance,
                now,
            )
            .with_title(format!("Reflection: {reflection_trigger}"))
            .with_tags([REFLECTION_MEMORY_TYPE, reflection_trigger]);
            reflection.memory_id = Some(self.store.put(&mirror)?);
        }

        if let Err(e) = self.store.put_reflection(&reflection) {
            if let Some(ref memory_id) = reflection.memory_id {
                if let Err(cleanup) = self.store.delete(memory_id) {
                    warn!(memory_id = %memory_id, error = %cleanup, "Failed to remove orphaned mirror memory");
                }
            }
            return Err(e);
        }

        debug!(
            reflection_id = %reflection.id,
            related = reflection.related_memory_ids.len(),
            "Generated reflection"
        );
        Ok(reflection)
    }

    pub fn get_reflection(&self, id: &ReflectionId) -> Result<ReflectionRecord> {
        self.store.get_reflection(id)
    }

    /// Most recent reflections first.
    pub fn list_reflections(&self, limit: usize) -> Result<Vec<ReflectionRecord>> {
        self.store.list_reflections(limit)
    }
}

fn render_reflection(trigger: &str, summary: &str, related: &[ScoredMemory]) -> String {
    let mut text = format!("Reflection on {trigger}: {}", summary.trim());
    if related.is_empty() {
        text.push_str("\nNo related memories were found; this situation is new territory.");
        return text;
    }

    text.push_str(&format!("\nDrawing on {} related memories:", related.len()));
    for scored in related {
        text.push_str(&format!(
            "\n- {} (importance {:.2}, relevance {:.2})",
            scored.record.display_title(),
            scored.record.importance,
            scored.relevance_score
        ));
    }
    text.push_str("\nApply these lessons the next time this situation comes up.");
    text
}
