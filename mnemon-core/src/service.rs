//! The `MemorySystem` facade.
//!
//! Wires every component to one shared store and clock and exposes the
//! operation set callers use. Write operations report failure in their
//! response (`success: false` plus `error`) rather than returning `Err`;
//! read operations return `Result`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{system_clock, SharedClock};
use crate::config::{MemoryConfig, RecallWeights};
use crate::error::{Error, Result};
use crate::forgetting::{DecayReport, ForgettingEngine};
use crate::memory::{
    MemoryId, MemoryRecord, PersonaAttribute, PersonaValue, ReflectionId, ReflectionRecord,
    SqliteMemoryStore,
};
use crate::persona::{PersonaEvolutionSummary, PersonaTracker, PersonaView};
use crate::reflexion::ReflexionGenerator;
use crate::retrieval::{RecallRequest, RetrievalEngine, ScoredMemory};

/// Response to `store_memory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMemoryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<MemoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `store_persona_memory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePersonaResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `generate_self_reflection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection_id: Option<ReflectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `apply_forgetting_curve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgettingResponse {
    pub success: bool,
    pub memories_decayed: u64,
    pub memories_archived: u64,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForgettingResponse {
    fn from_report(report: DecayReport) -> Self {
        Self {
            success: true,
            memories_decayed: report.memories_decayed,
            memories_archived: report.memories_archived,
            dry_run: report.dry_run,
            error: None,
        }
    }

    fn failed(dry_run: bool, err: &Error) -> Self {
        Self {
            success: false,
            memories_decayed: 0,
            memories_archived: 0,
            dry_run,
            error: Some(err.to_string()),
        }
    }
}

/// Store-wide counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub total_memories: u64,
    /// Number of distinct memory types
    pub memory_type_count: u64,
    pub average_importance: f64,
    pub storage_type: String,
    pub active_memories: u64,
    pub archived_memories: u64,
    pub memories_by_type: BTreeMap<String, u64>,
}

/// Persistent associative memory for one agent instance.
pub struct MemorySystem {
    config: MemoryConfig,
    store: SqliteMemoryStore,
    clock: SharedClock,
    retrieval: RetrievalEngine,
    persona: PersonaTracker,
    reflexion: ReflexionGenerator,
    forgetting: Arc<ForgettingEngine>,
}

impl MemorySystem {
    /// Open the store described by `config` on the system clock.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Open the store described by `config` with an explicit clock.
    pub fn with_clock(config: MemoryConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let store = SqliteMemoryStore::from_config(&config)?;
        info!(
            storage_type = store.storage_type(),
            ai_instance_id = %config.ai_instance_id,
            "Memory system ready"
        );

        Ok(Self {
            retrieval: RetrievalEngine::new(store.clone(), clock.clone(), &config),
            persona: PersonaTracker::new(
                store.clone(),
                clock.clone(),
                config.ai_instance_id.clone(),
            ),
            reflexion: ReflexionGenerator::new(store.clone(), clock.clone(), &config),
            forgetting: Arc::new(ForgettingEngine::new(store.clone(), clock.clone(), &config)),
            store,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> &SqliteMemoryStore {
        &self.store
    }

    // ==================== Memories ====================

    /// Store a new memory record.
    pub fn store_memory<I, S>(
        &self,
        memory_type: &str,
        content: &str,
        title: Option<&str>,
        importance: f64,
        tags: I,
    ) -> StoreMemoryResponse
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let result = if memory_type.trim().is_empty() {
            Err(Error::invalid_argument("memory_type", "must not be empty"))
        } else {
            let mut record =
                MemoryRecord::new(memory_type, content, importance, self.clock.now())
                    .with_tags(tags);
            record.title = title.map(str::to_string);
            self.store.put(&record)
        };

        match result {
            Ok(id) => StoreMemoryResponse {
                success: true,
                memory_id: Some(id),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, memory_type, "Failed to store memory");
                StoreMemoryResponse {
                    success: false,
                    memory_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Rank active memories against `query` and return the best `limit`.
    pub fn recall_memories_weighted(
        &self,
        query: &str,
        importance_weight: f64,
        recency_weight: f64,
        relevance_weight: f64,
        limit: i64,
    ) -> Result<Vec<ScoredMemory>> {
        self.retrieval.recall_weighted(
            query,
            RecallWeights::new(importance_weight, recency_weight, relevance_weight),
            limit,
        )
    }

    /// Recall with a filter or relevance requirement.
    pub fn recall(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
        self.retrieval.recall(request)
    }

    /// Fetch one record, archived or not.
    pub fn get_memory(&self, id: &MemoryId) -> Result<MemoryRecord> {
        self.store.get(id)
    }

    pub fn get_memory_summary(&self) -> Result<MemorySummary> {
        let stats = self.store.stats()?;
        Ok(MemorySummary {
            total_memories: stats.total_memories,
            memory_type_count: stats.memories_by_type.len() as u64,
            average_importance: stats.average_importance,
            storage_type: self.store.storage_type().to_string(),
            active_memories: stats.active_memories,
            archived_memories: stats.archived_memories,
            memories_by_type: stats.memories_by_type,
        })
    }

    // ==================== Persona ====================

    pub fn store_persona_memory(
        &self,
        persona_type: &str,
        attribute_name: &str,
        current_value: impl Into<PersonaValue>,
        confidence_score: Option<f64>,
    ) -> StorePersonaResponse {
        match self.persona.store_persona(
            persona_type,
            attribute_name,
            current_value,
            confidence_score,
        ) {
            Ok(_) => StorePersonaResponse {
                success: true,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, persona_type, attribute_name, "Failed to store persona attribute");
                StorePersonaResponse {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn get_current_persona(&self) -> Result<PersonaView> {
        self.persona.get_current_persona()
    }

    pub fn get_persona_attribute(
        &self,
        persona_type: &str,
        attribute_name: &str,
    ) -> Result<PersonaAttribute> {
        self.persona.get_persona_attribute(persona_type, attribute_name)
    }

    pub fn get_persona_evolution_summary(&self, days_back: i64) -> Result<PersonaEvolutionSummary> {
        self.persona.get_persona_evolution_summary(days_back)
    }

    // ==================== Reflections ====================

    pub fn generate_self_reflection(
        &self,
        reflection_trigger: &str,
        situation_summary: &str,
    ) -> ReflectionResponse {
        match self
            .reflexion
            .generate_self_reflection(reflection_trigger, situation_summary)
        {
            Ok(reflection) => ReflectionResponse {
                success: true,
                reflection_id: Some(reflection.id),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, reflection_trigger, "Failed to generate reflection");
                ReflectionResponse {
                    success: false,
                    reflection_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn get_reflection(&self, id: &ReflectionId) -> Result<ReflectionRecord> {
        self.reflexion.get_reflection(id)
    }

    pub fn list_reflections(&self, limit: usize) -> Result<Vec<ReflectionRecord>> {
        self.reflexion.list_reflections(limit)
    }

    // ==================== Forgetting ====================

    /// Run a decay sweep now.
    pub fn apply_forgetting_curve(&self, decay_factor: f64) -> ForgettingResponse {
        self.run_forgetting(decay_factor, false)
    }

    /// Report what a decay sweep would do without changing anything.
    pub fn apply_forgetting_curve_dry_run(&self, decay_factor: f64) -> ForgettingResponse {
        self.run_forgetting(decay_factor, true)
    }

    fn run_forgetting(&self, decay_factor: f64, dry_run: bool) -> ForgettingResponse {
        match self.forgetting.apply_decay(decay_factor, dry_run) {
            Ok(report) => ForgettingResponse::from_report(report),
            Err(e) => {
                warn!(error = %e, decay_factor, "Forgetting sweep failed");
                ForgettingResponse::failed(dry_run, &e)
            }
        }
    }

    /// Start periodic sweeps using the configured interval and decay factor.
    #[cfg(feature = "tokio-runtime")]
    pub fn spawn_forgetting_schedule(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.forgetting).spawn_scheduled(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStatus;
    use pretty_assertions::assert_eq;

    fn system() -> (MemorySystem, ManualClock) {
        let clock = ManualClock::starting_now();
        let system = MemorySystem::with_clock(
            MemoryConfig::in_memory().with_ai_instance_id("tester"),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (system, clock)
    }

    fn seed(system: &MemorySystem) -> Vec<MemoryId> {
        [
            (
                "code_insight",
                "Python list comprehensions are more efficient than traditional loops",
                "Python Performance Tip",
                0.9,
                vec!["python", "performance", "optimization"],
            ),
            (
                "user_preference",
                "User prefers detailed technical explanations with code examples",
                "Communication Style",
                0.8,
                vec!["communication", "preference"],
            ),
            (
                "architecture_decision",
                "Use PostgreSQL connection pooling to prevent connection exhaustion in high-load scenarios",
                "Database Connection Strategy",
                0.7,
                vec!["database", "postgresql", "architecture"],
            ),
        ]
        .into_iter()
        .map(|(memory_type, content, title, importance, tags)| {
            let response = system.store_memory(memory_type, content, Some(title), importance, tags);
            assert!(response.success, "{:?}", response.error);
            response.memory_id.unwrap()
        })
        .collect()
    }

    #[test]
    fn test_store_and_recall_end_to_end() {
        let (system, _) = system();
        let ids = seed(&system);

        let results = system
            .recall_memories_weighted("postgresql connection pooling", 0.2, 0.2, 0.6, 3)
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].record.id, ids[2]);
        assert_eq!(
            results[0].record.title.as_deref(),
            Some("Database Connection Strategy")
        );

        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["title"], "Database Connection Strategy");
        assert!(json["composite_score"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_invalid_store_reports_failure() {
        let (system, _) = system();
        let response = system.store_memory("fact", "too important", None, 1.5, ["x"]);
        assert!(!response.success);
        assert!(response.memory_id.is_none());
        assert!(response.error.unwrap().contains("importance"));

        let response = system.store_memory("", "typeless", None, 0.5, Vec::<String>::new());
        assert!(!response.success);
        assert_eq!(system.get_memory_summary().unwrap().total_memories, 0);
    }

    #[test]
    fn test_persona_round_trip() {
        let (system, _) = system();
        let response = system.store_persona_memory(
            "skill",
            "programming_languages",
            vec!["Python", "JavaScript", "SQL", "Bash"],
            Some(0.95),
        );
        assert!(response.success);
        assert!(
            system
                .store_persona_memory("core_trait", "helpfulness", "high", Some(0.9))
                .success
        );

        let persona = system.get_current_persona().unwrap();
        assert_eq!(persona.ai_instance_id, "tester");
        let entry = persona.entry("skill", "programming_languages").unwrap();
        assert_eq!(entry.confidence, 0.95);

        let rejected = system.store_persona_memory("skill", "x", "y", Some(-0.5));
        assert!(!rejected.success);
        assert!(rejected.error.is_some());
    }

    #[test]
    fn test_reflection_is_recorded() {
        let (system, _) = system();
        seed(&system);

        let response = system.generate_self_reflection(
            "successful_implementation",
            "Implemented PostgreSQL connection pooling successfully",
        );
        assert!(response.success);
        let reflection = system
            .get_reflection(&response.reflection_id.unwrap())
            .unwrap();
        assert!(!reflection.related_memory_ids.is_empty());

        let summary = system.get_memory_summary().unwrap();
        assert_eq!(summary.total_memories, 4);
        assert_eq!(summary.memories_by_type["reflection"], 1);
    }

    #[test]
    fn test_forgetting_curve_and_dry_run() {
        let (system, clock) = system();
        let ids = seed(&system);
        clock.advance_hours(48);

        let preview = system.apply_forgetting_curve_dry_run(0.15);
        assert!(preview.success);
        assert!(preview.dry_run);
        assert_eq!(preview.memories_decayed, 3);
        assert_eq!(system.get_memory(&ids[0]).unwrap().salience, 0.9);

        let applied = system.apply_forgetting_curve(0.15);
        assert!(applied.success);
        assert_eq!(applied.memories_decayed, 3);
        assert!((system.get_memory(&ids[0]).unwrap().salience - 0.765).abs() < 1e-12);

        let invalid = system.apply_forgetting_curve(2.0);
        assert!(!invalid.success);
        assert!(invalid.error.is_some());
    }

    #[test]
    fn test_memory_summary_counts() {
        let (system, clock) = system();
        let empty = system.get_memory_summary().unwrap();
        assert_eq!(empty.total_memories, 0);
        assert_eq!(empty.average_importance, 0.0);
        assert_eq!(empty.storage_type, "sqlite_in_memory");

        let ids = seed(&system);
        clock.advance_hours(48);
        system.apply_forgetting_curve(1.0);

        let summary = system.get_memory_summary().unwrap();
        assert_eq!(summary.total_memories, 3);
        assert_eq!(summary.memory_type_count, 3);
        assert_eq!(summary.archived_memories, 3);
        assert_eq!(summary.active_memories, 0);
        assert!((summary.average_importance - 0.8).abs() < 1e-12);
        assert_eq!(
            system.get_memory(&ids[1]).unwrap().status,
            MemoryStatus::Archived
        );
    }

    #[test]
    fn test_evolution_summary_through_facade() {
        let (system, clock) = system();
        system.store_persona_memory("preference", "verbosity", "high", Some(0.6));
        system.store_persona_memory("preference", "verbosity", "medium", Some(0.7));
        clock.advance_hours(24);

        let today = system.get_persona_evolution_summary(0).unwrap();
        assert!(today.recent_changes.is_empty());
        assert_eq!(today.total_attributes_tracked, 1);

        let week = system.get_persona_evolution_summary(7).unwrap();
        assert_eq!(week.recent_changes.len(), 1);
        assert_eq!(week.persona_types["preference"].total_attributes, 1);
    }

    #[test]
    fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let config = MemoryConfig::default().with_database_path(path.to_string_lossy());

        let id = {
            let system = MemorySystem::new(config.clone()).unwrap();
            assert_eq!(system.get_memory_summary().unwrap().storage_type, "sqlite");
            system
                .store_memory("milestone", "Test suite passes", None, 0.8, ["milestone"])
                .memory_id
                .unwrap()
        };

        let reopened = MemorySystem::new(config).unwrap();
        assert_eq!(reopened.get_memory(&id).unwrap().content, "Test suite passes");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MemoryConfig::default().with_eviction_floor(2.0);
        assert!(matches!(MemorySystem::new(config), Err(Error::Config(_))));
    }
}
