//! # mnemon-core
//!
//! Persistent associative memory for a long-running agent: weighted recall,
//! a versioned persona, generated self-reflections and decay-based
//! forgetting over a single SQLite store.
//!
//! ## Core Components
//!
//! - **Memory**: Record store for memories, persona attributes and reflections
//! - **Relevance**: Token-overlap relevance between a query and a record
//! - **Retrieval**: Importance + recency + relevance composite ranking
//! - **Persona**: Self-model attributes with confidence and change history
//! - **Reflexion**: Self-assessments linked to related memories
//! - **Forgetting**: Salience decay and archival sweeps
//! - **Service**: The `MemorySystem` facade wiring it all together
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnemon_core::{MemoryConfig, MemorySystem};
//!
//! let system = MemorySystem::new(MemoryConfig::from_env())?;
//!
//! let stored = system.store_memory(
//!     "code_insight",
//!     "Use connection pooling for PostgreSQL",
//!     Some("Database Connection Strategy"),
//!     0.7,
//!     ["database", "postgresql"],
//! );
//! assert!(stored.success);
//!
//! for hit in system.recall_memories_weighted("postgresql pooling", 0.2, 0.2, 0.6, 5)? {
//!     println!("{:.3} {}", hit.composite_score, hit.record.display_title());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod forgetting;
pub mod memory;
pub mod persona;
pub mod reflexion;
pub mod relevance;
pub mod retrieval;
pub mod service;

// Re-exports for convenience
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{MemoryConfig, RecallWeights};
pub use error::{Error, Result};
pub use forgetting::{DecayReport, ForgettingEngine};
pub use memory::{
    MemoryFilter, MemoryId, MemoryRecord, MemoryStats, MemoryStatus, PersonaAttribute,
    PersonaChange, PersonaSnapshot, PersonaValue, ReflectionId, ReflectionRecord,
    SqliteMemoryStore,
};
pub use persona::{
    PersonaEntry, PersonaEvolutionSummary, PersonaTracker, PersonaTypeStats, PersonaView,
};
pub use reflexion::{ReflexionGenerator, REFLECTION_MEMORY_TYPE};
pub use relevance::{tokenize, RelevanceScorer, TokenOverlapScorer};
pub use retrieval::{RecallRequest, RetrievalEngine, ScoredMemory};
pub use service::{
    ForgettingResponse, MemorySummary, MemorySystem, ReflectionResponse, StoreMemoryResponse,
    StorePersonaResponse,
};
