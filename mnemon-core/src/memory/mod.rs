//! Durable record store.
//!
//! A single SQLite database owns every entity kind:
//!
//! - **Memories**: ranked knowledge records with access bookkeeping and a
//!   decaying salience (`Active` until archived by a decay sweep)
//! - **Persona attributes**: versioned self-model facts with history
//! - **Reflections**: generated self-assessments linked to memories
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnemon_core::memory::{MemoryFilter, MemoryRecord, SqliteMemoryStore};
//!
//! let store = SqliteMemoryStore::in_memory()?;
//!
//! let record = MemoryRecord::new("code_insight", "Prefer iterators", 0.8, chrono::Utc::now())
//!     .with_tags(["rust"]);
//! let id = store.put(&record)?;
//!
//! store.update(&id, |r| r.salience *= 0.9)?;
//! let active: Vec<_> = store.scan(&MemoryFilter::active()).collect::<Result<_, _>>()?;
//! ```

mod attributes;
mod reflections;
mod schema;
mod store;
mod types;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::{MemoryScan, MemoryStats, SqliteMemoryStore, DEFAULT_SCAN_PAGE_SIZE};
pub use types::{
    MemoryFilter, MemoryId, MemoryRecord, MemoryStatus, PersonaAttribute, PersonaChange,
    PersonaSnapshot, PersonaValue, ReflectionId, ReflectionRecord,
};
