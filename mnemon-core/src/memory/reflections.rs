//! Reflection persistence.

use crate::error::{Error, Result};
use crate::memory::store::{conversion_error, format_datetime, parse_datetime, SqliteMemoryStore};
use crate::memory::types::{MemoryId, ReflectionId, ReflectionRecord};
use rusqlite::{params, OptionalExtension};

const REFLECTION_COLUMNS: &str = "id, reflection_trigger, situation_summary, generated_text,
     generated_at, related_memory_ids, memory_id";

impl SqliteMemoryStore {
    /// Persist a reflection. Reflections are never updated afterwards.
    pub fn put_reflection(&self, reflection: &ReflectionRecord) -> Result<ReflectionId> {
        let related = serde_json::to_string(&reflection.related_memory_ids)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reflections (id, reflection_trigger, situation_summary, generated_text,
                                          generated_at, related_memory_ids, memory_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    reflection.id.to_string(),
                    reflection.reflection_trigger,
                    reflection.situation_summary,
                    reflection.generated_reflection_text,
                    format_datetime(&reflection.generated_at),
                    related,
                    reflection.memory_id.as_ref().map(MemoryId::to_string),
                ],
            )?;
            Ok(())
        })?;
        Ok(reflection.id.clone())
    }

    /// Get a reflection by id.
    pub fn get_reflection(&self, id: &ReflectionId) -> Result<ReflectionRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {REFLECTION_COLUMNS} FROM reflections WHERE id = ?1"),
                params![id.to_string()],
                row_to_reflection,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found("reflection", id.to_string()))
    }

    /// Most recent reflections first.
    pub fn list_reflections(&self, limit: usize) -> Result<Vec<ReflectionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REFLECTION_COLUMNS} FROM reflections
                 ORDER BY generated_at DESC, rowid DESC LIMIT ?1"
            ))?;
            let reflections = stmt
                .query_map(params![limit as i64], row_to_reflection)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(reflections)
        })
    }
}

fn row_to_reflection(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReflectionRecord> {
    let id_str: String = row.get(0)?;
    let related_json: String = row.get(5)?;
    let memory_id = match row.get::<_, Option<String>>(6)? {
        Some(raw) => Some(MemoryId::parse(&raw).map_err(|e| conversion_error(6, e))?),
        None => None,
    };

    Ok(ReflectionRecord {
        id: ReflectionId::parse(&id_str).map_err(|e| conversion_error(0, e))?,
        reflection_trigger: row.get(1)?,
        situation_summary: row.get(2)?,
        generated_reflection_text: row.get(3)?,
        generated_at: parse_datetime(row, 4)?,
        related_memory_ids: serde_json::from_str(&related_json)
            .map_err(|e| conversion_error(5, e))?,
        memory_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn reflection(trigger: &str, at: chrono::DateTime<Utc>) -> ReflectionRecord {
        ReflectionRecord {
            id: ReflectionId::new(),
            reflection_trigger: trigger.to_string(),
            situation_summary: "summary".to_string(),
            generated_reflection_text: format!("Reflecting on {trigger}"),
            generated_at: at,
            related_memory_ids: vec![MemoryId::new(), MemoryId::new()],
            memory_id: None,
        }
    }

    #[test]
    fn test_put_and_get_reflection() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let original = reflection("learning_opportunity", Utc::now());

        let id = store.put_reflection(&original).unwrap();
        let loaded = store.get_reflection(&id).unwrap();
        assert_eq!(loaded.related_memory_ids, original.related_memory_ids);
        assert_eq!(loaded.reflection_trigger, "learning_opportunity");
    }

    #[test]
    fn test_list_reflections_newest_first() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let now = Utc::now();
        store.put_reflection(&reflection("old", now - Duration::hours(2))).unwrap();
        store.put_reflection(&reflection("new", now)).unwrap();

        let listed = store.list_reflections(10).unwrap();
        assert_eq!(listed[0].reflection_trigger, "new");
        assert_eq!(store.list_reflections(1).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_reflection_is_not_found() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        assert!(matches!(
            store.get_reflection(&ReflectionId::new()),
            Err(Error::NotFound { kind: "reflection", .. })
        ));
    }
}
