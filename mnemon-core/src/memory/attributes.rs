//! Persona attribute persistence.

use crate::error::{Error, Result};
use crate::memory::store::{
    conversion_error, format_datetime, parse_datetime, SqliteMemoryStore,
};
use crate::memory::types::{PersonaAttribute, PersonaChange, PersonaSnapshot, PersonaValue};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

impl SqliteMemoryStore {
    /// Insert or update the attribute keyed by `(persona_type, attribute_name)`.
    ///
    /// On update the prior value and confidence are appended to the history
    /// (stamped `at`) before being overwritten, in the same transaction.
    pub fn upsert_persona_attribute(
        &self,
        persona_type: &str,
        attribute_name: &str,
        value: &PersonaValue,
        confidence: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<PersonaAttribute> {
        let value_json = serde_json::to_string(value)?;
        let now = format_datetime(&at);

        self.with_tx(|tx| {
            let existing: Option<(i64, String, Option<f64>)> = tx
                .query_row(
                    "SELECT id, current_value, confidence_score FROM persona_attributes
                     WHERE persona_type = ?1 AND attribute_name = ?2",
                    params![persona_type, attribute_name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            match existing {
                Some((attribute_id, prior_value, prior_confidence)) => {
                    tx.execute(
                        "INSERT INTO persona_history (attribute_id, value, confidence_score, recorded_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![attribute_id, prior_value, prior_confidence, now],
                    )?;
                    tx.execute(
                        "UPDATE persona_attributes
                         SET current_value = ?2, confidence_score = ?3, updated_at = ?4
                         WHERE id = ?1",
                        params![attribute_id, value_json, confidence, now],
                    )?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO persona_attributes
                            (persona_type, attribute_name, current_value, confidence_score,
                             created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        params![persona_type, attribute_name, value_json, confidence, now],
                    )?;
                }
            }

            load_attribute(tx, persona_type, attribute_name)?.ok_or_else(|| {
                Error::Internal(format!(
                    "persona attribute {persona_type}.{attribute_name} vanished after write"
                ))
            })
        })
    }

    /// Get one attribute with its full history.
    pub fn get_persona_attribute(
        &self,
        persona_type: &str,
        attribute_name: &str,
    ) -> Result<PersonaAttribute> {
        self.with_conn(|conn| load_attribute(conn, persona_type, attribute_name))?
            .ok_or_else(|| {
                Error::not_found("persona attribute", format!("{persona_type}.{attribute_name}"))
            })
    }

    /// All attributes with their histories, ordered by type then name.
    pub fn list_persona_attributes(&self) -> Result<Vec<PersonaAttribute>> {
        self.with_conn(|conn| {
            let mut history: HashMap<i64, Vec<PersonaSnapshot>> = HashMap::new();
            let mut stmt = conn.prepare(
                "SELECT attribute_id, value, confidence_score, recorded_at
                 FROM persona_history ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row_to_snapshot(row, 1)?)))?;
            for row in rows {
                let (attribute_id, snapshot) = row?;
                history.entry(attribute_id).or_default().push(snapshot);
            }

            let mut stmt = conn.prepare(
                "SELECT id, persona_type, attribute_name, current_value, confidence_score,
                        created_at, updated_at
                 FROM persona_attributes ORDER BY persona_type, attribute_name",
            )?;
            let attributes = stmt
                .query_map([], |row| {
                    let attribute_id: i64 = row.get(0)?;
                    row_to_attribute(row, history.remove(&attribute_id).unwrap_or_default())
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(attributes)
        })
    }

    /// History entries recorded at or after `since`, newest first.
    pub fn persona_changes_since(&self, since: DateTime<Utc>) -> Result<Vec<PersonaChange>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.persona_type, a.attribute_name, h.value, h.confidence_score, h.recorded_at
                 FROM persona_history h
                 JOIN persona_attributes a ON a.id = h.attribute_id
                 WHERE h.recorded_at >= ?1
                 ORDER BY h.recorded_at DESC, h.id DESC",
            )?;
            let changes = stmt
                .query_map(params![format_datetime(&since)], |row| {
                    let snapshot = row_to_snapshot(row, 2)?;
                    Ok(PersonaChange {
                        persona_type: row.get(0)?,
                        attribute_name: row.get(1)?,
                        previous_value: snapshot.value,
                        previous_confidence: snapshot.confidence,
                        changed_at: snapshot.recorded_at,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(changes)
        })
    }
}

fn load_attribute(
    conn: &Connection,
    persona_type: &str,
    attribute_name: &str,
) -> rusqlite::Result<Option<PersonaAttribute>> {
    let header = conn
        .query_row(
            "SELECT id FROM persona_attributes WHERE persona_type = ?1 AND attribute_name = ?2",
            params![persona_type, attribute_name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    let Some(attribute_id) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT value, confidence_score, recorded_at FROM persona_history
         WHERE attribute_id = ?1 ORDER BY id ASC",
    )?;
    let history = stmt
        .query_map(params![attribute_id], |row| row_to_snapshot(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    conn.query_row(
        "SELECT id, persona_type, attribute_name, current_value, confidence_score,
                created_at, updated_at
         FROM persona_attributes WHERE id = ?1",
        params![attribute_id],
        |row| row_to_attribute(row, history),
    )
    .map(Some)
}

fn row_to_attribute(
    row: &rusqlite::Row<'_>,
    history: Vec<PersonaSnapshot>,
) -> rusqlite::Result<PersonaAttribute> {
    let value_json: String = row.get(3)?;
    let current_value: PersonaValue =
        serde_json::from_str(&value_json).map_err(|e| conversion_error(3, e))?;

    Ok(PersonaAttribute {
        persona_type: row.get(1)?,
        attribute_name: row.get(2)?,
        current_value,
        confidence_score: row.get(4)?,
        history,
        created_at: parse_datetime(row, 5)?,
        updated_at: parse_datetime(row, 6)?,
    })
}

/// Read `(value, confidence, recorded_at)` starting at column `first`.
fn row_to_snapshot(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<PersonaSnapshot> {
    let value_json: String = row.get(first)?;
    let value: PersonaValue =
        serde_json::from_str(&value_json).map_err(|e| conversion_error(first, e))?;

    Ok(PersonaSnapshot {
        value,
        confidence: row.get(first + 1)?,
        recorded_at: parse_datetime(row, first + 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_insert_then_update_appends_history() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let t0 = Utc::now();

        let created = store
            .upsert_persona_attribute("skill", "languages", &vec!["Rust"].into(), Some(0.6), t0)
            .unwrap();
        assert!(created.history.is_empty());

        let updated = store
            .upsert_persona_attribute(
                "skill",
                "languages",
                &vec!["Rust", "SQL"].into(),
                Some(0.8),
                t0 + Duration::minutes(5),
            )
            .unwrap();
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.history[0].value, PersonaValue::from(vec!["Rust"]));
        assert_eq!(updated.history[0].confidence, Some(0.6));
        assert_eq!(updated.current_value, PersonaValue::from(vec!["Rust", "SQL"]));
        assert_eq!(updated.created_at, created.created_at);
    }

    #[test]
    fn test_missing_attribute_is_not_found() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let err = store.get_persona_attribute("skill", "juggling").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_changes_since_filters_and_orders() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let t0 = Utc::now() - Duration::days(3);

        for (i, value) in ["a", "b", "c"].iter().enumerate() {
            store
                .upsert_persona_attribute(
                    "core_trait",
                    "style",
                    &(*value).into(),
                    Some(0.5),
                    t0 + Duration::days(i as i64),
                )
                .unwrap();
        }

        let all = store.persona_changes_since(t0).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].changed_at > all[1].changed_at);
        assert_eq!(all[0].previous_value, PersonaValue::from("b"));

        let recent = store
            .persona_changes_since(t0 + Duration::days(2))
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_list_groups_history_per_attribute() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .upsert_persona_attribute("skill", "a", &"x".into(), Some(0.1), now)
            .unwrap();
        store
            .upsert_persona_attribute("skill", "a", &"y".into(), Some(0.2), now)
            .unwrap();
        store
            .upsert_persona_attribute("preference", "b", &"z".into(), None, now)
            .unwrap();

        let attributes = store.list_persona_attributes().unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].persona_type, "preference");
        assert!(attributes[0].history.is_empty());
        assert_eq!(attributes[1].history.len(), 1);
        assert_eq!(attributes[0].confidence_score, None);
    }
}
