//! Persona tracking.
//!
//! The agent's self-model is a set of attributes keyed by
//! `(persona_type, attribute_name)`. Every overwrite keeps the prior value in
//! the attribute's history, so the model's evolution can be summarized over
//! any trailing window.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::clock::SharedClock;
use crate::error::{ensure_unit_interval, Error, Result};
use crate::memory::{PersonaAttribute, PersonaChange, PersonaValue, SqliteMemoryStore};

/// Current value and confidence of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaEntry {
    pub value: PersonaValue,
    pub confidence: f64,
}

/// The current persona, grouped by type.
///
/// Serializes as `{"ai_instance_id": ..., "<persona_type>": {"<name>": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaView {
    pub ai_instance_id: String,
    #[serde(flatten)]
    pub types: BTreeMap<String, BTreeMap<String, PersonaEntry>>,
}

impl PersonaView {
    /// Look up one attribute's current entry.
    pub fn entry(&self, persona_type: &str, attribute_name: &str) -> Option<&PersonaEntry> {
        self.types.get(persona_type)?.get(attribute_name)
    }
}

/// Per-type aggregate in an evolution summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaTypeStats {
    /// Mean over attributes that carry a confidence; 0 if none do
    pub average_confidence: f64,
    pub total_attributes: u64,
}

/// How the persona changed over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaEvolutionSummary {
    pub analysis_period_days: i64,
    pub total_attributes_tracked: u64,
    /// Newest first
    pub recent_changes: Vec<PersonaChange>,
    pub persona_types: BTreeMap<String, PersonaTypeStats>,
}

/// Versioned self-model attributes over a shared store.
#[derive(Debug, Clone)]
pub struct PersonaTracker {
    store: SqliteMemoryStore,
    clock: SharedClock,
    ai_instance_id: String,
}

impl PersonaTracker {
    pub fn new(
        store: SqliteMemoryStore,
        clock: SharedClock,
        ai_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            ai_instance_id: ai_instance_id.into(),
        }
    }

    /// Write an attribute, pushing any prior value to its history first.
    #[instrument(skip(self, value))]
    pub fn store_persona(
        &self,
        persona_type: &str,
        attribute_name: &str,
        value: impl Into<PersonaValue>,
        confidence: Option<f64>,
    ) -> Result<PersonaAttribute> {
        if persona_type.trim().is_empty() {
            return Err(Error::invalid_argument("persona_type", "must not be empty"));
        }
        if attribute_name.trim().is_empty() {
            return Err(Error::invalid_argument("attribute_name", "must not be empty"));
        }
        if let Some(confidence) = confidence {
            ensure_unit_interval("confidence_score", confidence)?;
        }

        let attribute = self.store.upsert_persona_attribute(
            persona_type,
            attribute_name,
            &value.into(),
            confidence,
            self.clock.now(),
        )?;
        debug!(history_len = attribute.history.len(), "Stored persona attribute");
        Ok(attribute)
    }

    /// One attribute with its full history.
    pub fn get_persona_attribute(
        &self,
        persona_type: &str,
        attribute_name: &str,
    ) -> Result<PersonaAttribute> {
        self.store.get_persona_attribute(persona_type, attribute_name)
    }

    /// Current persona map. Attributes without a confidence are left out.
    pub fn get_current_persona(&self) -> Result<PersonaView> {
        let mut types: BTreeMap<String, BTreeMap<String, PersonaEntry>> = BTreeMap::new();
        for attribute in self.store.list_persona_attributes()? {
            let Some(confidence) = attribute.confidence_score else {
                continue;
            };
            types.entry(attribute.persona_type).or_default().insert(
                attribute.attribute_name,
                PersonaEntry {
                    value: attribute.current_value,
                    confidence,
                },
            );
        }

        Ok(PersonaView {
            ai_instance_id: self.ai_instance_id.clone(),
            types,
        })
    }

    /// Summarize attributes and the changes recorded in the last `days_back` days.
    #[instrument(skip(self))]
    pub fn get_persona_evolution_summary(&self, days_back: i64) -> Result<PersonaEvolutionSummary> {
        if days_back < 0 {
            return Err(Error::invalid_argument(
                "days_back",
                format!("must be non-negative, got {days_back}"),
            ));
        }
        let window = Duration::try_days(days_back)
            .ok_or_else(|| Error::invalid_argument("days_back", "window too large"))?;
        let since = self.clock.now() - window;

        let attributes = self.store.list_persona_attributes()?;
        let recent_changes = self.store.persona_changes_since(since)?;

        // (confidence sum, confidence count, attribute count)
        let mut per_type: BTreeMap<String, (f64, u64, u64)> = BTreeMap::new();
        for attribute in &attributes {
            let entry = per_type
                .entry(attribute.persona_type.clone())
                .or_insert((0.0, 0, 0));
            if let Some(confidence) = attribute.confidence_score {
                entry.0 += confidence;
                entry.1 += 1;
            }
            entry.2 += 1;
        }

        let persona_types = per_type
            .into_iter()
            .map(|(persona_type, (sum, with_confidence, total))| {
                let average_confidence = if with_confidence > 0 {
                    sum / with_confidence as f64
                } else {
                    0.0
                };
                (
                    persona_type,
                    PersonaTypeStats {
                        average_confidence,
                        total_attributes: total,
                    },
                )
            })
            .collect();

        Ok(PersonaEvolutionSummary {
            analysis_period_days: days_back,
            total_attributes_tracked: attributes.len() as u64,
            recent_changes,
            persona_types,
        })
    }
}
