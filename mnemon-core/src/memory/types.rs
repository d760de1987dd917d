//! Core entity types owned by the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for a memory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Generate a new random memory ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reflection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReflectionId(pub Uuid);

impl ReflectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ReflectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReflectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Retrieval eligibility of a memory record.
///
/// `Active -> Archived` is the only transition; archival is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Active,
    Archived,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single piece of retained knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    /// Insertion sequence assigned by the store (0 until persisted)
    pub seq: i64,
    /// Open type tag, e.g. `code_insight` or `milestone`
    pub memory_type: String,
    pub title: Option<String>,
    pub content: String,
    /// Caller-assigned importance in [0, 1]
    pub importance: f64,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    /// Set each time the record is returned by a recall
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    /// Current retrieval eligibility in [0, 1], starts at `importance`
    pub salience: f64,
    pub status: MemoryStatus,
    pub archived_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Create a new active record. Salience starts equal to importance.
    pub fn new(
        memory_type: impl Into<String>,
        content: impl Into<String>,
        importance: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MemoryId::new(),
            seq: 0,
            memory_type: memory_type.into(),
            title: None,
            content: content.into(),
            importance,
            tags: BTreeSet::new(),
            created_at,
            last_accessed_at: None,
            access_count: 0,
            salience: importance,
            status: MemoryStatus::Active,
            archived_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// The instant recency is measured from.
    pub fn recency_anchor(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }

    pub fn is_archived(&self) -> bool {
        self.status == MemoryStatus::Archived
    }

    /// Title, or the start of the content when untitled.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => {
                let mut short: String = self.content.chars().take(48).collect();
                if self.content.chars().count() > 48 {
                    short.push('…');
                }
                short
            }
        }
    }
}

/// Precondition filter over memory records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    /// Only these memory types
    pub memory_types: Option<Vec<String>>,
    /// Records carrying at least one of these tags
    pub tags: Option<Vec<String>>,
    /// Include archived records
    pub include_archived: bool,
}

impl MemoryFilter {
    /// Active records of any type.
    pub fn active() -> Self {
        Self::default()
    }

    /// Every record, archived ones included.
    pub fn all() -> Self {
        Self {
            include_archived: true,
            ..Self::default()
        }
    }

    pub fn memory_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memory_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    /// Whether a record passes the filter.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.include_archived && record.is_archived() {
            return false;
        }
        if let Some(ref types) = self.memory_types {
            if !types.iter().any(|t| *t == record.memory_type) {
                return false;
            }
        }
        if let Some(ref tags) = self.tags {
            if !tags.iter().any(|t| record.tags.contains(t)) {
                return false;
            }
        }
        true
    }
}

/// Value of a persona attribute: a single string or an ordered list.
///
/// Serialized untagged so callers keep sending `"text"` or `["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonaValue {
    Scalar(String),
    List(Vec<String>),
}

impl From<&str> for PersonaValue {
    fn from(s: &str) -> Self {
        Self::Scalar(s.to_string())
    }
}

impl From<String> for PersonaValue {
    fn from(s: String) -> Self {
        Self::Scalar(s)
    }
}

impl From<Vec<String>> for PersonaValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<&str>> for PersonaValue {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(str::to_string).collect())
    }
}

impl std::fmt::Display for PersonaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// A past value of a persona attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaSnapshot {
    pub value: PersonaValue,
    pub confidence: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// A versioned fact about the agent's self-model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaAttribute {
    pub persona_type: String,
    pub attribute_name: String,
    pub current_value: PersonaValue,
    pub confidence_score: Option<f64>,
    /// Prior values, oldest first
    pub history: Vec<PersonaSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A history entry together with the attribute it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaChange {
    pub persona_type: String,
    pub attribute_name: String,
    pub previous_value: PersonaValue,
    pub previous_confidence: Option<f64>,
    pub changed_at: DateTime<Utc>,
}

/// A generated self-assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub id: ReflectionId,
    pub reflection_trigger: String,
    pub situation_summary: String,
    pub generated_reflection_text: String,
    pub generated_at: DateTime<Utc>,
    /// Memories gathered at generation time, in rank order
    pub related_memory_ids: Vec<MemoryId>,
    /// The `reflection` memory mirroring this record, if any
    pub memory_id: Option<MemoryId>,
}
