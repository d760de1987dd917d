//! Weighted retrieval.
//!
//! Candidates are ranked by
//!
//! ```text
//! composite = w_importance · importance + w_recency · exp(-λ · age_hours) + w_relevance · relevance
//! ```
//!
//! where `age` runs from the last access (or creation, if never accessed)
//! and `λ = ln 2 / half_life`. The weights are used exactly as supplied.
//! Every returned record has its access bookkeeping bumped.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::clock::SharedClock;
use crate::config::{MemoryConfig, RecallWeights};
use crate::error::{Error, Result};
use crate::memory::{MemoryFilter, MemoryRecord, SqliteMemoryStore};
use crate::relevance::{RelevanceScorer, TokenOverlapScorer};

/// A recall query.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallRequest {
    pub query: String,
    pub weights: RecallWeights,
    /// Maximum results; zero or negative yields nothing
    pub limit: i64,
    /// Candidate precondition (archived records are always excluded)
    pub filter: MemoryFilter,
    /// Drop candidates with zero relevance before ranking
    pub require_relevance: bool,
}

impl RecallRequest {
    pub fn new(query: impl Into<String>, weights: RecallWeights, limit: i64) -> Self {
        Self {
            query: query.into(),
            weights,
            limit,
            filter: MemoryFilter::active(),
            require_relevance: false,
        }
    }

    pub fn with_filter(mut self, filter: MemoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn require_relevance(mut self, require: bool) -> Self {
        self.require_relevance = require;
        self
    }
}

/// A recalled record with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub composite_score: f64,
    pub recency_score: f64,
    pub relevance_score: f64,
}

/// Ranks active memories by importance, recency and relevance.
pub struct RetrievalEngine<S: RelevanceScorer = TokenOverlapScorer> {
    store: SqliteMemoryStore,
    scorer: S,
    clock: SharedClock,
    recency_lambda: f64,
}

impl RetrievalEngine<TokenOverlapScorer> {
    /// Create an engine with the token-overlap scorer configured from `config`.
    pub fn new(store: SqliteMemoryStore, clock: SharedClock, config: &MemoryConfig) -> Self {
        Self::with_scorer(
            store,
            TokenOverlapScorer::new(config.tag_match_bonus),
            clock,
            config,
        )
    }
}

impl<S: RelevanceScorer> RetrievalEngine<S> {
    /// Create an engine with a custom relevance scorer.
    pub fn with_scorer(
        store: SqliteMemoryStore,
        scorer: S,
        clock: SharedClock,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            clock,
            recency_lambda: config.recency_lambda(),
        }
    }

    /// Recall with the default (active, unfiltered) candidate set.
    pub fn recall_weighted(
        &self,
        query: &str,
        weights: RecallWeights,
        limit: i64,
    ) -> Result<Vec<ScoredMemory>> {
        self.recall(&RecallRequest::new(query, weights, limit))
    }

    /// Rank candidates and return at most `request.limit` of them, best first.
    ///
    /// Ties on the composite score go to the more recently created record,
    /// then to the later insertion.
    #[instrument(skip(self, request), fields(query = %request.query, limit = request.limit))]
    pub fn recall(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
        request.weights.validate()?;
        if request.limit <= 0 {
            return Ok(Vec::new());
        }
        let limit = usize::try_from(request.limit)
            .map_err(|_| Error::invalid_argument("limit", "does not fit in usize"))?;

        let filter = request.filter.clone().include_archived(false);
        let candidates = self.store.snapshot(&filter)?;
        let now = self.clock.now();

        let mut ranked: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|record| self.score(&request.query, &request.weights, record, now))
            .filter(|scored| !request.require_relevance || scored.relevance_score > 0.0)
            .collect();

        ranked.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
                .then_with(|| b.record.seq.cmp(&a.record.seq))
        });
        ranked.truncate(limit);

        let mut results = Vec::with_capacity(ranked.len());
        for mut scored in ranked {
            match self.store.record_access(&scored.record.id, now) {
                Ok(touched) => {
                    scored.record = touched;
                    results.push(scored);
                }
                // deleted or archived between snapshot and bookkeeping
                Err(Error::NotFound { .. }) => {
                    debug!(memory_id = %scored.record.id, "Skipping memory no longer active");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(returned = results.len(), "Recall complete");
        Ok(results)
    }

    /// Score a single record without touching the store.
    pub fn score(
        &self,
        query: &str,
        weights: &RecallWeights,
        record: MemoryRecord,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ScoredMemory {
        let age_hours =
            ((now - record.recency_anchor()).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
        let recency_score = (-self.recency_lambda * age_hours).exp();
        let relevance_score = self.scorer.score(query, &record);
        let composite_score = weights.importance * record.importance
            + weights.recency * recency_score
            + weights.relevance * relevance_score;

        ScoredMemory {
            record,
            composite_score,
            recency_score,
            relevance_score,
        }
    }

    /// The store this engine reads from.
    pub fn store(&self) -> &SqliteMemoryStore {
        &self.store
    }
}
