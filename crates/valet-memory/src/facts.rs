use chrono::Utc;
use rusqlite::params;
use tracing::debug;
use valet_store::Store;
use valet_users::UserStore;

use crate::embeddings::{cosine_distance, EmbeddingClient};
use crate::error::{MemoryError, Result};
use crate::types::{Fact, FactCategory, FactSource};

/// Upper bound on embedded facts scored per semantic recall. Keeps the
/// in-process ranking cheap for users with long memories.
const SEMANTIC_CANDIDATE_LIMIT: usize = 256;

/// Result of a recall: semantically ranked (ascending cosine distance) or
/// ordered by confidence when no query vector is available.
pub enum Recall {
    Semantic(Vec<(Fact, f64)>),
    ByConfidence(Vec<Fact>),
}

/// Durable facts about users, with optional vector recall.
#[derive(Clone)]
pub struct FactStore {
    store: Store,
    users: UserStore,
    embedder: Option<EmbeddingClient>,
}

impl FactStore {
    pub fn new(
        store: Store,
        users: UserStore,
        embedder: Option<EmbeddingClient>,
    ) -> Result<Self> {
        store.with(crate::db::init_db)?;
        Ok(Self {
            store,
            users,
            embedder,
        })
    }

    /// Store a fact. Ensures the user row exists first; embeds the text
    /// when the service is configured, silently skipping the vector on any
    /// failure.
    pub async fn remember(
        &self,
        user_id: &str,
        fact: &str,
        category: FactCategory,
        confidence: f64,
        source: FactSource,
    ) -> Result<i64> {
        self.users.ensure(user_id)?;

        let embedding = match &self.embedder {
            Some(e) => e.embed(fact).await,
            None => None,
        };
        let encoded = embedding
            .as_ref()
            .and_then(|v| serde_json::to_string(v).ok());

        let now = Utc::now().to_rfc3339();
        let id = self.store.with(|c| {
            c.execute(
                "INSERT INTO user_facts
                    (user_id, fact, category, confidence, source, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    fact,
                    category.to_string(),
                    confidence,
                    source.to_string(),
                    encoded,
                    now,
                ],
            )?;
            Ok(c.last_insert_rowid())
        })?;
        debug!(user_id, fact_id = id, %category, "fact stored");
        Ok(id)
    }

    /// Recall facts. With a query and a working embedding service the
    /// result is ranked by cosine distance; otherwise it falls back to
    /// confidence ordering. Expired facts never appear.
    pub async fn recall(
        &self,
        user_id: &str,
        query: Option<&str>,
        category: Option<FactCategory>,
        limit: usize,
    ) -> Result<Recall> {
        if let (Some(q), Some(embedder)) = (query, &self.embedder) {
            if let Some(query_vec) = embedder.embed(q).await {
                let ranked = self.semantic_search(user_id, &query_vec, category, limit)?;
                return Ok(Recall::Semantic(ranked));
            }
            // Embedding failed; fall through to the category path.
        }
        Ok(Recall::ByConfidence(self.top_facts_filtered(
            user_id, category, limit,
        )?))
    }

    /// Highest-confidence unexpired facts, newest first within equal
    /// confidence. Used by context assembly and the fallback recall path.
    pub fn top_facts(&self, user_id: &str, limit: usize) -> Result<Vec<Fact>> {
        self.top_facts_filtered(user_id, None, limit)
    }

    fn top_facts_filtered(
        &self,
        user_id: &str,
        category: Option<FactCategory>,
        limit: usize,
    ) -> Result<Vec<Fact>> {
        let now = Utc::now().to_rfc3339();
        let cat = category.map(|c| c.to_string());
        let facts = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, user_id, fact, category, confidence, source,
                        embedding, expires_at, created_at
                 FROM user_facts
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR category = ?2)
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY confidence DESC, created_at DESC
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(params![user_id, cat, now, limit], row_to_fact)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(facts)
    }

    fn semantic_search(
        &self,
        user_id: &str,
        query_vec: &[f32],
        category: Option<FactCategory>,
        limit: usize,
    ) -> Result<Vec<(Fact, f64)>> {
        let now = Utc::now().to_rfc3339();
        let cat = category.map(|c| c.to_string());
        let candidates = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, user_id, fact, category, confidence, source,
                        embedding, expires_at, created_at
                 FROM user_facts
                 WHERE user_id = ?1
                   AND embedding IS NOT NULL
                   AND (?2 IS NULL OR category = ?2)
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY created_at DESC
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![user_id, cat, now, SEMANTIC_CANDIDATE_LIMIT],
                row_to_fact,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut scored: Vec<(Fact, f64)> = candidates
            .into_iter()
            .filter_map(|f| {
                let dist = f.embedding.as_ref().map(|v| cosine_distance(v, query_vec))?;
                Some((f, dist))
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(limit);
        Ok(scored)
    }

    /// All unexpired facts for a user, newest first (profile listing).
    pub fn list_facts(&self, user_id: &str) -> Result<Vec<Fact>> {
        let now = Utc::now().to_rfc3339();
        let facts = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, user_id, fact, category, confidence, source,
                        embedding, expires_at, created_at
                 FROM user_facts
                 WHERE user_id = ?1
                   AND (expires_at IS NULL OR expires_at > ?2)
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id, now], row_to_fact)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(facts)
    }

    /// Delete one of the user's own facts.
    pub fn delete_fact(&self, user_id: &str, fact_id: i64) -> Result<()> {
        let n = self.store.with(|c| {
            c.execute(
                "DELETE FROM user_facts WHERE id = ?1 AND user_id = ?2",
                params![fact_id, user_id],
            )
        })?;
        if n == 0 {
            return Err(MemoryError::FactNotFound { id: fact_id });
        }
        Ok(())
    }
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let category: String = row.get(3)?;
    let source: String = row.get(5)?;
    let embedding_raw: Option<String> = row.get(6)?;
    Ok(Fact {
        id: row.get(0)?,
        user_id: row.get(1)?,
        fact: row.get(2)?,
        category: category.parse().unwrap_or(FactCategory::Other),
        confidence: row.get(4)?,
        source: source.parse().unwrap_or(FactSource::Conversation),
        embedding: embedding_raw.and_then(|s| serde_json::from_str(&s).ok()),
        expires_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}
