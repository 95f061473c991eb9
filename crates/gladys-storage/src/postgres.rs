//! `PostgreSQL` storage backend.
//!
//! Uses pgvector for cosine search over embeddings. Heuristic condition
//! embeddings get an HNSW index (m = 16, `ef_construction` = 64) and a
//! trigger-maintained full-text vector over the condition text.

use std::sync::Arc;

use async_trait::async_trait;
use gladys_core::event::EpisodicEvent;
use gladys_core::feedback::FeedbackEvent;
use gladys_core::fire::{FeedbackSource, FireOutcome, HeuristicFire};
use gladys_core::heuristic::{PRIOR_ALPHA, PRIOR_BETA};
use gladys_core::{Event, Heuristic, SalienceVector};
use pgvector::Vector;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::{ConfidenceCounts, Result, StorageBackend, StorageError, StoreOutcome};

const EPISODE_COLUMNS: &str = "id, timestamp_ms, source, raw_text, structured, salience, \
     embedding, archived, access_count, predicted_success, prediction_confidence, response_id, \
     response_text, matched_heuristic_id, decision_path, episode_id, entity_ids, tokenizer_id, \
     token_ids, meta";

const HEURISTIC_COLUMNS: &str = "id, name, condition, action, condition_embedding, \
     similarity_threshold, confidence, alpha, beta, fire_count, success_count, origin, \
     origin_id, source, frozen, last_fired_ms, last_accessed_ms, created_at_ms, updated_at_ms";

/// `PostgreSQL`-backed storage.
pub struct PostgresStorage {
    client: Arc<tokio::sync::Mutex<Client>>,
    /// Embedding dimensionality baked into the vector columns.
    dimension: usize,
}

impl PostgresStorage {
    /// Connect and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if `PostgreSQL` is unreachable and `Query` if
    /// the schema bootstrap fails (e.g. the pgvector extension is not
    /// installed).
    pub async fn connect(connection_string: &str, dimension: usize) -> Result<Self> {
        info!("Connecting to PostgreSQL");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        let storage = Self {
            client: Arc::new(tokio::sync::Mutex::new(client)),
            dimension,
        };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let client = self.client.lock().await;

        client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .map_err(|e| {
                StorageError::Query(format!(
                    "failed to create pgvector extension (is it installed?): {e}"
                ))
            })?;

        let dim = self.dimension;
        let ddl = format!(
            r"
            CREATE TABLE IF NOT EXISTS episodic_events (
                id TEXT PRIMARY KEY,
                timestamp_ms BIGINT NOT NULL,
                source TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                structured JSONB,
                salience JSONB,
                embedding vector({dim}),
                archived BOOLEAN NOT NULL DEFAULT FALSE,
                access_count BIGINT NOT NULL DEFAULT 0,
                predicted_success DOUBLE PRECISION NOT NULL DEFAULT 0,
                prediction_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
                response_id TEXT,
                response_text TEXT,
                matched_heuristic_id TEXT,
                decision_path TEXT,
                episode_id TEXT,
                entity_ids JSONB,
                tokenizer_id TEXT NOT NULL DEFAULT '',
                token_ids JSONB,
                meta JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS episodic_events_timestamp_idx
                ON episodic_events (timestamp_ms DESC);
            CREATE INDEX IF NOT EXISTS episodic_events_source_idx
                ON episodic_events (source);

            CREATE TABLE IF NOT EXISTS heuristics (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                condition JSONB NOT NULL,
                action JSONB NOT NULL,
                condition_tsv tsvector,
                condition_embedding vector({dim}),
                similarity_threshold DOUBLE PRECISION NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                alpha DOUBLE PRECISION NOT NULL,
                beta DOUBLE PRECISION NOT NULL,
                fire_count BIGINT NOT NULL DEFAULT 0,
                success_count BIGINT NOT NULL DEFAULT 0,
                origin TEXT NOT NULL,
                origin_id TEXT,
                source TEXT,
                frozen BOOLEAN NOT NULL DEFAULT FALSE,
                last_fired_ms BIGINT,
                last_accessed_ms BIGINT,
                created_at_ms BIGINT NOT NULL,
                updated_at_ms BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS heuristics_source_idx ON heuristics (source);
            CREATE INDEX IF NOT EXISTS heuristics_condition_tsv_idx
                ON heuristics USING gin (condition_tsv);

            CREATE TABLE IF NOT EXISTS heuristic_fires (
                id TEXT PRIMARY KEY,
                heuristic_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                episodic_event_id TEXT,
                fired_at_ms BIGINT NOT NULL,
                outcome TEXT NOT NULL DEFAULT 'unknown',
                feedback_source TEXT,
                resolved_at_ms BIGINT
            );
            CREATE INDEX IF NOT EXISTS heuristic_fires_heuristic_idx
                ON heuristic_fires (heuristic_id);
            CREATE INDEX IF NOT EXISTS heuristic_fires_event_idx
                ON heuristic_fires (event_id);

            CREATE TABLE IF NOT EXISTS feedback_events (
                id TEXT PRIMARY KEY,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                feedback_type TEXT NOT NULL,
                feedback_value DOUBLE PRECISION NOT NULL,
                weight DOUBLE PRECISION NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at_ms BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                entity_type TEXT,
                attributes JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE TABLE IF NOT EXISTS relationships (
                id TEXT PRIMARY KEY,
                from_entity TEXT NOT NULL,
                to_entity TEXT NOT NULL,
                relation TEXT NOT NULL,
                attributes JSONB
            );
            CREATE TABLE IF NOT EXISTS user_profile (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                title TEXT,
                started_ms BIGINT,
                ended_ms BIGINT,
                summary TEXT
            );
            CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSONB
            );
            CREATE TABLE IF NOT EXISTS sensors (
                id TEXT PRIMARY KEY,
                sensor_type TEXT NOT NULL,
                address TEXT,
                capabilities JSONB,
                registered_at_ms BIGINT
            );
            CREATE TABLE IF NOT EXISTS sensor_status (
                sensor_id TEXT NOT NULL,
                state TEXT NOT NULL,
                error_message TEXT,
                heartbeat_ms BIGINT NOT NULL,
                PRIMARY KEY (sensor_id, heartbeat_ms)
            );
            CREATE TABLE IF NOT EXISTS sensor_metrics (
                sensor_id TEXT NOT NULL,
                metric TEXT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                recorded_ms BIGINT NOT NULL,
                PRIMARY KEY (sensor_id, metric, recorded_ms)
            );

            CREATE OR REPLACE FUNCTION heuristics_condition_tsv_update() RETURNS trigger AS $$
            BEGIN
                NEW.condition_tsv := to_tsvector('english', coalesce(NEW.condition->>'text', ''));
                RETURN NEW;
            END
            $$ LANGUAGE plpgsql;

            DROP TRIGGER IF EXISTS heuristics_condition_tsv ON heuristics;
            CREATE TRIGGER heuristics_condition_tsv
                BEFORE INSERT OR UPDATE ON heuristics
                FOR EACH ROW EXECUTE FUNCTION heuristics_condition_tsv_update();
            "
        );
        client.batch_execute(&ddl).await.map_err(StorageError::from)?;

        // HNSW needs pgvector >= 0.5; fall back to a sequential scan when
        // the index cannot be built rather than failing startup.
        let hnsw = "CREATE INDEX IF NOT EXISTS heuristics_condition_embedding_idx \
             ON heuristics USING hnsw (condition_embedding vector_cosine_ops) \
             WITH (m = 16, ef_construction = 64)";
        if let Err(e) = client.execute(hnsw, &[]).await {
            warn!(error = %e, "could not create HNSW index; similarity queries will scan");
        }

        debug!("schema bootstrap complete");
        Ok(())
    }

    fn embedding_param(&self, embedding: &[f32]) -> Option<Vector> {
        if embedding.is_empty() {
            None
        } else {
            Some(Vector::from(embedding.to_vec()))
        }
    }
}

fn json_or_null<T: serde::Serialize>(value: &Option<T>) -> Option<serde_json::Value> {
    value.as_ref().and_then(|v| serde_json::to_value(v).ok())
}

fn row_to_episode(row: &Row) -> std::result::Result<EpisodicEvent, String> {
    let id: String = row.try_get("id").map_err(|e| e.to_string())?;
    let salience: Option<serde_json::Value> = row.try_get("salience").map_err(|e| e.to_string())?;
    let salience: Option<SalienceVector> = match salience {
        Some(v) => Some(serde_json::from_value(v).map_err(|e| e.to_string())?),
        None => None,
    };
    let meta: Option<serde_json::Value> = row.try_get("meta").map_err(|e| e.to_string())?;
    let meta = match meta {
        Some(v) => serde_json::from_value(v).map_err(|e| e.to_string())?,
        None => Default::default(),
    };
    let entity_ids: Option<serde_json::Value> =
        row.try_get("entity_ids").map_err(|e| e.to_string())?;
    let entity_ids: Vec<String> = match entity_ids {
        Some(v) => serde_json::from_value(v).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };
    let token_ids: Option<serde_json::Value> =
        row.try_get("token_ids").map_err(|e| e.to_string())?;
    let token_ids: Vec<u32> = match token_ids {
        Some(v) => serde_json::from_value(v).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };
    let embedding: Option<Vector> = row.try_get("embedding").map_err(|e| e.to_string())?;

    Ok(EpisodicEvent {
        event: Event {
            id,
            timestamp_ms: row.try_get("timestamp_ms").map_err(|e| e.to_string())?,
            source: row.try_get("source").map_err(|e| e.to_string())?,
            raw_text: row.try_get("raw_text").map_err(|e| e.to_string())?,
            structured: row.try_get("structured").map_err(|e| e.to_string())?,
            salience: salience.clone(),
            entity_ids,
            tokenizer_id: row.try_get("tokenizer_id").map_err(|e| e.to_string())?,
            token_ids,
            meta,
        },
        embedding: embedding.map(|v| v.to_vec()).unwrap_or_default(),
        salience,
        archived: row.try_get("archived").map_err(|e| e.to_string())?,
        access_count: row
            .try_get::<_, i64>("access_count")
            .map_err(|e| e.to_string())?
            .max(0) as u64,
        predicted_success: row
            .try_get("predicted_success")
            .map_err(|e| e.to_string())?,
        prediction_confidence: row
            .try_get("prediction_confidence")
            .map_err(|e| e.to_string())?,
        response_id: row.try_get("response_id").map_err(|e| e.to_string())?,
        response_text: row.try_get("response_text").map_err(|e| e.to_string())?,
        matched_heuristic_id: row
            .try_get("matched_heuristic_id")
            .map_err(|e| e.to_string())?,
        decision_path: row.try_get("decision_path").map_err(|e| e.to_string())?,
        episode_id: row.try_get("episode_id").map_err(|e| e.to_string())?,
    })
}

fn row_to_heuristic(row: &Row) -> std::result::Result<Heuristic, String> {
    use gladys_core::heuristic::{HeuristicAction, HeuristicCondition};

    let condition: serde_json::Value = row.try_get("condition").map_err(|e| e.to_string())?;
    let action: serde_json::Value = row.try_get("action").map_err(|e| e.to_string())?;
    let origin: String = row.try_get("origin").map_err(|e| e.to_string())?;
    let embedding: Option<Vector> = row
        .try_get("condition_embedding")
        .map_err(|e| e.to_string())?;
    let source: Option<String> = row.try_get("source").map_err(|e| e.to_string())?;

    Ok(Heuristic {
        id: row.try_get("id").map_err(|e| e.to_string())?,
        name: row.try_get("name").map_err(|e| e.to_string())?,
        condition: HeuristicCondition {
            text: condition
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            source: source.clone(),
        },
        action: HeuristicAction {
            message: action
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            extra: action.get("extra").filter(|v| !v.is_null()).cloned(),
        },
        condition_embedding: embedding.map(|v| v.to_vec()).unwrap_or_default(),
        similarity_threshold: row
            .try_get("similarity_threshold")
            .map_err(|e| e.to_string())?,
        confidence: row.try_get("confidence").map_err(|e| e.to_string())?,
        alpha: row.try_get("alpha").map_err(|e| e.to_string())?,
        beta: row.try_get("beta").map_err(|e| e.to_string())?,
        fire_count: row
            .try_get::<_, i64>("fire_count")
            .map_err(|e| e.to_string())?
            .max(0) as u64,
        success_count: row
            .try_get::<_, i64>("success_count")
            .map_err(|e| e.to_string())?
            .max(0) as u64,
        origin: origin.parse().map_err(|e: gladys_core::CoreError| e.to_string())?,
        origin_id: row.try_get("origin_id").map_err(|e| e.to_string())?,
        source,
        frozen: row.try_get("frozen").map_err(|e| e.to_string())?,
        last_fired_ms: row.try_get("last_fired_ms").map_err(|e| e.to_string())?,
        last_accessed_ms: row.try_get("last_accessed_ms").map_err(|e| e.to_string())?,
        created_at_ms: row.try_get("created_at_ms").map_err(|e| e.to_string())?,
        updated_at_ms: row.try_get("updated_at_ms").map_err(|e| e.to_string())?,
    })
}

fn row_to_fire(row: &Row) -> std::result::Result<HeuristicFire, String> {
    let outcome: String = row.try_get("outcome").map_err(|e| e.to_string())?;
    let feedback_source: Option<String> =
        row.try_get("feedback_source").map_err(|e| e.to_string())?;
    let feedback_source = match feedback_source {
        Some(s) => Some(
            s.parse::<FeedbackSource>()
                .map_err(|e| e.to_string())?,
        ),
        None => None,
    };
    Ok(HeuristicFire {
        id: row.try_get("id").map_err(|e| e.to_string())?,
        heuristic_id: row.try_get("heuristic_id").map_err(|e| e.to_string())?,
        event_id: row.try_get("event_id").map_err(|e| e.to_string())?,
        episodic_event_id: row
            .try_get("episodic_event_id")
            .map_err(|e| e.to_string())?,
        fired_at_ms: row.try_get("fired_at_ms").map_err(|e| e.to_string())?,
        outcome: outcome.parse().map_err(|e: gladys_core::CoreError| e.to_string())?,
        feedback_source,
        resolved_at_ms: row.try_get("resolved_at_ms").map_err(|e| e.to_string())?,
    })
}

#[async_trait]
impl StorageBackend for PostgresStorage {
    async fn store_episode(&self, episode: EpisodicEvent) -> Result<StoreOutcome> {
        if episode.event.id.is_empty() {
            return Err(StorageError::Validation(gladys_core::CoreError::invalid(
                "event_id",
                "must not be empty",
            )));
        }
        let client = self.client.lock().await;
        let embedding = self.embedding_param(&episode.embedding);
        let structured = episode.event.structured.clone();
        let salience = json_or_null(&episode.salience);
        let meta = serde_json::to_value(&episode.event.meta).ok();
        let entity_ids = serde_json::to_value(&episode.event.entity_ids).ok();
        let token_ids = serde_json::to_value(&episode.event.token_ids).ok();

        let inserted = client
            .execute(
                "INSERT INTO episodic_events (id, timestamp_ms, source, raw_text, structured, \
                 salience, embedding, archived, access_count, predicted_success, \
                 prediction_confidence, response_id, response_text, matched_heuristic_id, \
                 decision_path, episode_id, entity_ids, tokenizer_id, token_ids, meta) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18, $19, $20) ON CONFLICT (id) DO NOTHING",
                &[
                    &episode.event.id,
                    &episode.event.timestamp_ms,
                    &episode.event.source,
                    &episode.event.raw_text,
                    &structured,
                    &salience,
                    &embedding,
                    &episode.archived,
                    &(episode.access_count.min(i64::MAX as u64) as i64),
                    &episode.predicted_success,
                    &episode.prediction_confidence,
                    &episode.response_id,
                    &episode.response_text,
                    &episode.matched_heuristic_id,
                    &episode.decision_path,
                    &episode.episode_id,
                    &entity_ids,
                    &episode.event.tokenizer_id,
                    &token_ids,
                    &meta,
                ],
            )
            .await?;

        if inserted == 0 {
            debug!(event_id = %episode.event.id, "episode already stored; idempotent no-op");
            Ok(StoreOutcome::Duplicate)
        } else {
            Ok(StoreOutcome::Inserted)
        }
    }

    async fn get_episode(&self, event_id: &str) -> Result<Option<EpisodicEvent>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                &format!("SELECT {EPISODE_COLUMNS} FROM episodic_events WHERE id = $1"),
                &[&event_id],
            )
            .await?;
        match row {
            None => Ok(None),
            Some(row) => row_to_episode(&row).map(Some).map_err(|reason| {
                StorageError::CorruptRow {
                    id: event_id.to_string(),
                    reason,
                }
            }),
        }
    }

    async fn query_episodes_by_time(
        &self,
        start_ms: i64,
        end_ms: i64,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {EPISODE_COLUMNS} FROM episodic_events \
                     WHERE ($1 = 0 OR timestamp_ms >= $1) AND ($2 = 0 OR timestamp_ms <= $2) \
                     AND ($3::text IS NULL OR source = $3::text) \
                     ORDER BY timestamp_ms DESC LIMIT $4"
                ),
                &[&start_ms, &end_ms, &source, &(limit as i64)],
            )
            .await?;

        let mut episodes = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_episode(row) {
                Ok(ep) => episodes.push(ep),
                Err(reason) => warn!(reason, "skipping corrupt episode row"),
            }
        }
        Ok(episodes)
    }

    async fn query_episodes_by_similarity(
        &self,
        embedding: &[f32],
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(EpisodicEvent, f64)>> {
        let Some(query_vec) = self.embedding_param(embedding) else {
            return Ok(Vec::new());
        };
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {EPISODE_COLUMNS}, 1 - (embedding <=> $1) AS similarity \
                     FROM episodic_events WHERE embedding IS NOT NULL \
                     AND ($2::text IS NULL OR source = $2::text) \
                     ORDER BY embedding <=> $1 LIMIT $3"
                ),
                &[&query_vec, &source, &(limit as i64)],
            )
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let similarity: f64 = row.try_get("similarity").map_err(StorageError::from)?;
            match row_to_episode(row) {
                Ok(ep) => scored.push((ep, similarity)),
                Err(reason) => warn!(reason, "skipping corrupt episode row"),
            }
        }
        Ok(scored)
    }

    async fn store_heuristic(&self, heuristic: Heuristic) -> Result<String> {
        heuristic.validate()?;
        let client = self.client.lock().await;
        let condition = serde_json::json!({
            "text": heuristic.condition.text,
            "source": heuristic.condition.source,
        });
        let action = serde_json::json!({
            "message": heuristic.action.message,
            "extra": heuristic.action.extra,
        });
        let embedding = self.embedding_param(&heuristic.condition_embedding);

        client
            .execute(
                "INSERT INTO heuristics (id, name, condition, action, condition_embedding, \
                 similarity_threshold, confidence, alpha, beta, fire_count, success_count, \
                 origin, origin_id, source, frozen, last_fired_ms, last_accessed_ms, \
                 created_at_ms, updated_at_ms) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18, $19) \
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, \
                 condition = EXCLUDED.condition, action = EXCLUDED.action, \
                 condition_embedding = EXCLUDED.condition_embedding, \
                 similarity_threshold = EXCLUDED.similarity_threshold, \
                 confidence = EXCLUDED.confidence, alpha = EXCLUDED.alpha, \
                 beta = EXCLUDED.beta, source = EXCLUDED.source, \
                 updated_at_ms = EXCLUDED.updated_at_ms",
                &[
                    &heuristic.id,
                    &heuristic.name,
                    &condition,
                    &action,
                    &embedding,
                    &heuristic.similarity_threshold,
                    &heuristic.confidence,
                    &heuristic.alpha,
                    &heuristic.beta,
                    &(heuristic.fire_count.min(i64::MAX as u64) as i64),
                    &(heuristic.success_count.min(i64::MAX as u64) as i64),
                    &heuristic.origin.as_str(),
                    &heuristic.origin_id,
                    &heuristic.source,
                    &heuristic.frozen,
                    &heuristic.last_fired_ms,
                    &heuristic.last_accessed_ms,
                    &heuristic.created_at_ms,
                    &heuristic.updated_at_ms,
                ],
            )
            .await?;
        Ok(heuristic.id)
    }

    async fn get_heuristic(&self, id: &str) -> Result<Option<Heuristic>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                &format!("SELECT {HEURISTIC_COLUMNS} FROM heuristics WHERE id = $1"),
                &[&id],
            )
            .await?;
        match row {
            None => Ok(None),
            Some(row) => row_to_heuristic(&row).map(Some).map_err(|reason| {
                StorageError::CorruptRow {
                    id: id.to_string(),
                    reason,
                }
            }),
        }
    }

    async fn update_heuristic_confidence(
        &self,
        id: &str,
        positive: bool,
        weight: f64,
    ) -> Result<ConfidenceCounts> {
        if !(weight > 0.0 && weight <= 1.0) {
            return Err(StorageError::Validation(gladys_core::CoreError::invalid(
                "weight",
                "must be in (0, 1]",
            )));
        }
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT alpha, beta, frozen FROM heuristics WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: "heuristic",
                id: id.to_string(),
            })?;

        let frozen: bool = row.try_get("frozen")?;
        if frozen {
            return Err(StorageError::Frozen(id.to_string()));
        }

        // Inconsistent historical rows are floored at the prior.
        let mut alpha: f64 = row.try_get::<_, f64>("alpha")?.max(0.0);
        let mut beta: f64 = row.try_get::<_, f64>("beta")?.max(0.0);
        if alpha <= 0.0 {
            alpha = PRIOR_ALPHA;
        }
        if beta <= 0.0 {
            beta = PRIOR_BETA;
        }
        if positive {
            alpha += weight;
        } else {
            beta += weight;
        }
        let confidence = (alpha / (alpha + beta)).clamp(0.0, 1.0);

        tx.execute(
            "UPDATE heuristics SET alpha = $2, beta = $3, confidence = $4, updated_at_ms = $5 \
             WHERE id = $1",
            &[&id, &alpha, &beta, &confidence, &gladys_core::now_ms()],
        )
        .await?;
        tx.commit().await?;

        Ok(ConfidenceCounts {
            alpha,
            beta,
            confidence,
        })
    }

    async fn delete_heuristic(&self, id: &str) -> Result<bool> {
        let client = self.client.lock().await;
        let deleted = client
            .execute("DELETE FROM heuristics WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn query_matching_heuristics(
        &self,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<(Heuristic, f64)>> {
        let Some(query_vec) = self.embedding_param(embedding) else {
            return Ok(Vec::new());
        };
        // Over-fetch so per-heuristic thresholds can prune without
        // starving the limit.
        let fetch = (limit.max(1) * 4) as i64;
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {HEURISTIC_COLUMNS}, 1 - (condition_embedding <=> $1) AS similarity \
                     FROM heuristics WHERE condition_embedding IS NOT NULL \
                     AND confidence >= $2 \
                     AND ($3::text IS NULL OR source = $3::text) \
                     ORDER BY condition_embedding <=> $1 LIMIT $4"
                ),
                &[&query_vec, &min_confidence, &source, &fetch],
            )
            .await?;

        let mut scored = Vec::new();
        for row in &rows {
            let similarity: f64 = row.try_get("similarity").map_err(StorageError::from)?;
            match row_to_heuristic(row) {
                Ok(h) => {
                    if similarity >= min_similarity.max(h.similarity_threshold) {
                        scored.push((h, similarity));
                    }
                }
                Err(reason) => warn!(reason, "skipping corrupt heuristic row"),
            }
        }
        scored.truncate(limit);
        Ok(scored)
    }

    async fn record_fire(&self, fire: HeuristicFire) -> Result<String> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO heuristic_fires (id, heuristic_id, event_id, episodic_event_id, \
             fired_at_ms, outcome, feedback_source, resolved_at_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &fire.id,
                &fire.heuristic_id,
                &fire.event_id,
                &fire.episodic_event_id,
                &fire.fired_at_ms,
                &fire.outcome.as_str(),
                &fire.feedback_source.map(|s| s.as_str()),
                &fire.resolved_at_ms,
            ],
        )
        .await?;
        tx.execute(
            "UPDATE heuristics SET fire_count = fire_count + 1, last_fired_ms = $2 WHERE id = $1",
            &[&fire.heuristic_id, &fire.fired_at_ms],
        )
        .await?;
        tx.commit().await?;
        Ok(fire.id)
    }

    async fn get_fire(&self, fire_id: &str) -> Result<Option<HeuristicFire>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, heuristic_id, event_id, episodic_event_id, fired_at_ms, outcome, \
                 feedback_source, resolved_at_ms FROM heuristic_fires WHERE id = $1",
                &[&fire_id],
            )
            .await?;
        match row {
            None => Ok(None),
            Some(row) => row_to_fire(&row).map(Some).map_err(|reason| {
                StorageError::CorruptRow {
                    id: fire_id.to_string(),
                    reason,
                }
            }),
        }
    }

    async fn resolve_fire(
        &self,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT heuristic_id, resolved_at_ms FROM heuristic_fires WHERE id = $1 FOR UPDATE",
                &[&fire_id],
            )
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: "fire",
                id: fire_id.to_string(),
            })?;

        let resolved_at: Option<i64> = row.try_get("resolved_at_ms")?;
        if resolved_at.is_some() {
            return Err(StorageError::AlreadyResolved(fire_id.to_string()));
        }
        let heuristic_id: String = row.try_get("heuristic_id")?;

        tx.execute(
            "UPDATE heuristic_fires SET outcome = $2, feedback_source = $3, resolved_at_ms = $4 \
             WHERE id = $1",
            &[
                &fire_id,
                &outcome.as_str(),
                &feedback_source.map(|s| s.as_str()),
                &gladys_core::now_ms(),
            ],
        )
        .await?;

        if outcome == FireOutcome::Success {
            tx.execute(
                "UPDATE heuristics SET success_count = LEAST(success_count + 1, fire_count) \
                 WHERE id = $1",
                &[&heuristic_id],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_feedback(&self, feedback: FeedbackEvent) -> Result<String> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO feedback_events (id, target_type, target_id, feedback_type, \
                 feedback_value, weight, processed, created_at_ms) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &feedback.id,
                    &feedback.target_type.as_str(),
                    &feedback.target_id,
                    &feedback.feedback_type,
                    &feedback.feedback_value,
                    &feedback.weight,
                    &feedback.processed,
                    &feedback.created_at_ms,
                ],
            )
            .await?;
        Ok(feedback.id)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client.lock().await;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}
