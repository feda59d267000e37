//! PostgreSQL + pgvector capability store.
//!
//! Requires the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! scl = { features = ["postgres"] }
//! ```
//!
//! Similarity is `1 - (embedding <=> query)`, the cosine distance operator
//! of pgvector, and ordering happens in the database.

#[cfg(feature = "postgres")]
mod inner {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use sqlx::postgres::{PgPoolOptions, PgRow};
    use sqlx::{PgPool, Row};

    use crate::capabilities::{Capability, CapabilityMap, CapabilityType, LlmDescription};
    use crate::chat::state::ConversationState;
    use crate::rag::core::{Embedding, EmbeddingProvider};
    use crate::storage::interface::CapabilityStore;
    use crate::utilities::errors::StoreError;

    const SELECT_COLUMNS: &str = "name, type, description, embedding::text AS embedding, \
         original_body, llm_description, function_impl";

    /// pgvector text literal for an embedding.
    fn vector_literal(embedding: &[f32]) -> String {
        let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
        format!("[{}]", parts.join(","))
    }

    fn decode_row(row: &PgRow) -> Result<Capability, StoreError> {
        let name: String = row.try_get("name")?;
        let kind: String = row.try_get("type")?;
        let description: String = row.try_get("description")?;
        let embedding: String = row.try_get("embedding")?;
        let original_body: Option<Value> = row.try_get("original_body")?;
        let llm_description: Option<Value> = row.try_get("llm_description")?;
        let function_impl: Option<String> = row.try_get("function_impl")?;

        let embedding: Embedding = serde_json::from_str(&embedding)?;
        let original_body = original_body.unwrap_or(Value::Null);
        let capability = match CapabilityType::parse(&kind) {
            Some(CapabilityType::Skill) => Capability::skill(name, description, original_body),
            Some(CapabilityType::FunctionCall) => {
                let llm_description = match llm_description {
                    Some(value) => serde_json::from_value(value)?,
                    None => LlmDescription::new(
                        name.clone(),
                        description.clone(),
                        serde_json::json!({"type": "object", "properties": {}}),
                    ),
                };
                let mut capability = Capability::function_call(name, description, llm_description)
                    .with_original_body(original_body);
                if let Some(key) = function_impl {
                    capability = capability.with_function_impl(key);
                }
                capability
            }
            None => {
                return Err(StoreError::Corrupt(format!(
                    "capability '{}' has unknown type '{}'",
                    name, kind
                )))
            }
        };
        Ok(capability.with_embedding(embedding))
    }

    /// PostgreSQL store for capabilities.
    #[derive(Clone)]
    pub struct PgCapabilityStore {
        pool: PgPool,
        embedder: Arc<dyn EmbeddingProvider>,
        dimensions: usize,
    }

    impl std::fmt::Debug for PgCapabilityStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PgCapabilityStore")
                .field("dimensions", &self.dimensions)
                .finish()
        }
    }

    impl PgCapabilityStore {
        pub fn new(pool: PgPool, embedder: Arc<dyn EmbeddingProvider>, dimensions: usize) -> Self {
            Self {
                pool,
                embedder,
                dimensions,
            }
        }

        /// Connect a small pool to `database_url`.
        pub async fn connect(
            database_url: &str,
            embedder: Arc<dyn EmbeddingProvider>,
            dimensions: usize,
        ) -> Result<Self, StoreError> {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            Ok(Self::new(pool, embedder, dimensions))
        }

        /// Create the vector extension, tables and index.
        pub async fn migrate(&self) -> Result<(), StoreError> {
            sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                .execute(&self.pool)
                .await?;

            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS capabilities (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    type TEXT NOT NULL,
                    description TEXT NOT NULL,
                    embedding vector({}) NOT NULL,
                    original_body JSONB,
                    llm_description JSONB,
                    function_impl TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#,
                self.dimensions
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS capability_usage (
                    id BIGSERIAL PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    capability TEXT NOT NULL,
                    query TEXT,
                    used_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS capabilities_embedding_idx \
                 ON capabilities USING ivfflat (embedding vector_cosine_ops)",
            )
            .execute(&self.pool)
            .await?;

            log::debug!("Capability tables migrated");
            Ok(())
        }

        async fn encode(&self, capability: &Capability) -> Result<(String, Option<Value>), StoreError> {
            let embedding = capability.embedding(&*self.embedder).await?;
            if embedding.len() != self.dimensions {
                return Err(StoreError::Embedding(format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    embedding.len()
                )));
            }
            let llm_description = capability
                .llm_description()
                .map(serde_json::to_value)
                .transpose()?;
            Ok((vector_literal(embedding), llm_description))
        }
    }

    #[async_trait]
    impl CapabilityStore for PgCapabilityStore {
        fn backend(&self) -> &str {
            "postgres"
        }

        async fn get_by_name(&self, name: &str) -> Option<Capability> {
            let result = sqlx::query(&format!(
                "SELECT {} FROM capabilities WHERE name = $1",
                SELECT_COLUMNS
            ))
            .bind(name)
            .fetch_optional(&self.pool)
            .await;
            match result {
                Ok(Some(row)) => decode_row(&row)
                    .map_err(|e| log::warn!("Undecodable capability '{}': {}", name, e))
                    .ok(),
                Ok(None) => None,
                Err(e) => {
                    log::warn!("Postgres lookup of '{}' failed: {}", name, e);
                    None
                }
            }
        }

        async fn search_by_similarity(
            &self,
            query_embedding: &[f32],
            limit: usize,
            min_similarity: f32,
        ) -> CapabilityMap {
            let result = sqlx::query(&format!(
                "SELECT {}, 1 - (embedding <=> $1::vector) AS similarity
                 FROM capabilities
                 WHERE 1 - (embedding <=> $1::vector) >= $2
                 ORDER BY embedding <=> $1::vector
                 LIMIT $3",
                SELECT_COLUMNS
            ))
            .bind(vector_literal(query_embedding))
            .bind(f64::from(min_similarity))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await;

            let rows = match result {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("Postgres similarity search failed: {}", e);
                    return CapabilityMap::new();
                }
            };
            let mut found = CapabilityMap::new();
            for row in rows {
                match decode_row(&row) {
                    Ok(capability) => {
                        let similarity: f64 = row.try_get("similarity").unwrap_or_default();
                        log::debug!(
                            "Capability '{}' matched with similarity {:.4}",
                            capability.name(),
                            similarity
                        );
                        found.insert(capability.name().to_string(), capability);
                    }
                    Err(e) => log::warn!("Skipping undecodable capability row: {}", e),
                }
            }
            found
        }

        async fn record(
            &self,
            state: &ConversationState,
            capability: &Capability,
        ) -> Result<(), StoreError> {
            sqlx::query(
                "INSERT INTO capability_usage (conversation_id, capability, query) VALUES ($1, $2, $3)",
            )
            .bind(state.id().to_string())
            .bind(capability.name())
            .bind(state.query())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn insert(&self, capability: Capability) -> Result<(), StoreError> {
            let (embedding, llm_description) = self.encode(&capability).await?;
            let result = sqlx::query(
                r#"
                INSERT INTO capabilities
                    (name, type, description, embedding, original_body, llm_description, function_impl)
                VALUES ($1, $2, $3, $4::vector, $5, $6, $7)
                "#,
            )
            .bind(capability.name())
            .bind(capability.kind().as_str())
            .bind(capability.description())
            .bind(embedding)
            .bind(capability.original_body())
            .bind(llm_description)
            .bind(capability.function_impl())
            .execute(&self.pool)
            .await;
            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    Err(StoreError::Duplicate(capability.name().to_string()))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn update(&self, capability: Capability) -> Result<(), StoreError> {
            let (embedding, llm_description) = self.encode(&capability).await?;
            let done = sqlx::query(
                r#"
                UPDATE capabilities
                SET type = $2, description = $3, embedding = $4::vector,
                    original_body = $5, llm_description = $6, function_impl = $7
                WHERE name = $1
                "#,
            )
            .bind(capability.name())
            .bind(capability.kind().as_str())
            .bind(capability.description())
            .bind(embedding)
            .bind(capability.original_body())
            .bind(llm_description)
            .bind(capability.function_impl())
            .execute(&self.pool)
            .await?;
            if done.rows_affected() == 0 {
                return Err(StoreError::NotFound(capability.name().to_string()));
            }
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<bool, StoreError> {
            let done = sqlx::query("DELETE FROM capabilities WHERE name = $1")
                .bind(name)
                .execute(&self.pool)
                .await?;
            Ok(done.rows_affected() > 0)
        }

        async fn list(&self, limit: usize) -> Vec<Capability> {
            let result = sqlx::query(&format!(
                "SELECT {} FROM capabilities ORDER BY id LIMIT $1",
                SELECT_COLUMNS
            ))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await;
            match result {
                Ok(rows) => rows.iter().filter_map(|row| decode_row(row).ok()).collect(),
                Err(e) => {
                    log::warn!("Postgres list failed: {}", e);
                    Vec::new()
                }
            }
        }
    }

}

#[cfg(feature = "postgres")]
pub use inner::PgCapabilityStore;
