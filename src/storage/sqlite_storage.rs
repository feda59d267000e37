//! SQLite-backed capability store.
//!
//! rusqlite is synchronous; every call opens a connection inside a tokio
//! blocking task. Embeddings are computed at insert time and stored as JSON
//! arrays, and similarity search is brute-force cosine over all rows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::Value;

use super::interface::{rank_by_similarity, CapabilityStore};
use crate::capabilities::{Capability, CapabilityMap, CapabilityType, LlmDescription};
use crate::chat::state::ConversationState;
use crate::rag::core::{cosine_similarity, Embedding, EmbeddingProvider};
use crate::utilities::errors::StoreError;

const SELECT_COLUMNS: &str =
    "name, type, description, embedding, original_body, llm_description, function_impl";

/// SQLite storage for capabilities and their usage log.
#[derive(Debug)]
pub struct SqliteCapabilityStore {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
}

/// Column values of one capability row.
struct StoredRow {
    name: String,
    kind: String,
    description: String,
    embedding: String,
    original_body: Option<String>,
    llm_description: Option<String>,
    function_impl: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            kind: row.get(1)?,
            description: row.get(2)?,
            embedding: row.get(3)?,
            original_body: row.get(4)?,
            llm_description: row.get(5)?,
            function_impl: row.get(6)?,
        })
    }

    fn into_capability(self) -> Result<Capability, StoreError> {
        let kind = CapabilityType::parse(&self.kind).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "capability '{}' has unknown type '{}'",
                self.name, self.kind
            ))
        })?;
        let embedding: Embedding = serde_json::from_str(&self.embedding)?;
        let original_body: Value = match self.original_body {
            Some(text) => serde_json::from_str(&text)?,
            None => Value::Null,
        };

        let capability = match kind {
            CapabilityType::Skill => Capability::skill(self.name, self.description, original_body),
            CapabilityType::FunctionCall => {
                let llm_description = match self.llm_description {
                    Some(text) => serde_json::from_str(&text)?,
                    None => LlmDescription::new(
                        self.name.clone(),
                        self.description.clone(),
                        serde_json::json!({"type": "object", "properties": {}}),
                    ),
                };
                let mut capability =
                    Capability::function_call(self.name, self.description, llm_description)
                        .with_original_body(original_body);
                if let Some(key) = self.function_impl {
                    capability = capability.with_function_impl(key);
                }
                capability
            }
        };
        Ok(capability.with_embedding(embedding))
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl SqliteCapabilityStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn new(
        db_path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { db_path, embedder };
        store.initialize_db()?;
        Ok(store)
    }

    /// Create the capability and usage tables.
    fn initialize_db(&self) -> Result<(), StoreError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            log::error!("Capability store initialization failed: {}", e);
            e
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS capabilities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                description TEXT NOT NULL,
                embedding TEXT NOT NULL,
                original_body TEXT,
                llm_description TEXT,
                function_impl TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS capability_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                capability TEXT NOT NULL,
                query TEXT,
                used_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_capability_usage_name
                ON capability_usage (capability);",
        )?;
        Ok(())
    }

    /// Run `op` against a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            op(&conn)
        })
        .await?
    }

    /// Number of recorded uses of `name`.
    pub async fn usage_count(&self, name: &str) -> Result<u64, StoreError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM capability_usage WHERE capability = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn encode(&self, capability: &Capability) -> Result<EncodedCapability, StoreError> {
        let embedding = capability.embedding(&*self.embedder).await?;
        Ok(EncodedCapability {
            name: capability.name().to_string(),
            kind: capability.kind().as_str().to_string(),
            description: capability.description().to_string(),
            embedding: serde_json::to_string(embedding)?,
            original_body: serde_json::to_string(capability.original_body())?,
            llm_description: capability
                .llm_description()
                .map(serde_json::to_string)
                .transpose()?,
            function_impl: capability.function_impl().map(String::from),
        })
    }

    async fn load_all(&self) -> Result<Vec<Capability>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM capabilities ORDER BY id",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], StoredRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(StoredRow::into_capability).collect()
        })
        .await
    }
}

/// Serialized column values ready for an INSERT or UPDATE.
struct EncodedCapability {
    name: String,
    kind: String,
    description: String,
    embedding: String,
    original_body: String,
    llm_description: Option<String>,
    function_impl: Option<String>,
}

#[async_trait]
impl CapabilityStore for SqliteCapabilityStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn get_by_name(&self, name: &str) -> Option<Capability> {
        let lookup = name.to_string();
        let result = self
            .with_connection(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {} FROM capabilities WHERE name = ?1", SELECT_COLUMNS),
                        params![lookup],
                        StoredRow::from_row,
                    )
                    .optional()?;
                row.map(StoredRow::into_capability).transpose()
            })
            .await;
        match result {
            Ok(found) => found,
            Err(e) => {
                log::warn!("SQLite lookup of '{}' failed: {}", name, e);
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
        let capabilities = match self.load_all().await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                log::warn!("SQLite similarity search failed: {}", e);
                return CapabilityMap::new();
            }
        };
        let scored = capabilities
            .into_iter()
            .filter_map(|capability| {
                let score = cosine_similarity(query_embedding, capability.cached_embedding()?);
                Some((score, capability))
            })
            .collect();
        rank_by_similarity(scored, limit, min_similarity)
    }

    async fn record(
        &self,
        state: &ConversationState,
        capability: &Capability,
    ) -> Result<(), StoreError> {
        let conversation_id = state.id().to_string();
        let name = capability.name().to_string();
        let query = state.query().to_string();
        let used_at = chrono::Utc::now().to_rfc3339();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO capability_usage (conversation_id, capability, query, used_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, name, query, used_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert(&self, capability: Capability) -> Result<(), StoreError> {
        let row = self.encode(&capability).await?;
        let created_at = chrono::Utc::now().to_rfc3339();
        self.with_connection(move |conn| {
            let result = conn.execute(
                "INSERT INTO capabilities
                    (name, type, description, embedding, original_body, llm_description, function_impl, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.name,
                    row.kind,
                    row.description,
                    row.embedding,
                    row.original_body,
                    row.llm_description,
                    row.function_impl,
                    created_at
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(row.name)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update(&self, capability: Capability) -> Result<(), StoreError> {
        let row = self.encode(&capability).await?;
        self.with_connection(move |conn| {
            let changed = conn.execute(
                "UPDATE capabilities
                 SET type = ?2, description = ?3, embedding = ?4, original_body = ?5,
                     llm_description = ?6, function_impl = ?7
                 WHERE name = ?1",
                params![
                    row.name,
                    row.kind,
                    row.description,
                    row.embedding,
                    row.original_body,
                    row.llm_description,
                    row.function_impl
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(row.name));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let removed = conn.execute("DELETE FROM capabilities WHERE name = ?1", params![name])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self, limit: usize) -> Vec<Capability> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let result = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM capabilities ORDER BY id LIMIT ?1",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![limit], StoredRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(StoredRow::into_capability).collect()
            })
            .await;
        result.unwrap_or_else(|e| {
            log::warn!("SQLite list failed: {}", e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Message;
    use crate::rag::core::testing::{KeywordEmbedder, UnavailableEmbedder};
    use crate::tools::builtin::builtin_capabilities;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> (SqliteCapabilityStore, Arc<KeywordEmbedder>) {
        let embedder = Arc::new(KeywordEmbedder::topics());
        let store = SqliteCapabilityStore::new(dir.path().join("caps.db"), embedder.clone()).unwrap();
        for cap in builtin_capabilities() {
            store.insert(cap).await.unwrap();
        }
        (store, embedder)
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded(&dir).await;
        let original = builtin_capabilities().remove(0);
        let loaded = store.get_by_name("add").await.unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.function_impl(), Some("add"));
        assert_eq!(loaded.llm_description(), original.llm_description());
        assert!(loaded.cached_embedding().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded(&dir).await;
        let dup = builtin_capabilities().remove(1);
        assert!(matches!(store.insert(dup).await, Err(StoreError::Duplicate(name)) if name == "mul"));
    }

    #[tokio::test]
    async fn test_similarity_search() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        let query = embedder.embed("which number is bigger").await.unwrap();
        let hits = store.search_by_similarity(&query, 5, 0.5).await;
        assert_eq!(hits.keys().collect::<Vec<_>>(), vec!["compare"]);
        for (_, cap) in &hits {
            let score = cosine_similarity(&query, cap.cached_embedding().unwrap());
            assert!(score >= 0.5);
        }
    }

    #[tokio::test]
    async fn test_skill_roundtrip_and_list_order() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded(&dir).await;
        let skill = Capability::skill("pdf", "work with pdf documents", serde_json::json!({"license": "MIT"}));
        store.insert(skill.clone()).await.unwrap();

        let loaded = store.get_by_name("pdf").await.unwrap();
        assert!(loaded.is_skill());
        assert_eq!(loaded, skill);

        let names: Vec<String> = store.list(10).await.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["add", "mul", "compare", "count_letter", "pdf"]);
    }

    #[tokio::test]
    async fn test_record_and_usage_count() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        let state = ConversationState::new(Message::user("3 times 4"), &*embedder).await.unwrap();
        let mul = store.get_by_name("mul").await.unwrap();
        store.record(&state, &mul).await.unwrap();
        assert_eq!(store.usage_count("mul").await.unwrap(), 1);
        assert_eq!(store.usage_count("add").await.unwrap(), 0);
        assert!(store.history_lookup(&state, 5, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded(&dir).await;
        let changed = Capability::skill("add", "addition notes", Value::Null);
        store.update(changed).await.unwrap();
        assert!(store.get_by_name("add").await.unwrap().is_skill());

        let ghost = Capability::skill("ghost", "", Value::Null);
        assert!(matches!(store.update(ghost).await, Err(StoreError::NotFound(_))));

        assert!(store.delete("add").await.unwrap());
        assert!(store.get_by_name("add").await.is_none());
        assert!(!store.delete("add").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_fails_when_embedding_unavailable() {
        let dir = TempDir::new().unwrap();
        let store =
            SqliteCapabilityStore::new(dir.path().join("caps.db"), Arc::new(UnavailableEmbedder)).unwrap();
        let result = store.insert(builtin_capabilities().remove(0)).await;
        assert!(matches!(result, Err(StoreError::Embedding(_))));
        assert!(store.list(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_reads_degrade_when_database_is_gone() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        drop(dir);
        let query = embedder.embed("compare").await.unwrap();
        assert!(store.get_by_name("add").await.is_none());
        assert!(store.search_by_similarity(&query, 5, 0.0).await.is_empty());
    }
}
