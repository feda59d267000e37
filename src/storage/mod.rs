//! Capability storage backends.
//!
//! - [`interface`] - The [`CapabilityStore`] trait and shared ranking helpers
//! - [`memory_storage`] - In-process store
//! - [`fs_storage`] - Skill folders with a JSON embedding cache
//! - [`sqlite_storage`] - SQLite store
//! - [`pg_storage`] - PostgreSQL + pgvector store (feature `postgres`)

pub mod fs_storage;
pub mod interface;
pub mod memory_storage;
pub mod pg_storage;
pub mod sqlite_storage;

use std::sync::Arc;

use crate::rag::core::EmbeddingProvider;
use crate::utilities::config::{StoreBackend, StoreConfig};
use crate::utilities::errors::{SclError, StoreError};

pub use fs_storage::FsCapabilityStore;
pub use interface::{rank_by_similarity, CapabilityStore};
pub use memory_storage::InMemoryCapabilityStore;
#[cfg(feature = "postgres")]
pub use pg_storage::PgCapabilityStore;
pub use sqlite_storage::SqliteCapabilityStore;

/// Construct the store selected by `config`.
///
/// `dimensions` is the embedding size, needed by stores with a fixed-width
/// vector column.
pub async fn build_store(
    config: &StoreConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
) -> Result<Arc<dyn CapabilityStore>, SclError> {
    let unavailable = |e: StoreError| SclError::StoreUnavailable(e.to_string());
    log::info!("Opening {:?} capability store", config.backend);
    let store: Arc<dyn CapabilityStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryCapabilityStore::new(embedder)),
        StoreBackend::Sqlite => {
            Arc::new(SqliteCapabilityStore::new(&config.sqlite_path, embedder).map_err(unavailable)?)
        }
        StoreBackend::Fs => {
            let init = !config.skills_dir.join(fs_storage::CACHE_FILE).exists();
            Arc::new(
                FsCapabilityStore::open(&config.skills_dir, embedder, init)
                    .await
                    .map_err(unavailable)?,
            )
        }
        StoreBackend::Postgres => postgres_store(config, embedder, dimensions).await?,
    };
    Ok(store)
}

#[cfg(feature = "postgres")]
async fn postgres_store(
    config: &StoreConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
) -> Result<Arc<dyn CapabilityStore>, SclError> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| SclError::Config("DATABASE_URL is required for the postgres store".to_string()))?;
    let store = PgCapabilityStore::connect(url, embedder, dimensions)
        .await
        .map_err(|e| SclError::StoreUnavailable(e.to_string()))?;
    store
        .migrate()
        .await
        .map_err(|e| SclError::StoreUnavailable(e.to_string()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_store(
    _config: &StoreConfig,
    _embedder: Arc<dyn EmbeddingProvider>,
    _dimensions: usize,
) -> Result<Arc<dyn CapabilityStore>, SclError> {
    Err(SclError::Config(
        "the postgres store requires building with the `postgres` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::core::testing::KeywordEmbedder;
    use tempfile::TempDir;

    fn config(backend: StoreBackend, dir: &TempDir) -> StoreConfig {
        StoreConfig {
            backend,
            sqlite_path: dir.path().join("scl.db"),
            skills_dir: dir.path().join("skills"),
            database_url: None,
        }
    }

    #[tokio::test]
    async fn test_build_each_local_backend() {
        let dir = TempDir::new().unwrap();
        for (backend, name) in [
            (StoreBackend::Memory, "memory"),
            (StoreBackend::Sqlite, "sqlite"),
            (StoreBackend::Fs, "fs"),
        ] {
            let store = build_store(&config(backend, &dir), Arc::new(KeywordEmbedder::topics()), 6)
                .await
                .unwrap();
            assert_eq!(store.backend(), name);
        }
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_postgres_requires_feature() {
        let dir = TempDir::new().unwrap();
        let result =
            build_store(&config(StoreBackend::Postgres, &dir), Arc::new(KeywordEmbedder::topics()), 6).await;
        assert!(matches!(result, Err(SclError::Config(_))));
    }
}
