//! scl HTTP server binary.
//!
//! Builds the embedding provider, completion provider and capability store
//! from the environment, seeds the built-in function capabilities and
//! serves the conversation loop over HTTP.
//!
//! # Environment Variables
//!
//! - `PORT` - HTTP port (default: 8080)
//! - `MODEL`, `API_KEY`, `BASE_URL` - Chat completion endpoint
//! - `EMBEDDING_MODEL`, `EMBEDDING_MODEL_DIMS`, `EMBEDDING_API_KEY`, `EMBEDDING_BASE_URL`
//! - `LIMIT`, `MIN_SIMILARITY` - Retrieval bounds
//! - `SCL_STORE` - "memory" (default), "sqlite", "fs" or "postgres"
//! - `SCL_SQLITE_PATH`, `SCL_SKILLS_DIR`, `DATABASE_URL` - Backend locations
//! - `RUST_LOG` - Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! # or with postgres:
//! SCL_STORE=postgres cargo run --bin server --features postgres
//! ```

use anyhow::Context;
use scl::capabilities::CapabilityRegistry;
use scl::chat::ConversationLoop;
use scl::llms::build_completion;
use scl::rag::embeddings::build_embedder;
use scl::server::{app_router, AppState};
use scl::storage::build_store;
use scl::tools::{builtin_capabilities, builtin_function_table};
use scl::utilities::config::SclConfig;
use scl::utilities::errors::StoreError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scl=debug".into()),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let config = SclConfig::from_env().context("invalid configuration")?;

    let embedder = build_embedder(&config.embedding, config.timeouts.embedding())?;
    let llm = build_completion(&config.completion, config.timeouts.completion())?;
    let store = build_store(&config.store, embedder.clone(), config.embedding.dimensions).await?;

    for capability in builtin_capabilities() {
        let name = capability.name().to_string();
        match store.insert(capability).await {
            Ok(()) => tracing::info!("Seeded capability '{}'", name),
            Err(StoreError::Duplicate(_)) => tracing::debug!("Capability '{}' already stored", name),
            Err(StoreError::Unsupported(reason)) => {
                tracing::warn!("Store cannot hold '{}': {}", name, reason)
            }
            Err(e) => return Err(e).with_context(|| format!("failed to seed '{}'", name)),
        }
    }

    let registry = CapabilityRegistry::new(store, builtin_function_table());
    let chat = ConversationLoop::from_config(registry, embedder, llm, &config);
    let app = app_router(AppState::new(chat));

    tracing::info!("scl server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health       - liveness check");
    tracing::info!("  GET  /capabilities - stored capabilities");
    tracing::info!("  GET  /metrics      - registry counters");
    tracing::info!("  POST /chat         - tool-calling turn");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
