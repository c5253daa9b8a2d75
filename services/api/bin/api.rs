//! Main Entrypoint for the FieldVoice API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the conversation store (Postgres, or in-memory without a database).
//! 3. Initializing the agent runtime and the optional profile service.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use fieldvoice_api::{
    config::{Config, Provider},
    db::Db,
    router::create_router,
    state::AppState,
    ws::registry::SessionRegistry,
};
use fieldvoice_core::{
    AgentRuntime, ConversationStore, MemoryConversationStore,
    echo::EchoRuntime,
    profile::{HttpProfileService, ProfileService},
};
use gemini_realtime::{GeminiConfig, GeminiLiveRuntime};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc, time::Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C. Shutdown must be forced.");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts directory {}", prompts_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn ConversationStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let db = Db::new(pool);
            db.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Ok(Arc::new(db))
        }
        None => {
            warn!("DATABASE_URL is not set. Conversations will be kept in memory only.");
            Ok(Arc::new(MemoryConversationStore::new()))
        }
    }
}

fn build_runtime(config: &Config) -> anyhow::Result<Arc<dyn AgentRuntime>> {
    match &config.provider {
        Provider::Gemini => {
            info!("Using Gemini Live runtime.");
            let api_key = config
                .gemini_api_key
                .clone()
                .context("GEMINI_API_KEY must be set for 'gemini' provider")?;
            let prompts = load_prompts(&config.prompts_path)?;
            let system_prompt = prompts
                .get("system_prompt")
                .context("system_prompt.md not found in prompts directory")?
                .clone();
            Ok(Arc::new(GeminiLiveRuntime::new(GeminiConfig::new(
                api_key,
                config.gemini_model.clone(),
                system_prompt,
            ))))
        }
        Provider::Echo => {
            info!("Using echo runtime. Agent replies repeat the client's input.");
            Ok(Arc::new(EchoRuntime::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Conversation Store ---
    let store = open_store(&config).await?;

    // --- 4. Initialize Shared Services ---
    let runtime = build_runtime(&config)?;
    let profiles = config.profile_service_url.as_ref().map(|url| {
        info!(url = %url, "Profile lookups enabled.");
        Arc::new(HttpProfileService::new(
            url.clone(),
            config.profile_service_token.clone(),
        )) as Arc<dyn ProfileService>
    });

    let app_state = Arc::new(AppState {
        store,
        runtime,
        profiles,
        sessions: Arc::new(SessionRegistry::new()),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.gemini_model,
        keepalive_secs = config.keepalive_interval.as_secs(),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
