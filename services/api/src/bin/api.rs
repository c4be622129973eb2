//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        openai_llm::{DEEPSEEK_API_BASE, PERPLEXITY_API_BASE},
        AnthropicAdapter, DbAdapter, MemoryAdapter, OpenAiCompatibleAdapter, StripeAdapter,
    },
    config::{Config, ConfigError},
    error::ApiError,
    web::{self, rest::ApiDoc, state::AppState},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use profiler_core::{
    accounting::TokenAccountant,
    analysis::AnalyzerRegistry,
    domain::Provider,
    payments::PaymentBridge,
    ports::DatabaseService,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; using the non-persistent in-memory store");
            Arc::new(MemoryAdapter::new())
        }
    };

    // --- 3. Register the Language Model Providers ---
    let http = reqwest::Client::new();
    let mut analyzers = AnalyzerRegistry::new();
    if let Some(key) = &config.openai_api_key {
        analyzers.register_model(
            Arc::new(OpenAiCompatibleAdapter::with_api_key(
                Provider::OpenAi,
                key,
                None,
                config.openai_model.clone(),
            )),
            false,
        );
    }
    if let Some(key) = &config.anthropic_api_key {
        analyzers.register_model(
            Arc::new(AnthropicAdapter::new(
                http.clone(),
                key.clone(),
                config.anthropic_model.clone(),
            )),
            false,
        );
    }
    if let Some(key) = &config.deepseek_api_key {
        // DeepSeek is the only provider allowed to degrade to the heuristic.
        analyzers.register_model(
            Arc::new(OpenAiCompatibleAdapter::with_api_key(
                Provider::DeepSeek,
                key,
                Some(DEEPSEEK_API_BASE),
                config.deepseek_model.clone(),
            )),
            true,
        );
    }
    if let Some(key) = &config.perplexity_api_key {
        analyzers.register_model(
            Arc::new(OpenAiCompatibleAdapter::with_api_key(
                Provider::Perplexity,
                key,
                Some(PERPLEXITY_API_BASE),
                config.perplexity_model.clone(),
            )),
            false,
        );
    }
    info!("Available providers: {:?}", analyzers.providers());

    // --- 4. Payment Processor (optional) ---
    let payments = match (&config.stripe_secret_key, &config.stripe_webhook_secret) {
        (Some(secret_key), Some(webhook_secret)) => {
            let processor = Arc::new(StripeAdapter::new(
                http.clone(),
                secret_key.clone(),
                webhook_secret.clone(),
            ));
            Some(PaymentBridge::new(
                db.clone(),
                processor,
                TokenAccountant::new(db.clone()),
            ))
        }
        _ => {
            warn!("STRIPE_SECRET_KEY is not set; token purchases are disabled");
            None
        }
    };

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(db, config.clone(), analyzers, payments));

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let app = Router::new()
        .merge(web::router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
