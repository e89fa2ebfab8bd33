/// Engagement Service - HTTP Server
///
/// Likes, comments and job applications on posts, plus the feed and the
/// employer application inbox.
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use engagement_service::config::{StoreBackend, StoreConfig};
use engagement_service::handlers::{self, AppState};
use engagement_service::store::{AggregateStore, InMemoryStore, PgDocumentStore, TimedStore};
use engagement_service::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        env = %config.app.env,
        backend = %config.store.backend,
        "Starting engagement-service"
    );

    let store = build_store(&config.store).await?;
    store
        .health_check()
        .await
        .context("Aggregate store is not reachable")?;

    let state = AppState::new(store, config.engagement.retry_config());
    let bind_address = format!("{}:{}", config.app.host, config.app.http_port);
    tracing::info!("HTTP server listening on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await
    .context("HTTP server failed")?;

    tracing::info!("engagement-service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,engagement_service=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_store(config: &StoreConfig) -> Result<Arc<dyn AggregateStore>> {
    let inner: Arc<dyn AggregateStore> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
        StoreBackend::Postgres => {
            let db = config
                .database
                .as_ref()
                .context("Postgres backend selected without database settings")?;

            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .min_connections(db.min_connections)
                .connect(&db.url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database pool created successfully");

            let store = PgDocumentStore::new(pool);
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Migrations completed successfully");
            Arc::new(store)
        }
    };

    Ok(Arc::new(TimedStore::new(inner, config.timeout().duration)))
}
