use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use notification_hub::{
    handlers::{register_delivery, register_websocket},
    metrics, AppState, Config, InMemoryNotificationStore, NotificationStore, PgNotificationStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=debug".into());

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn NotificationStore>> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("DATABASE_URL not set, notifications are kept in memory only");
        return Ok(Arc::new(InMemoryNotificationStore::new()));
    };

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        config.database.max_connections
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    Ok(Arc::new(PgNotificationStore::new(db_pool)))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting notification hub");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded for environment: {}", config.app.env);

    let store = build_store(&config).await?;
    let state = AppState::new(store, &config.delivery, config.websocket.clone());
    info!(
        "Dispatcher ready (push timeout {:?}, session buffer {})",
        config.delivery.push_timeout(),
        config.delivery.session_buffer_capacity
    );

    let addr = format!("0.0.0.0:{}", config.app.port);
    info!("Starting HTTP server on {}", addr);

    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route("/", web::get().to(|| async { "Notification Hub v1.0" }))
            .configure(|cfg| {
                register_delivery(cfg);
                register_websocket(cfg);
            })
    })
    .bind(&addr)
    .with_context(|| format!("Failed to bind {}", addr))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, rejecting new sessions and deliveries");
        // Close the registry before draining so in-flight requests see it
        registry.shutdown().await;
        server_handle.stop(true).await;
    });

    server.await.context("HTTP server error")?;
    info!("Notification hub stopped");

    Ok(())
}
