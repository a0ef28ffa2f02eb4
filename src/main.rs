use aq_etl::config::{Config, SinkKind};
use aq_etl::db::{BatchSink, Repository, RestSink};
use aq_etl::pipeline::Pipeline;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aq_etl=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Air quality ETL pipeline starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("AQ_CONFIG").ok())
        .unwrap_or_else(|| "config/config.yaml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. The config file exists (default: config/config.yaml)\n\
             2. All required environment variables are set (check .env.example)\n\
             3. Create a .env file if needed",
            config_path,
            e
        )
    })?;
    info!(
        "Configuration loaded: {} locations, sink {:?} table {}",
        config.locations.len(),
        config.sink.kind,
        config.sink.table
    );

    let sink = build_sink(&config).await?;
    let pipeline = Pipeline::new(config, sink)?;

    tokio::select! {
        result = pipeline.run() => {
            match result {
                Ok(summary) => {
                    info!(
                        "PIPELINE FINISHED SUCCESSFULLY in {:.2} seconds",
                        summary.elapsed.as_secs_f64()
                    );
                    Ok(())
                }
                Err(e) => {
                    error!("Pipeline halted: {}", e);
                    Err(e.into())
                }
            }
        }
        _ = shutdown_signal() => {
            Err(anyhow::anyhow!("Pipeline aborted by signal"))
        }
    }
}

async fn build_sink(config: &Config) -> anyhow::Result<Arc<dyn BatchSink>> {
    match config.sink.kind {
        SinkKind::Postgres => {
            let database = config
                .sink
                .database
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("sink.database is not configured"))?;

            let pool = PgPoolOptions::new()
                .max_connections(database.max_connections)
                .connect(&database.connection_string())
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to connect to database: {}\n\n\
                         Host: {}:{}\n\
                         Database: {}\n\
                         User: {}\n\n\
                         Common fixes:\n\
                         1. Ensure PostgreSQL is running\n\
                         2. Check username/password are correct (DB_USER, DB_PASSWORD)\n\
                         3. Verify the {} table exists",
                        e,
                        database.host,
                        database.port,
                        database.name,
                        database.user,
                        config.sink.table
                    )
                })?;

            info!(
                "Connected to database: {}@{}:{}/{}",
                database.user, database.host, database.port, database.name
            );
            Ok(Arc::new(Repository::new(pool, &config.sink.table)))
        }
        SinkKind::Rest => {
            let rest = config
                .sink
                .rest
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("sink.rest is not configured"))?;
            Ok(Arc::new(RestSink::new(rest, &config.sink.table)?))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, aborting run");
        }
        _ = terminate => {
            info!("Received SIGTERM, aborting run");
        }
    }
}
