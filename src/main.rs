use std::process;
use std::sync::Arc;

use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt::{writer::BoxMakeWriter, Layer}, layer::SubscriberExt, EnvFilter, Registry};

use config::Config;
use db::{auth::PgAuthRepository, report::PgReportRepository, tx::PgTransactionRepository};
use receipt::{HttpReceiptScanner, ReceiptScanner};
use routes::{
    analytics::AnalyticsService, auth::AuthService, report::ReportService, tx::TransactionService, Services,
};

mod config;
mod db;
mod error;
mod receipt;
mod routes;
mod validation;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // json lines into the log file, plain text on stdout
    let file_layer = Layer::new().json().with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .with(stdout_layer);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set global subscriber: {err}");
        process::exit(1);
    }

    let database_pool = match process_database(&config.database_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => {
            tracing::info!("Listening on port: {}", config.port);
            listener
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let router = match process_begin(database_pool, &config) {
        Ok(router) => {
            tracing::info!("Routes constructed successfully under {}", config.base_path);
            router
        }
        Err(err) => {
            tracing::error!("Failed to construct routes: {}", err);
            process::exit(1);
        }
    };

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

fn process_begin(db_pool: PgPool, config: &Config) -> Result<Router, String> {
    let users = Arc::new(PgAuthRepository::new(db_pool.clone()));
    let reports = Arc::new(PgReportRepository::new(db_pool.clone()));
    let transactions = Arc::new(PgTransactionRepository::new(db_pool));

    let scanner: Option<Arc<dyn ReceiptScanner>> = match &config.receipt_scanner_url {
        Some(url) => Some(Arc::new(HttpReceiptScanner::new(
            url.clone(),
            config.receipt_scanner_api_key.clone(),
        ))),
        None => {
            tracing::warn!("RECEIPT_SCANNER_URL not set, receipt scanning is disabled");
            None
        }
    };

    let services = Services {
        auth: Arc::new(AuthService::new(
            users,
            reports.clone(),
            config.jwt_secret.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )),
        transactions: Arc::new(TransactionService::new(transactions.clone())),
        reports: Arc::new(ReportService::new(reports)),
        analytics: Arc::new(AnalyticsService::new(transactions)),
        scanner,
    };

    routes::api_router(services, &config.base_path, config.frontend_origin.as_deref())
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|err| format!("Failed to run migrations: {}", err))?;
    tracing::info!("Migrations run successfully");

    Ok(db_pool)
}
