//! HTTP server shell: connects the backend, installs the schema, starts the
//! notification listener, and serves the query/stream API.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::backend::{Backend, ConnectOptions, Streams};
use crate::config::ServerConfig;

pub mod handlers;
mod models;

use handlers::{
    delete_contract_handler, get_by_slug_handler, get_contract_handler, health_check,
    insert_contract_handler, query_handler, replace_contract_handler, stream_handler,
};

/// Maximum accepted request body; schemas are small.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

pub struct AppState {
    pub backend: Backend,
    pub streams: Arc<Streams>,
    pub config: ServerConfig,
}

pub async fn run() {
    dotenv().ok();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    run_with_config(config).await;
}

pub async fn run_with_config(config: ServerConfig) {
    dotenv().ok();

    log::info!(
        "Server configuration: http={}:{}, setup_on_start={}",
        config.http_host,
        config.http_port,
        config.setup_on_start
    );

    let connect_options = ConnectOptions {
        statement_timeout: (config.statement_timeout_ms > 0)
            .then(|| Duration::from_millis(config.statement_timeout_ms)),
        ..ConnectOptions::default()
    };
    let backend = match Backend::connect(&config.database_url, connect_options).await {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if config.setup_on_start {
        if let Err(e) = backend.setup().await {
            log::error!("Database setup failed: {}", e);
            std::process::exit(1);
        }
    }

    // The notification pump outlives every subscriber and reconnects on its
    // own; one task per process.
    let streams = Streams::new(backend.clone());
    tokio::spawn(streams.clone().run());

    let app_state = Arc::new(AppState {
        backend,
        streams,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/query", post(query_handler))
        .route("/contracts", post(insert_contract_handler))
        .route(
            "/contracts/{id}",
            get(get_contract_handler)
                .put(replace_contract_handler)
                .delete(delete_contract_handler),
        )
        .route("/slug/{slug}", get(get_by_slug_handler))
        .route("/streams", post(stream_handler))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .with_state(app_state);

    let http_bind_address = format!("{}:{}", config.http_host, config.http_port);
    log::info!("Starting HTTP server on {}", http_bind_address);

    let http_listener = match TcpListener::bind(&http_bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!(
                "Failed to bind HTTP listener to {}: {}",
                http_bind_address,
                e
            );
            log::error!("Is another process using port {}?", config.http_port);
            std::process::exit(1);
        }
    };

    let http_server = axum::serve(http_listener, app);

    println!("AutumnDB server is running");
    println!("  HTTP API: http://{}", http_bind_address);

    if config.daemon {
        println!("Running in daemon mode - press Ctrl+C to stop");

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Failed to register SIGTERM handler: {}", e);
                    if let Err(e) = http_server.await {
                        log::error!("HTTP server error: {:?}", e);
                    }
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Failed to register SIGINT handler: {}", e);
                    if let Err(e) = http_server.await {
                        log::error!("HTTP server error: {:?}", e);
                    }
                    return;
                }
            };

            tokio::select! {
                result = http_server => {
                    if let Err(e) = result {
                        log::error!("HTTP server error: {:?}", e);
                    }
                }
                _ = sigterm.recv() => println!("Received SIGTERM, shutting down..."),
                _ = sigint.recv() => println!("Received SIGINT, shutting down..."),
            }
        }

        #[cfg(windows)]
        {
            tokio::select! {
                result = http_server => {
                    if let Err(e) = result {
                        log::error!("HTTP server error: {:?}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("Received shutdown signal, shutting down...");
                }
            }
        }

        println!("Server stopped");
    } else if let Err(e) = http_server.await {
        log::error!("HTTP server fatal error: {:?}", e);
        std::process::exit(1);
    }
}
