use std::path::PathBuf;

use clap::Parser;

use autumndb::{config, server};

/// AutumnDB - a JSON-Schema graph database on PostgreSQL
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// HTTP server host address
    #[arg(long, default_value = "0.0.0.0")]
    http_host: String,

    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// PostgreSQL connection URL
    #[arg(long, default_value = "postgres://postgres@localhost/autumndb")]
    database_url: String,

    /// Per-session statement timeout in milliseconds (0 disables)
    #[arg(long, default_value_t = 30_000)]
    statement_timeout_ms: u64,

    /// Skip table/index/trigger creation on startup
    #[arg(long)]
    skip_setup: bool,

    /// Run server in daemon mode (background process)
    #[arg(long)]
    daemon: bool,

    /// Load configuration from a YAML file instead of CLI flags
    #[arg(long)]
    config: Option<PathBuf>,
}

impl From<Cli> for config::CliConfig {
    fn from(cli: Cli) -> Self {
        config::CliConfig {
            http_host: cli.http_host,
            http_port: cli.http_port,
            database_url: cli.database_url,
            statement_timeout_ms: cli.statement_timeout_ms,
            setup_on_start: !cli.skip_setup,
            daemon: cli.daemon,
        }
    }
}

#[tokio::main]
async fn main() {
    // Defaults to INFO level, can be overridden with RUST_LOG
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    println!("\nAutumnDB v{}\n", env!("CARGO_PKG_VERSION"));

    let config = if let Some(path) = &cli.config {
        config::ServerConfig::from_yaml_file(path)
    } else {
        config::ServerConfig::from_cli(cli.into())
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    server::run_with_config(config).await;
}
