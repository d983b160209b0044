use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use referral_network::{
    repositories::{self, Repositories},
    services,
    settings::{Settings, StorageBackend},
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Overrides `server.listen`.
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    log::info!("Starting referral network service.");

    let mut settings = Settings::new(&args.config)?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }

    let repositories = match settings.storage.backend {
        StorageBackend::Postgres => {
            let conn = PgPoolOptions::new()
                .max_connections(settings.postgres.max_connections)
                .connect(&settings.postgres.url)
                .await?;

            repositories::run_migrations(&conn).await?;
            log::info!("Connected to Postgres, migrations applied.");
            Repositories::postgres(conn)
        }
        StorageBackend::Memory => {
            log::warn!("Using the in-memory store, data is lost on restart.");
            Repositories::memory()
        }
    };

    services::start_services(repositories, settings).await
}

fn init_logging(path: &str) -> Result<()> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
