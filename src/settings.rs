use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub listen: String,
    pub static_dir: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    pub backend: StorageBackend,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Auth {
    pub api_secret_key: Option<String>,
    pub api_readonly_key: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RateLimit {
    pub api_max_requests: u32,
    pub api_window_secs: u64,
    pub web_max_requests: u32,
    pub web_window_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tree {
    pub max_depth: usize,
    pub activity_window_days: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub storage: Storage,
    pub postgres: Postgres,
    pub auth: Auth,
    pub rate_limit: RateLimit,
    pub tree: Tree,
}

impl Settings {
    /// Reads `path` (if present) and then `REFERRAL__SECTION__KEY`
    /// environment variables on top of it.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("REFERRAL")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.allowed_ips")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        config.try_deserialize()
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("server.listen", "0.0.0.0:3000")?
        .set_default("server.static_dir", "public")?
        .set_default("storage.backend", "postgres")?
        .set_default("postgres.url", "postgres://localhost:5432/referrals")?
        .set_default("postgres.max_connections", 5)?
        .set_default("auth.allowed_ips", Vec::<String>::new())?
        .set_default("rate_limit.api_max_requests", 50)?
        .set_default("rate_limit.api_window_secs", 15 * 60)?
        .set_default("rate_limit.web_max_requests", 200)?
        .set_default("rate_limit.web_window_secs", 15 * 60)?
        .set_default("tree.max_depth", 4)?
        .set_default("tree.activity_window_days", 7)
}
