// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub business: BusinessConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
    pub client_shutdown: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: i64,
    pub lockout_duration_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Knobs of the bookkeeping side: document numbering and background scans.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BusinessConfig {
    pub sequence_width: usize,
    pub low_stock_scan_minutes: u64,
    pub audit_retention_days: i64,
}

// Dummy defaults for tests (no ENV read here)
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 24,
            bcrypt_cost: 10,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
            client_shutdown: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "backoffice.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            sequence_width: 6,
            low_stock_scan_minutes: 60,
            audit_retention_days: 180,
        }
    }
}

pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = match env::var("CONFIG_FILE") {
        Ok(config_file) => load_config_file(Path::new(&config_file))?,
        Err(_) => Config::default(),
    };

    override_with_env(&mut config);

    // Tokens signed with an ephemeral secret do not survive a restart.
    if config.auth.jwt_secret == AuthConfig::default().jwt_secret {
        if config.is_production() {
            anyhow::bail!("JWT_SECRET must be set in production");
        }
        log::warn!("JWT_SECRET not set, using a generated secret for this run");
        config.auth.jwt_secret = generate_jwt_secret();
    }

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn override_with_env(config: &mut Config) {
    if let Ok(host) = env::var("ERP_HOST") {
        config.server.host = host;
    }
    if let Some(port) = env_parse::<u16>("ERP_PORT") {
        config.server.port = port;
    }
    if let Some(workers) = env_parse::<usize>("ERP_WORKERS") {
        config.server.workers = Some(workers);
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = env_parse::<i64>("AUTH_TOKEN_EXPIRATION_HOURS") {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = env_parse::<u32>("AUTH_BCRYPT_COST") {
        config.auth.bcrypt_cost = cost;
    }
    if let Some(max) = env_parse::<i64>("AUTH_MAX_LOGIN_ATTEMPTS") {
        config.auth.max_login_attempts = max;
    }
    if let Some(minutes) = env_parse::<i64>("AUTH_LOCKOUT_DURATION_MINUTES") {
        config.auth.lockout_duration_minutes = minutes;
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = env_parse::<u32>("DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections = max_conn;
    }
    if let Some(min_conn) = env_parse::<u32>("DATABASE_MIN_CONNECTIONS") {
        config.database.min_connections = min_conn;
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(width) = env_parse::<usize>("ERP_SEQUENCE_WIDTH") {
        config.business.sequence_width = width;
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if !(3..=12).contains(&self.business.sequence_width) {
            return Err(anyhow::anyhow!(
                "sequence_width must be between 3 and 12 (current: {})",
                self.business.sequence_width
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("ERP_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("Back-office starting up");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}", self.database.url);
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Logging: {} level", self.logging.level);

        if !self.is_production() {
            log::warn!("Running in development mode");
        }

        if self.security.require_https {
            log::info!("HTTPS enforcement enabled");
        } else if self.is_production() {
            log::warn!("HTTPS not required in production mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
