//! Connexions à la base PostGIS de l'ANDF
//!
//! Les paramètres viennent des variables `PG*` (chargées depuis `.env` par le
//! binaire), puis des options de la ligne de commande.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DBNAME: &str = "andf";
const DEFAULT_USER: &str = "postgres";
const DEFAULT_POOL_SIZE: usize = 8;

const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const CREATE_TIMEOUT: Duration = Duration::from_secs(10);
const RECYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Chiffrement de la connexion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    #[default]
    Disable,
    /// TLS si possible; le pool est alors créé avec le connecteur rustls
    Prefer,
    Require,
}

impl SslMode {
    pub fn uses_tls(self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => SslMode::Disable,
            "prefer" => SslMode::Prefer,
            "require" | "on" | "true" | "yes" => SslMode::Require,
            other => {
                return Err(format!(
                    "Unknown SSL mode '{}' (expected disable, prefer or require)",
                    other
                ))
            }
        };
        Ok(mode)
    }
}

/// Paramètres de connexion
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            dbname: DEFAULT_DBNAME.into(),
            user: DEFAULT_USER.into(),
            password: None,
            pool_size: DEFAULT_POOL_SIZE,
            ssl_mode: SslMode::Disable,
        }
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl DatabaseConfig {
    /// `PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER`, `PGPASSWORD`, `PGSSLMODE`
    /// et `POOL_SIZE`; une variable absente ou illisible garde le défaut
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_parsed("PGHOST").unwrap_or(defaults.host),
            port: env_parsed("PGPORT").unwrap_or(defaults.port),
            dbname: env_parsed("PGDATABASE").unwrap_or(defaults.dbname),
            user: env_parsed("PGUSER").unwrap_or(defaults.user),
            password: std::env::var("PGPASSWORD").ok(),
            pool_size: env_parsed("POOL_SIZE").unwrap_or(defaults.pool_size),
            ssl_mode: env_parsed("PGSSLMODE").unwrap_or(defaults.ssl_mode),
        }
    }

    /// Les options données en ligne de commande priment sur l'environnement
    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        database: Option<String>,
        user: Option<String>,
        password: Option<String>,
        port: Option<u16>,
        ssl: Option<String>,
    ) {
        self.host = host.unwrap_or(std::mem::take(&mut self.host));
        self.dbname = database.unwrap_or(std::mem::take(&mut self.dbname));
        self.user = user.unwrap_or(std::mem::take(&mut self.user));
        self.password = password.or(self.password.take());
        self.port = port.unwrap_or(self.port);
        if let Some(mode) = ssl.and_then(|s| s.parse().ok()) {
            self.ssl_mode = mode;
        }
    }

    fn deadpool_config(&self) -> Config {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = self.password.clone();
        cfg.pool = Some(PoolConfig {
            max_size: self.pool_size,
            timeouts: Timeouts {
                wait: Some(WAIT_TIMEOUT),
                create: Some(CREATE_TIMEOUT),
                recycle: Some(RECYCLE_TIMEOUT),
            },
            ..Default::default()
        });
        cfg
    }
}

fn rustls_connector() -> MakeRustlsConnect {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    MakeRustlsConnect::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Pool partagé par les couches PostGIS, la persistance et l'import
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    info!(
        host = %config.host,
        port = config.port,
        dbname = %config.dbname,
        pool_size = config.pool_size,
        tls = config.ssl_mode.uses_tls(),
        "Creating database pool"
    );

    let cfg = config.deadpool_config();
    if config.ssl_mode.uses_tls() {
        cfg.create_pool(Some(Runtime::Tokio1), rustls_connector())
            .context("Failed to create TLS database pool")
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create database pool")
    }
}

/// Vérifie qu'une connexion s'ouvre et que le serveur répond
pub async fn test_connection(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;
    let row = client
        .query_one("SELECT version() AS version", &[])
        .await
        .context("Connection test failed")?;
    let version: String = row.try_get("version")?;
    debug!(server = %version, "Database reachable");
    Ok(())
}
