use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (message broker transport)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Base URL of the backend API that owns users, benefits and notifications
    pub backend_api_url: String,

    /// Bearer key sent to the backend API's internal endpoints
    pub backend_api_key: Option<String>,

    /// Hex-encoded 32-byte key used to decrypt stored user credentials
    pub encryption_key_hex: Option<String>,

    /// Refresh rate applied to feeds of users without supporter benefits
    pub default_refresh_rate_seconds: u32,

    /// Daily article limit applied to feeds of users without supporter benefits
    pub default_max_daily_articles: u32,

    /// Additional refresh rates (user-selectable slower rates) to always schedule
    pub extra_refresh_rates_seconds: Vec<u32>,

    /// Minutes between maintenance passes of the scheduler
    pub maintenance_interval_minutes: u64,

    /// Timeout applied to backend API requests
    pub http_timeout_seconds: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let refresh_rate_minutes: u32 = lookup("DEFAULT_REFRESH_RATE_MINUTES")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("DEFAULT_REFRESH_RATE_MINUTES must be a valid u32"))?;

        if refresh_rate_minutes == 0 {
            anyhow::bail!("DEFAULT_REFRESH_RATE_MINUTES must be greater than zero");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            backend_api_url: lookup("BACKEND_API_URL").ok_or_else(|| {
                anyhow::anyhow!("BACKEND_API_URL environment variable is required")
            })?,
            backend_api_key: lookup("BACKEND_API_KEY"),
            encryption_key_hex: lookup("ENCRYPTION_KEY_HEX"),
            default_refresh_rate_seconds: refresh_rate_minutes * 60,
            default_max_daily_articles: lookup("DEFAULT_MAX_DAILY_ARTICLES")
                .unwrap_or_else(|| "50".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_MAX_DAILY_ARTICLES must be a valid u32"))?,
            extra_refresh_rates_seconds: parse_rate_list(
                &lookup("SCHEDULER_EXTRA_REFRESH_RATES_SECONDS").unwrap_or_default(),
            )?,
            maintenance_interval_minutes: lookup("MAINTENANCE_INTERVAL_MINUTES")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAINTENANCE_INTERVAL_MINUTES must be a valid u64"))?,
            http_timeout_seconds: lookup("HTTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECONDS must be a valid u64"))?,
        })
    }
}

/// Parse a comma separated list of refresh rates in seconds. Blank entries are ignored.
fn parse_rate_list(raw: &str) -> anyhow::Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(anyhow::anyhow!(
                "SCHEDULER_EXTRA_REFRESH_RATES_SECONDS contains an invalid rate: {s}"
            )),
            Ok(rate) => Ok(rate),
        })
        .collect()
}
