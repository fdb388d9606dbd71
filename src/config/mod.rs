use serde::Deserialize;
use std::env;

// Top-level configuration container, assembled once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub guard: GuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Duplicate-order guard tuning. The TTL must outlive a normal
// create-validate-persist round trip but bound worst-case lockout
// when a holder crashes before releasing.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub sweep_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seat_booking=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            guard: GuardConfig {
                ttl_seconds: env::var("GUARD_TTL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("GUARD_TTL_SECONDS must be a valid number"),
                max_entries: env::var("GUARD_MAX_ENTRIES")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .expect("GUARD_MAX_ENTRIES must be a valid number"),
                sweep_interval_seconds: env::var("GUARD_SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("GUARD_SWEEP_INTERVAL_SECONDS must be a valid number"),
            },
        }
    }
}
