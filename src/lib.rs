pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;

use std::sync::Arc;

use services::audit::AuditLog;
use services::guard::OrderGuard;
use services::notifier::Notifier;
use services::orchestrator::OrderService;

// Shared state for the whole application.
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::SeatCache,
    pub config: config::Config,
    pub notifier: Arc<Notifier>,
    pub orders: OrderService,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Arc<Self>, anyhow::Error> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        let cache = cache::SeatCache::new(redis.clone(), db.clone());
        let notifier = Arc::new(Notifier::new());
        let guard = OrderGuard::new(&config.guard);
        let audit = AuditLog::new(db.pool.clone());
        let orders = OrderService::new(
            db.clone(),
            guard,
            Arc::clone(&notifier),
            audit,
            cache.clone(),
        );

        Ok(Arc::new(Self {
            db,
            redis,
            cache,
            config,
            notifier,
            orders,
        }))
    }
}
