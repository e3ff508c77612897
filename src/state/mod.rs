use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;

use crate::config::CacheConfig;

#[derive(Clone)]
pub struct AppState {
    // Arc rather than the connection's own Clone: every sea-orm backend
    // variant stays shareable, including the non-Clone test backends.
    pub database: Arc<DatabaseConnection>,
    pub cache: Arc<ApiCache>,
    pub admin_token: Arc<str>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(database: DatabaseConnection, cache: Arc<ApiCache>, admin_token: &str) -> Self {
        assert!(
            cache.assignment_capacity >= 100,
            "Assignment cache capacity must be configured"
        );
        assert!(!admin_token.is_empty(), "Admin token must be configured");
        Self {
            database: Arc::new(database),
            cache,
            admin_token: Arc::from(admin_token),
            start_time: Instant::now(),
        }
    }
}

/// Read-through cache over the user registry. Safe because a registry entry
/// is immutable once written: a cached user -> address binding can never go
/// stale, only expire.
pub struct ApiCache {
    pub assignments: Cache<String, Arc<str>>,
    pub assignment_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.assignments_max_capacity >= 100,
            "Assignment cache capacity threshold"
        );

        let assignments = Cache::builder()
            .max_capacity(config.assignments_max_capacity)
            .time_to_live(Duration::from_secs(config.assignments_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.assignments_ttl_seconds / 2 + 1))
            .build();

        Self {
            assignments,
            assignment_capacity: config.assignments_max_capacity,
        }
    }
}
