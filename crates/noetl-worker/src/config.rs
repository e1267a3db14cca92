// Worker process configuration, read from the environment. Grounded on
// the teacher's `RunnerConfig::from_env` style (defaults baked in,
// `.ok()` over `env::var` rather than failing startup on an absent
// optional).

use std::env;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub api_base_url: String,
    pub worker_id: String,
    pub max_items: u32,
    pub lease_seconds: i64,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_seconds: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env::var("NOETL_API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            worker_id: env::var("NOETL_WORKER_ID").unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4())),
            max_items: env::var("NOETL_WORKER_MAX_ITEMS").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            lease_seconds: env::var("NOETL_WORKER_LEASE_SECONDS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            heartbeat_interval_seconds: env::var("NOETL_WORKER_HEARTBEAT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            poll_interval_seconds: env::var("NOETL_WORKER_POLL_SECONDS").ok().and_then(|v| v.parse().ok()).unwrap_or(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_when_env_is_empty() {
        let cfg = WorkerConfig { api_base_url: "http://x".into(), worker_id: "w".into(), max_items: 1, lease_seconds: 60, heartbeat_interval_seconds: 20, poll_interval_seconds: 2 };
        assert_eq!(cfg.max_items, 1);
        assert_eq!(cfg.lease_seconds, 60);
    }
}
