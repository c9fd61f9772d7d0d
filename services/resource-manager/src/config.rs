//! Configuration for the resource manager.

use anyhow::Result;
use corral_ledger::LedgerConfig;

use crate::manager::WorkerOpsConfig;

/// Resource manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API listen address.
    pub listen_addr: std::net::SocketAddr,

    /// Ledger totals and per-worker unit costs.
    pub ledger: LedgerConfig,

    /// Worker operation bounds.
    pub worker_ops: WorkerOpsConfig,

    /// Name prefixes that must never be destroyed.
    pub protected_prefixes: Vec<String>,

    /// Expiry sweep interval in seconds.
    pub sweep_interval_secs: u64,

    /// Cluster API URL. Unset means the in-memory mock (for development).
    pub cluster_api_url: Option<String>,

    /// VM provisioning service URL. Unset means the in-memory mock.
    pub provisioner_api_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("CORRAL_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let ledger = LedgerConfig {
            total_cpu: env_parsed("CORRAL_TOTAL_CPU", 16.0),
            total_memory_mb: env_parsed("CORRAL_TOTAL_MEMORY_MB", 32768),
            total_workers: env_parsed("CORRAL_TOTAL_WORKERS", 10),
            worker_cpu: env_parsed("CORRAL_WORKER_CPU", 1.0),
            worker_memory_mb: env_parsed("CORRAL_WORKER_MEMORY_MB", 2048),
            max_workers_per_request: env_parsed("CORRAL_MAX_WORKERS_PER_REQUEST", 100),
        };

        let worker_ops = WorkerOpsConfig {
            drain_grace_period_secs: env_parsed("CORRAL_DRAIN_GRACE_PERIOD_SECS", 300),
            delete_ephemeral_data: env_parsed("CORRAL_DELETE_EPHEMERAL_DATA", true),
            ..WorkerOpsConfig::default()
        };

        let protected_prefixes = std::env::var("CORRAL_PROTECTED_PREFIXES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec!["control-plane-".to_string(), "permanent-".to_string()]
            });

        let sweep_interval_secs = env_parsed("CORRAL_SWEEP_INTERVAL_SECS", 300);

        let cluster_api_url = std::env::var("CORRAL_CLUSTER_API_URL").ok();
        let provisioner_api_url = std::env::var("CORRAL_PROVISIONER_API_URL").ok();

        let log_level = std::env::var("CORRAL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            ledger,
            worker_ops,
            protected_prefixes,
            sweep_interval_secs,
            cluster_api_url,
            provisioner_api_url,
            log_level,
        })
    }
}
