//! Server settings read from the environment
//!
//! | Variable                   | Default                              |
//! |----------------------------|--------------------------------------|
//! | `RTM_BIND`                 | `127.0.0.1:8080`                     |
//! | `RTM_DB`                   | `<config dir>/rtm/connections.db`    |
//! | `RTM_CONFIG`               | none (engine defaults)               |
//! | `RTM_REQUEST_TIMEOUT_SECS` | `120`                                |
//! | `RTM_LOG_JSON`             | `false`                              |

use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use rtm_core::{AppConfig, EngineConfig};

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub database: PathBuf,
    /// Upper bound for one matrix generation
    pub request_timeout: Duration,
    pub log_json: bool,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let config_path = env::var("RTM_CONFIG").ok().map(PathBuf::from);
        let app = AppConfig::load_or_default(config_path.as_deref())?;
        let database = match env::var("RTM_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => app.database_path()?,
        };

        Ok(Self {
            bind: env::var("RTM_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            database,
            request_timeout: Duration::from_secs(env_u64(
                "RTM_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            log_json: env_bool("RTM_LOG_JSON", false),
            engine: app.engine,
        })
    }
}
