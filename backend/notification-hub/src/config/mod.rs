use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub delivery: DeliveryConfig,
    pub websocket: WebSocketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Unset runs with the in-memory store
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub push_timeout_ms: u64,
    pub session_buffer_capacity: usize,
    pub session_tombstone_capacity: usize,
}

impl DeliveryConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    /// Unread records replayed when a session connects
    pub unread_backlog_limit: usize,
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            client_timeout_secs: 30,
            unread_backlog_limit: 50,
        }
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| AppError::Config(format!("{} must be valid ({}): {}", name, raw, e)))
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Config {
            app: AppConfig {
                env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: parse_var("APP_PORT", "8000")?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", "10")?,
            },
            delivery: DeliveryConfig {
                push_timeout_ms: parse_var("PUSH_TIMEOUT_MS", "250")?,
                session_buffer_capacity: parse_var("SESSION_BUFFER_CAPACITY", "64")?,
                session_tombstone_capacity: parse_var("SESSION_TOMBSTONE_CAPACITY", "10000")?,
            },
            websocket: WebSocketConfig {
                heartbeat_interval_secs: parse_var("HEARTBEAT_INTERVAL_SECS", "5")?,
                client_timeout_secs: parse_var("CLIENT_TIMEOUT_SECS", "30")?,
                unread_backlog_limit: parse_var("UNREAD_BACKLOG_LIMIT", "50")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.delivery.push_timeout_ms == 0 {
            return Err(AppError::Config(
                "PUSH_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        // actix run_interval panics on a zero period
        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(AppError::Config(
                "HEARTBEAT_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.websocket.client_timeout_secs <= self.websocket.heartbeat_interval_secs {
            return Err(AppError::Config(
                "CLIENT_TIMEOUT_SECS must exceed HEARTBEAT_INTERVAL_SECS".to_string(),
            ));
        }
        Ok(())
    }
}
