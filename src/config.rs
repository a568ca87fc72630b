//! Process configuration read from `ANTWORT_*` environment variables.

use crate::store::EvictionPolicy;
use crate::web::responses::constants::{
    DEFAULT_EVENT_CHANNEL_BUFFER, DEFAULT_MAX_INPUT_ITEMS, DEFAULT_MAX_TOOLS,
};
use crate::web::responses::EngineConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 120;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} is required when ANTWORT_BACKEND=openai")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Mock,
    /// Any server speaking the chat completions protocol.
    OpenAi {
        base_url: String,
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub backend: BackendKind,
    pub backend_timeout: Duration,
    pub default_model: Option<String>,
    pub store_policy: EvictionPolicy,
    pub stream_buffer: usize,
    pub max_input_items: usize,
    pub max_tools: usize,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend = match var("ANTWORT_BACKEND").as_deref() {
            None | Some("mock") => BackendKind::Mock,
            Some("openai") => BackendKind::OpenAi {
                base_url: var("ANTWORT_BACKEND_URL")
                    .ok_or(ConfigError::Missing("ANTWORT_BACKEND_URL"))?,
                api_key: var("ANTWORT_BACKEND_API_KEY"),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "ANTWORT_BACKEND",
                    value: other.to_string(),
                    reason: "expected mock or openai".to_string(),
                })
            }
        };

        let stream_buffer: usize = parse_or(
            "ANTWORT_STREAM_BUFFER",
            var("ANTWORT_STREAM_BUFFER"),
            DEFAULT_EVENT_CHANNEL_BUFFER,
        )?;
        if stream_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "ANTWORT_STREAM_BUFFER",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            listen_addr: parse_or(
                "ANTWORT_LISTEN_ADDR",
                var("ANTWORT_LISTEN_ADDR"),
                parse_default(DEFAULT_LISTEN_ADDR)?,
            )?,
            backend,
            backend_timeout: Duration::from_secs(parse_or(
                "ANTWORT_BACKEND_TIMEOUT_SECS",
                var("ANTWORT_BACKEND_TIMEOUT_SECS"),
                DEFAULT_BACKEND_TIMEOUT_SECS,
            )?),
            default_model: var("ANTWORT_DEFAULT_MODEL"),
            store_policy: EvictionPolicy::from_max_entries(parse_or(
                "ANTWORT_STORE_MAX_ENTRIES",
                var("ANTWORT_STORE_MAX_ENTRIES"),
                0,
            )?),
            stream_buffer,
            max_input_items: parse_or(
                "ANTWORT_MAX_INPUT_ITEMS",
                var("ANTWORT_MAX_INPUT_ITEMS"),
                DEFAULT_MAX_INPUT_ITEMS,
            )?,
            max_tools: parse_or(
                "ANTWORT_MAX_TOOLS",
                var("ANTWORT_MAX_TOOLS"),
                DEFAULT_MAX_TOOLS,
            )?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_input_items: self.max_input_items,
            max_tools: self.max_tools,
            event_buffer: self.stream_buffer,
            default_model: self.default_model.clone(),
            ..EngineConfig::default()
        }
    }
}

fn parse_or<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

fn parse_default(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
        name: "ANTWORT_LISTEN_ADDR",
        value: addr.to_string(),
        reason: e.to_string(),
    })
}
