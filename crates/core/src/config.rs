use serde::Serialize;
use std::time::Duration;
use tracing::warn;

pub const ENV_API_URL: &str = "AGENT_API_URL";
pub const ENV_BUS_URL: &str = "BUS_URL";
pub const ENV_TASK_TOPIC: &str = "BUS_TOPIC_TASKS";
pub const ENV_LOG_TOPIC: &str = "BUS_TOPIC_LOGS";
pub const ENV_HEARTBEAT_INTERVAL: &str = "AGENT_HEARTBEAT_INTERVAL_SECS";
pub const ENV_POLL_TIMEOUT: &str = "BUS_POLL_TIMEOUT_MS";
pub const ENV_RETRY_DELAY: &str = "AGENT_RETRY_DELAY_SECS";
pub const ENV_MAX_RETRY_DELAY: &str = "AGENT_MAX_RETRY_DELAY_SECS";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "AGENT_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_HTTP_TIMEOUT: &str = "AGENT_HTTP_TIMEOUT_SECS";
pub const ENV_HEALTH_ADDR: &str = "AGENT_HEALTH_ADDR";

/// Runtime configuration, read from the process environment only.
///
/// Every field has a default. A missing control-plane URL or bus address is not
/// an error: the runtime keeps retrying against whatever endpoint it was given.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub api_url: String,
    pub bus_url: String,
    pub task_topic: String,
    pub log_topic: String,
    pub heartbeat_interval_secs: u64,
    pub poll_timeout_ms: u64,
    /// Base delay between registration / connection attempts.
    pub retry_delay_secs: u64,
    /// Ceiling for the exponential backoff.
    pub max_retry_delay_secs: u64,
    /// How long shutdown waits for background loops before aborting them.
    pub shutdown_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub health_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            bus_url: "nats://localhost:4222".to_string(),
            task_topic: "agent-tasks".to_string(),
            log_topic: "agent-logs".to_string(),
            heartbeat_interval_secs: 30,
            poll_timeout_ms: 1000,
            retry_delay_secs: 5,
            max_retry_delay_secs: 60,
            shutdown_timeout_secs: 10,
            http_timeout_secs: 10,
            health_addr: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();

        if let Some(v) = get(ENV_API_URL) {
            config.api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get(ENV_BUS_URL) {
            config.bus_url = v;
        }
        if let Some(v) = get(ENV_TASK_TOPIC) {
            config.task_topic = v;
        }
        if let Some(v) = get(ENV_LOG_TOPIC) {
            config.log_topic = v;
        }
        if let Some(v) = get(ENV_HEALTH_ADDR) {
            config.health_addr = Some(v);
        }

        let numeric = |key: &str, current: u64| -> u64 {
            match get(key) {
                None => current,
                Some(raw) => match raw.parse::<u64>() {
                    Ok(0) => {
                        warn!(key, value = %raw, "Zero is not allowed here, using default");
                        current
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(key, value = %raw, error = %e, "Invalid number, using default");
                        current
                    }
                },
            }
        };

        config.heartbeat_interval_secs =
            numeric(ENV_HEARTBEAT_INTERVAL, config.heartbeat_interval_secs);
        config.poll_timeout_ms = numeric(ENV_POLL_TIMEOUT, config.poll_timeout_ms);
        config.retry_delay_secs = numeric(ENV_RETRY_DELAY, config.retry_delay_secs);
        config.max_retry_delay_secs = numeric(ENV_MAX_RETRY_DELAY, config.max_retry_delay_secs);
        config.shutdown_timeout_secs = numeric(ENV_SHUTDOWN_TIMEOUT, config.shutdown_timeout_secs);
        config.http_timeout_secs = numeric(ENV_HTTP_TIMEOUT, config.http_timeout_secs);

        if config.max_retry_delay_secs < config.retry_delay_secs {
            warn!(
                base = config.retry_delay_secs,
                ceiling = config.max_retry_delay_secs,
                "Retry ceiling below base delay, raising ceiling to base"
            );
            config.max_retry_delay_secs = config.retry_delay_secs;
        }

        config
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.task_topic, "agent-tasks");
        assert_eq!(config.log_topic, "agent-logs");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert!(config.health_addr.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            (ENV_API_URL, "http://api:8000/"),
            (ENV_BUS_URL, "nats://bus:4222"),
            (ENV_TASK_TOPIC, "tasks"),
            (ENV_HEARTBEAT_INTERVAL, "7"),
            (ENV_POLL_TIMEOUT, "250"),
            (ENV_HEALTH_ADDR, "0.0.0.0:9100"),
        ]));
        assert_eq!(config.api_url, "http://api:8000");
        assert_eq!(config.bus_url, "nats://bus:4222");
        assert_eq!(config.task_topic, "tasks");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(7));
        assert_eq!(config.poll_timeout(), Duration::from_millis(250));
        assert_eq!(config.health_addr.as_deref(), Some("0.0.0.0:9100"));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_HEARTBEAT_INTERVAL, "soon"),
            (ENV_POLL_TIMEOUT, "0"),
            (ENV_API_URL, "   "),
        ]));
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.poll_timeout_ms, 1000);
        assert_eq!(config.api_url, "http://localhost:8080");
    }

    #[test]
    fn test_ceiling_never_below_base() {
        let config = Config::from_lookup(lookup(&[
            (ENV_RETRY_DELAY, "20"),
            (ENV_MAX_RETRY_DELAY, "3"),
        ]));
        assert_eq!(config.max_retry_delay_secs, 20);
    }

    #[test]
    fn test_serializes_resolved_values() {
        let config = Config::from_lookup(lookup(&[(ENV_RETRY_DELAY, "3")]));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["apiUrl"], "http://localhost:8080");
        assert_eq!(json["taskTopic"], "agent-tasks");
        assert_eq!(json["retryDelaySecs"], 3);
        assert!(json["healthAddr"].is_null());
    }
}
