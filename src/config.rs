use crate::error::{GraphiteError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_NAME: &str = "GraphiteErrorCounter";
pub const DEFAULT_HOST: &str = "haystack.local";
/// Standard Graphite plaintext port.
pub const DEFAULT_PORT: u16 = 2003;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_QUEUE_SIZE: usize = 10;
pub const DEFAULT_HEARTBEAT_PERIOD_SECONDS: u64 = 60;
pub const DEFAULT_HEARTBEAT_VALUE: u64 = 0;

/// How a call site is turned into a registry key.
///
/// `Hashed` keeps the hot path allocation-free at the cost of a negligible
/// collision risk; `ClassAndLine` is exact and also puts the line number into
/// the published metric path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    Hashed,
    ClassAndLine,
}

impl FromStr for KeyStrategy {
    type Err = GraphiteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashed" | "hash" => Ok(KeyStrategy::Hashed),
            "class_and_line" | "classandline" | "line" => Ok(KeyStrategy::ClassAndLine),
            _ => Err(GraphiteError::InvalidAttribute {
                name: "keystrategy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub period_seconds: u64,
    /// Amount added on every emission; only the freshness of the metric matters downstream.
    pub value: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_seconds: DEFAULT_HEARTBEAT_PERIOD_SECONDS,
            value: DEFAULT_HEARTBEAT_VALUE,
        }
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}

/// Everything the appender is configured with. Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppenderConfig {
    pub name: String,
    /// Leading path segment for every counter; empty means no segment.
    pub subsystem: String,
    #[serde(alias = "address")]
    pub host: String,
    pub port: u16,
    #[serde(rename = "pollintervalseconds", alias = "poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(rename = "queuesize", alias = "queue_size")]
    pub queue_size: usize,
    #[serde(rename = "sendasrate", alias = "send_as_rate")]
    pub send_as_rate: bool,
    #[serde(rename = "keystrategy", alias = "key_strategy")]
    pub key_strategy: KeyStrategy,
    /// Zero counters on every scrape so each publish carries only the delta.
    pub resetting: bool,
    pub heartbeat: HeartbeatConfig,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            subsystem: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            queue_size: DEFAULT_QUEUE_SIZE,
            send_as_rate: false,
            key_strategy: KeyStrategy::default(),
            resetting: true,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// The subset of the configuration the publisher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub host: String,
    pub port: u16,
    pub poll_interval: Duration,
    pub queue_size: usize,
    pub send_as_rate: bool,
}

impl PublisherConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GraphiteError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(GraphiteError::Config("port must not be 0".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(GraphiteError::Config(
                "poll interval must not be zero".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(GraphiteError::Config("queue size must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl AppenderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GraphiteError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppenderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from plugin-style string attributes.
    ///
    /// Attribute names are matched case-insensitively; anything not listed in
    /// the configuration surface is rejected.
    pub fn from_attributes<I, K, V>(attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in attributes {
            config.set_attribute(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    fn set_attribute(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => self.name = value.to_string(),
            "subsystem" => self.subsystem = value.to_string(),
            "host" | "address" => self.host = value.to_string(),
            "port" => self.port = parse_attribute("port", value)?,
            "pollintervalseconds" => {
                self.poll_interval_seconds = parse_attribute("pollintervalseconds", value)?
            }
            "queuesize" => self.queue_size = parse_attribute("queuesize", value)?,
            "sendasrate" => self.send_as_rate = parse_bool("sendasrate", value)?,
            "keystrategy" => self.key_strategy = value.parse()?,
            "resetting" => self.resetting = parse_bool("resetting", value)?,
            "heartbeatenabled" => self.heartbeat.enabled = parse_bool("heartbeatenabled", value)?,
            "heartbeatperiodseconds" => {
                self.heartbeat.period_seconds = parse_attribute("heartbeatperiodseconds", value)?
            }
            "heartbeatvalue" => self.heartbeat.value = parse_attribute("heartbeatvalue", value)?,
            other => return Err(GraphiteError::UnknownAttribute(other.to_string())),
        }
        Ok(())
    }

    /// Applies `GRAPHITE_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GRAPHITE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("GRAPHITE_PORT") {
            self.port = parse_attribute("GRAPHITE_PORT", &port)?;
        }
        if let Some(secs) = lookup("GRAPHITE_POLL_INTERVAL_SECONDS") {
            self.poll_interval_seconds = parse_attribute("GRAPHITE_POLL_INTERVAL_SECONDS", &secs)?;
        }
        if let Some(subsystem) = lookup("GRAPHITE_SUBSYSTEM") {
            self.subsystem = subsystem;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GraphiteError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(GraphiteError::Config("port must not be 0".to_string()));
        }
        if self.poll_interval_seconds == 0 {
            return Err(GraphiteError::Config(
                "pollintervalseconds must be at least 1".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(GraphiteError::Config("queuesize must be at least 1".to_string()));
        }
        if self.heartbeat.enabled && self.heartbeat.period_seconds == 0 {
            return Err(GraphiteError::Config(
                "heartbeat period_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            host: self.host.clone(),
            port: self.port,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            queue_size: self.queue_size,
            send_as_rate: self.send_as_rate,
        }
    }
}

fn parse_attribute<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| GraphiteError::InvalidAttribute {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    parse_attribute(name, &value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_plugin_attributes() {
        let config = AppenderConfig::default();
        assert_eq!(config.name, "GraphiteErrorCounter");
        assert_eq!(config.host, "haystack.local");
        assert_eq!(config.port, 2003);
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.queue_size, 10);
        assert!(!config.send_as_rate);
        assert_eq!(config.key_strategy, KeyStrategy::Hashed);
        assert!(config.resetting);
        assert_eq!(config.heartbeat.period(), Duration::from_secs(60));
        assert_eq!(config.heartbeat.value, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = AppenderConfig::from_toml_str(
            r#"
            subsystem = "checkout"
            address = "graphite.internal"
            port = 2004
            pollintervalseconds = 30
            queuesize = 5
            sendasrate = true
            keystrategy = "class_and_line"

            [heartbeat]
            period_seconds = 300
            value = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.subsystem, "checkout");
        assert_eq!(config.host, "graphite.internal");
        assert_eq!(config.port, 2004);
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.queue_size, 5);
        assert!(config.send_as_rate);
        assert_eq!(config.key_strategy, KeyStrategy::ClassAndLine);
        assert_eq!(config.heartbeat.period_seconds, 300);
        assert_eq!(config.heartbeat.value, 1);
        assert!(config.heartbeat.enabled);
        assert_eq!(config.name, DEFAULT_NAME);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = AppenderConfig::from_toml_str("hots = \"typo\"").unwrap_err();
        assert!(matches!(err, GraphiteError::Toml(_)));
    }

    #[test]
    fn test_from_attributes_is_case_insensitive() {
        let attributes = HashMap::from([
            ("Host", "localhost"),
            ("PORT", "2003"),
            ("pollIntervalSeconds", "60"),
            ("queueSize", "10"),
            ("sendAsRate", "TRUE"),
            ("subsystem", "payments"),
        ]);
        let config = AppenderConfig::from_attributes(attributes).unwrap();

        let publisher = config.publisher();
        assert_eq!(publisher.address(), "localhost:2003");
        assert_eq!(publisher.poll_interval, Duration::from_secs(60));
        assert_eq!(publisher.queue_size, 10);
        assert!(publisher.send_as_rate);
        assert_eq!(config.subsystem, "payments");
    }

    #[test]
    fn test_from_attributes_rejects_bad_values() {
        let err = AppenderConfig::from_attributes([("port", "not-a-port")]).unwrap_err();
        assert!(matches!(err, GraphiteError::InvalidAttribute { ref name, .. } if name == "port"));

        let err = AppenderConfig::from_attributes([("colour", "blue")]).unwrap_err();
        assert!(matches!(err, GraphiteError::UnknownAttribute(ref key) if key == "colour"));

        let err = AppenderConfig::from_attributes([("queuesize", "0")]).unwrap_err();
        assert!(matches!(err, GraphiteError::Config(_)));
    }

    #[test]
    fn test_apply_overrides() {
        let env = HashMap::from([
            ("GRAPHITE_HOST", "metrics.example"),
            ("GRAPHITE_PORT", "2013"),
        ]);
        let config = AppenderConfig::default()
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.host, "metrics.example");
        assert_eq!(config.port, 2013);
        assert_eq!(config.poll_interval_seconds, DEFAULT_POLL_INTERVAL_SECONDS);

        let bad = AppenderConfig::default().apply_overrides(|key: &str| {
            (key == "GRAPHITE_POLL_INTERVAL_SECONDS").then(|| "0".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_publisher_config_rejects_zero_interval_and_queue() {
        assert!(AppenderConfig::default().publisher().validate().is_ok());

        let zero_poll = PublisherConfig {
            poll_interval: Duration::ZERO,
            ..AppenderConfig::default().publisher()
        };
        assert!(matches!(zero_poll.validate(), Err(GraphiteError::Config(_))));

        let zero_queue = PublisherConfig {
            queue_size: 0,
            ..AppenderConfig::default().publisher()
        };
        assert!(matches!(zero_queue.validate(), Err(GraphiteError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"10.0.0.7\"\nport = 2003").unwrap();

        let config = AppenderConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "10.0.0.7");

        let missing = AppenderConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, GraphiteError::Config(_)));
    }
}
