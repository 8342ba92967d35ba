//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Numeric settings that fail to parse fall back to their defaults; missing
//! credentials and malformed price ids fail startup.

use std::time::Duration;

use crate::application::services::BroadcastTopic;
use crate::domain::connection::ReconnectConfig;
use crate::domain::price::PriceId;

/// Price ids tracked when `PRICE_IDS` is unset.
pub const DEFAULT_PRICE_IDS: [&str; 3] = [
    "0x23d7315113f5b1d3ba7a83604c44b94d79f4fd69af77f804fc7f920a6dc65744",
    "0x6120ffcf96395c70aa77e72dcb900bf9d40dccab228efca59a17b90ce423d5e8",
    "0xeba0732395fae9dec4bae12e52760b35fc1c5671e2da8b449c9af4efe5d54341",
];

const DEFAULT_HERMES_ENDPOINT: &str = "https://hermes.pyth.network";

/// Pusher application credentials.
#[derive(Clone)]
pub struct PusherCredentials {
    app_id: String,
    key: String,
    secret: String,
}

impl PusherCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(app_id: String, key: String, secret: String) -> Self {
        Self {
            app_id,
            key,
            secret,
        }
    }

    /// Application id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Public application key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Signing secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for PusherCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PusherCredentials")
            .field("app_id", &self.app_id)
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Broadcast transport settings.
#[derive(Debug, Clone)]
pub struct PusherSettings {
    /// Application credentials.
    pub credentials: PusherCredentials,
    /// Cluster name, e.g. `eu` or `mt1`.
    pub cluster: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct HermesSettings {
    /// Base HTTPS endpoint.
    pub endpoint: String,
    /// Ids to subscribe to.
    pub price_ids: Vec<PriceId>,
    /// Maximum accepted price age; `None` stores raw prices.
    pub freshness: Option<Duration>,
    /// Per-request timeout for REST calls and the subscribe ack.
    pub request_timeout: Duration,
}

impl Default for HermesSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_HERMES_ENDPOINT.to_string(),
            price_ids: DEFAULT_PRICE_IDS.iter().map(|id| PriceId::new(id)).collect(),
            freshness: Some(Duration::from_secs(60)),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(1000),
            delay_max: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 10,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.multiplier,
            jitter_factor: settings.jitter,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Periodic broadcast settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Time between snapshot publishes.
    pub interval: Duration,
    /// Channel and event names.
    pub topic: BroadcastTopic,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            topic: BroadcastTopic::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Broadcast transport.
    pub pusher: PusherSettings,
    /// Upstream feed.
    pub hermes: HermesSettings,
    /// Reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// Periodic broadcast.
    pub broadcast: BroadcastSettings,
    /// HTTP server.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// the price id list is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration by resolving each variable through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader { lookup: &lookup };

        let credentials = PusherCredentials::new(
            env.required("PUSHER_APP_ID")?,
            env.required("PUSHER_KEY")?,
            env.required("PUSHER_SECRET")?,
        );
        let cluster = env.required("PUSHER_CLUSTER")?;

        let hermes_defaults = HermesSettings::default();
        let request_timeout =
            env.duration_secs("RELAY_HTTP_TIMEOUT_SECS", hermes_defaults.request_timeout);

        let pusher = PusherSettings {
            credentials,
            cluster,
            request_timeout,
        };

        let price_ids = match env.optional("PRICE_IDS") {
            Some(raw) => parse_price_ids(&raw)?,
            None => hermes_defaults.price_ids,
        };

        let freshness = match env.parse::<u64>("RELAY_FRESHNESS_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => hermes_defaults.freshness,
        };

        let hermes = HermesSettings {
            endpoint: env
                .optional("HERMES_ENDPOINT")
                .map_or(hermes_defaults.endpoint, |e| e.trim_end_matches('/').to_string()),
            price_ids,
            freshness,
            request_timeout,
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.delay_initial,
            ),
            delay_max: env
                .duration_millis("RELAY_RECONNECT_DELAY_MAX_MS", reconnect_defaults.delay_max),
            multiplier: env
                .parse::<f64>("RELAY_RECONNECT_MULTIPLIER")
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(reconnect_defaults.multiplier),
            jitter: env
                .parse::<f64>("RELAY_RECONNECT_JITTER")
                .map_or(reconnect_defaults.jitter, |j| j.clamp(0.0, 1.0)),
            max_attempts: env
                .parse("RELAY_MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(reconnect_defaults.max_attempts),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let interval =
            env.duration_millis("RELAY_BROADCAST_INTERVAL_MS", broadcast_defaults.interval);
        let topic = BroadcastTopic {
            channel: env
                .optional("RELAY_CHANNEL")
                .unwrap_or(broadcast_defaults.topic.channel),
            snapshot_event: env
                .optional("RELAY_SNAPSHOT_EVENT")
                .unwrap_or(broadcast_defaults.topic.snapshot_event),
            initial_event: env
                .optional("RELAY_INITIAL_EVENT")
                .unwrap_or(broadcast_defaults.topic.initial_event),
        };

        let server = ServerSettings {
            port: env.parse("PORT").unwrap_or(ServerSettings::default().port),
        };

        Ok(Self {
            pusher,
            hermes,
            reconnect,
            broadcast: BroadcastSettings { interval, topic },
            server,
        })
    }

    /// Backoff parameters for the connector.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_price_ids(raw: &str) -> Result<Vec<PriceId>, ConfigError> {
    let mut ids: Vec<PriceId> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = PriceId::parse(part).ok_or_else(|| ConfigError::Invalid {
            key: "PRICE_IDS".to_string(),
            reason: format!("'{part}' is not a hex price id"),
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(ConfigError::Invalid {
            key: "PRICE_IDS".to_string(),
            reason: "no price ids given".to_string(),
        });
    }
    Ok(ids)
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.lookup)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.optional(key).and_then(|v| v.trim().parse().ok())
    }

    /// Zero is treated as unset.
    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key)
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs)
    }

    /// Zero is treated as unset.
    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key)
            .filter(|ms| *ms > 0)
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("PUSHER_APP_ID", "123"),
        ("PUSHER_KEY", "key123"),
        ("PUSHER_SECRET", "secret456"),
        ("PUSHER_CLUSTER", "eu"),
    ];

    fn config(extra: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let mut pairs: Vec<(&str, &str)> = REQUIRED.to_vec();
        pairs.extend_from_slice(extra);
        RelayConfig::from_lookup(lookup_from(&pairs))
    }

    #[test]
    fn defaults_when_only_credentials_set() {
        let config = config(&[]).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.hermes.endpoint, "https://hermes.pyth.network");
        assert_eq!(config.hermes.price_ids.len(), 3);
        assert_eq!(config.hermes.freshness, Some(Duration::from_secs(60)));
        assert_eq!(config.broadcast.interval, Duration::from_millis(5000));
        assert_eq!(config.broadcast.topic, BroadcastTopic::default());
        assert_eq!(config.pusher.cluster, "eu");

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.initial_delay, Duration::from_millis(1000));
        assert_eq!(reconnect.max_delay, Duration::from_millis(30_000));
        assert_eq!(reconnect.max_attempts, 10);
        assert!(reconnect.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn missing_credential_fails() {
        let err = RelayConfig::from_lookup(lookup_from(&REQUIRED[..3])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "PUSHER_CLUSTER"));
    }

    #[test]
    fn empty_credential_fails() {
        let err = config(&[("PUSHER_SECRET", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "PUSHER_SECRET"));
    }

    #[test]
    fn price_ids_are_normalised_and_deduplicated() {
        let config = config(&[("PRICE_IDS", "0xAB, ab ,cd,")]).unwrap();
        let ids: Vec<&str> = config.hermes.price_ids.iter().map(PriceId::as_str).collect();
        assert_eq!(ids, vec!["ab", "cd"]);
    }

    #[test]
    fn malformed_price_id_fails() {
        let err = config(&[("PRICE_IDS", "ab,not-hex")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "PRICE_IDS"));
    }

    #[test]
    fn zero_freshness_disables_filter() {
        let config = config(&[("RELAY_FRESHNESS_SECS", "0")]).unwrap();
        assert!(config.hermes.freshness.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("PORT", "8080"),
            ("HERMES_ENDPOINT", "https://hermes-beta.pyth.network/"),
            ("RELAY_BROADCAST_INTERVAL_MS", "250"),
            ("RELAY_RECONNECT_DELAY_INITIAL_MS", "10"),
            ("RELAY_MAX_RECONNECT_ATTEMPTS", "0"),
            ("RELAY_RECONNECT_JITTER", "5"),
            ("RELAY_CHANNEL", "prices"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hermes.endpoint, "https://hermes-beta.pyth.network");
        assert_eq!(config.broadcast.interval, Duration::from_millis(250));
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(10));
        assert_eq!(config.reconnect.max_attempts, 0);
        assert!((config.reconnect.jitter - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.broadcast.topic.channel, "prices");
        assert_eq!(config.broadcast.topic.snapshot_event, "price-update");
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = config(&[("PORT", "http"), ("RELAY_BROADCAST_INTERVAL_MS", "0")]).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.broadcast.interval, Duration::from_millis(5000));
    }

    #[test]
    fn backoff_that_cannot_grow_falls_back_to_defaults() {
        for multiplier in ["0", "-2", "0.5", "NaN", "inf"] {
            let config = config(&[
                ("RELAY_RECONNECT_DELAY_INITIAL_MS", "0"),
                ("RELAY_RECONNECT_DELAY_MAX_MS", "0"),
                ("RELAY_RECONNECT_MULTIPLIER", multiplier),
                ("RELAY_MAX_RECONNECT_ATTEMPTS", "0"),
            ])
            .unwrap();

            let reconnect = config.reconnect_config();
            assert_eq!(reconnect.initial_delay, Duration::from_millis(1000), "{multiplier}");
            assert_eq!(reconnect.max_delay, Duration::from_millis(30_000), "{multiplier}");
            assert!((reconnect.multiplier - 2.0).abs() < f64::EPSILON, "{multiplier}");
            assert_eq!(reconnect.max_attempts, 0);
        }
    }

    #[test]
    fn fractional_multiplier_above_one_is_kept() {
        let config = config(&[("RELAY_RECONNECT_MULTIPLIER", "1.5")]).unwrap();
        assert!((config.reconnect.multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_http_timeout_falls_back_to_default() {
        let config = config(&[("RELAY_HTTP_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(config.hermes.request_timeout, Duration::from_secs(10));
        assert_eq!(config.pusher.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn credentials_redacted_debug() {
        let config = config(&[]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }
}
