use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the pub/sub backend and for logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub pubsub: PubSubSettings,
    pub logging: LoggingSettings,
}

/// Which backend adapter to build.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single process, no external dependencies.
    #[default]
    Memory,
    /// Fan out through Redis pub/sub.
    Redis,
    /// Fan out through PostgreSQL `NOTIFY`/`LISTEN`.
    Postgres,
}

/// Configuration settings for the pub/sub backend.
///
/// `redis_url` is only read by the redis backend and `postgres_dsn` and
/// `notify_payload_limit` only by the postgres backend.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PubSubSettings {
    pub backend: BackendKind,
    pub channel_prefix: String,
    pub redis_url: String,
    pub postgres_dsn: String,
    pub notify_payload_limit: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub pubsub: Option<PartialPubSubSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPubSubSettings {
    pub backend: Option<BackendKind>,
    pub channel_prefix: Option<String>,
    pub redis_url: Option<String>,
    pub postgres_dsn: Option<String>,
    pub notify_payload_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pubsub: PubSubSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            channel_prefix: "livesub:".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            postgres_dsn: "postgres://localhost/livesub".to_string(),
            notify_payload_limit: crate::backend::relay::NOTIFY_PAYLOAD_LIMIT,
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let pubsub = self.pubsub;
        let logging = self.logging;

        Settings {
            pubsub: PubSubSettings {
                backend: pubsub
                    .as_ref()
                    .and_then(|p| p.backend)
                    .unwrap_or(default.pubsub.backend),
                channel_prefix: pubsub
                    .as_ref()
                    .and_then(|p| p.channel_prefix.clone())
                    .unwrap_or(default.pubsub.channel_prefix),
                redis_url: pubsub
                    .as_ref()
                    .and_then(|p| p.redis_url.clone())
                    .unwrap_or(default.pubsub.redis_url),
                postgres_dsn: pubsub
                    .as_ref()
                    .and_then(|p| p.postgres_dsn.clone())
                    .unwrap_or(default.pubsub.postgres_dsn),
                notify_payload_limit: pubsub
                    .as_ref()
                    .and_then(|p| p.notify_payload_limit)
                    .unwrap_or(default.pubsub.notify_payload_limit),
            },
            logging: LoggingSettings {
                level: logging
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
