//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// HTTP port for the webhook and REST API.
    pub port: u16,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Maximum number of images kept per session.
    pub max_images: usize,
    /// Absolute lifetime of a session from creation.
    pub session_ttl: Duration,
    /// Pause between consecutive outbound reply units.
    pub send_delay: Duration,
    /// Attempts at a conflicting session write before giving up.
    pub max_save_attempts: u32,
    /// Per-sender workers retire after this long without work.
    pub worker_idle_timeout: Duration,
    /// Interval of the optional expiry sweep (`None` disables it).
    pub sweep_interval: Option<Duration>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/listing-bot.db"),
            max_images: 10,
            session_ttl: Duration::from_secs(24 * 3600), // 24 hours
            send_delay: Duration::from_millis(300),
            max_save_attempts: 3,
            worker_idle_timeout: Duration::from_secs(300), // 5 minutes
            sweep_interval: None,
        }
    }
}

impl BotConfig {
    /// Build from `LISTING_BOT_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_images: usize = parse_env("LISTING_BOT_MAX_IMAGES")?.unwrap_or(defaults.max_images);
        if max_images == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LISTING_BOT_MAX_IMAGES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let ttl_secs: u64 = parse_env("LISTING_BOT_SESSION_TTL_SECS")?
            .unwrap_or(defaults.session_ttl.as_secs());
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LISTING_BOT_SESSION_TTL_SECS".to_string(),
                message: "must be positive".to_string(),
            });
        }

        let sweep_secs: u64 = parse_env("LISTING_BOT_SWEEP_INTERVAL_SECS")?.unwrap_or(0);

        Ok(Self {
            port: parse_env("LISTING_BOT_PORT")?.unwrap_or(defaults.port),
            db_path: std::env::var("LISTING_BOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_images,
            session_ttl: Duration::from_secs(ttl_secs),
            send_delay: parse_env("LISTING_BOT_SEND_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_delay),
            max_save_attempts: parse_env::<u32>("LISTING_BOT_MAX_SAVE_ATTEMPTS")?
                .unwrap_or(defaults.max_save_attempts)
                .max(1),
            worker_idle_timeout: parse_env("LISTING_BOT_WORKER_IDLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker_idle_timeout),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

/// Twilio credentials for outbound messages.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender address, e.g. `whatsapp:+14155238886`.
    pub from_number: String,
}

impl TwilioConfig {
    /// Returns `None` when `TWILIO_ACCOUNT_SID` is not set.
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
        let from_number = std::env::var("TWILIO_FROM_NUMBER").unwrap_or_default();

        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            from_number,
        })
    }
}

/// Endpoints of the drafting / scoring services.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub drafter_url: String,
    pub scorer_url: String,
    pub feature_detector_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let drafter_url = std::env::var("LISTING_DRAFTER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("LISTING_DRAFTER_URL".to_string()))?;
        let scorer_url = std::env::var("GEO_SCORER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("GEO_SCORER_URL".to_string()))?;

        Ok(Self {
            drafter_url,
            scorer_url,
            feature_detector_url: std::env::var("FEATURE_DETECTOR_URL").ok(),
            api_key: std::env::var("GENERATION_API_KEY").ok().map(SecretString::from),
            timeout: parse_env("GENERATION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60)),
        })
    }
}

/// Parse an optional environment variable. Unset → `Ok(None)`.
fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BotConfig::default();
        assert_eq!(config.max_images, 10);
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.send_delay, Duration::from_millis(300));
        assert_eq!(config.max_save_attempts, 3);
        assert!(config.sweep_interval.is_none());
    }

    #[test]
    fn parse_env_unset_is_none() {
        let value: Option<u32> = parse_env("LISTING_BOT_TEST_SURELY_UNSET_VAR").unwrap();
        assert!(value.is_none());
    }
}
