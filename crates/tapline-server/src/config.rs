use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, ensure};

use tapline_presence::PresenceConfig;

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Server settings, read from `TAPLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub presence_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub max_radius_km: f64,
    pub notify_radius_km: f64,
    /// Log nearby notifications instead of dropping them.
    pub notify_log: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            host: get("TAPLINE_HOST", "0.0.0.0"),
            port: parse(&lookup, "TAPLINE_PORT", 3000)?,
            db_path: get("TAPLINE_DB_PATH", "tapline.db").into(),
            jwt_secret: get("TAPLINE_JWT_SECRET", "dev-secret-change-me"),
            presence_ttl_minutes: parse(&lookup, "TAPLINE_PRESENCE_TTL_MINUTES", 240)?,
            sweep_interval_secs: parse(&lookup, "TAPLINE_SWEEP_INTERVAL_SECS", 60)?,
            max_radius_km: parse(&lookup, "TAPLINE_MAX_RADIUS_KM", 50.0)?,
            notify_radius_km: parse(&lookup, "TAPLINE_NOTIFY_RADIUS_KM", 5.0)?,
            notify_log: parse(&lookup, "TAPLINE_NOTIFY_LOG", true)?,
        };

        ensure!(config.presence_ttl_minutes > 0, "TAPLINE_PRESENCE_TTL_MINUTES must be positive");
        ensure!(config.sweep_interval_secs > 0, "TAPLINE_SWEEP_INTERVAL_SECS must be positive");
        ensure!(
            config.max_radius_km > 0.0 && config.notify_radius_km > 0.0,
            "radius settings must be positive"
        );
        Ok(config)
    }

    pub fn has_placeholder_secret(&self) -> bool {
        self.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }

    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            default_ttl: chrono::Duration::minutes(self.presence_ttl_minutes),
            max_radius_km: self.max_radius_km,
            notify_radius_km: self.notify_radius_km,
            ..PresenceConfig::default()
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 3000);
        assert_eq!(c.presence_ttl_minutes, 240);
        assert_eq!(c.max_radius_km, 50.0);
        assert!(c.notify_log);
        assert!(c.has_placeholder_secret());
    }

    #[test]
    fn values_are_parsed() {
        let c = config(&[
            ("TAPLINE_PORT", "8080"),
            ("TAPLINE_JWT_SECRET", "a-real-secret"),
            ("TAPLINE_PRESENCE_TTL_MINUTES", "90"),
            ("TAPLINE_NOTIFY_LOG", "false"),
        ])
        .unwrap();
        assert_eq!(c.port, 8080);
        assert!(!c.has_placeholder_secret());
        assert!(!c.notify_log);
        assert_eq!(c.presence_config().default_ttl, chrono::Duration::minutes(90));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = config(&[("TAPLINE_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("TAPLINE_PORT"));

        assert!(config(&[("TAPLINE_SWEEP_INTERVAL_SECS", "0")]).is_err());
    }
}
