use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Which gateway to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayConfig {
    /// Stripe-compatible REST API.
    Http { base_url: String, secret_key: String },
    /// Local stand-in. Used when no gateway key is configured.
    Sandbox,
}

/// Process configuration, read once from `HOLDFAST_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin_token: String,
    pub webhook_secret: String,
    pub public_url: String,
    pub gateway: GatewayConfig,
    pub currency: String,
    pub janitor_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let port = parse_or(&get, "HOLDFAST_PORT", 8080)?;
        let public_url = get("HOLDFAST_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{port}"));
        let gateway = match get("HOLDFAST_GATEWAY_KEY") {
            Some(secret_key) => GatewayConfig::Http {
                base_url: get("HOLDFAST_GATEWAY_URL").unwrap_or_else(|| "https://api.stripe.com".into()),
                secret_key,
            },
            None => GatewayConfig::Sandbox,
        };
        let currency = get("HOLDFAST_CURRENCY").unwrap_or_else(|| "usd".into());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                name: "HOLDFAST_CURRENCY",
                value: currency,
            });
        }
        let janitor_secs: u64 = parse_or(&get, "HOLDFAST_JANITOR_INTERVAL_SECS", 30)?;
        if janitor_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "HOLDFAST_JANITOR_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind: get("HOLDFAST_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            data_dir: PathBuf::from(get("HOLDFAST_DATA_DIR").unwrap_or_else(|| "./data".into())),
            admin_token: required("HOLDFAST_ADMIN_TOKEN")?,
            webhook_secret: required("HOLDFAST_WEBHOOK_SECRET")?,
            public_url,
            gateway,
            currency: currency.to_ascii_lowercase(),
            janitor_interval: Duration::from_secs(janitor_secs),
            compact_threshold: parse_or(&get, "HOLDFAST_COMPACT_THRESHOLD", 1000)?,
            metrics_port: get("HOLDFAST_METRICS_PORT")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        name: "HOLDFAST_METRICS_PORT",
                        value: v,
                    })
                })
                .transpose()?,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("holdfast.wal")
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}
