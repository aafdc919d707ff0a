use std::{env, fmt::Display, net::SocketAddr, str::FromStr};

use tracing::{info, warn};

use crate::receiver::DispatchMode;

pub const DEFAULT_WEBHOOK_URL: &str = "http://127.0.0.1:8787/webhook";
pub const DEFAULT_RECEIVER_ADDR: &str = "0.0.0.0:8787";

const PLACEHOLDER_URL: &str = "your-supabase-url";
const PLACEHOLDER_KEY: &str = "your-supabase-anon-key";

/// Credentials for the managed identity/data provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

impl ProviderConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            anon_key: Some(anon_key.into()),
        }
    }

    /// Both values present, not left at the template placeholders, and an http(s) URL.
    pub fn is_configured(&self) -> bool {
        match (self.url.as_deref(), self.anon_key.as_deref()) {
            (Some(url), Some(key)) => {
                !url.is_empty()
                    && !key.is_empty()
                    && url != PLACEHOLDER_URL
                    && key != PLACEHOLDER_KEY
                    && url.starts_with("http")
            }
            _ => false,
        }
    }

    /// `(base_url, key)` when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if !self.is_configured() {
            return None;
        }
        Some((
            self.url.as_deref()?.trim_end_matches('/'),
            self.anon_key.as_deref()?,
        ))
    }
}

pub struct Config {
    pub provider: ProviderConfig,
    pub webhook_url: String,
    pub receiver_addr: SocketAddr,
    pub dispatch_mode: DispatchMode,
}

impl Config {
    pub fn load() -> Self {
        let provider = ProviderConfig {
            url: env::var("SUPABASE_URL").ok(),
            anon_key: env::var("SUPABASE_ANON_KEY").ok(),
        };
        if !provider.is_configured() {
            warn!("Supabase credentials missing or placeholders, identity and event log disabled");
        }

        Self {
            provider,
            webhook_url: try_load("WEBHOOK_URL", DEFAULT_WEBHOOK_URL),
            receiver_addr: try_load("RECEIVER_ADDR", DEFAULT_RECEIVER_ADDR),
            dispatch_mode: try_load("DISPATCH_MODE", "lenient"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    match raw.parse() {
        Ok(v) => v,
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            match default.parse() {
                Ok(v) => v,
                Err(e) => panic!("built-in default for {key} does not parse: {e}"),
            }
        }
    }
}
