//! Bridge configuration.
//!
//! Defaults are embedded from `bridge.toml` and parsed once. Callers may layer
//! a TOML document over them with [`BridgeConfig::from_toml_str`].

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const EMBEDDED_DEFAULTS: &str = include_str!("bridge.toml");

static DEFAULTS: Lazy<BridgeConfig> = Lazy::new(|| {
    toml::from_str(EMBEDDED_DEFAULTS).expect("embedded bridge.toml must parse")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bridge config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Native messaging host name; must match the registered manifest exactly.
    pub native_host_id: String,
    /// `type` tag of the content -> runtime request.
    pub request_type: String,
    /// Page global receiving the value, without the `window.` prefix.
    pub global_name: String,
    pub native_timeout_ms: u64,
    pub relay_timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Overrides {
    native_host_id: Option<String>,
    request_type: Option<String>,
    global_name: Option<String>,
    native_timeout_ms: Option<u64>,
    relay_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        DEFAULTS.clone()
    }
}

impl BridgeConfig {
    pub fn defaults() -> &'static BridgeConfig {
        &DEFAULTS
    }

    /// Parse `src` over the embedded defaults. Missing keys keep their default.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let o: Overrides = toml::from_str(src)?;
        let base = Self::defaults();
        let cfg = BridgeConfig {
            native_host_id: o.native_host_id.unwrap_or_else(|| base.native_host_id.clone()),
            request_type: o.request_type.unwrap_or_else(|| base.request_type.clone()),
            global_name: o.global_name.unwrap_or_else(|| base.global_name.clone()),
            native_timeout_ms: o.native_timeout_ms.unwrap_or(base.native_timeout_ms),
            relay_timeout_ms: o.relay_timeout_ms.unwrap_or(base.relay_timeout_ms),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.native_host_id.trim().is_empty() {
            return Err(invalid("native_host_id", "must not be empty"));
        }
        if self.request_type.is_empty() {
            return Err(invalid("request_type", "must not be empty"));
        }
        // Interpolated into injected script text.
        if !is_js_identifier(&self.global_name) {
            return Err(invalid(
                "global_name",
                format!("{:?} is not a plain identifier", self.global_name),
            ));
        }
        if self.native_timeout_ms == 0 {
            return Err(invalid("native_timeout_ms", "must be greater than zero"));
        }
        if self.relay_timeout_ms == 0 {
            return Err(invalid("relay_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn native_timeout(&self) -> Duration {
        Duration::from_millis(self.native_timeout_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
