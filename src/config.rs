use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_CONFIG_FILE: &str = "kiosk-config.json";
pub const VOICE_TURN_PATH: &str = "/api/voice/turn";

/// Runtime configuration of one kiosk
///
/// Every value is optional; absence of the auth values means "send
/// unauthenticated", absence of both base URLs means voice is unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, alias = "apiBaseUrl", alias = "apibaseurl")]
    pub api_base_url: Option<String>,

    /// Overrides `api_base_url` for voice turns only
    #[serde(default, alias = "voiceBaseUrl", alias = "voicebaseurl")]
    pub voice_base_url: Option<String>,

    #[serde(default, alias = "deviceId", alias = "deviceid")]
    pub device_id: Option<String>,

    #[serde(default, alias = "kioskToken", alias = "kiosktoken")]
    pub kiosk_token: Option<String>,

    /// Where the values came from: "file" or "env"
    #[serde(skip_deserializing)]
    pub source: String,
}

impl RuntimeConfig {
    /// Load runtime configuration.
    ///
    /// Values from `path` (when it exists) win over `KIOSK_*` environment
    /// variables, which win over the built-in base URL.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let has_file = path.is_file();

        let file = if has_file {
            Self::layer(config::File::from(path).required(true))
                .with_context(|| format!("Failed to load runtime config from {}", path.display()))?
        } else {
            debug!("No runtime config at {}; using environment", path.display());
            Self::default()
        };
        let env = Self::layer(config::Environment::with_prefix("KIOSK"))
            .context("Failed to read KIOSK_* environment")?;

        let mut cfg = file.or(env).normalized();
        if cfg.api_base_url.is_none() {
            cfg.api_base_url = Some(DEFAULT_API_BASE_URL.to_string());
        }
        cfg.source = if has_file { "file" } else { "env" }.to_string();

        info!(
            "Runtime config loaded from {} (voice endpoint: {}, auth: {})",
            cfg.source,
            cfg.voice_endpoint().as_deref().unwrap_or("none"),
            if cfg.auth_ready() { "yes" } else { "no" }
        );

        Ok(cfg)
    }

    fn layer<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder().add_source(source).build()?;
        Ok(settings.try_deserialize::<RuntimeConfig>()?.normalized())
    }

    /// Fill values missing from `self` with those from `fallback`
    pub fn or(self, fallback: RuntimeConfig) -> Self {
        Self {
            api_base_url: self.api_base_url.or(fallback.api_base_url),
            voice_base_url: self.voice_base_url.or(fallback.voice_base_url),
            device_id: self.device_id.or(fallback.device_id),
            kiosk_token: self.kiosk_token.or(fallback.kiosk_token),
            source: self.source,
        }
    }

    /// Treat blank values as absent
    pub fn normalized(mut self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        self.api_base_url = clean(self.api_base_url);
        self.voice_base_url = clean(self.voice_base_url);
        self.device_id = clean(self.device_id);
        self.kiosk_token = clean(self.kiosk_token);
        self
    }

    /// Full voice turn URL, if any backend address is configured
    pub fn voice_endpoint(&self) -> Option<String> {
        let base = self
            .voice_base_url
            .as_deref()
            .or(self.api_base_url.as_deref())?
            .trim()
            .trim_end_matches('/');

        if base.is_empty() {
            return None;
        }
        Some(format!("{}{}", base, VOICE_TURN_PATH))
    }

    /// Both kiosk credentials are present
    pub fn auth_ready(&self) -> bool {
        self.device_id.is_some() && self.kiosk_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_endpoint_trims_trailing_slash() {
        let cfg = RuntimeConfig {
            api_base_url: Some("https://bot.example.org/".into()),
            ..Default::default()
        };
        assert_eq!(
            cfg.voice_endpoint().as_deref(),
            Some("https://bot.example.org/api/voice/turn")
        );
    }

    #[test]
    fn test_voice_base_url_takes_precedence() {
        let cfg = RuntimeConfig {
            api_base_url: Some("http://api".into()),
            voice_base_url: Some("http://voice".into()),
            ..Default::default()
        };
        assert_eq!(cfg.voice_endpoint().as_deref(), Some("http://voice/api/voice/turn"));
    }

    #[test]
    fn test_missing_base_url_has_no_endpoint() {
        let cfg = RuntimeConfig {
            api_base_url: Some("   ".into()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.voice_endpoint(), None);
    }

    #[test]
    fn test_or_prefers_primary_values() {
        let file = RuntimeConfig {
            device_id: Some("kiosk-file".into()),
            ..Default::default()
        };
        let env = RuntimeConfig {
            device_id: Some("kiosk-env".into()),
            kiosk_token: Some("secret".into()),
            ..Default::default()
        };

        let merged = file.or(env);
        assert_eq!(merged.device_id.as_deref(), Some("kiosk-file"));
        assert_eq!(merged.kiosk_token.as_deref(), Some("secret"));
        assert!(merged.auth_ready());
    }

    #[test]
    fn test_blank_credentials_are_absent() {
        let cfg = RuntimeConfig {
            device_id: Some("kiosk-01".into()),
            kiosk_token: Some("".into()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.kiosk_token, None);
        assert!(!cfg.auth_ready());
    }
}
