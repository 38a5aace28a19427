use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::pipeline::PipelineMode;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Procesos externos
    pub resolver_bin: String,
    pub transcoder_bin: String,
    pub pipeline_mode: PipelineMode,

    // Tiempos
    pub connect_timeout: Duration,
    pub reconnect_grace: Duration,
    pub pipeline_startup_timeout: Duration,
    pub lookup_timeout: Duration,

    // UI
    pub queue_display_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_vars(|key| std::env::var(key).ok())?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// `load()` passes the process environment; tests pass a map.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let discord_token = var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?;

        Ok(Self {
            // Discord
            discord_token: discord_token.trim().trim_matches('"').to_string(),
            guild_id: var("GUILD_ID").and_then(|s| s.parse().ok()),

            // Procesos externos
            resolver_bin: var("RESOLVER_BIN").unwrap_or(defaults.resolver_bin),
            transcoder_bin: var("TRANSCODER_BIN").unwrap_or(defaults.transcoder_bin),
            pipeline_mode: match var("PIPELINE_MODE") {
                Some(mode) => mode.parse()?,
                None => defaults.pipeline_mode,
            },

            // Tiempos
            connect_timeout: duration_var(var("CONNECT_TIMEOUT"), "CONNECT_TIMEOUT", defaults.connect_timeout)?,
            reconnect_grace: duration_var(var("RECONNECT_GRACE"), "RECONNECT_GRACE", defaults.reconnect_grace)?,
            pipeline_startup_timeout: duration_var(
                var("PIPELINE_STARTUP_TIMEOUT"),
                "PIPELINE_STARTUP_TIMEOUT",
                defaults.pipeline_startup_timeout,
            )?,
            lookup_timeout: duration_var(var("LOOKUP_TIMEOUT"), "LOOKUP_TIMEOUT", defaults.lookup_timeout)?,

            // UI
            queue_display_limit: match var("QUEUE_DISPLAY_LIMIT") {
                Some(limit) => limit.parse().context("QUEUE_DISPLAY_LIMIT inválido")?,
                None => defaults.queue_display_limit,
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be empty
    /// - Every timeout must be greater than zero
    /// - The queue display limit must be greater than zero
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        let timeouts = [
            ("connect timeout", self.connect_timeout),
            ("reconnect grace", self.reconnect_grace),
            ("pipeline startup timeout", self.pipeline_startup_timeout),
            ("lookup timeout", self.lookup_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                anyhow::bail!("The {} must be greater than 0", name);
            }
        }

        if self.queue_display_limit == 0 {
            anyhow::bail!("Queue display limit must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {}\n  \
            Pipeline: {} | {} ({:?}, startup {})\n  \
            Voice: connect {}, reconnect grace {}\n  \
            Lookup: {} timeout, queue shows {} entries",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.resolver_bin,
            self.transcoder_bin,
            self.pipeline_mode,
            humantime::format_duration(self.pipeline_startup_timeout),
            humantime::format_duration(self.connect_timeout),
            humantime::format_duration(self.reconnect_grace),
            humantime::format_duration(self.lookup_timeout),
            self.queue_display_limit,
        )
    }
}

fn duration_var(value: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match value {
        Some(raw) => humantime::parse_duration(raw.trim()).with_context(|| format!("{key} inválido: {raw}")),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            resolver_bin: "yt-dlp".to_string(),
            transcoder_bin: "ffmpeg".to_string(),
            pipeline_mode: PipelineMode::Piped,

            connect_timeout: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(5),
            pipeline_startup_timeout: Duration::from_secs(20),
            lookup_timeout: Duration::from_secs(15),

            queue_display_limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = from_pairs(&[("DISCORD_TOKEN", "\"abc.def\"")]).unwrap();

        assert_eq!(config.discord_token, "abc.def");
        assert_eq!(config.resolver_bin, "yt-dlp");
        assert_eq!(config.transcoder_bin, "ffmpeg");
        assert_eq!(config.pipeline_mode, PipelineMode::Piped);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_grace, Duration::from_secs(5));
        assert_eq!(config.queue_display_limit, 10);
        config.validate().unwrap();
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("DISCORD_TOKEN", "abc"),
            ("GUILD_ID", "1234"),
            ("PIPELINE_MODE", "direct"),
            ("CONNECT_TIMEOUT", "45s"),
            ("PIPELINE_STARTUP_TIMEOUT", "1m 30s"),
            ("QUEUE_DISPLAY_LIMIT", "25"),
        ])
        .unwrap();

        assert_eq!(config.guild_id, Some(1234));
        assert_eq!(config.pipeline_mode, PipelineMode::Direct);
        assert_eq!(config.connect_timeout, Duration::from_secs(45));
        assert_eq!(config.pipeline_startup_timeout, Duration::from_secs(90));
        assert_eq!(config.queue_display_limit, 25);
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(from_pairs(&[]).is_err());
        assert!(from_pairs(&[("DISCORD_TOKEN", "   ")]).is_err());
    }

    #[test]
    fn bad_duration_is_reported() {
        let err = from_pairs(&[("DISCORD_TOKEN", "abc"), ("RECONNECT_GRACE", "soon")]).unwrap_err();
        assert!(err.to_string().contains("RECONNECT_GRACE"));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = Config {
            discord_token: "abc".into(),
            ..Default::default()
        };
        config.lookup_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.lookup_timeout = Duration::from_secs(1);
        config.queue_display_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".into(),
            ..Default::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("yt-dlp | ffmpeg"));
    }
}
