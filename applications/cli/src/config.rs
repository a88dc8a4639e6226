/// Host configuration
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use soul_transition::PlayerConfig;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CliConfig {
    #[serde(default)]
    pub player: PlayerConfig,

    /// `tracing` filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Duration assumed for files the probe cannot measure
    #[serde(default = "default_fallback_track_ms")]
    pub fallback_track_ms: u64,

    /// Clock resolution of the simulated decoders
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl CliConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Environment variables use the `SOUL_TRANSITION_` prefix and `__` between
    /// nested keys, e.g. `SOUL_TRANSITION_PLAYER__POOL_RETENTION=4`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = ::config::Config::builder();

        if let Some(path) = path {
            settings = settings.add_source(::config::File::from(path).required(true));
        }

        settings = settings.add_source(
            ::config::Environment::with_prefix("SOUL_TRANSITION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = settings
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.player.validate().context("Invalid player configuration")?;
        if self.tick_ms == 0 {
            anyhow::bail!("tick_ms must be at least 1");
        }
        Ok(())
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            log_filter: default_log_filter(),
            fallback_track_ms: default_fallback_track_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_log_filter() -> String {
    "soul_transition=info,soul_transition_cli=info".to_string()
}

fn default_fallback_track_ms() -> u64 {
    180_000
}

fn default_tick_ms() -> u64 {
    50
}
