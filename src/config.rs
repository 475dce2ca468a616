//! Host-side convenience configuration. Nothing here gates engine
//! correctness — `EngineConfig` only supplies defaults the host may apply
//! via `DuplexEngine::start_duplex` and friends; a missing or malformed
//! file falls back to defaults rather than failing engine startup.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub audio: AudioSettings,
    pub transport: TransportSettings,
    pub rings: RingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub default_reference_gain: f32,
    pub default_vocal_gain: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    pub recordings_dir: Option<String>,
    pub overwrite_existing: bool,
}

/// Capacities for the realtime-to-host handoff rings and the dispatcher's
/// idle poll interval. Only consulted at `DuplexEngine` construction; once a
/// ring is built its capacity is fixed for the life of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingSettings {
    pub meta_ring_capacity: usize,
    pub pcm_ring_capacity: usize,
    pub input_feed_capacity: usize,
    pub dispatcher_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio: AudioSettings::default(),
            transport: TransportSettings::default(),
            rings: RingSettings::default(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 48000,
            channels: 1,
            default_reference_gain: 1.0,
            default_vocal_gain: 0.0,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            recordings_dir: None,
            overwrite_existing: true,
        }
    }
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            meta_ring_capacity: 64 * crate::capture::CAPTURE_META_SIZE,
            pcm_ring_capacity: 1 << 20, // 1 MiB, ~5s of mono 48kHz PCM16
            input_feed_capacity: 1 << 18,
            dispatcher_poll_interval_ms: 50,
        }
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: EngineConfig,
}

impl ConfigManager {
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config_path: PathBuf::from("fallback_config.toml"),
            config,
        }
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_or_create_config(&config_path)?;

        Ok(Self { config_path, config })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: EngineConfig) -> Result<()> {
        self.config = config;
        self.save_config()
    }

    pub fn save_config(&self) -> Result<()> {
        let config_str =
            toml::to_string_pretty(&self.config).context("failed to serialize configuration")?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }

        fs::write(&self.config_path, config_str).context("failed to write configuration file")?;
        info!("configuration saved to: {:?}", self.config_path);
        Ok(())
    }

    fn load_or_create_config(config_path: &PathBuf) -> Result<EngineConfig> {
        if config_path.exists() {
            info!("loading configuration from: {:?}", config_path);
            let config_str =
                fs::read_to_string(config_path).context("failed to read configuration file")?;

            match toml::from_str::<EngineConfig>(&config_str) {
                Ok(config) => {
                    info!("configuration loaded successfully");
                    Ok(config)
                }
                Err(e) => {
                    warn!("failed to parse configuration file: {e}. Using defaults.");
                    let default_config = EngineConfig::default();
                    if let Err(save_err) = Self::save_config_to_path(&default_config, config_path) {
                        error!("failed to save default configuration: {save_err}");
                    }
                    Ok(default_config)
                }
            }
        } else {
            info!("no configuration file found, creating default configuration");
            let default_config = EngineConfig::default();
            Self::save_config_to_path(&default_config, config_path)?;
            Ok(default_config)
        }
    }

    fn save_config_to_path(config: &EngineConfig, path: &PathBuf) -> Result<()> {
        let config_str =
            toml::to_string_pretty(config).context("failed to serialize default configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }

        fs::write(path, config_str).context("failed to write default configuration file")?;
        info!("default configuration saved to: {:?}", path);
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("vocal_engine")
        } else {
            let home_dir = dirs::home_dir().context("could not determine home directory")?;
            home_dir.join(".vocal_engine")
        };

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_audio_settings() {
        let config = EngineConfig::default();
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.default_reference_gain, 1.0);
        assert_eq!(config.audio.default_vocal_gain, 0.0);
    }

    #[test]
    fn default_config_has_expected_ring_settings() {
        let config = EngineConfig::default();
        assert_eq!(config.rings.meta_ring_capacity, 64 * crate::capture::CAPTURE_META_SIZE);
        assert_eq!(config.rings.pcm_ring_capacity, 1 << 20);
        assert_eq!(config.rings.input_feed_capacity, 1 << 18);
        assert_eq!(config.rings.dispatcher_poll_interval_ms, 50);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = EngineConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config.audio.sample_rate, deserialized.audio.sample_rate);
        assert_eq!(
            config.transport.overwrite_existing,
            deserialized.transport.overwrite_existing
        );
    }

    #[test]
    fn with_config_uses_fallback_path() {
        let manager = ConfigManager::with_config(EngineConfig::default());
        assert_eq!(manager.get_config().audio.sample_rate, 48000);
    }
}
