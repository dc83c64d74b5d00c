use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DiktantError, Result};

/// Top-level configuration for the Diktant trainer.
///
/// Loaded from `~/.diktant/config.toml` by default. Every section falls back
/// to its defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiktantConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl DiktantConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DiktantConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DiktantError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the progress database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.diktant/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output backend: "mock" (silent) or "cpal" (requires the `cpal` feature).
    pub backend: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
        }
    }
}

/// Lesson content configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Path to the lesson data file.
    pub lessons_path: String,
    /// Upper bound on a single lesson fetch.
    pub fetch_timeout_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            lessons_path: "~/.diktant/lessons.json".to_string(),
            fetch_timeout_secs: 12,
        }
    }
}

impl ContentConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Maximum number of synthesized clips kept in memory.
    pub cache_capacity: usize,
    /// Upper bound on a single synthesis request.
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            timeout_secs: 12,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Background audio prefetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Whether upcoming lines are fetched in the background.
    pub enabled: bool,
    /// How many lines past the current one to prefetch.
    pub lookahead: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookahead: 2,
        }
    }
}

/// Progress persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Key under which the progress map is stored. Older releases stored bare
    /// percentages under `russianDictationProgress`; this key must differ.
    pub storage_key: String,
    /// SQLite file name inside the data directory.
    pub db_file: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            storage_key: "russianDictationProgress_v2".to_string(),
            db_file: "progress.db".to_string(),
        }
    }
}
