use super::Config;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Default location: `~/.keyloom/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Ok(home.join(".keyloom").join("config.toml"))
    }

    /// Load the config at `path` (or the default path), writing defaults on
    /// first run, then apply environment overrides and validate.
    pub fn load_or_init(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path.clone_from(&config_path);
            config
        } else {
            let config = Self {
                config_path: config_path.clone(),
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.gemini.api_keys.iter().all(|key| key.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "no Gemini API keys configured; set [gemini] api_keys or GEMINI_API_KEY_1..N"
                    .into(),
            ));
        }
        if self.fallback.inference_steps == 0 {
            return Err(ConfigError::Validation(
                "fallback.inference_steps must be positive".into(),
            ));
        }
        if !self.fallback.guidance_scale.is_finite() {
            return Err(ConfigError::Validation(
                "fallback.guidance_scale must be a finite number".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            return Err(ConfigError::Validation(
                "gemini.temperature must be within 0.0..=2.0".into(),
            ));
        }
        Ok(())
    }
}
