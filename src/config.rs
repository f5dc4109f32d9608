use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::error::ConfigError;

pub const MIN_AUTO_FETCH_INTERVAL: Duration = Duration::from_secs(60);

#[serde_as]
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    /// As written by the user; see [`Config::watch_roots`] for expansion.
    pub watch_directories: Vec<String>,
    pub max_depth: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub refresh_interval: Duration,
    pub auto_fetch_enabled: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub auto_fetch_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            watch_directories: vec!["~/code".to_string()],
            max_depth: 3,
            refresh_interval: Duration::from_secs(5),
            auto_fetch_enabled: false,
            auto_fetch_interval: Duration::from_secs(300),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "repowatch").context("Failed to determine project directories")
}

pub fn get_default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("repowatch.toml"))
}

pub fn get_default_log_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("repowatch.log"))
}

impl Config {
    /// Load from `config_path` (or the default location), writing a default
    /// file first if none exists.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p,
            None => get_default_config_path()?,
        };

        if !path.exists() {
            info!("Config file not found at {}, creating default config", path.display());
            let default_config = Config::default();
            default_config.save(&path)?;
            return Ok(default_config);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        debug!(
            "Loaded configuration from {}: {} watch directories",
            path.display(),
            config.watch_directories.len()
        );
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth < 1 {
            return Err(ConfigError::Invalid {
                field: "max_depth",
                reason: format!("must be >= 1, got {}", self.max_depth),
            });
        }
        if self.refresh_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                field: "refresh_interval",
                reason: format!("must be >= 1 second, got {}", self.refresh_interval.as_secs()),
            });
        }
        if self.auto_fetch_interval < MIN_AUTO_FETCH_INTERVAL {
            return Err(ConfigError::Invalid {
                field: "auto_fetch_interval",
                reason: format!(
                    "must be >= {} seconds, got {}",
                    MIN_AUTO_FETCH_INTERVAL.as_secs(),
                    self.auto_fetch_interval.as_secs()
                ),
            });
        }
        Ok(())
    }

    /// Load the file, then apply command-line overrides.
    pub fn from_cli_and_file(cli_args: &CliArgs) -> Result<Self> {
        let mut config = Self::load(cli_args.config.clone())?;

        if !cli_args.watch_dir.is_empty() {
            config.watch_directories = cli_args
                .watch_dir
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect();
        }
        if let Some(max_depth) = cli_args.max_depth {
            config.max_depth = usize::try_from(max_depth).unwrap_or(usize::MAX);
        }

        config.validate()?;
        Ok(config)
    }

    /// Watch directories with `~` and environment variables expanded, keeping
    /// only those that exist as directories.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.watch_directories
            .iter()
            .map(|dir| expand_path(dir))
            .filter(|path| {
                let usable = path.is_dir();
                if !usable {
                    debug!("Ignoring watch directory {}: not a directory", path.display());
                }
                usable
            })
            .collect()
    }
}

/// Expand a leading `~` and any `$VAR` / `${VAR}` references. If a variable
/// is unset the path keeps every reference as written.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(err) => {
            debug!("Leaving variables in {} unexpanded: {}", raw, err);
            PathBuf::from(shellexpand::tilde(raw).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert!(!config.auto_fetch_enabled);
        assert_eq!(config.auto_fetch_interval, Duration::from_secs(300));
        assert_eq!(config.watch_directories, vec!["~/code"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() -> Result<()> {
        let config = Config {
            watch_directories: vec!["/srv/repos".to_string(), "~/work".to_string()],
            auto_fetch_enabled: true,
            auto_fetch_interval: Duration::from_secs(600),
            ..Config::default()
        };

        let toml_str = toml::to_string(&config)?;
        assert!(toml_str.contains("auto_fetch_interval = 600"));
        let parsed_config: Config = toml::from_str(&toml_str)?;

        assert_eq!(config, parsed_config);
        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> Result<()> {
        let config: Config = toml::from_str("watch_directories = [\"/a\"]\nmax_depth = 2\n")?;
        assert_eq!(config.watch_directories, vec!["/a"]);
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn test_config_load_nonexistent_creates_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nested").join("repowatch.toml");

        let config = Config::load(Some(config_path.clone()))?;

        assert_eq!(config, Config::default());
        assert!(config_path.exists());
        Ok(())
    }

    #[test]
    fn test_config_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test.toml");

        let config = Config {
            watch_directories: vec!["/custom/path".to_string()],
            max_depth: 5,
            ..Config::default()
        };
        config.save(&config_path)?;

        let loaded_config = Config::load(Some(config_path))?;
        assert_eq!(config, loaded_config);
        Ok(())
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let too_shallow = Config {
            max_depth: 0,
            ..Config::default()
        };
        assert!(matches!(
            too_shallow.validate(),
            Err(ConfigError::Invalid { field: "max_depth", .. })
        ));

        let too_fast = Config {
            refresh_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(too_fast.validate().is_err());

        let fetch_too_often = Config {
            auto_fetch_interval: Duration::from_secs(59),
            ..Config::default()
        };
        let err = fetch_too_often.validate().unwrap_err();
        assert!(err.to_string().contains("auto_fetch_interval"));
    }

    #[test]
    fn test_load_rejects_invalid_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("bad.toml");
        fs::write(&config_path, "max_depth = 0\n")?;
        assert!(Config::load(Some(config_path.clone())).is_err());

        fs::write(&config_path, "this is not toml = = =")?;
        assert!(Config::load(Some(config_path)).is_err());
        Ok(())
    }

    #[test]
    fn test_watch_roots_filters_missing_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let existing = temp_dir.path().join("repos");
        fs::create_dir_all(&existing)?;
        let file = temp_dir.path().join("not-a-dir");
        fs::write(&file, "")?;

        let config = Config {
            watch_directories: vec![
                existing.to_string_lossy().to_string(),
                temp_dir.path().join("missing").to_string_lossy().to_string(),
                file.to_string_lossy().to_string(),
            ],
            ..Config::default()
        };

        assert_eq!(config.watch_roots(), vec![existing]);
        Ok(())
    }

    #[test]
    fn test_expand_home_and_vars() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~"), home);
            assert_eq!(expand_path("~/code"), home.join("code"));
        }
        assert_eq!(expand_path("/plain/path"), PathBuf::from("/plain/path"));

        // PATH is set in any test environment
        let path_var = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_path("$PATH"), PathBuf::from(&path_var));
        assert_eq!(expand_path("${PATH}/x"), PathBuf::from(format!("{}/x", path_var)));
        assert_eq!(
            expand_path("/a/$REPOWATCH_SURELY_UNSET_VAR/b"),
            PathBuf::from("/a/$REPOWATCH_SURELY_UNSET_VAR/b")
        );
        assert_eq!(expand_path("cost$"), PathBuf::from("cost$"));
        assert_eq!(expand_path("${unterminated"), PathBuf::from("${unterminated"));
    }
}
