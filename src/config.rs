//! Settings store.
//!
//! Settings live in layered TOML files merged lowest to highest priority:
//! system (`/etc/finevol/config.toml`), XDG user file, a local
//! `finevol.toml`, and finally the file named by `FINEVOL_CONFIG`. Keys are
//! kebab-case. [`SettingsStore`] is the capability the daemon consumes;
//! [`FileSettings`] backs it with the layered files plus a `notify` watcher
//! that fires on changes to the active file.

use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::map::Entry;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings watcher could not be started: {0}")]
    Watch(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Percent moved per key press.
    pub volume_steps: i64,
    /// Accelerator combo for stepping up.
    pub volume_up: String,
    /// Accelerator combo for stepping down.
    pub volume_down: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume_steps: 1,
            volume_up: "AudioVolumeUp".to_string(),
            volume_down: "AudioVolumeDown".to_string(),
        }
    }
}

impl Config {
    /// Loads the layered settings files, falling back to defaults when none
    /// exist or when the merged result does not deserialize.
    pub fn load() -> Self {
        let mut merged =
            toml::Value::try_from(Self::default()).expect("default config is always valid toml");

        let mut found_any_config = false;

        // Layers merge lowest to highest priority.
        if let Some(system_config) = get_system_config_path() {
            if let Ok(content) = std::fs::read_to_string(&system_config) {
                match content.parse::<toml::Value>() {
                    Ok(value) => {
                        merge_value(&mut merged, value);
                        found_any_config = true;
                        info!("Loaded system config from {}", system_config.display());
                    }
                    Err(err) => warn!("Failed to parse {}: {err}", system_config.display()),
                }
            }
        }

        if let Some(user_config) = get_user_config_path() {
            if let Ok(content) = std::fs::read_to_string(&user_config) {
                match content.parse::<toml::Value>() {
                    Ok(value) => {
                        merge_value(&mut merged, value);
                        found_any_config = true;
                        info!("Loaded user config from {}", user_config.display());
                    }
                    Err(err) => warn!("Failed to parse {}: {err}", user_config.display()),
                }
            }
        }

        if let Ok(content) = std::fs::read_to_string("finevol.toml") {
            match content.parse::<toml::Value>() {
                Ok(value) => {
                    merge_value(&mut merged, value);
                    found_any_config = true;
                    info!("Loaded local config from ./finevol.toml");
                }
                Err(err) => warn!("Failed to parse finevol.toml: {err}"),
            }
        }

        // An explicitly requested file that cannot be read is worth a warning,
        // unlike the optional layers above.
        if let Ok(override_path) = std::env::var("FINEVOL_CONFIG") {
            match std::fs::read_to_string(&override_path) {
                Ok(content) => match content.parse::<toml::Value>() {
                    Ok(value) => {
                        merge_value(&mut merged, value);
                        found_any_config = true;
                        info!("Loaded override config from {override_path}");
                    }
                    Err(err) => warn!("Failed to parse {override_path}: {err}"),
                },
                Err(err) => warn!("FINEVOL_CONFIG points at {override_path}: {err}"),
            }
        }

        if !found_any_config {
            warn!("No configuration file found, using default config");
        }

        merged.try_into().unwrap_or_else(|err| {
            warn!("Falling back to default config due to invalid overrides: {err}");
            Self::default()
        })
    }

    /// Step size per key press, kept within the percent scale.
    pub fn step(&self) -> u8 {
        self.volume_steps.clamp(1, 100) as u8
    }
}

fn merge_value(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base_map), toml::Value::Table(override_map)) => {
            for (key, override_value) in override_map {
                match base_map.entry(key) {
                    Entry::Occupied(mut entry) => merge_value(entry.get_mut(), override_value),
                    Entry::Vacant(entry) => {
                        entry.insert(override_value);
                    }
                }
            }
        }
        (base_value, override_value) => {
            *base_value = override_value;
        }
    }
}

fn get_system_config_path() -> Option<PathBuf> {
    let path = PathBuf::from("/etc/finevol/config.toml");
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// Location of the user config file, whether or not it exists yet.
fn user_config_file() -> Option<PathBuf> {
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config"))
        })?;

    Some(config_dir.join("finevol").join("config.toml"))
}

fn get_user_config_path() -> Option<PathBuf> {
    user_config_file().filter(|path| path.exists())
}

/// The file the watcher follows: the override path when `FINEVOL_CONFIG` is
/// set, the user config file otherwise.
fn watched_config_file() -> Option<PathBuf> {
    if let Ok(override_path) = std::env::var("FINEVOL_CONFIG") {
        return Some(PathBuf::from(override_path));
    }
    user_config_file()
}

/// Source of the daemon's settings.
pub trait SettingsStore {
    /// The values as of the last load.
    fn current(&self) -> &Config;

    /// Re-reads the backing store.
    fn reload(&mut self);

    /// Subscribes to change notifications until [`close`](Self::close).
    fn watch(&mut self, on_change: Box<dyn Fn() + Send>) -> Result<(), ConfigError>;

    /// Releases the change subscription.
    fn close(&mut self);
}

/// Settings backed by the layered TOML files.
pub struct FileSettings {
    config: Config,
    watcher: Option<RecommendedWatcher>,
}

impl FileSettings {
    pub fn load() -> Self {
        Self {
            config: Config::load(),
            watcher: None,
        }
    }
}

impl SettingsStore for FileSettings {
    fn current(&self) -> &Config {
        &self.config
    }

    fn reload(&mut self) {
        self.config = Config::load();
    }

    fn watch(&mut self, on_change: Box<dyn Fn() + Send>) -> Result<(), ConfigError> {
        let Some(file) = watched_config_file() else {
            debug!("No settings file location to watch");
            return Ok(());
        };
        // A bare relative filename has an empty parent, which can be neither
        // created nor watched; it means the current directory.
        let dir = file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        // The directory must exist before it can be watched; the file itself
        // may appear later.
        let _ = std::fs::create_dir_all(&dir);

        let watched = file.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|path| path.file_name() == watched.file_name());
                    if touches_file
                        && (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                    {
                        on_change();
                    }
                }
                Err(err) => warn!("Settings watcher error: {}", err),
            },
            notify::Config::default(),
        )
        .map_err(|err| ConfigError::Watch(err.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| ConfigError::Watch(err.to_string()))?;
        self.watcher = Some(watcher);
        debug!("Watching {} for settings changes", file.display());
        Ok(())
    }

    fn close(&mut self) {
        if self.watcher.take().is_some() {
            debug!("Settings watcher stopped");
        }
    }
}
