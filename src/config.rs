use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::highlights::ScanSettings;
use crate::highlights::reconcile::DEFAULT_FUZZY_WINDOW;

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap());

#[derive(Parser, Debug)]
#[command(name = "marginalia")]
#[command(about = "Tracks highlights and comments in plain-text notes", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rescan the given files once and persist any change
    Scan { files: Vec<PathBuf> },
    /// Watch a directory tree and rescan files as they change
    Watch { root: Option<PathBuf> },
    /// Print stored records as JSON
    Show {
        file: Option<PathBuf>,
        #[arg(short, long)]
        pretty: bool,
    },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".marginalia")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

fn default_store_path() -> PathBuf {
    default_config_dir().join("highlights.json")
}

fn default_fuzzy_window() -> usize {
    DEFAULT_FUZZY_WINDOW
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string(), "txt".to_string()]
}

fn default_watch_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_debounce_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct Store {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scan {
    #[serde(default = "default_fuzzy_window")]
    pub fuzzy_window: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for Scan {
    fn default() -> Self {
        Self {
            fuzzy_window: default_fuzzy_window(),
            extensions: default_extensions(),
        }
    }
}

impl Scan {
    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            fuzzy_window: self.fuzzy_window,
        }
    }

    /// Whether `path` names a prose document that should be scanned.
    pub fn is_prose(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Watch {
    #[serde(default = "default_watch_root")]
    pub root: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            root: default_watch_root(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub watch: Watch,
}

impl Config {
    pub fn new(path: &Path) -> Result<Self, ConfigError> {
        let yaml_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml_str, path)
    }

    /// Loads `path`, or falls back to defaults when the file is absent and was
    /// not asked for explicitly.
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        if !explicit && !path.exists() {
            tracing::debug!(path = ?path, "no config file, using defaults");
            return Ok(Config::default());
        }
        Self::new(path)
    }

    fn from_yaml(yaml_str: &str, path: &Path) -> Result<Self, ConfigError> {
        let yaml_with_env = substitute_env_vars(yaml_str);
        if yaml_with_env.trim().is_empty() {
            return Ok(Config::default());
        }

        let mut config: Config =
            serde_yaml::from_str(&yaml_with_env).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.store.path = expand_home(&config.store.path);
        config.watch.root = expand_home(&config.watch.root);
        Ok(config)
    }
}

/// Replaces `${VAR}` and `${VAR:-default}` with values from the environment.
/// An unset variable without a default becomes an empty string.
pub fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match (env::var(name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    tracing::warn!(variable = name, "environment variable not set");
                    String::new()
                }
            }
        })
        .into_owned()
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
