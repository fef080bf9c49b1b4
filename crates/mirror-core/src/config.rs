//! Process configuration loaded from `MIRROR_*` environment variables.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::observability::LogFormat;

/// Runtime configuration for the catalog service and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Root directory of the persisted catalog (`MIRROR_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Checked-out external codebase whose schema is mirrored (`MIRROR_SOURCE_REPO`).
    pub source_repo: PathBuf,
    /// Script that fetches new commits into `source_repo` (`MIRROR_REFRESH_SCRIPT`).
    pub refresh_script: PathBuf,
    /// Extraction documents, one per source system (`MIRROR_EXTRACTION_PATHS`).
    pub extraction_paths: Vec<PathBuf>,
    /// Log output format (`MIRROR_LOG_FORMAT`).
    #[serde(skip)]
    pub log_format: LogFormat,
    /// Verbose logging (`MIRROR_DEBUG`).
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./.mirror"),
            source_repo: PathBuf::from("./source"),
            refresh_script: PathBuf::from("./scripts/refresh.sh"),
            extraction_paths: Vec::new(),
            log_format: LogFormat::default(),
            debug: false,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Unset or blank variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        if let Some(dir) = env.string("MIRROR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(repo) = env.string("MIRROR_SOURCE_REPO") {
            config.source_repo = PathBuf::from(repo);
        }
        if let Some(script) = env.string("MIRROR_REFRESH_SCRIPT") {
            config.refresh_script = PathBuf::from(script);
        }
        if let Some(paths) = env.string("MIRROR_EXTRACTION_PATHS") {
            config.extraction_paths = parse_path_list(&paths);
        }
        if let Some(format) = env.string("MIRROR_LOG_FORMAT") {
            config.log_format = format.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "MIRROR_LOG_FORMAT must be 'json' or 'pretty' (got {format})"
                ))
            })?;
        }
        if let Some(debug) = env.bool("MIRROR_DEBUG")? {
            config.debug = debug;
        }

        Ok(config)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
