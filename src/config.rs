//! Configuration loading (spec §6 `PSIK_CONFIG`; ambient per SPEC_FULL §A.4).
//!
//! Resolution order follows `original_source/psik/config.py:
//! load_config`: explicit path, else `PSIK_CONFIG`, else a default
//! resolved the way the teacher's `jobstore.rs: resolve_root` resolves
//! its jobs root, via the `directories` crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::model::BackendConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Writable root under which every job directory is allocated.
    pub prefix: PathBuf,
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<String, BackendConfig>,
}

fn default_backends() -> BTreeMap<String, BackendConfig> {
    let mut m = BTreeMap::new();
    m.insert("default".to_string(), BackendConfig::default());
    m
}

/// Resolve the config file path: explicit flag, then `PSIK_CONFIG`,
/// then `~/.config/psik/psik.json`.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("PSIK_CONFIG") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.config_dir().join("psik").join("psik.json");
    }
    PathBuf::from("~/.config/psik/psik.json")
}

/// Load and validate a config file, creating `prefix` if missing.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config at {}", path.display()))?;
    std::fs::create_dir_all(&config.prefix)
        .with_context(|| format!("creating prefix {}", config.prefix.display()))?;
    Ok(config)
}

/// Look up a named backend, falling back to `BackendConfig::default()`
/// treatment only if `name == "default"` and the map has no entry.
pub fn lookup_backend<'a>(config: &'a Config, name: &str) -> Result<&'a BackendConfig> {
    config
        .backends
        .get(name)
        .with_context(|| format!("no such backend configured: {name}"))
}
