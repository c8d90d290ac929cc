use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{PortalError, PortalResult};

pub(crate) const DEFAULT_CACHE_SECS: u64 = 60 * 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SearchCloudConfig {
    pub(crate) max_term_length: usize,
    pub(crate) window_days: i64,
    pub(crate) popular_limit: usize,
    pub(crate) approved_cache_secs: u64,
}

impl Default for SearchCloudConfig {
    fn default() -> Self {
        Self {
            max_term_length: 200,
            window_days: 30,
            popular_limit: 100,
            approved_cache_secs: DEFAULT_CACHE_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct MostViewedConfig {
    pub(crate) cache_enabled: bool,
    pub(crate) cache_secs: u64,
    pub(crate) default_limit: usize,
}

impl Default for MostViewedConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_secs: DEFAULT_CACHE_SECS,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct PortalConfig {
    pub(crate) database: PathBuf,
    pub(crate) sysadmins: Vec<String>,
    pub(crate) bind: String,
    pub(crate) port: u16,
    pub(crate) publishers_file: PathBuf,
    pub(crate) vocab_dir: PathBuf,
    pub(crate) searchcloud: SearchCloudConfig,
    pub(crate) most_viewed: MostViewedConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("ecportal.sqlite"),
            sysadmins: Vec::new(),
            bind: "127.0.0.1".to_string(),
            port: 5000,
            publishers_file: PathBuf::from("data/po-corporate-bodies.json"),
            vocab_dir: PathBuf::from("data"),
            searchcloud: SearchCloudConfig::default(),
            most_viewed: MostViewedConfig::default(),
        }
    }
}

impl PortalConfig {
    pub(crate) fn is_sysadmin(&self, user: Option<&str>) -> bool {
        match user.map(str::trim) {
            Some(name) if !name.is_empty() => self.sysadmins.iter().any(|admin| admin == name),
            _ => false,
        }
    }

    /// Resolve relative paths against the directory holding the config file.
    fn rebase(&mut self, base: &Path) {
        for path in [
            &mut self.database,
            &mut self.publishers_file,
            &mut self.vocab_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

pub(crate) fn load_portal_config(path: &Path) -> PortalResult<PortalConfig> {
    let data = std::fs::read_to_string(path).map_err(|e| PortalError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut config: PortalConfig =
        serde_json::from_str(&data).map_err(|e| PortalError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.rebase(base);
    Ok(config)
}
