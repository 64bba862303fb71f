use crate::error::{CoreError, Result};
use crate::rules::model::RuleModule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// On-disk rule cache: module path -> parsed module and its mtime in epoch
/// millis. An entry is only valid while the recorded mtime equals the
/// source file's current mtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCache {
    pub rules: BTreeMap<String, RuleModule>,
    pub last_modified: BTreeMap<String, u64>,
}

impl RuleCache {
    pub fn lookup(&self, key: &str, mtime: u64) -> Option<&RuleModule> {
        match self.last_modified.get(key) {
            Some(cached) if *cached == mtime => self.rules.get(key),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: String, module: RuleModule, mtime: u64) {
        self.last_modified.insert(key.clone(), mtime);
        self.rules.insert(key, module);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let had_rules = self.rules.remove(key).is_some();
        let had_mtime = self.last_modified.remove(key).is_some();
        had_rules || had_mtime
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.last_modified.clear();
    }

    pub fn module_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(RuleModule::rule_count).sum()
    }

    pub fn cached_modules(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }
}

pub struct CacheManager {
    cache_file: PathBuf,
}

impl CacheManager {
    pub fn new(cache_file: impl Into<PathBuf>) -> Self {
        Self {
            cache_file: cache_file.into(),
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Missing or unreadable caches come back as `None`; callers start cold.
    pub fn load_cache(&self) -> Option<RuleCache> {
        if !self.cache_file.exists() {
            return None;
        }

        match fs::read_to_string(&self.cache_file) {
            Ok(data) => match serde_json::from_str::<RuleCache>(&data) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    tracing::warn!(file = %self.cache_file.display(), error = %e, "discarding corrupt rule cache");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(file = %self.cache_file.display(), error = %e, "failed to read rule cache");
                None
            }
        }
    }

    pub fn save_cache(&self, cache: &RuleCache) -> Result<()> {
        if let Some(dir) = self.cache_file.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    CoreError::CacheIo(format!("failed to create cache directory {}: {}", dir.display(), e))
                })?;
            }
        }

        let serialized = serde_json::to_string_pretty(cache)
            .map_err(|e| CoreError::CacheIo(format!("failed to serialize cache: {}", e)))?;

        fs::write(&self.cache_file, serialized).map_err(|e| {
            CoreError::CacheIo(format!("failed to write {}: {}", self.cache_file.display(), e))
        })
    }

    pub fn remove_cache(&self) -> Result<()> {
        if self.cache_file.exists() {
            fs::remove_file(&self.cache_file).map_err(|e| {
                CoreError::CacheIo(format!("failed to remove {}: {}", self.cache_file.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn file_mtime(path: &Path) -> Result<u64> {
        let mtime = fs::metadata(path)?.modified()?;
        let duration = mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| CoreError::CacheIo(format!("mtime before epoch for {}: {}", path.display(), e)))?;
        Ok(duration.as_millis() as u64)
    }
}
