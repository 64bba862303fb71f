// Config module - 配置模块
// 引擎、扫描与规则加载配置

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration, loadable from YAML or JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub scan: ScanConfig,
    pub loader: LoaderConfig,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read {}: {}", path.display(), e)))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e))),
            other => Err(CoreError::Config(format!(
                "unsupported config format '{}' for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Target selection and per-file limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanConfig {
    pub file_types: Vec<String>,
    pub ignore_dirs: Vec<String>,
    /// Gitignore-style globs, relative to each scanned directory.
    pub ignore_patterns: Vec<String>,
    pub max_depth: usize,
    pub max_file_size_mb: u64,
    pub max_concurrent_files: usize,
    /// Unset means no cap.
    pub max_findings_per_file: Option<usize>,
    pub respect_gitignore: bool,
    /// Read `.vue-security-ignore` / `.security-ignore` in scanned directories.
    pub use_ignore_files: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            file_types: [".vue", ".js", ".jsx", ".ts", ".tsx", ".json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_dirs: [
                "node_modules", "dist", "build", ".git", "coverage", "public", ".next", ".nuxt",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignore_patterns: vec!["**/*.min.js".to_string(), "**/vendor/**".to_string()],
            max_depth: 10,
            max_file_size_mb: 10,
            max_concurrent_files: 10,
            max_findings_per_file: None,
            respect_gitignore: true,
            use_ignore_files: true,
        }
    }
}

impl ScanConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_files.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    pub rule_dirs: Vec<PathBuf>,
    pub cache_file: PathBuf,
    /// Rule ids and plugin names left out of the loaded rule set.
    pub disabled: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            rule_dirs: vec![PathBuf::from("rules")],
            cache_file: PathBuf::from(".vuesec_cache").join("rule_cache.json"),
            disabled: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vuesec.yaml");
        fs::write(
            &path,
            "scan:\n  maxFileSizeMb: 2\n  maxFindingsPerFile: 50\nloader:\n  ruleDirs: [custom-rules]\n  disabled: [hardcoded-token]\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.scan.max_file_size_mb, 2);
        assert_eq!(config.scan.max_findings_per_file, Some(50));
        assert_eq!(config.scan.max_concurrent_files, 10);
        assert!(config.scan.file_types.contains(&".vue".to_string()));
        assert_eq!(config.loader.rule_dirs, vec![PathBuf::from("custom-rules")]);
        assert_eq!(config.loader.disabled, vec!["hardcoded-token".to_string()]);
        assert_eq!(config.loader.cache_file, LoaderConfig::default().cache_file);
    }

    #[test]
    fn json_and_unknown_formats() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("vuesec.json");
        fs::write(&json, r#"{ "scan": { "maxConcurrentFiles": 0 } }"#).unwrap();
        let config = EngineConfig::from_file(&json).unwrap();
        assert_eq!(config.scan.effective_concurrency(), 1);

        let toml = dir.path().join("vuesec.toml");
        fs::write(&toml, "").unwrap();
        assert!(matches!(EngineConfig::from_file(&toml), Err(CoreError::Config(_))));
    }
}
