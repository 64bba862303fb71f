// Scanner module - 扫描器模块
// 定义漏洞记录、分析器接口与扫描结果

pub mod aggregate;
pub mod lines;
pub mod manager;
pub mod pattern;
pub mod targets;

use crate::error::Result;
use crate::rules::model::Severity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 漏洞发现结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub severity_rank: u8,
    pub file: String,
    pub line: usize,
    pub description: String,
    pub code_snippet: String,
    pub recommendation: String,
    /// Rule id or plugin name that produced the finding.
    pub source: String,
}

/// 分析器 trait - 所有插件都需要实现此接口
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn default_severity(&self) -> Severity;

    fn enabled(&self) -> bool {
        true
    }

    /// File extensions this analyzer cares about; empty means all files.
    fn extensions(&self) -> &[String] {
        &[]
    }

    fn applies_to(&self, path: &Path) -> bool {
        pattern::extension_matches(self.extensions(), path)
    }

    /// 分析单个文件
    async fn analyze(&self, path: &Path, content: &str) -> Result<Vec<Finding>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub files_discovered: usize,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl ScanStats {
    pub(crate) fn started() -> Self {
        Self {
            files_discovered: 0,
            files_scanned: 0,
            files_skipped: 0,
            errors: 0,
            started_at: Utc::now(),
            duration_ms: 0,
            cancelled: false,
        }
    }
}

/// What the engine hands to the reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub findings: Vec<Finding>,
    pub warnings: Vec<String>,
    pub stats: ScanStats,
}
