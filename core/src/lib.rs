// vuesec core library
// 规则加载、模式匹配与扫描调度

pub mod config;
pub mod logging;
pub mod plugins;
pub mod rules;
pub mod scanner;
pub mod suppress;

// 重新导出常用类型
pub use config::{EngineConfig, LoaderConfig, ScanConfig};
pub use logging::init_tracing;
pub use plugins::{PatternAnalyzer, PluginRegistry};
pub use rules::cache::{CacheManager, RuleCache};
pub use rules::loader::{CacheInfo, IncrementalLoader, PluginInfo, RuleSet};
pub use rules::model::{Combinator, PatternSpec, PluginDescriptor, Rule, RuleModule, Severity};
pub use scanner::aggregate::{aggregate, FindingAggregator, SourceMeta};
pub use scanner::lines::{line_of, LineIndex};
pub use scanner::manager::{scan_project, ScanCancellation, ScanOrchestrator};
pub use scanner::pattern::{evaluate, CompiledPattern, CompiledRule, RawMatch};
pub use scanner::targets::{resolve_targets, ScanTarget};
pub use scanner::{Analyzer, Finding, ScanResult, ScanStats};
pub use suppress::IgnoreList;

pub mod error {
    use std::path::PathBuf;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CoreError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("failed to load rule module {path}: {reason}")]
        ModuleLoad { path: String, reason: String },

        #[error("invalid pattern '{key}' in {source_id}: {reason}")]
        PatternCompile {
            source_id: String,
            key: String,
            reason: String,
        },

        #[error("failed to read {path}: {source}")]
        FileRead {
            path: String,
            #[source]
            source: std::io::Error,
        },

        #[error("rule cache error: {0}")]
        CacheIo(String),

        #[error("config error: {0}")]
        Config(String),

        #[error("plugin '{plugin}' failed: {message}")]
        Analyzer { plugin: String, message: String },

        #[error("scan target does not exist: {}", .0.display())]
        TargetNotFound(PathBuf),

        #[error("no scan targets given")]
        NoTargets,

        #[error("Scanner error: {0}")]
        Scanner(String),
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
