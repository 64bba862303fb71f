// 扫描调度器：加载一次规则，按文件并发执行规则与插件

use super::aggregate::FindingAggregator;
use super::targets::{resolve_targets, ScanTarget};
use super::{Analyzer, Finding, ScanResult, ScanStats};
use crate::config::{EngineConfig, ScanConfig};
use crate::error::{CoreError, Result};
use crate::rules::loader::{IncrementalLoader, RuleSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Cooperative cancellation, checked between files.
#[derive(Debug, Clone, Default)]
pub struct ScanCancellation(Arc<AtomicBool>);

impl ScanCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum FileOutcome {
    Scanned { findings: Vec<Finding>, warnings: Vec<String> },
    Skipped(String),
    Failed(String),
    Cancelled,
}

#[derive(Clone, Copy)]
struct FileLimits {
    max_bytes: u64,
    max_findings: Option<usize>,
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    config: ScanConfig,
    cancel: ScanCancellation,
}

impl ScanOrchestrator {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            cancel: ScanCancellation::new(),
        }
    }

    /// A handle that stops the scan before the next file starts.
    pub fn cancellation(&self) -> ScanCancellation {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans every target file against the rule set.
    ///
    /// Only an unusable target list is an error. Unreadable files, failing
    /// plugins and panicking tasks end up in `warnings`.
    #[tracing::instrument(skip_all, fields(targets = targets.len()))]
    pub async fn scan(&self, targets: &[PathBuf], rule_set: Arc<RuleSet>) -> Result<ScanResult> {
        let clock = Instant::now();
        let mut stats = ScanStats::started();
        let mut warnings: Vec<String> = rule_set.warnings().to_vec();

        // 目录遍历是阻塞 IO
        let (files, walk_warnings) = {
            let targets = targets.to_vec();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || {
                let mut warnings = Vec::new();
                resolve_targets(&targets, &config, &mut warnings).map(|files| (files, warnings))
            })
            .await
            .map_err(|e| CoreError::Scanner(format!("target resolution aborted: {}", e)))??
        };
        warnings.extend(walk_warnings);
        stats.files_discovered = files.len();
        tracing::info!(
            files = files.len(),
            rules = rule_set.rule_count(),
            plugins = rule_set.plugin_count(),
            "starting scan"
        );

        let limits = FileLimits {
            max_bytes: self.config.max_file_size_bytes(),
            max_findings: self.config.max_findings_per_file,
        };
        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let mut handles = Vec::with_capacity(files.len());

        for target in files {
            if self.cancel.is_cancelled() {
                break;
            }
            // 信号量控制并发文件数
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| CoreError::Scanner(e.to_string()))?;

            let path = target.path.clone();
            let rule_set = Arc::clone(&rule_set);
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                if cancel.is_cancelled() {
                    return FileOutcome::Cancelled;
                }
                scan_file(target, rule_set, limits).await
            });
            handles.push((path, handle));
        }

        let mut findings = Vec::new();
        for (path, handle) in handles {
            match handle.await {
                Ok(FileOutcome::Scanned {
                    findings: file_findings,
                    warnings: file_warnings,
                }) => {
                    stats.files_scanned += 1;
                    stats.errors += file_warnings.len();
                    findings.extend(file_findings);
                    warnings.extend(file_warnings);
                }
                Ok(FileOutcome::Skipped(reason)) => {
                    stats.files_skipped += 1;
                    warnings.push(reason);
                }
                Ok(FileOutcome::Failed(reason)) => {
                    stats.files_skipped += 1;
                    stats.errors += 1;
                    warnings.push(reason);
                }
                Ok(FileOutcome::Cancelled) => {}
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "scan task failed");
                    stats.errors += 1;
                    warnings.push(format!("scan of {} aborted: {}", path.display(), e));
                }
            }
        }

        stats.cancelled = self.cancel.is_cancelled();
        if stats.cancelled {
            warnings.push(format!(
                "scan cancelled after {} of {} files",
                stats.files_scanned, stats.files_discovered
            ));
        }
        stats.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            findings = findings.len(),
            warnings = warnings.len(),
            scanned = stats.files_scanned,
            duration_ms = stats.duration_ms,
            "scan finished"
        );

        Ok(ScanResult {
            findings,
            warnings,
            stats,
        })
    }

    /// Runs the rule set over in-memory content. `path` is only used for
    /// extension filtering and the findings' `file` field.
    pub async fn scan_content(&self, path: &Path, content: &str, rule_set: Arc<RuleSet>) -> (Vec<Finding>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut findings = analyze_content(path, Arc::from(content), rule_set, &mut warnings).await;
        apply_cap(&mut findings, self.config.max_findings_per_file, path, &mut warnings);
        (findings, warnings)
    }
}

async fn scan_file(target: ScanTarget, rule_set: Arc<RuleSet>, limits: FileLimits) -> FileOutcome {
    let path = target.path.as_path();

    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => return FileOutcome::Failed(read_error(path, e)),
    };
    if size > limits.max_bytes {
        tracing::debug!(file = %path.display(), size, "skipping large file");
        return FileOutcome::Skipped(format!(
            "skipped {}: {} bytes exceeds the {} byte limit",
            path.display(),
            size,
            limits.max_bytes
        ));
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => return FileOutcome::Failed(read_error(path, e)),
    };
    let content: Arc<str> = Arc::from(String::from_utf8_lossy(&bytes).as_ref());

    let mut warnings = Vec::new();
    let mut findings = analyze_content(path, content, rule_set, &mut warnings).await;

    if let Some(list) = &target.suppress {
        findings.retain(|f| !list.suppresses(f));
    }
    apply_cap(&mut findings, limits.max_findings, path, &mut warnings);

    FileOutcome::Scanned { findings, warnings }
}

async fn analyze_content(
    path: &Path,
    content: Arc<str>,
    rule_set: Arc<RuleSet>,
    warnings: &mut Vec<String>,
) -> Vec<Finding> {
    let file = path.to_string_lossy().into_owned();

    // 正则匹配是 CPU 密集型，放到阻塞线程池
    let rules_task = {
        let path = path.to_path_buf();
        let content = Arc::clone(&content);
        let rule_set = Arc::clone(&rule_set);
        tokio::task::spawn_blocking(move || evaluate_rules(&path, &content, &rule_set))
    };
    let mut aggregator = match rules_task.await {
        Ok(aggregator) => aggregator,
        Err(e) => {
            tracing::error!(file = %file, error = %e, "rule evaluation failed");
            warnings.push(format!("rule evaluation on {} aborted: {}", file, e));
            FindingAggregator::new(file.as_str(), &content)
        }
    };

    for plugin in rule_set.plugins() {
        if !plugin.enabled() || !plugin.applies_to(path) {
            continue;
        }
        match run_plugin(Arc::clone(plugin), path, Arc::clone(&content)).await {
            Ok(found) => aggregator.push_findings(found),
            Err(e) => {
                tracing::warn!(plugin = plugin.name(), file = %file, error = %e, "plugin failed");
                warnings.push(format!("plugin {} failed on {}: {}", plugin.name(), file, e));
            }
        }
    }

    aggregator.into_findings()
}

fn evaluate_rules(path: &Path, content: &str, rule_set: &RuleSet) -> FindingAggregator {
    let mut aggregator = FindingAggregator::new(path.to_string_lossy(), content);
    for rule in rule_set.rules() {
        if rule.applies_to(path) {
            aggregator.push_matches(&rule.meta, rule.evaluate(content));
        }
    }
    aggregator
}

/// Each plugin call gets its own task, so a panicking plugin only loses its
/// own findings.
async fn run_plugin(plugin: Arc<dyn Analyzer>, path: &Path, content: Arc<str>) -> Result<Vec<Finding>> {
    let name = plugin.name().to_string();
    let path = path.to_path_buf();
    tokio::spawn(async move { plugin.analyze(&path, &content).await })
        .await
        .map_err(|e| CoreError::Analyzer {
            plugin: name,
            message: e.to_string(),
        })?
}

fn apply_cap(findings: &mut Vec<Finding>, cap: Option<usize>, path: &Path, warnings: &mut Vec<String>) {
    let Some(cap) = cap else { return };
    if findings.len() > cap {
        warnings.push(format!(
            "{}: {} findings over the per-file limit of {} were dropped",
            path.display(),
            findings.len() - cap,
            cap
        ));
        findings.truncate(cap);
    }
}

fn read_error(path: &Path, source: std::io::Error) -> String {
    let err = CoreError::FileRead {
        path: path.display().to_string(),
        source,
    };
    tracing::warn!(error = %err, "unreadable file");
    err.to_string()
}

/// Loads the configured rules once and scans `targets` with them.
pub async fn scan_project(config: &EngineConfig, targets: &[PathBuf]) -> Result<ScanResult> {
    let loader_config = config.loader.clone();
    let rule_set = tokio::task::spawn_blocking(move || IncrementalLoader::new(loader_config).load_rules())
        .await
        .map_err(|e| CoreError::Scanner(format!("rule loading aborted: {}", e)))?;

    ScanOrchestrator::new(config.scan.clone())
        .scan(targets, Arc::new(rule_set))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{Combinator, PatternSpec, Rule, Severity};
    use async_trait::async_trait;
    use std::fs;

    struct Exploding;

    #[async_trait]
    impl Analyzer for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn default_severity(&self) -> Severity {
            Severity::Low
        }

        async fn analyze(&self, _path: &Path, _content: &str) -> Result<Vec<Finding>> {
            Err(CoreError::Analyzer {
                plugin: "exploding".into(),
                message: "boom".into(),
            })
        }
    }

    struct Panicking;

    #[async_trait]
    impl Analyzer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn default_severity(&self) -> Severity {
            Severity::Low
        }

        async fn analyze(&self, _path: &Path, _content: &str) -> Result<Vec<Finding>> {
            panic!("analyzer bug");
        }
    }

    fn eval_rule_set() -> RuleSet {
        let rule = Rule {
            id: "unsafe-eval".into(),
            name: "Unsafe Eval".into(),
            severity: Severity::High,
            description: "eval() executes arbitrary code".into(),
            recommendation: "Avoid eval.".into(),
            patterns: vec![PatternSpec {
                key: "eval".into(),
                pattern: r"\beval\s*\(".into(),
                flags: None,
            }],
            combinator: Combinator::AnyOf,
            enabled: true,
            extensions: Vec::new(),
        };
        RuleSet::from_rules(vec![rule])
    }

    #[tokio::test]
    async fn plugin_errors_become_warnings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "eval(x)\n").unwrap();

        let rule_set = eval_rule_set().with_analyzer(Arc::new(Exploding));
        let result = ScanOrchestrator::new(ScanConfig::default())
            .scan(&[dir.path().to_path_buf()], Arc::new(rule_set))
            .await
            .unwrap();

        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.stats.files_scanned, 1);
        assert!(result.warnings.iter().any(|w| w.contains("exploding") && w.contains("a.js")));
    }

    #[tokio::test]
    async fn panicking_plugin_keeps_rule_findings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "eval(x)\n").unwrap();
        fs::write(dir.path().join("b.cfg"), "eval(y)\n").unwrap();
        let config = ScanConfig {
            file_types: Vec::new(),
            ..ScanConfig::default()
        };

        let rule_set = eval_rule_set()
            .with_analyzer(Arc::new(Panicking))
            .with_analyzer(Arc::new(Exploding));
        let result = ScanOrchestrator::new(config)
            .scan(&[dir.path().join("a.js"), dir.path().join("b.cfg")], Arc::new(rule_set))
            .await
            .unwrap();

        assert_eq!(result.stats.files_scanned, 2);
        assert_eq!(result.findings.len(), 2);
        assert!(result.findings.iter().all(|f| f.source == "unsafe-eval"));
        // both plugins fail on both files, the later one still runs
        assert_eq!(result.stats.errors, 4);
        for file in ["a.js", "b.cfg"] {
            assert!(result
                .warnings
                .iter()
                .any(|w| w.contains("panicking") && w.contains(file)));
            assert!(result
                .warnings
                .iter()
                .any(|w| w.contains("exploding") && w.contains(file)));
        }
    }

    #[tokio::test]
    async fn large_files_are_skipped_and_cap_applies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.js"), "eval(1)\n".repeat(200_000)).unwrap();
        fs::write(dir.path().join("small.js"), "eval(1); eval(2); eval(3)\n").unwrap();

        let config = ScanConfig {
            max_file_size_mb: 1,
            max_findings_per_file: Some(2),
            ..ScanConfig::default()
        };
        let result = ScanOrchestrator::new(config)
            .scan(&[dir.path().to_path_buf()], Arc::new(eval_rule_set()))
            .await
            .unwrap();

        assert_eq!(result.stats.files_skipped, 1);
        assert_eq!(result.findings.len(), 2);
        assert!(result.warnings.iter().any(|w| w.contains("big.js")));
        assert!(result.warnings.iter().any(|w| w.contains("per-file limit")));
    }

    #[tokio::test]
    async fn scan_content_without_files() {
        let orchestrator = ScanOrchestrator::new(ScanConfig::default());
        let (findings, warnings) = orchestrator
            .scan_content(Path::new("inline.js"), "\n\n\n\neval(userInput)\n", Arc::new(eval_rule_set()))
            .await;
        assert!(warnings.is_empty());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 5);
    }
}
