use crate::config::LoaderConfig;
use crate::error::CoreError;
use crate::plugins::PluginRegistry;
use crate::rules::cache::{CacheManager, RuleCache};
use crate::rules::model::{Rule, RuleModule, Severity};
use crate::scanner::pattern::CompiledRule;
use crate::scanner::Analyzer;
use anyhow::Context;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// The compiled rules and plugins of one load pass. Read-only once built and
/// shared between concurrent file scans.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Arc<CompiledRule>>,
    plugins: Vec<Arc<dyn Analyzer>>,
    warnings: Vec<String>,
    flagged_for_review: Vec<String>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compiles rules defined in code, applying the same checks as a load
    /// pass: bad patterns and duplicate ids become warnings.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        let mut set = Self::default();
        let mut ids = HashSet::new();

        for rule in rules {
            if !ids.insert(rule.id.clone()) {
                set.warnings.push(format!("duplicate rule id '{}' ignored", rule.id));
                continue;
            }
            let (compiled, errors) = CompiledRule::compile(&rule);
            set.warnings.extend(errors.iter().map(ToString::to_string));
            let Some(compiled) = compiled else {
                set.warnings
                    .push(format!("rule '{}' has no usable patterns and was skipped", rule.id));
                continue;
            };
            if rule.suggests_conjunction() {
                set.flagged_for_review.push(rule.id.clone());
            }
            set.rules.push(Arc::new(compiled));
        }

        set
    }

    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    pub fn plugins(&self) -> &[Arc<dyn Analyzer>] {
        &self.plugins
    }

    /// Problems met while loading: broken modules, invalid patterns,
    /// duplicate ids, cache write failures.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Ids of `any-of` rules whose description suggests all patterns were
    /// meant to match together.
    pub fn flagged_for_review(&self) -> &[String] {
        &self.flagged_for_review
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn get_rule(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id() == id).map(|r| r.as_ref())
    }

    /// Registers an analyzer built in code rather than loaded from a file.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        if self.plugins.iter().any(|p| p.name() == analyzer.name()) {
            self.warnings
                .push(format!("duplicate plugin '{}' ignored", analyzer.name()));
        } else {
            self.plugins.push(analyzer);
        }
        self
    }

    pub fn plugins_info(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                description: p.description().to_string(),
                version: p.version().to_string(),
                severity: p.default_severity(),
                enabled: p.enabled(),
            })
            .collect()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.rules.len())
            .field("plugins", &self.plugins.len())
            .field("warnings", &self.warnings)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub severity: Severity,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub rule_count: usize,
    pub module_count: usize,
    pub cached_modules: Vec<String>,
}

struct CompiledModule {
    generation: u64,
    rules: Vec<Arc<CompiledRule>>,
    plugin: Option<Arc<dyn Analyzer>>,
    warnings: Vec<String>,
}

enum Resolution {
    Cached,
    Parsed { module: RuleModule, mtime: u64 },
    Failed(CoreError),
}

/// 增量规则加载器
///
/// Discovers rule files, reuses cached modules whose mtime is unchanged and
/// reparses the rest. Every reparse bumps the module's load generation;
/// compiled modules are kept per generation so unchanged modules are not
/// recompiled either.
pub struct IncrementalLoader {
    config: LoaderConfig,
    registry: PluginRegistry,
    cache_manager: CacheManager,
    cache: RuleCache,
    generations: HashMap<String, u64>,
    compiled: HashMap<String, CompiledModule>,
}

impl IncrementalLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_registry(config, PluginRegistry::with_builtins())
    }

    pub fn with_registry(config: LoaderConfig, registry: PluginRegistry) -> Self {
        let cache_manager = CacheManager::new(config.cache_file.clone());
        let cache = cache_manager.load_cache().unwrap_or_else(|| {
            tracing::info!(file = %cache_manager.cache_file().display(), "starting with an empty rule cache");
            RuleCache::default()
        });

        Self {
            config,
            registry,
            cache_manager,
            cache,
            generations: HashMap::new(),
            compiled: HashMap::new(),
        }
    }

    #[tracing::instrument(skip_all, fields(dirs = self.config.rule_dirs.len()))]
    pub fn load_rules(&mut self) -> RuleSet {
        let mut warnings = Vec::new();
        let files = self.discover(&mut warnings);

        let cache = &self.cache;
        let resolved: Vec<(String, Resolution)> = files
            .par_iter()
            .map(|path| {
                let key = module_key(path);
                let resolution = resolve_module(cache, &key, path);
                (key, resolution)
            })
            .collect();

        let discovered: HashSet<String> = resolved.iter().map(|(key, _)| key.clone()).collect();
        let mut loaded = Vec::with_capacity(resolved.len());
        let mut reparsed = 0usize;

        for (key, resolution) in resolved {
            match resolution {
                Resolution::Cached => loaded.push(key),
                Resolution::Parsed { module, mtime } => {
                    self.cache.insert(key.clone(), module, mtime);
                    *self.generations.entry(key.clone()).or_insert(0) += 1;
                    reparsed += 1;
                    loaded.push(key);
                }
                Resolution::Failed(err) => {
                    tracing::warn!(module = %key, error = %err, "skipping rule module");
                    self.cache.remove(&key);
                    self.compiled.remove(&key);
                    warnings.push(err.to_string());
                }
            }
        }

        let stale: Vec<String> = self
            .cache
            .cached_modules()
            .into_iter()
            .filter(|key| !discovered.contains(key))
            .collect();
        for key in &stale {
            self.cache.remove(key);
            self.compiled.remove(key);
            self.generations.remove(key);
        }

        let mut rule_set = self.assemble(&loaded, warnings);

        if let Err(e) = self.cache_manager.save_cache(&self.cache) {
            tracing::warn!(error = %e, "failed to persist rule cache");
            rule_set.warnings.push(e.to_string());
        }

        tracing::info!(
            modules = loaded.len(),
            reparsed,
            pruned = stale.len(),
            rules = rule_set.rule_count(),
            plugins = rule_set.plugin_count(),
            "rule set loaded"
        );
        rule_set
    }

    /// Drops one module from the cache; the next load reparses it.
    pub fn invalidate_module(&mut self, path: &Path) {
        let key = module_key(path);
        self.cache.remove(&key);
        self.compiled.remove(&key);
        if let Err(e) = self.cache_manager.save_cache(&self.cache) {
            tracing::warn!(module = %key, error = %e, "failed to persist rule cache");
        }
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
        self.compiled.clear();
        if let Err(e) = self.cache_manager.remove_cache() {
            tracing::warn!(error = %e, "failed to remove rule cache");
        }
    }

    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            rule_count: self.cache.rule_count(),
            module_count: self.cache.module_count(),
            cached_modules: self.cache.cached_modules(),
        }
    }

    /// How many times this process has parsed the module (0 = served from
    /// the on-disk cache or never seen).
    pub fn generation(&self, path: &Path) -> u64 {
        self.generations.get(&module_key(path)).copied().unwrap_or(0)
    }

    pub fn cache_file(&self) -> &Path {
        self.cache_manager.cache_file()
    }

    fn discover(&self, warnings: &mut Vec<String>) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut seen = HashSet::new();

        for dir in &self.config.rule_dirs {
            if !dir.is_dir() {
                tracing::warn!(dir = %dir.display(), "rule directory not found");
                warnings.push(format!("rule directory not found: {}", dir.display()));
                continue;
            }

            for entry in WalkDir::new(dir).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warnings.push(format!("skipping rule path: {}", e));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if path == self.cache_manager.cache_file() || !is_rule_source(path) {
                    continue;
                }
                if seen.insert(path.to_path_buf()) {
                    files.push(path.to_path_buf());
                }
            }
        }

        files
    }

    fn assemble(&mut self, loaded: &[String], mut warnings: Vec<String>) -> RuleSet {
        let disabled: HashSet<&str> = self.config.disabled.iter().map(String::as_str).collect();
        let mut rule_set = RuleSet::default();
        let mut rule_ids = HashSet::new();
        let mut plugin_names = HashSet::new();

        for key in loaded {
            let generation = self.generations.get(key).copied().unwrap_or(0);
            let up_to_date = matches!(self.compiled.get(key), Some(c) if c.generation == generation);
            if !up_to_date {
                let Some(module) = self.cache.rules.get(key) else {
                    continue;
                };
                let compiled = compile_module(&self.registry, key, module, generation);
                self.compiled.insert(key.clone(), compiled);
            }
            let Some(compiled) = self.compiled.get(key) else {
                continue;
            };

            warnings.extend(compiled.warnings.iter().cloned());

            for rule in &compiled.rules {
                if !rule.rule.enabled || disabled.contains(rule.id()) {
                    tracing::debug!(rule = rule.id(), "rule disabled");
                    continue;
                }
                if !rule_ids.insert(rule.id().to_string()) {
                    warnings.push(format!("duplicate rule id '{}' in {} ignored", rule.id(), key));
                    continue;
                }
                if rule.rule.suggests_conjunction() {
                    tracing::debug!(rule = rule.id(), "any-of rule reads like a joint condition");
                    rule_set.flagged_for_review.push(rule.id().to_string());
                }
                rule_set.rules.push(Arc::clone(rule));
            }

            if let Some(plugin) = &compiled.plugin {
                if disabled.contains(plugin.name()) {
                    continue;
                }
                if !plugin_names.insert(plugin.name().to_string()) {
                    warnings.push(format!("duplicate plugin '{}' in {} ignored", plugin.name(), key));
                    continue;
                }
                rule_set.plugins.push(Arc::clone(plugin));
            }
        }

        rule_set.warnings = warnings;
        rule_set
    }
}

fn compile_module(registry: &PluginRegistry, key: &str, module: &RuleModule, generation: u64) -> CompiledModule {
    let mut rules = Vec::new();
    let mut plugin = None;
    let mut warnings = Vec::new();

    match module {
        RuleModule::Rules(descriptors) => {
            for descriptor in descriptors {
                let (compiled, errors) = CompiledRule::compile(descriptor);
                warnings.extend(errors.iter().map(ToString::to_string));
                match compiled {
                    Some(rule) => rules.push(Arc::new(rule)),
                    None => warnings.push(format!(
                        "rule '{}' in {} has no usable patterns and was skipped",
                        descriptor.id, key
                    )),
                }
            }
        }
        RuleModule::Plugin(descriptor) => match registry.build(descriptor, &mut warnings) {
            Ok(analyzer) => plugin = Some(analyzer),
            Err(e) => warnings.push(format!("{}: {}", key, e)),
        },
    }

    CompiledModule {
        generation,
        rules,
        plugin,
        warnings,
    }
}

fn resolve_module(cache: &RuleCache, key: &str, path: &Path) -> Resolution {
    let mtime = match CacheManager::file_mtime(path) {
        Ok(mtime) => mtime,
        Err(e) => {
            return Resolution::Failed(CoreError::ModuleLoad {
                path: key.to_string(),
                reason: e.to_string(),
            })
        }
    };

    if cache.lookup(key, mtime).is_some() {
        return Resolution::Cached;
    }

    match parse_module(path) {
        Ok(module) => Resolution::Parsed { module, mtime },
        Err(e) => Resolution::Failed(CoreError::ModuleLoad {
            path: key.to_string(),
            reason: format!("{:#}", e),
        }),
    }
}

fn parse_module(path: &Path) -> anyhow::Result<RuleModule> {
    let content = fs::read_to_string(path).context("failed to read rule file")?;
    let value: serde_json::Value = if has_extension(path, &["json"]) {
        serde_json::from_str(&content).context("invalid JSON")?
    } else {
        serde_yaml::from_str(&content).context("invalid YAML")?
    };
    RuleModule::from_value(value).map_err(anyhow::Error::msg)
}

fn is_rule_source(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('_') || n.starts_with('.'));
    !hidden && has_extension(path, &["json", "yaml", "yml"])
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
}

fn module_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
