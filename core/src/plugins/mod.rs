// Plugin module - 插件模块
// 插件注册表：内置分析器名称 -> 构造函数

pub mod pattern;
pub mod secrets;

pub use pattern::PatternAnalyzer;
pub use secrets::HardcodedSecretsAnalyzer;

use crate::error::{CoreError, Result};
use crate::rules::model::PluginDescriptor;
use crate::scanner::Analyzer;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an analyzer from its descriptor. Non-fatal problems (for
/// example a single bad pattern) are pushed onto `warnings`.
pub type AnalyzerFactory = fn(&PluginDescriptor, &mut Vec<String>) -> Result<Arc<dyn Analyzer>>;

/// Capability table consulted when a plugin module is loaded.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, AnalyzerFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(secrets::BUILTIN_NAME, secrets::build);
        registry
    }

    pub fn register(&mut self, name: &str, factory: AnalyzerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, descriptor: &PluginDescriptor, warnings: &mut Vec<String>) -> Result<Arc<dyn Analyzer>> {
        match &descriptor.builtin {
            Some(builtin) => {
                let factory = self.factories.get(builtin).ok_or_else(|| CoreError::Analyzer {
                    plugin: descriptor.name.clone(),
                    message: format!("no registered analyzer named '{}'", builtin),
                })?;
                factory(descriptor, warnings)
            }
            None => {
                let analyzer = PatternAnalyzer::from_descriptor(descriptor, warnings)?;
                Ok(Arc::new(analyzer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{Combinator, PatternSpec, PluginPattern, Severity};

    fn descriptor(builtin: Option<&str>) -> PluginDescriptor {
        PluginDescriptor {
            name: "demo".into(),
            description: String::new(),
            version: "1.0.0".into(),
            severity: Severity::Medium,
            enabled: true,
            extensions: Vec::new(),
            recommendation: String::new(),
            builtin: builtin.map(str::to_string),
            combinator: Combinator::AnyOf,
            patterns: vec![PluginPattern {
                spec: PatternSpec { key: "k".into(), pattern: "v-html".into(), flags: None },
                name: None,
                severity: None,
            }],
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.contains("hardcoded-secrets"));
        let mut warnings = Vec::new();
        let analyzer = registry.build(&descriptor(Some("hardcoded-secrets")), &mut warnings).unwrap();
        assert_eq!(analyzer.name(), "demo");
    }

    #[test]
    fn unknown_builtin_is_an_error() {
        let registry = PluginRegistry::new();
        let mut warnings = Vec::new();
        assert!(registry.build(&descriptor(Some("missing")), &mut warnings).is_err());
    }

    #[test]
    fn patterns_without_builtin_become_pattern_analyzer() {
        let registry = PluginRegistry::new();
        let mut warnings = Vec::new();
        let analyzer = registry.build(&descriptor(None), &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(analyzer.default_severity(), Severity::Medium);
    }
}
