use crate::error::{CoreError, Result};
use crate::rules::model::{Combinator, PluginDescriptor, Severity};
use crate::scanner::aggregate::{FindingAggregator, SourceMeta};
use crate::scanner::pattern::CompiledPattern;
use crate::scanner::{Analyzer, Finding};
use async_trait::async_trait;
use std::path::Path;

/// A plugin defined entirely by its descriptor: a list of patterns, each
/// of which may override the finding type and severity.
pub struct PatternAnalyzer {
    descriptor: PluginDescriptor,
    patterns: Vec<(CompiledPattern, SourceMeta)>,
}

impl PatternAnalyzer {
    pub fn from_descriptor(descriptor: &PluginDescriptor, warnings: &mut Vec<String>) -> Result<Self> {
        let mut patterns = Vec::with_capacity(descriptor.patterns.len());
        let mut dropped = 0;

        for pattern in &descriptor.patterns {
            match CompiledPattern::compile(&descriptor.name, &pattern.spec) {
                Ok(compiled) => {
                    let meta = SourceMeta {
                        source_id: descriptor.name.clone(),
                        kind: pattern.name.clone().unwrap_or_else(|| descriptor.name.clone()),
                        severity: pattern.severity.unwrap_or(descriptor.severity),
                        description: descriptor.description.clone(),
                        recommendation: descriptor.recommendation.clone(),
                    };
                    patterns.push((compiled, meta));
                }
                Err(e) => {
                    dropped += 1;
                    warnings.push(e.to_string());
                }
            }
        }

        if patterns.is_empty() || (descriptor.combinator == Combinator::AllOf && dropped > 0) {
            return Err(CoreError::Analyzer {
                plugin: descriptor.name.clone(),
                message: "no usable patterns".to_string(),
            });
        }

        Ok(Self {
            descriptor: descriptor.clone(),
            patterns,
        })
    }
}

#[async_trait]
impl Analyzer for PatternAnalyzer {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn version(&self) -> &str {
        &self.descriptor.version
    }

    fn default_severity(&self) -> Severity {
        self.descriptor.severity
    }

    fn enabled(&self) -> bool {
        self.descriptor.enabled
    }

    fn extensions(&self) -> &[String] {
        &self.descriptor.extensions
    }

    async fn analyze(&self, path: &Path, content: &str) -> Result<Vec<Finding>> {
        let matched: Vec<_> = self
            .patterns
            .iter()
            .map(|(pattern, meta)| (meta, pattern.find_all(content)))
            .collect();

        if self.descriptor.combinator == Combinator::AllOf && matched.iter().any(|(_, m)| m.is_empty()) {
            return Ok(Vec::new());
        }

        let mut aggregator = FindingAggregator::new(path.to_string_lossy(), content);
        for (meta, matches) in matched {
            aggregator.push_matches(meta, matches);
        }
        Ok(aggregator.into_findings())
    }
}
