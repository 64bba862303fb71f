use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 规则严重级别
///
/// Variants are declared in ascending order so the derived `Ord` gives
/// `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Comparable ordinal for presentation-layer sorting (Critical = 4, Low = 1).
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How the sub-patterns of one rule combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Combinator {
    /// Every match of every pattern is reported on its own.
    #[default]
    AnyOf,
    /// Matches are reported only when every pattern matched at least once.
    AllOf,
}

impl Combinator {
    fn is_default(&self) -> bool {
        *self == Combinator::AnyOf
    }
}

/// A single regex source plus JS-style flags.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatternSpec {
    pub key: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommendation: String,
    pub patterns: Vec<PatternSpec>,
    #[serde(default, skip_serializing_if = "Combinator::is_default")]
    pub combinator: Combinator,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

impl Rule {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("rule without id".to_string());
        }
        if self.patterns.is_empty() {
            return Err(format!("rule '{}' declares no patterns", self.id));
        }
        validate_patterns(&self.id, &self.patterns)
    }

    /// Multi-pattern `any-of` rules whose description reads like a joint
    /// condition. These are surfaced for manual review, never rewritten.
    pub fn suggests_conjunction(&self) -> bool {
        if self.patterns.len() < 2 || self.combinator != Combinator::AnyOf {
            return false;
        }
        let text = format!(" {} ", self.description.to_lowercase());
        [" and ", " with ", " without ", " both ", " combined "]
            .iter()
            .any(|needle| text.contains(needle))
    }
}

/// A pattern owned by a declarative plugin, optionally overriding the
/// plugin-level finding type and severity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PluginPattern {
    #[serde(flatten)]
    pub spec: PatternSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// 插件描述
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
    /// Name of a registered analyzer implementation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
    #[serde(default, skip_serializing_if = "Combinator::is_default")]
    pub combinator: Combinator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<PluginPattern>,
}

impl PluginDescriptor {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("plugin without name".to_string());
        }
        if self.builtin.is_none() && self.patterns.is_empty() {
            return Err(format!(
                "plugin '{}' names no builtin analyzer and declares no patterns",
                self.name
            ));
        }
        let specs: Vec<PatternSpec> = self.patterns.iter().map(|p| p.spec.clone()).collect();
        validate_patterns(&self.name, &specs)
    }
}

/// One rule source file: an array of rules XOR a single plugin object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RuleModule {
    Rules(Vec<Rule>),
    Plugin(PluginDescriptor),
}

impl RuleModule {
    /// Checks the shape of a parsed document and validates its contents.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let module = match value {
            serde_json::Value::Array(_) => {
                let rules: Vec<Rule> =
                    serde_json::from_value(value).map_err(|e| format!("invalid rule array: {}", e))?;
                RuleModule::Rules(rules)
            }
            serde_json::Value::Object(_) => {
                let plugin: PluginDescriptor = serde_json::from_value(value)
                    .map_err(|e| format!("invalid plugin object: {}", e))?;
                RuleModule::Plugin(plugin)
            }
            other => {
                return Err(format!(
                    "expected an array of rules or a plugin object, found {}",
                    json_kind(&other)
                ))
            }
        };
        module.validate()?;
        Ok(module)
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            RuleModule::Rules(rules) => rules.iter().try_for_each(Rule::validate),
            RuleModule::Plugin(plugin) => plugin.validate(),
        }
    }

    pub fn rule_count(&self) -> usize {
        match self {
            RuleModule::Rules(rules) => rules.len(),
            RuleModule::Plugin(_) => 0,
        }
    }
}

fn validate_patterns(owner: &str, patterns: &[PatternSpec]) -> Result<(), String> {
    for spec in patterns {
        if spec.key.trim().is_empty() {
            return Err(format!("'{}' has a pattern without key", owner));
        }
        if spec.pattern.is_empty() {
            return Err(format!("'{}' pattern '{}' is empty", owner, spec.key));
        }
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn default_version() -> String {
    "1.0.0".to_string()
}
