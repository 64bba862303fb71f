use crate::error::Result;
use crate::rules::model::{PatternSpec, PluginDescriptor, Severity};
use crate::scanner::aggregate::{finding_id, truncate_snippet};
use crate::scanner::lines::LineIndex;
use crate::scanner::pattern::CompiledPattern;
use crate::scanner::{Analyzer, Finding};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub const BUILTIN_NAME: &str = "hardcoded-secrets";

const RECOMMENDATION: &str =
    "Move sensitive credentials to environment variables or secure vault systems.";

// (kind, regex, flags). Capture group 1, when present, is the secret value.
const SECRET_PATTERNS: &[(&str, &str, &str)] = &[
    ("API Key", r#"(?:api[_-]?key|apikey)\s*[:=]\s*['"`]([A-Za-z0-9_\-]{20,})['"`]"#, "gi"),
    ("Password", r#"(?:password|passwd|pwd)\s*[:=]\s*['"`]([^'"`]{6,})['"`]"#, "gi"),
    ("Secret Token", r#"(?:secret|token)\s*[:=]\s*['"`]([A-Za-z0-9_\-]{16,})['"`]"#, "gi"),
    ("JWT Token", r"eyJ[A-Za-z0-9_\-]*\.eyJ[A-Za-z0-9_\-]*\.[A-Za-z0-9_\-]*", "g"),
    (
        "Database Credentials",
        r#"(?:username|user)\s*[:=]\s*['"`]([^'"`]+)['"`].*?(?:password|passwd)\s*[:=]\s*['"`]([^'"`]+)['"`]"#,
        "gs",
    ),
];

const PLACEHOLDERS: &[&str] = &[
    "changeme", "change_me", "password", "your_password", "yourpassword", "example", "placeholder",
    "secret", "xxxxxx", "todo", "redacted", "dummy",
];

/// 硬编码密钥检测
///
/// Unlike a plain pattern plugin, matched values are inspected before they
/// are reported: environment lookups, template interpolation, repeated
/// characters and well-known placeholders are skipped.
pub struct HardcodedSecretsAnalyzer {
    name: String,
    description: String,
    version: String,
    severity: Severity,
    enabled: bool,
    extensions: Vec<String>,
    recommendation: String,
    patterns: Vec<(&'static str, CompiledPattern)>,
}

pub(crate) fn build(descriptor: &PluginDescriptor, warnings: &mut Vec<String>) -> Result<Arc<dyn Analyzer>> {
    Ok(Arc::new(HardcodedSecretsAnalyzer::from_descriptor(descriptor, warnings)))
}

impl HardcodedSecretsAnalyzer {
    pub fn new() -> Self {
        let descriptor = PluginDescriptor {
            name: "Hardcoded Secrets Detection".to_string(),
            description: "Detects hardcoded credentials and keys".to_string(),
            version: "1.0.0".to_string(),
            severity: Severity::High,
            enabled: true,
            extensions: Vec::new(),
            recommendation: RECOMMENDATION.to_string(),
            builtin: Some(BUILTIN_NAME.to_string()),
            combinator: Default::default(),
            patterns: Vec::new(),
        };
        Self::from_descriptor(&descriptor, &mut Vec::new())
    }

    pub fn from_descriptor(descriptor: &PluginDescriptor, warnings: &mut Vec<String>) -> Self {
        let patterns = SECRET_PATTERNS
            .iter()
            .filter_map(|(kind, pattern, flags)| {
                let spec = PatternSpec {
                    key: kind.to_lowercase().replace(' ', "-"),
                    pattern: pattern.to_string(),
                    flags: Some(flags.to_string()),
                };
                match CompiledPattern::compile(&descriptor.name, &spec) {
                    Ok(compiled) => Some((*kind, compiled)),
                    Err(e) => {
                        warnings.push(e.to_string());
                        None
                    }
                }
            })
            .collect();

        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            version: descriptor.version.clone(),
            severity: descriptor.severity,
            enabled: descriptor.enabled,
            extensions: descriptor.extensions.clone(),
            recommendation: if descriptor.recommendation.trim().is_empty() {
                RECOMMENDATION.to_string()
            } else {
                descriptor.recommendation.clone()
            },
            patterns,
        }
    }

    fn is_placeholder(value: &str) -> bool {
        let value = value.trim();
        let lower = value.to_ascii_lowercase();

        if lower.contains("process.env") || lower.contains("import.meta.env") || value.contains("${") {
            return true;
        }
        if value.starts_with('<') && value.ends_with('>') {
            return true;
        }
        if value.starts_with("{{") && value.ends_with("}}") {
            return true;
        }

        let mut chars = value.chars();
        if let Some(first) = chars.next() {
            if chars.all(|c| c == first) {
                return true;
            }
        }

        PLACEHOLDERS.contains(&lower.as_str())
    }
}

impl Default for HardcodedSecretsAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for HardcodedSecretsAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn default_severity(&self) -> Severity {
        self.severity
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    async fn analyze(&self, path: &Path, content: &str) -> Result<Vec<Finding>> {
        let file = path.to_string_lossy();
        let lines = LineIndex::new(content);
        let mut findings = Vec::new();

        for (kind, pattern) in &self.patterns {
            for caps in pattern.regex().captures_iter(content) {
                let Some(whole) = caps.get(0) else { continue };
                let values: Vec<&str> = caps.iter().skip(1).flatten().map(|m| m.as_str()).collect();
                if !values.is_empty() && values.iter().all(|v| Self::is_placeholder(v)) {
                    continue;
                }

                let text = whole.as_str();
                let preview: String = text.chars().take(50).collect();
                findings.push(Finding {
                    id: finding_id(&self.name, &file, whole.start(), text),
                    kind: format!("Hardcoded {}", kind),
                    severity: self.severity,
                    severity_rank: self.severity.rank(),
                    file: file.to_string(),
                    line: lines.line_of(whole.start()),
                    description: format!("Possible hardcoded {}: {}...", kind.to_lowercase(), preview),
                    code_snippet: truncate_snippet(text),
                    recommendation: self.recommendation.clone(),
                    source: self.name.clone(),
                });
            }
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_real_secrets() {
        let analyzer = HardcodedSecretsAnalyzer::new();
        let content = "const cfg = {\n  apiKey: 'AKIAabcdefghijklmnop1234',\n  password: 'hunter22'\n};\n";
        let findings = analyzer.analyze(Path::new("src/config.js"), content).await.unwrap();
        let kinds: Vec<&str> = findings.iter().map(|f| f.kind.as_str()).collect();
        assert!(kinds.contains(&"Hardcoded API Key"));
        assert!(kinds.contains(&"Hardcoded Password"));
        let password = findings.iter().find(|f| f.kind == "Hardcoded Password").unwrap();
        assert_eq!(password.line, 3);
        assert_eq!(password.severity, Severity::High);
    }

    #[tokio::test]
    async fn skips_placeholders() {
        let analyzer = HardcodedSecretsAnalyzer::new();
        let content = "password: '${DB_PASSWORD}'\npassword = 'changeme'\npwd = '********'\n";
        let findings = analyzer.analyze(Path::new("a.js"), content).await.unwrap();
        assert!(findings.is_empty(), "{:?}", findings);
    }

    #[tokio::test]
    async fn finds_jwt_tokens() {
        let analyzer = HardcodedSecretsAnalyzer::new();
        let content = "const t = 'eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig';";
        let findings = analyzer.analyze(Path::new("a.ts"), content).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "Hardcoded JWT Token");
    }

    #[tokio::test]
    async fn recommendation_comes_from_the_descriptor() {
        let mut descriptor = PluginDescriptor {
            name: "secrets".to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            severity: Severity::Medium,
            enabled: true,
            extensions: Vec::new(),
            recommendation: "Load keys from the vault.".to_string(),
            builtin: Some(BUILTIN_NAME.to_string()),
            combinator: Default::default(),
            patterns: Vec::new(),
        };
        let content = "password = 'hunter22'\n";

        let analyzer = HardcodedSecretsAnalyzer::from_descriptor(&descriptor, &mut Vec::new());
        let findings = analyzer.analyze(Path::new("a.js"), content).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].recommendation, "Load keys from the vault.");

        descriptor.recommendation.clear();
        let analyzer = HardcodedSecretsAnalyzer::from_descriptor(&descriptor, &mut Vec::new());
        let findings = analyzer.analyze(Path::new("a.js"), content).await.unwrap();
        assert_eq!(findings[0].recommendation, RECOMMENDATION);
    }

    #[test]
    fn placeholder_detection() {
        assert!(HardcodedSecretsAnalyzer::is_placeholder("process.env.API_KEY"));
        assert!(HardcodedSecretsAnalyzer::is_placeholder("<your-key>"));
        assert!(HardcodedSecretsAnalyzer::is_placeholder("aaaaaaaa"));
        assert!(!HardcodedSecretsAnalyzer::is_placeholder("s3cr3t-value"));
    }
}
