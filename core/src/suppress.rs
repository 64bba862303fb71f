// Suppression module - 忽略文件与发现抑制
// `.vue-security-ignore` (or `.security-ignore`) lines:
//   type:<text>      drop findings whose type contains <text>
//   rule:<text>      drop findings whose source contains <text> (also plugin:)
//   severity:<level> drop findings of that severity
//   anything else    gitignore-style path glob, or an exact rule id / finding type

use crate::scanner::Finding;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::path::Path;

pub const IGNORE_FILES: &[&str] = &[".vue-security-ignore", ".security-ignore"];

#[derive(Debug, Clone)]
pub struct IgnoreList {
    paths: Gitignore,
    exact: Vec<String>,
    types: Vec<String>,
    sources: Vec<String>,
    severities: Vec<String>,
}

impl IgnoreList {
    /// Builds the list for `root` from the configured glob patterns plus the
    /// first ignore file found in `root`, if `read_files` is set.
    pub fn load(root: &Path, extra_patterns: &[String], read_files: bool, warnings: &mut Vec<String>) -> Self {
        let mut lines: Vec<String> = extra_patterns.to_vec();

        if read_files {
            if let Some(file) = IGNORE_FILES.iter().map(|n| root.join(n)).find(|p| p.is_file()) {
                match fs::read_to_string(&file) {
                    Ok(content) => {
                        tracing::debug!(file = %file.display(), "using ignore file");
                        lines.extend(content.lines().map(str::to_string));
                    }
                    Err(e) => warnings.push(format!("failed to read {}: {}", file.display(), e)),
                }
            }
        }

        Self::from_lines(root, &lines, warnings)
    }

    pub fn from_lines(root: &Path, lines: &[String], warnings: &mut Vec<String>) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut exact = Vec::new();
        let mut types = Vec::new();
        let mut sources = Vec::new();
        let mut severities = Vec::new();

        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("type:") {
                types.push(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("rule:").or_else(|| line.strip_prefix("plugin:")) {
                sources.push(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("severity:") {
                severities.push(rest.trim().to_string());
            } else {
                exact.push(line.to_string());
                if let Err(e) = builder.add_line(None, line) {
                    warnings.push(format!("invalid ignore pattern '{}': {}", line, e));
                }
            }
        }

        let paths = builder.build().unwrap_or_else(|e| {
            warnings.push(format!("failed to build ignore patterns: {}", e));
            Gitignore::empty()
        });

        Self {
            paths,
            exact,
            types,
            sources,
            severities,
        }
    }

    /// `path` is relative to the directory the list was loaded for.
    pub fn ignores_path(&self, path: &Path) -> bool {
        self.paths.matched_path_or_any_parents(path, false).is_ignore()
    }

    pub fn suppresses(&self, finding: &Finding) -> bool {
        if self.exact.iter().any(|e| *e == finding.source || *e == finding.kind) {
            return true;
        }
        if self.types.iter().any(|t| finding.kind.contains(t.as_str())) {
            return true;
        }
        if self.sources.iter().any(|s| finding.source.contains(s.as_str())) {
            return true;
        }
        self.severities
            .iter()
            .any(|s| s.eq_ignore_ascii_case(finding.severity.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
            && self.types.is_empty()
            && self.sources.is_empty()
            && self.severities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::Severity;

    fn finding(source: &str, kind: &str, severity: Severity) -> Finding {
        Finding {
            id: format!("{}-0", source),
            kind: kind.into(),
            severity,
            severity_rank: severity.rank(),
            file: "src/a.js".into(),
            line: 1,
            description: String::new(),
            code_snippet: String::new(),
            recommendation: String::new(),
            source: source.into(),
        }
    }

    fn list(lines: &[&str]) -> IgnoreList {
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        let mut warnings = Vec::new();
        let list = IgnoreList::from_lines(Path::new("/project"), &lines, &mut warnings);
        assert!(warnings.is_empty(), "{:?}", warnings);
        list
    }

    #[test]
    fn path_globs() {
        let list = list(&["# comment", "", "**/*.min.js", "legacy/"]);
        assert!(list.ignores_path(Path::new("dist/app.min.js")));
        assert!(list.ignores_path(Path::new("legacy/old/form.vue")));
        assert!(!list.ignores_path(Path::new("src/App.vue")));
    }

    #[test]
    fn prefixed_entries() {
        let list = list(&["type:Cross-Site", "rule:unsafe-eval", "severity:low"]);
        assert!(list.suppresses(&finding("xss-v-html", "Cross-Site Scripting", Severity::High)));
        assert!(list.suppresses(&finding("unsafe-eval", "Code Injection", Severity::High)));
        assert!(list.suppresses(&finding("x", "y", Severity::Low)));
        assert!(!list.suppresses(&finding("hardcoded-password", "Hardcoded Password", Severity::High)));
    }

    #[test]
    fn bare_entries_match_rule_ids_exactly() {
        let list = list(&["hardcoded-password"]);
        assert!(list.suppresses(&finding("hardcoded-password", "Hardcoded Password", Severity::High)));
        assert!(!list.suppresses(&finding("hardcoded-password-2", "Hardcoded Password", Severity::High)));
    }

    #[test]
    fn reads_the_first_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".vue-security-ignore"), "severity:medium\n").unwrap();
        fs::write(dir.path().join(".security-ignore"), "severity:high\n").unwrap();

        let mut warnings = Vec::new();
        let list = IgnoreList::load(dir.path(), &[], true, &mut warnings);
        assert!(list.suppresses(&finding("a", "b", Severity::Medium)));
        assert!(!list.suppresses(&finding("a", "b", Severity::High)));

        let list = IgnoreList::load(dir.path(), &[], false, &mut warnings);
        assert!(list.is_empty());
    }
}
