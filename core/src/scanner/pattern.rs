use crate::error::{CoreError, Result};
use crate::rules::model::{Combinator, PatternSpec, Rule};
use crate::scanner::aggregate::SourceMeta;
use regex::{Regex, RegexBuilder};
use std::path::Path;

/// Flags applied when a pattern declares none.
pub const DEFAULT_FLAGS: &str = "gi";

/// One match of one pattern. `offset` is a byte offset into the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMatch {
    pub pattern_key: String,
    pub text: String,
    pub offset: usize,
}

/// An immutable compiled pattern. `Regex` holds no scan position, so a
/// compiled pattern can be shared across threads; every call to
/// [`CompiledPattern::find_all`] keeps its own cursor.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    key: String,
    regex: Regex,
}

impl CompiledPattern {
    pub fn compile(source_id: &str, spec: &PatternSpec) -> Result<Self> {
        let error = |reason: String| CoreError::PatternCompile {
            source_id: source_id.to_string(),
            key: spec.key.clone(),
            reason,
        };

        let flags = spec.flags.as_deref().unwrap_or(DEFAULT_FLAGS);
        let mut builder = RegexBuilder::new(&spec.pattern);
        for flag in flags.chars() {
            match flag {
                'g' | 'u' | 'd' => {}
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                other => return Err(error(format!("unsupported flag '{}'", other))),
            }
        }

        let regex = builder.build().map_err(|e| error(e.to_string()))?;
        Ok(Self {
            key: spec.key.clone(),
            regex,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Global scan: each search resumes at the previous match end. A
    /// zero-width match moves the cursor forward by one character so the
    /// scan always terminates.
    pub fn find_all(&self, content: &str) -> Vec<RawMatch> {
        let mut matches = Vec::new();
        let mut cursor = 0;

        while cursor <= content.len() {
            let Some(m) = self.regex.find_at(content, cursor) else {
                break;
            };

            matches.push(RawMatch {
                pattern_key: self.key.clone(),
                text: m.as_str().to_string(),
                offset: m.start(),
            });

            cursor = if m.end() > m.start() {
                m.end()
            } else {
                match content[m.end()..].chars().next() {
                    Some(c) => m.end() + c.len_utf8(),
                    None => break,
                }
            };
        }

        matches
    }
}

/// Runs every pattern against the content and applies the combinator.
pub fn evaluate(patterns: &[CompiledPattern], combinator: Combinator, content: &str) -> Vec<RawMatch> {
    match combinator {
        Combinator::AnyOf => patterns.iter().flat_map(|p| p.find_all(content)).collect(),
        Combinator::AllOf => {
            let mut all = Vec::new();
            for pattern in patterns {
                let found = pattern.find_all(content);
                if found.is_empty() {
                    return Vec::new();
                }
                all.extend(found);
            }
            all
        }
    }
}

/// A rule with its patterns compiled, ready to be shared read-only by
/// concurrent file scans.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub meta: SourceMeta,
    pub patterns: Vec<CompiledPattern>,
}

impl CompiledRule {
    /// Compiles each pattern on its own. Invalid patterns are dropped and
    /// returned as errors; an `all-of` rule that lost a pattern can never
    /// be satisfied and yields `None`.
    pub fn compile(rule: &Rule) -> (Option<Self>, Vec<CoreError>) {
        let mut patterns = Vec::with_capacity(rule.patterns.len());
        let mut errors = Vec::new();

        for spec in &rule.patterns {
            match CompiledPattern::compile(&rule.id, spec) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => errors.push(e),
            }
        }

        let unusable = patterns.is_empty() || (rule.combinator == Combinator::AllOf && !errors.is_empty());
        if unusable {
            return (None, errors);
        }

        let compiled = Self {
            rule: rule.clone(),
            meta: SourceMeta::from_rule(rule),
            patterns,
        };
        (Some(compiled), errors)
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn applies_to(&self, path: &Path) -> bool {
        extension_matches(&self.rule.extensions, path)
    }

    pub fn evaluate(&self, content: &str) -> Vec<RawMatch> {
        evaluate(&self.patterns, self.rule.combinator, content)
    }
}

/// Empty lists match every file. Entries may be written with or without
/// the leading dot.
pub fn extension_matches(extensions: &[String], path: &Path) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::Severity;

    fn spec(key: &str, pattern: &str, flags: Option<&str>) -> PatternSpec {
        PatternSpec {
            key: key.into(),
            pattern: pattern.into(),
            flags: flags.map(str::to_string),
        }
    }

    fn rule(patterns: Vec<PatternSpec>, combinator: Combinator) -> Rule {
        Rule {
            id: "jwt-algorithm-confusion".into(),
            name: "JWT Algorithm Confusion".into(),
            severity: Severity::High,
            description: "Potential JWT algorithm confusion attack".into(),
            recommendation: String::new(),
            patterns,
            combinator,
            enabled: true,
            extensions: Vec::new(),
        }
    }

    #[test]
    fn default_flags_are_case_insensitive() {
        let p = CompiledPattern::compile("r", &spec("k", "password", None)).unwrap();
        assert_eq!(p.find_all("PassWord password").len(), 2);

        let strict = CompiledPattern::compile("r", &spec("k", "password", Some("g"))).unwrap();
        assert_eq!(strict.find_all("PassWord password").len(), 1);
    }

    #[test]
    fn reports_every_match_with_offsets() {
        let p = CompiledPattern::compile("r", &spec("eval", r"eval\(", None)).unwrap();
        let found = p.find_all("eval(a); x; eval(b)");
        let offsets: Vec<usize> = found.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 12]);
        assert!(found.iter().all(|m| m.text == "eval(" && m.pattern_key == "eval"));
    }

    #[test]
    fn zero_width_matches_terminate() {
        let p = CompiledPattern::compile("r", &spec("opt", "(ab)?", None)).unwrap();
        let content = "x".repeat(10_000);
        let found = p.find_all(&content);
        assert_eq!(found.len(), 10_001);
        assert!(found.iter().all(|m| m.text.is_empty()));
    }

    #[test]
    fn zero_width_cursor_respects_char_boundaries() {
        let p = CompiledPattern::compile("r", &spec("opt", "z?", None)).unwrap();
        let found = p.find_all("é漢");
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn flags_and_unsupported_syntax() {
        let dotall = CompiledPattern::compile("r", &spec("k", "a.b", Some("s"))).unwrap();
        assert_eq!(dotall.find_all("a\nb").len(), 1);

        let multi = CompiledPattern::compile("r", &spec("k", "^x", Some("gm"))).unwrap();
        assert_eq!(multi.find_all("x\nx").len(), 2);

        assert!(matches!(
            CompiledPattern::compile("r", &spec("k", "a", Some("y"))),
            Err(CoreError::PatternCompile { .. })
        ));
        assert!(CompiledPattern::compile("r", &spec("k", "(?<!state:)client_id", None)).is_err());
    }

    #[test]
    fn any_of_fires_per_pattern() {
        let (compiled, errors) = CompiledRule::compile(&rule(
            vec![spec("jwt-verify", r"jwt\.verify\s*\(", None), spec("jwt-none", "none", None)],
            Combinator::AnyOf,
        ));
        assert!(errors.is_empty());
        let found = compiled.unwrap().evaluate("jwt.verify(token, key)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pattern_key, "jwt-verify");
    }

    #[test]
    fn all_of_requires_every_pattern() {
        let (compiled, _) = CompiledRule::compile(&rule(
            vec![spec("jwt-verify", r"jwt\.verify\s*\(", None), spec("jwt-none", "none", None)],
            Combinator::AllOf,
        ));
        let compiled = compiled.unwrap();
        assert!(compiled.evaluate("jwt.verify(token, key)").is_empty());
        assert_eq!(compiled.evaluate("jwt.verify(t, { algorithm: 'none' })").len(), 2);
    }

    #[test]
    fn broken_pattern_only_drops_itself_for_any_of() {
        let patterns = vec![spec("bad", "(", None), spec("good", "eval", None)];
        let (compiled, errors) = CompiledRule::compile(&rule(patterns.clone(), Combinator::AnyOf));
        assert_eq!(errors.len(), 1);
        assert_eq!(compiled.unwrap().patterns.len(), 1);

        let (compiled, errors) = CompiledRule::compile(&rule(patterns, Combinator::AllOf));
        assert_eq!(errors.len(), 1);
        assert!(compiled.is_none());
    }

    #[test]
    fn extension_filter() {
        let exts = vec![".vue".to_string(), "ts".to_string()];
        assert!(extension_matches(&exts, Path::new("a/App.vue")));
        assert!(extension_matches(&exts, Path::new("main.TS")));
        assert!(!extension_matches(&exts, Path::new("main.js")));
        assert!(extension_matches(&[], Path::new("anything")));
    }
}
