use crate::rules::model::{Rule, Severity};
use crate::scanner::lines::LineIndex;
use crate::scanner::pattern::RawMatch;
use crate::scanner::Finding;
use sha1::{Digest, Sha1};
use std::collections::HashSet;

/// Upper bound on `Finding::code_snippet`, in characters.
pub const MAX_SNIPPET_CHARS: usize = 100;

/// Metadata a rule or plugin stamps onto every finding it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMeta {
    /// Rule id or plugin name.
    pub source_id: String,
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
}

impl SourceMeta {
    pub fn from_rule(rule: &Rule) -> Self {
        Self {
            source_id: rule.id.clone(),
            kind: rule.name.clone(),
            severity: rule.severity,
            description: rule.description.clone(),
            recommendation: rule.recommendation.clone(),
        }
    }

    pub fn finding(&self, file: &str, lines: &LineIndex, raw: &RawMatch) -> Finding {
        Finding {
            id: finding_id(&self.source_id, file, raw.offset, &raw.text),
            kind: self.kind.clone(),
            severity: self.severity,
            severity_rank: self.severity.rank(),
            file: file.to_string(),
            line: lines.line_of(raw.offset),
            description: self.description.clone(),
            code_snippet: truncate_snippet(&raw.text),
            recommendation: self.recommendation.clone(),
            source: self.source_id.clone(),
        }
    }
}

/// Stable id over `(source, file, offset, matched text)`, prefixed with the
/// source id so ids stay readable in reports.
pub fn finding_id(source_id: &str, file: &str, offset: usize, text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(file.as_bytes());
    hasher.update([0u8]);
    hasher.update((offset as u64).to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", source_id, &digest[..16])
}

pub fn truncate_snippet(text: &str) -> String {
    match text.char_indices().nth(MAX_SNIPPET_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Collects the findings of one file. Exact duplicates, meaning the same
/// source, offset and matched text, collapse into one finding; matches from
/// different sources at the same spot are all kept.
pub struct FindingAggregator {
    file: String,
    lines: LineIndex,
    seen: HashSet<(String, usize, String)>,
    seen_ids: HashSet<String>,
    findings: Vec<Finding>,
}

impl FindingAggregator {
    pub fn new(file: impl Into<String>, content: &str) -> Self {
        Self {
            file: file.into(),
            lines: LineIndex::new(content),
            seen: HashSet::new(),
            seen_ids: HashSet::new(),
            findings: Vec::new(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn push_matches(&mut self, meta: &SourceMeta, matches: Vec<RawMatch>) {
        for raw in matches {
            let key = (meta.source_id.clone(), raw.offset, raw.text.clone());
            if !self.seen.insert(key) {
                continue;
            }
            let finding = meta.finding(&self.file, &self.lines, &raw);
            self.seen_ids.insert(finding.id.clone());
            self.findings.push(finding);
        }
    }

    /// Plugin findings carry no offsets; their ids are the dedup key.
    pub fn push_findings(&mut self, findings: Vec<Finding>) {
        for finding in findings {
            if self.seen_ids.insert(finding.id.clone()) {
                self.findings.push(finding);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}

/// Converts the raw matches of one source in one file into findings.
pub fn aggregate(raw_matches: Vec<RawMatch>, meta: &SourceMeta, file_path: &str, content: &str) -> Vec<Finding> {
    let mut aggregator = FindingAggregator::new(file_path, content);
    aggregator.push_matches(meta, raw_matches);
    aggregator.into_findings()
}
