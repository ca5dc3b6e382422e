//! Model output: JSON extraction, the strict wire schema, and its typed form.

use crate::chunker::enclosing_function_name;
use crate::models::{Finding, FindingKind, FileRecord, Location, Severity};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

/// Pulls the JSON object out of a model reply: a fenced block first, then the
/// outermost braces, else the trimmed text.
pub fn extract_json(text: &str) -> &str {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    static BRACES: OnceLock<Option<Regex>> = OnceLock::new();
    let fenced = FENCED.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").ok());
    let braces = BRACES.get_or_init(|| Regex::new(r"(?s)(\{.*\})").ok());

    for re in [fenced, braces].into_iter().flatten() {
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            return m.as_str();
        }
    }
    text.trim()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireReport {
    vulnerabilities: Vec<WireIssue>,
    code_review: Vec<WireIssue>,
    auto_comments: Vec<WireComment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireIssue {
    severity: Option<String>,
    title: Option<String>,
    description: Option<String>,
    start_line: Option<usize>,
    end_line: Option<usize>,
    rule_id: Option<String>,
    cwe_id: Option<String>,
    owasp_category: Option<String>,
    suggestion: Option<String>,
    code_snippet: Option<String>,
    fixed_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireComment {
    line: Option<usize>,
    comment: String,
}

/// One reported item, before it is pinned to a file and given an id.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisItem {
    pub kind: FindingKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub rule_id: Option<String>,
    pub cwe_id: Option<String>,
    pub owasp_category: Option<String>,
    pub suggestion: Option<String>,
    pub code_snippet: Option<String>,
    pub fixed_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredFindings {
    pub items: Vec<AnalysisItem>,
}

impl StructuredFindings {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Missing or unrecognised severities take the kind's default.
fn resolve_severity(raw: Option<&str>, kind: FindingKind, default: Severity) -> Severity {
    match raw {
        None => default,
        Some(raw) => Severity::parse(raw).unwrap_or_else(|| {
            debug!(severity = raw, kind = %kind, fallback = %default, "unrecognised severity from model");
            default
        }),
    }
}

impl WireIssue {
    fn into_item(self, kind: FindingKind, default_severity: Severity, default_title: &str) -> AnalysisItem {
        AnalysisItem {
            kind,
            severity: resolve_severity(self.severity.as_deref(), kind, default_severity),
            title: self.title.unwrap_or_else(|| default_title.to_string()),
            description: self.description.unwrap_or_default(),
            start_line: self.start_line,
            end_line: self.end_line,
            rule_id: self.rule_id,
            cwe_id: self.cwe_id,
            owasp_category: self.owasp_category,
            suggestion: self.suggestion,
            code_snippet: self.code_snippet,
            fixed_code: self.fixed_code,
        }
    }
}

/// Parses a raw model reply into typed items. Any failure here counts as a
/// failed attempt.
pub fn parse_report(text: &str) -> Result<StructuredFindings, String> {
    let json = extract_json(text);
    let report: WireReport = serde_json::from_str(json).map_err(|e| e.to_string())?;

    let mut items = Vec::with_capacity(
        report.vulnerabilities.len() + report.code_review.len() + report.auto_comments.len(),
    );
    items.extend(
        report
            .vulnerabilities
            .into_iter()
            .map(|v| v.into_item(FindingKind::Vulnerability, Severity::Medium, "Security vulnerability")),
    );
    items.extend(
        report
            .code_review
            .into_iter()
            .map(|r| r.into_item(FindingKind::CodeReview, Severity::Info, "Code review finding")),
    );
    items.extend(report.auto_comments.into_iter().map(|c| AnalysisItem {
        kind: FindingKind::AutoComment,
        severity: Severity::Info,
        title: "Suggested comment".to_string(),
        description: c.comment,
        start_line: c.line,
        end_line: c.line,
        rule_id: None,
        cwe_id: None,
        owasp_category: None,
        suggestion: None,
        code_snippet: None,
        fixed_code: None,
    }));
    Ok(StructuredFindings { items })
}

impl AnalysisItem {
    /// Pins the item to `file` with a fresh id. Missing start defaults to
    /// line 1 and missing end to the start line.
    pub fn into_finding(self, file: &FileRecord) -> Finding {
        let start_line = self.start_line.filter(|l| *l > 0).unwrap_or(1);
        let end_line = self.end_line.filter(|l| *l >= start_line).unwrap_or(start_line);
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind,
            severity: self.severity,
            title: self.title,
            description: self.description,
            location: Location {
                file_path: file.relative_path.clone(),
                start_line,
                end_line,
                function_name: enclosing_function_name(&file.content, &file.language, start_line),
            },
            rule_id: self.rule_id,
            cwe_id: self.cwe_id,
            owasp_category: self.owasp_category,
            suggestion: self.suggestion,
            code_snippet: self.code_snippet,
            fixed_code: self.fixed_code,
        }
    }
}
